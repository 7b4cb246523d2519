//! The default `bool` codec: one bit, `0` = false.

use crate::bitstream::Bitstream;
use crate::codec::{CodecCx, FieldCodec};
use crate::error::{Error, Result};
use crate::schema::FieldDescriptor;
use crate::value::FieldValue;

/// One-bit boolean codec. There is no missing-sentinel for bools: a
/// `None` value encodes as `false`.
#[derive(Default)]
pub struct BoolCodec;

impl FieldCodec for BoolCodec {
    fn encode(
        &self,
        _cx: &CodecCx,
        _desc: &FieldDescriptor,
        value: &Option<FieldValue>,
    ) -> Result<Bitstream> {
        let v = matches!(value, Some(FieldValue::Bool(true)));
        Ok(Bitstream::with_value(1, u64::from(v)))
    }

    fn decode(
        &self,
        _cx: &CodecCx,
        desc: &FieldDescriptor,
        bits: &Bitstream,
    ) -> Result<(Option<FieldValue>, usize)> {
        if bits.len() < 1 {
            return Err(Error::DecodeUnderflow {
                record: String::new(),
                field: desc.name.clone(),
                needed: 1,
                had: bits.len(),
            });
        }
        let v = bits.slice(0, 1).to_unsigned()? != 0;
        Ok((Some(FieldValue::Bool(v)), 1))
    }

    fn min_size_bits(&self, _desc: &FieldDescriptor) -> usize {
        1
    }

    fn max_size_bits(&self, _desc: &FieldDescriptor) -> usize {
        1
    }

    fn validate(&self, _desc: &FieldDescriptor) -> Result<()> {
        Ok(())
    }

    fn info(&self, desc: &FieldDescriptor) -> String {
        format!("{}: bool (1 bit)", desc.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::schema::Section;

    #[test]
    fn round_trips_true_and_false() {
        let codec = BoolCodec;
        let registry = Registry::new();
        let cx = CodecCx {
            registry: &registry,
            record_name: "test",
        };
        let desc = FieldDescriptor::new("flag", crate::schema::FieldType::Bool, Section::Body);
        for v in [true, false] {
            let bits = codec.encode(&cx, &desc, &Some(FieldValue::Bool(v))).unwrap();
            assert_eq!(bits.len(), 1);
            let (decoded, used) = codec.decode(&cx, &desc, &bits).unwrap();
            assert_eq!(used, 1);
            assert_eq!(decoded, Some(FieldValue::Bool(v)));
        }
    }

    #[test]
    fn missing_encodes_false() {
        let codec = BoolCodec;
        let registry = Registry::new();
        let cx = CodecCx {
            registry: &registry,
            record_name: "test",
        };
        let desc = FieldDescriptor::new("flag", crate::schema::FieldType::Bool, Section::Body);
        let bits = codec.encode(&cx, &desc, &None).unwrap();
        assert_eq!(bits.to_unsigned().unwrap(), 0);
    }
}
