//! The default bounded-integer codec.
//!
//! Value `v` in `[lo, hi]` is encoded as `v - lo` in
//! `ceil(log2(hi - lo + 2))` bits; the sentinel `hi - lo + 1` encodes
//! *missing*.

use crate::bitstream::Bitstream;
use crate::codec::{CodecCx, FieldCodec, bits_needed};
use crate::error::{Error, Result};
use crate::schema::{FieldDescriptor, FieldType};
use crate::value::FieldValue;

/// Codec for `FieldType::BoundedInt`.
#[derive(Default)]
pub struct BoundedIntCodec;

fn bounds(desc: &FieldDescriptor) -> Result<(i64, i64)> {
    match desc.field_type {
        FieldType::BoundedInt { lo, hi, .. } => Ok((lo, hi)),
        _ => Err(Error::SchemaError {
            record: String::new(),
            reason: format!("field `{}` uses bounded_int codec but isn't a BoundedInt", desc.name),
        }),
    }
}

fn natural_bits(lo: i64, hi: i64) -> usize {
    // hi - lo real values, plus one sentinel for "missing".
    bits_needed((hi - lo) as u64 + 2)
}

fn field_bits(desc: &FieldDescriptor) -> Result<usize> {
    let (lo, hi) = bounds(desc)?;
    let natural = natural_bits(lo, hi);
    Ok(match desc.field_type {
        FieldType::BoundedInt { bits: Some(b), .. } => natural.max(b as usize),
        _ => natural,
    })
}

impl FieldCodec for BoundedIntCodec {
    fn encode(
        &self,
        _cx: &CodecCx,
        desc: &FieldDescriptor,
        value: &Option<FieldValue>,
    ) -> Result<Bitstream> {
        let (lo, hi) = bounds(desc)?;
        let bits = field_bits(desc)?;
        let missing_code = (hi - lo + 1) as u64;
        let code = match value {
            None => missing_code,
            Some(FieldValue::Int(v)) => {
                if *v < lo || *v > hi {
                    return Err(Error::EncodeOverflow {
                        record: String::new(),
                        got: bits,
                        max: bits,
                    });
                }
                (*v - lo) as u64
            }
            Some(other) => {
                return Err(Error::SchemaError {
                    record: String::new(),
                    reason: format!("field `{}` got non-integer value {other:?}", desc.name),
                });
            }
        };
        Ok(Bitstream::with_value(bits, code))
    }

    fn decode(
        &self,
        _cx: &CodecCx,
        desc: &FieldDescriptor,
        bits: &Bitstream,
    ) -> Result<(Option<FieldValue>, usize)> {
        let (lo, hi) = bounds(desc)?;
        let n_bits = field_bits(desc)?;
        if bits.len() < n_bits {
            return Err(Error::DecodeUnderflow {
                record: String::new(),
                field: desc.name.clone(),
                needed: n_bits,
                had: bits.len(),
            });
        }
        let code = bits.slice(0, n_bits).to_unsigned()?;
        let missing_code = (hi - lo + 1) as u64;
        if code == missing_code {
            return Ok((None, n_bits));
        }
        if code > missing_code {
            return Err(Error::DecodeCorrupt {
                record: String::new(),
                field: desc.name.clone(),
                reason: format!("code {code} exceeds missing-sentinel {missing_code}"),
            });
        }
        Ok((Some(FieldValue::Int(lo + code as i64)), n_bits))
    }

    fn min_size_bits(&self, desc: &FieldDescriptor) -> usize {
        field_bits(desc).unwrap_or(0)
    }

    fn max_size_bits(&self, desc: &FieldDescriptor) -> usize {
        field_bits(desc).unwrap_or(0)
    }

    fn validate(&self, desc: &FieldDescriptor) -> Result<()> {
        let (lo, hi) = bounds(desc)?;
        if lo > hi {
            return Err(Error::SchemaError {
                record: String::new(),
                reason: format!("field `{}` has lo={lo} > hi={hi}", desc.name),
            });
        }
        if let FieldType::BoundedInt { bits: Some(b), .. } = desc.field_type {
            let natural = natural_bits(lo, hi);
            if (b as usize) < natural {
                return Err(Error::SchemaError {
                    record: String::new(),
                    reason: format!(
                        "field `{}` forces {b} bits, fewer than the {natural} needed for [{lo}, {hi}] plus the missing-sentinel",
                        desc.name
                    ),
                });
            }
        }
        Ok(())
    }

    fn info(&self, desc: &FieldDescriptor) -> String {
        let (lo, hi) = bounds(desc).unwrap_or((0, 0));
        format!(
            "{}: bounded_int[{lo}, {hi}] ({} bits)",
            desc.name,
            field_bits(desc).unwrap_or(0)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::schema::Section;

    fn cx(registry: &Registry) -> CodecCx<'_> {
        CodecCx {
            registry,
            record_name: "test",
        }
    }

    #[test]
    fn bounded_int_700_in_0_to_1023_is_11_bits() {
        let codec = BoundedIntCodec;
        let registry = Registry::new();
        let desc = FieldDescriptor::new(
            "v",
            FieldType::BoundedInt { lo: 0, hi: 1023, bits: None },
            Section::Body,
        );
        let bits = codec.encode(&cx(&registry), &desc, &Some(FieldValue::Int(700))).unwrap();
        assert_eq!(bits.len(), 11);
        assert_eq!(bits.to_unsigned().unwrap(), 700);
        let (decoded, used) = codec.decode(&cx(&registry), &desc, &bits).unwrap();
        assert_eq!(used, 11);
        assert_eq!(decoded, Some(FieldValue::Int(700)));
    }

    #[test]
    fn all_ones_is_missing_sentinel() {
        let codec = BoundedIntCodec;
        let registry = Registry::new();
        let desc = FieldDescriptor::new(
            "v",
            FieldType::BoundedInt { lo: 0, hi: 1023, bits: None },
            Section::Body,
        );
        let bits = Bitstream::with_value(11, 1024);
        let (decoded, used) = codec.decode(&cx(&registry), &desc, &bits).unwrap();
        assert_eq!(used, 11);
        assert_eq!(decoded, None);
    }

    #[test]
    fn out_of_range_value_rejected() {
        let codec = BoundedIntCodec;
        let registry = Registry::new();
        let desc = FieldDescriptor::new(
            "v",
            FieldType::BoundedInt { lo: 0, hi: 10, bits: None },
            Section::Body,
        );
        assert!(codec.encode(&cx(&registry), &desc, &Some(FieldValue::Int(11))).is_err());
    }

    #[test]
    fn validate_rejects_lo_greater_than_hi() {
        let codec = BoundedIntCodec;
        let desc = FieldDescriptor::new(
            "v",
            FieldType::BoundedInt { lo: 10, hi: 0, bits: None },
            Section::Body,
        );
        assert!(codec.validate(&desc).is_err());
    }

    #[test]
    fn validate_rejects_forced_width_too_narrow() {
        let codec = BoundedIntCodec;
        let desc = FieldDescriptor::new(
            "v",
            FieldType::BoundedInt { lo: 0, hi: 1023, bits: Some(4) },
            Section::Body,
        );
        assert!(codec.validate(&desc).is_err());
    }
}
