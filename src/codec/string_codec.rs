//! The default string codecs: a fixed-width byte string, and a
//! length-prefixed variable one.

use crate::bitstream::Bitstream;
use crate::codec::{CodecCx, FieldCodec, bits_needed};
use crate::error::{Error, Result};
use crate::schema::{FieldDescriptor, FieldType};
use crate::value::FieldValue;

fn as_str(value: &FieldValue, field: &str) -> Result<&str> {
    match value {
        FieldValue::Str(s) => Ok(s.as_str()),
        other => Err(Error::SchemaError {
            record: String::new(),
            reason: format!("field `{field}` got non-string value {other:?}"),
        }),
    }
}

fn bytes_to_bits(bytes: &[u8]) -> Bitstream {
    (0..bytes.len() * 8)
        .map(|i| (bytes[i / 8] >> (i % 8)) & 1 == 1)
        .collect()
}

/// Codec for `FieldType::FixedString`: exactly `len` bytes, verbatim.
/// There is no missing-sentinel; a missing value encodes as `len` zero
/// bytes, matching [`crate::codec::BoolCodec`]'s treatment of `None`.
#[derive(Default)]
pub struct FixedStringCodec;

fn fixed_len(desc: &FieldDescriptor) -> Result<usize> {
    match desc.field_type {
        FieldType::FixedString { len } => Ok(len),
        _ => Err(Error::SchemaError {
            record: String::new(),
            reason: format!("field `{}` uses fixed_string codec but isn't a FixedString", desc.name),
        }),
    }
}

impl FieldCodec for FixedStringCodec {
    fn encode(
        &self,
        _cx: &CodecCx,
        desc: &FieldDescriptor,
        value: &Option<FieldValue>,
    ) -> Result<Bitstream> {
        let len = fixed_len(desc)?;
        let mut bytes = vec![0u8; len];
        if let Some(v) = value {
            let s = as_str(v, &desc.name)?;
            let src = s.as_bytes();
            if src.len() > len {
                return Err(Error::EncodeOverflow {
                    record: String::new(),
                    got: src.len() * 8,
                    max: len * 8,
                });
            }
            bytes[..src.len()].copy_from_slice(src);
        }
        Ok(bytes_to_bits(&bytes))
    }

    fn decode(
        &self,
        _cx: &CodecCx,
        desc: &FieldDescriptor,
        bits: &Bitstream,
    ) -> Result<(Option<FieldValue>, usize)> {
        let len = fixed_len(desc)?;
        let n_bits = len * 8;
        if bits.len() < n_bits {
            return Err(Error::DecodeUnderflow {
                record: String::new(),
                field: desc.name.clone(),
                needed: n_bits,
                had: bits.len(),
            });
        }
        let bytes = bits.slice(0, n_bits).to_bytes();
        let trimmed: Vec<u8> = bytes.into_iter().take_while(|b| *b != 0).collect();
        let s = String::from_utf8(trimmed).map_err(|e| Error::DecodeCorrupt {
            record: String::new(),
            field: desc.name.clone(),
            reason: format!("not valid utf-8: {e}"),
        })?;
        Ok((Some(FieldValue::Str(s)), n_bits))
    }

    fn min_size_bits(&self, desc: &FieldDescriptor) -> usize {
        fixed_len(desc).map(|l| l * 8).unwrap_or(0)
    }

    fn max_size_bits(&self, desc: &FieldDescriptor) -> usize {
        fixed_len(desc).map(|l| l * 8).unwrap_or(0)
    }

    fn validate(&self, desc: &FieldDescriptor) -> Result<()> {
        fixed_len(desc)?;
        Ok(())
    }

    fn info(&self, desc: &FieldDescriptor) -> String {
        format!("{}: fixed_string({} bytes)", desc.name, fixed_len(desc).unwrap_or(0))
    }
}

/// Codec for `FieldType::VarString`: a `ceil(log2(max+1))`-bit length
/// prefix, then that many bytes. There is no missing-sentinel, mirroring
/// [`FixedStringCodec`]: a missing value encodes as length `0`, the same
/// as an explicit empty string.
#[derive(Default)]
pub struct VarStringCodec;

fn var_max(desc: &FieldDescriptor) -> Result<usize> {
    match desc.field_type {
        FieldType::VarString { max } => Ok(max),
        _ => Err(Error::SchemaError {
            record: String::new(),
            reason: format!("field `{}` uses var_string codec but isn't a VarString", desc.name),
        }),
    }
}

fn len_bits(max: usize) -> usize {
    bits_needed(max as u64 + 1)
}

impl FieldCodec for VarStringCodec {
    fn encode(
        &self,
        _cx: &CodecCx,
        desc: &FieldDescriptor,
        value: &Option<FieldValue>,
    ) -> Result<Bitstream> {
        let max = var_max(desc)?;
        let prefix_bits = len_bits(max);
        match value {
            None => Ok(Bitstream::with_value(prefix_bits, 0)),
            Some(v) => {
                let s = as_str(v, &desc.name)?;
                let bytes = s.as_bytes();
                if bytes.len() > max {
                    return Err(Error::EncodeOverflow {
                        record: String::new(),
                        got: bytes.len() * 8,
                        max: max * 8,
                    });
                }
                let mut out = Bitstream::with_value(prefix_bits, bytes.len() as u64);
                out.append(&bytes_to_bits(bytes));
                Ok(out)
            }
        }
    }

    fn decode(
        &self,
        _cx: &CodecCx,
        desc: &FieldDescriptor,
        bits: &Bitstream,
    ) -> Result<(Option<FieldValue>, usize)> {
        let max = var_max(desc)?;
        let prefix_bits = len_bits(max);
        if bits.len() < prefix_bits {
            return Err(Error::DecodeUnderflow {
                record: String::new(),
                field: desc.name.clone(),
                needed: prefix_bits,
                had: bits.len(),
            });
        }
        let len = bits.slice(0, prefix_bits).to_unsigned()?;
        if len > max as u64 {
            return Err(Error::DecodeCorrupt {
                record: String::new(),
                field: desc.name.clone(),
                reason: format!("length code {len} exceeds max {max}"),
            });
        }
        let data_bits = len as usize * 8;
        let total = prefix_bits + data_bits;
        if bits.len() < total {
            return Err(Error::DecodeUnderflow {
                record: String::new(),
                field: desc.name.clone(),
                needed: total,
                had: bits.len(),
            });
        }
        let bytes = bits.slice(prefix_bits, data_bits).to_bytes();
        let s = String::from_utf8(bytes).map_err(|e| Error::DecodeCorrupt {
            record: String::new(),
            field: desc.name.clone(),
            reason: format!("not valid utf-8: {e}"),
        })?;
        Ok((Some(FieldValue::Str(s)), total))
    }

    fn min_size_bits(&self, desc: &FieldDescriptor) -> usize {
        var_max(desc).map(len_bits).unwrap_or(0)
    }

    fn max_size_bits(&self, desc: &FieldDescriptor) -> usize {
        var_max(desc).map(|m| len_bits(m) + m * 8).unwrap_or(0)
    }

    fn validate(&self, desc: &FieldDescriptor) -> Result<()> {
        var_max(desc)?;
        Ok(())
    }

    fn info(&self, desc: &FieldDescriptor) -> String {
        format!(
            "{}: var_string(max {} bytes, {} bit prefix)",
            desc.name,
            var_max(desc).unwrap_or(0),
            var_max(desc).map(len_bits).unwrap_or(0)
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
    fn fixed_string_round_trips_and_pads() {
        let codec = FixedStringCodec;
        let registry = Registry::new();
        let desc = FieldDescriptor::new("tag", FieldType::FixedString { len: 8 }, Section::Body);
        let bits = codec.encode(&cx(&registry), &desc, &Some(FieldValue::Str("hi".into()))).unwrap();
        assert_eq!(bits.len(), 64);
        let (decoded, used) = codec.decode(&cx(&registry), &desc, &bits).unwrap();
        assert_eq!(used, 64);
        assert_eq!(decoded, Some(FieldValue::Str("hi".into())));
    }

    #[test]
    fn fixed_string_rejects_overlong_value() {
        let codec = FixedStringCodec;
        let registry = Registry::new();
        let desc = FieldDescriptor::new("tag", FieldType::FixedString { len: 2 }, Section::Body);
        assert!(codec.encode(&cx(&registry), &desc, &Some(FieldValue::Str("abc".into()))).is_err());
    }

    #[test]
    fn var_string_round_trips_value_and_missing() {
        let codec = VarStringCodec;
        let registry = Registry::new();
        let desc = FieldDescriptor::new("note", FieldType::VarString { max: 20 }, Section::Body);
        let bits = codec.encode(&cx(&registry), &desc, &Some(FieldValue::Str("hello".into()))).unwrap();
        let (decoded, used) = codec.decode(&cx(&registry), &desc, &bits).unwrap();
        assert_eq!(used, bits.len());
        assert_eq!(decoded, Some(FieldValue::Str("hello".into())));

        // No missing-sentinel for var_string (see FixedStringCodec):
        // an absent value round-trips as an empty string.
        let missing_bits = codec.encode(&cx(&registry), &desc, &None).unwrap();
        let (decoded, _) = codec.decode(&cx(&registry), &desc, &missing_bits).unwrap();
        assert_eq!(decoded, Some(FieldValue::Str(String::new())));
    }

    #[test]
    fn var_string_rejects_overlong_value() {
        let codec = VarStringCodec;
        let registry = Registry::new();
        let desc = FieldDescriptor::new("note", FieldType::VarString { max: 3 }, Section::Body);
        assert!(codec.encode(&cx(&registry), &desc, &Some(FieldValue::Str("abcd".into()))).is_err());
    }
}
