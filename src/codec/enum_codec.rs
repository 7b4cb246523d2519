//! The default enum codec: value-index in `ceil(log2(n_values + 1))`
//! bits, with a sentinel for *missing*.

use crate::bitstream::Bitstream;
use crate::codec::{CodecCx, FieldCodec, bits_needed};
use crate::error::{Error, Result};
use crate::schema::{FieldDescriptor, FieldType};
use crate::value::FieldValue;

/// Codec for `FieldType::Enum`.
#[derive(Default)]
pub struct EnumCodec;

fn values(desc: &FieldDescriptor) -> Result<&[String]> {
    match &desc.field_type {
        FieldType::Enum { values, .. } => Ok(values.as_slice()),
        _ => Err(Error::SchemaError {
            record: String::new(),
            reason: format!("field `{}` uses enum codec but isn't an Enum", desc.name),
        }),
    }
}

fn natural_bits(n_values: usize) -> usize {
    bits_needed(n_values as u64 + 1)
}

fn field_bits(desc: &FieldDescriptor) -> Result<usize> {
    let n = values(desc)?.len();
    let natural = natural_bits(n);
    Ok(match desc.field_type {
        FieldType::Enum { bits: Some(b), .. } => natural.max(b as usize),
        _ => natural,
    })
}

impl FieldCodec for EnumCodec {
    fn encode(
        &self,
        _cx: &CodecCx,
        desc: &FieldDescriptor,
        value: &Option<FieldValue>,
    ) -> Result<Bitstream> {
        let n = values(desc)?.len();
        let bits = field_bits(desc)?;
        let missing_code = n as u64;
        let code = match value {
            None => missing_code,
            Some(FieldValue::Enum(idx)) => {
                if (*idx as usize) >= n {
                    return Err(Error::EncodeOverflow {
                        record: String::new(),
                        got: bits,
                        max: bits,
                    });
                }
                u64::from(*idx)
            }
            Some(other) => {
                return Err(Error::SchemaError {
                    record: String::new(),
                    reason: format!("field `{}` got non-enum value {other:?}", desc.name),
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
        let n = values(desc)?.len();
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
        let missing_code = n as u64;
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
        Ok((Some(FieldValue::Enum(code as u32)), n_bits))
    }

    fn min_size_bits(&self, desc: &FieldDescriptor) -> usize {
        field_bits(desc).unwrap_or(0)
    }

    fn max_size_bits(&self, desc: &FieldDescriptor) -> usize {
        field_bits(desc).unwrap_or(0)
    }

    fn validate(&self, desc: &FieldDescriptor) -> Result<()> {
        let vs = values(desc)?;
        if vs.is_empty() {
            return Err(Error::SchemaError {
                record: String::new(),
                reason: format!("field `{}` has an empty enum value set", desc.name),
            });
        }
        if let FieldType::Enum { bits: Some(b), .. } = &desc.field_type {
            let natural = natural_bits(vs.len());
            if (*b as usize) < natural {
                return Err(Error::SchemaError {
                    record: String::new(),
                    reason: format!(
                        "field `{}` forces {b} bits, fewer than the {natural} needed for {} values plus the missing-sentinel",
                        desc.name,
                        vs.len()
                    ),
                });
            }
        }
        Ok(())
    }

    fn info(&self, desc: &FieldDescriptor) -> String {
        let n = values(desc).map(<[String]>::len).unwrap_or(0);
        format!("{}: enum({n} values, {} bits)", desc.name, field_bits(desc).unwrap_or(0))
    }
}
