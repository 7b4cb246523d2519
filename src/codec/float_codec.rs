//! The default float codec: fixed-point quantization onto a bounded
//! integer.
//!
//! A value `v` in `[lo, hi]` with `precision` decimal digits is
//! transmitted as `round(v * 10^precision)`, itself encoded by
//! [`BoundedIntCodec`] over the scaled integer range. The missing-sentinel
//! and bit width both come from that delegation for free.

use crate::bitstream::Bitstream;
use crate::codec::int_codec::BoundedIntCodec;
use crate::codec::{CodecCx, FieldCodec};
use crate::error::{Error, Result};
use crate::schema::{FieldDescriptor, FieldType};
use crate::value::FieldValue;

/// Codec for `FieldType::Float`.
#[derive(Default)]
pub struct FloatCodec;

fn params(desc: &FieldDescriptor) -> Result<(u32, f64, f64)> {
    match desc.field_type {
        FieldType::Float { precision, lo, hi } => Ok((precision, lo, hi)),
        _ => Err(Error::SchemaError {
            record: String::new(),
            reason: format!("field `{}` uses float codec but isn't a Float", desc.name),
        }),
    }
}

fn scale(precision: u32) -> f64 {
    10f64.powi(precision as i32)
}

/// Build the `BoundedInt` descriptor the scaled value is actually
/// carried by, reusing the field's name so diagnostics still read true.
fn as_bounded_int(desc: &FieldDescriptor, precision: u32, lo: f64, hi: f64) -> FieldDescriptor {
    let s = scale(precision);
    let lo_i = (lo * s).round() as i64;
    let hi_i = (hi * s).round() as i64;
    FieldDescriptor::new(
        desc.name.clone(),
        FieldType::BoundedInt { lo: lo_i, hi: hi_i, bits: None },
        desc.section,
    )
}

impl FieldCodec for FloatCodec {
    fn encode(
        &self,
        cx: &CodecCx,
        desc: &FieldDescriptor,
        value: &Option<FieldValue>,
    ) -> Result<Bitstream> {
        let (precision, lo, hi) = params(desc)?;
        let int_desc = as_bounded_int(desc, precision, lo, hi);
        let int_value = match value {
            None => None,
            Some(FieldValue::Float(v)) => {
                if *v < lo || *v > hi {
                    let bits = BoundedIntCodec.max_size_bits(&int_desc);
                    return Err(Error::EncodeOverflow {
                        record: String::new(),
                        got: bits,
                        max: bits,
                    });
                }
                Some(FieldValue::Int((*v * scale(precision)).round() as i64))
            }
            Some(other) => {
                return Err(Error::SchemaError {
                    record: String::new(),
                    reason: format!("field `{}` got non-float value {other:?}", desc.name),
                });
            }
        };
        BoundedIntCodec.encode(cx, &int_desc, &int_value)
    }

    fn decode(
        &self,
        cx: &CodecCx,
        desc: &FieldDescriptor,
        bits: &Bitstream,
    ) -> Result<(Option<FieldValue>, usize)> {
        let (precision, lo, hi) = params(desc)?;
        let int_desc = as_bounded_int(desc, precision, lo, hi);
        let (decoded, used) = BoundedIntCodec.decode(cx, &int_desc, bits)?;
        let value = match decoded {
            None => None,
            Some(FieldValue::Int(scaled)) => Some(FieldValue::Float(scaled as f64 / scale(precision))),
            Some(_) => unreachable!("BoundedIntCodec only decodes to FieldValue::Int"),
        };
        Ok((value, used))
    }

    fn min_size_bits(&self, desc: &FieldDescriptor) -> usize {
        params(desc)
            .map(|(p, lo, hi)| BoundedIntCodec.min_size_bits(&as_bounded_int(desc, p, lo, hi)))
            .unwrap_or(0)
    }

    fn max_size_bits(&self, desc: &FieldDescriptor) -> usize {
        params(desc)
            .map(|(p, lo, hi)| BoundedIntCodec.max_size_bits(&as_bounded_int(desc, p, lo, hi)))
            .unwrap_or(0)
    }

    fn validate(&self, desc: &FieldDescriptor) -> Result<()> {
        let (precision, lo, hi) = params(desc)?;
        if lo > hi {
            return Err(Error::SchemaError {
                record: String::new(),
                reason: format!("field `{}` has lo={lo} > hi={hi}", desc.name),
            });
        }
        BoundedIntCodec.validate(&as_bounded_int(desc, precision, lo, hi))
    }

    fn info(&self, desc: &FieldDescriptor) -> String {
        let (precision, lo, hi) = params(desc).unwrap_or((0, 0.0, 0.0));
        format!(
            "{}: float[{lo}, {hi}] @ {precision} digits ({} bits)",
            desc.name,
            self.max_size_bits(desc)
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
    fn round_trips_quantized_value() {
        let codec = FloatCodec;
        let registry = Registry::new();
        let desc = FieldDescriptor::new(
            "depth",
            FieldType::Float { precision: 1, lo: 0.0, hi: 100.0 },
            Section::Body,
        );
        let bits = codec.encode(&cx(&registry), &desc, &Some(FieldValue::Float(12.34))).unwrap();
        let (decoded, _) = codec.decode(&cx(&registry), &desc, &bits).unwrap();
        // Rounded to one decimal digit: 12.3.
        assert_eq!(decoded, Some(FieldValue::Float(12.3)));
    }

    #[test]
    fn missing_round_trips() {
        let codec = FloatCodec;
        let registry = Registry::new();
        let desc = FieldDescriptor::new(
            "depth",
            FieldType::Float { precision: 2, lo: -10.0, hi: 10.0 },
            Section::Body,
        );
        let bits = codec.encode(&cx(&registry), &desc, &None).unwrap();
        let (decoded, _) = codec.decode(&cx(&registry), &desc, &bits).unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn out_of_range_rejected() {
        let codec = FloatCodec;
        let registry = Registry::new();
        let desc = FieldDescriptor::new(
            "depth",
            FieldType::Float { precision: 0, lo: 0.0, hi: 10.0 },
            Section::Body,
        );
        assert!(codec.encode(&cx(&registry), &desc, &Some(FieldValue::Float(11.0))).is_err());
    }
}
