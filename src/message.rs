//! The message codec: recursive HEAD/BODY traversal over a [`RecordSchema`].
//!
//! This is the layer above individual field codecs. It owns field
//! declaration order, HEAD/BODY section filtering, hook dispatch, and
//! the min/max size sums used at registration time — none of which any
//! single [`FieldCodec`] needs to know about.

use std::sync::Arc;

use itertools::chain;

use crate::bitstream::Bitstream;
use crate::codec::{CodecCx, FieldCodec};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::schema::{FieldDescriptor, FieldType, RecordSchema};
use crate::value::Record;

fn lookup_codec<'a>(cx: &CodecCx<'a>, desc: &FieldDescriptor) -> Result<&'a Arc<dyn FieldCodec>> {
    cx.registry.codec(&desc.codec).map_err(|e| match e {
        Error::CodecNotFound { name, .. } => Error::CodecNotFound { name, field: desc.name.clone() },
        other => other,
    })
}

/// HEAD fields followed by BODY fields, the order every traversal of
/// a schema's fields uses.
fn ordered_fields(schema: &RecordSchema) -> impl Iterator<Item = &FieldDescriptor> {
    chain(schema.head_fields(), schema.body_fields())
}

/// Encode `record` against `schema`: HEAD fields in declaration order,
/// then BODY fields in declaration order. Sub-records are fully
/// traversed by their own field codec regardless of which section
/// contains them.
pub fn encode_record(registry: &Registry, schema: &RecordSchema, record: &Record) -> Result<Bitstream> {
    let cx = CodecCx { registry, record_name: &schema.name };
    let mut out = Bitstream::new(0);
    for desc in ordered_fields(schema) {
        out.append(&encode_field(&cx, desc, record)?);
    }
    Ok(out)
}

/// Inverse of [`encode_record`].
pub fn decode_record(registry: &Registry, schema: &RecordSchema, bits: &Bitstream) -> Result<(Record, usize)> {
    let cx = CodecCx { registry, record_name: &schema.name };
    let mut record = Record::new();
    let mut consumed = 0;
    for desc in ordered_fields(schema) {
        let remaining = bits.slice(consumed, bits.len() - consumed);
        consumed += decode_field(&cx, desc, &remaining, &mut record)?;
    }
    Ok((record, consumed))
}

fn encode_field(cx: &CodecCx, desc: &FieldDescriptor, record: &Record) -> Result<Bitstream> {
    let codec = lookup_codec(cx, desc)?;
    if desc.is_repeated() {
        let values = record.get_repeated(&desc.name).unwrap_or(&[]);
        codec.encode_repeated(cx, desc, values)
    } else {
        // A scalar field never set in `record` is treated the same as one
        // explicitly marked missing.
        let value = record.get(&desc.name).cloned().flatten();
        // Per the hooks contract: non-repeated scalar fields only, and
        // only when a value is actually present.
        if let Some(v) = &value {
            codec.hooks(desc, v);
        }
        codec.encode(cx, desc, &value)
    }
}

fn decode_field(
    cx: &CodecCx,
    desc: &FieldDescriptor,
    bits: &Bitstream,
    record: &mut Record,
) -> Result<usize> {
    let codec = lookup_codec(cx, desc)?;
    if desc.is_repeated() {
        let (values, used) = codec.decode_repeated(cx, desc, bits)?;
        record.set_repeated(desc.name.clone(), values);
        Ok(used)
    } else {
        let (value, used) = codec.decode(cx, desc, bits)?;
        match value {
            Some(v) => record.set(desc.name.clone(), v),
            None => record.set_missing(desc.name.clone()),
        }
        Ok(used)
    }
}

// A nested record's size isn't knowable from its FieldDescriptor alone
// (the codec trait's size methods take no registry): recurse through
// the referenced schema directly instead of asking RecordCodec.
fn field_min_bits(registry: &Registry, desc: &FieldDescriptor) -> Result<usize> {
    if let FieldType::Record { schema_name } = &desc.field_type {
        let per_copy = min_size_bits(registry, registry.schema(schema_name)?)?;
        let max_repeat = u64::from(desc.max_repeat.unwrap_or(0));
        return Ok(if desc.is_repeated() {
            // Zero copies is always valid for a repeated field.
            crate::codec::bits_needed(max_repeat + 1)
        } else {
            per_copy
        });
    }
    let codec = registry.codec(&desc.codec)?;
    Ok(if desc.is_repeated() {
        codec.min_size_repeated_bits(desc)
    } else {
        codec.min_size_bits(desc)
    })
}

fn field_max_bits(registry: &Registry, desc: &FieldDescriptor) -> Result<usize> {
    if let FieldType::Record { schema_name } = &desc.field_type {
        let per_copy = max_size_bits(registry, registry.schema(schema_name)?)?;
        let max_repeat = u64::from(desc.max_repeat.unwrap_or(0));
        return Ok(if desc.is_repeated() {
            crate::codec::bits_needed(max_repeat + 1) + (max_repeat as usize) * per_copy
        } else {
            per_copy
        });
    }
    let codec = registry.codec(&desc.codec)?;
    Ok(if desc.is_repeated() {
        codec.max_size_repeated_bits(desc)
    } else {
        codec.max_size_bits(desc)
    })
}

/// `Σ min_size(f)` over every non-omitted field of `schema`.
pub fn min_size_bits(registry: &Registry, schema: &RecordSchema) -> Result<usize> {
    schema
        .head_fields()
        .chain(schema.body_fields())
        .try_fold(0, |acc, f| Ok(acc + field_min_bits(registry, f)?))
}

/// `Σ max_size(f)` over every non-omitted field of `schema`.
pub fn max_size_bits(registry: &Registry, schema: &RecordSchema) -> Result<usize> {
    schema
        .head_fields()
        .chain(schema.body_fields())
        .try_fold(0, |acc, f| Ok(acc + field_max_bits(registry, f)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, FieldType, RecordSchemaBuilder, Section};
    use crate::value::FieldValue;

    fn build_registry() -> (Registry, RecordSchema) {
        let mut registry = Registry::new();
        let schema = RecordSchemaBuilder::new("point", 1)
            .field(FieldDescriptor::new(
                "x",
                FieldType::BoundedInt { lo: 0, hi: 100, bits: None },
                Section::Head,
            ))
            .field(FieldDescriptor::new("flag", FieldType::Bool, Section::Body))
            .build();
        registry.register_record(schema.clone()).unwrap();
        (registry, schema)
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let (registry, schema) = build_registry();
        let record = Record::new().with("x", FieldValue::Int(42)).with("flag", FieldValue::Bool(true));
        let bits = encode_record(&registry, &schema, &record).unwrap();
        let (decoded, used) = decode_record(&registry, &schema, &bits).unwrap();
        assert_eq!(used, bits.len());
        assert_eq!(decoded.get("x"), Some(&Some(FieldValue::Int(42))));
        assert_eq!(decoded.get("flag"), Some(&Some(FieldValue::Bool(true))));
    }

    #[test]
    fn unset_scalar_decodes_as_missing_sentinel_round_trip() {
        let (registry, schema) = build_registry();
        let record = Record::new().with("flag", FieldValue::Bool(false));
        let bits = encode_record(&registry, &schema, &record).unwrap();
        let (decoded, _) = decode_record(&registry, &schema, &bits).unwrap();
        assert_eq!(decoded.get("x"), Some(&None));
    }

    #[test]
    fn size_sums_match_field_bounds() {
        let (registry, schema) = build_registry();
        // x: BoundedInt[0,100] -> 101+1=102 values -> 7 bits. flag: 1 bit.
        assert_eq!(min_size_bits(&registry, &schema).unwrap(), 8);
        assert_eq!(max_size_bits(&registry, &schema).unwrap(), 8);
    }
}
