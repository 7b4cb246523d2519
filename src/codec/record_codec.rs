//! The default sub-record codec: recurse into the message codec.
//!
//! A sub-record is always fully traversed regardless of which section
//! the enclosing field declares (it may itself carry both HEAD and BODY
//! fields), and it has no missing-sentinel of its own — a `None` value
//! is a schema error, not an encodable state. Repetition (0 to
//! `max_repeat` copies) is handled by the count-prefixed default in
//! [`FieldCodec::encode_repeated`]/[`FieldCodec::decode_repeated`].

use crate::bitstream::Bitstream;
use crate::codec::{CodecCx, FieldCodec};
use crate::error::{Error, Result};
use crate::message;
use crate::schema::{FieldDescriptor, FieldType};
use crate::value::{FieldValue, Record};

/// Codec for `FieldType::Record`.
#[derive(Default)]
pub struct RecordCodec;

fn schema_name(desc: &FieldDescriptor) -> Result<&str> {
    match &desc.field_type {
        FieldType::Record { schema_name } => Ok(schema_name.as_str()),
        _ => Err(Error::SchemaError {
            record: String::new(),
            reason: format!("field `{}` uses record codec but isn't a Record", desc.name),
        }),
    }
}

impl FieldCodec for RecordCodec {
    fn encode(
        &self,
        cx: &CodecCx,
        desc: &FieldDescriptor,
        value: &Option<FieldValue>,
    ) -> Result<Bitstream> {
        let name = schema_name(desc)?;
        let schema = cx.registry.schema(name)?;
        let nested = match value {
            Some(FieldValue::Record(r)) => r.as_ref(),
            Some(other) => {
                return Err(Error::SchemaError {
                    record: String::new(),
                    reason: format!("field `{}` got non-record value {other:?}", desc.name),
                });
            }
            None => {
                return Err(Error::SchemaError {
                    record: cx.record_name.to_string(),
                    reason: format!("field `{}` is a sub-record and has no missing-sentinel", desc.name),
                });
            }
        };
        message::encode_record(cx.registry, schema, nested)
    }

    fn decode(
        &self,
        cx: &CodecCx,
        desc: &FieldDescriptor,
        bits: &Bitstream,
    ) -> Result<(Option<FieldValue>, usize)> {
        let name = schema_name(desc)?;
        let schema = cx.registry.schema(name)?;
        let (record, used) = message::decode_record(cx.registry, schema, bits)?;
        Ok((Some(FieldValue::Record(Box::new(record))), used))
    }

    fn min_size_bits(&self, _desc: &FieldDescriptor) -> usize {
        // Needs registry access to resolve the nested schema; callers
        // that need the real number go through `message::min_size_bits`
        // / `message::max_size_bits`, which special-case `FieldType::Record`.
        0
    }

    fn max_size_bits(&self, _desc: &FieldDescriptor) -> usize {
        0
    }

    fn validate(&self, desc: &FieldDescriptor) -> Result<()> {
        schema_name(desc)?;
        Ok(())
    }

    fn info(&self, desc: &FieldDescriptor) -> String {
        format!("{}: record({})", desc.name, schema_name(desc).unwrap_or("?"))
    }
}
