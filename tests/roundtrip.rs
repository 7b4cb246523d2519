//! Round-trip coverage over the public codec API: bounded-integer
//! encoding and a record whose body spans a 32-bit field plus a flag.

use std::sync::Arc;

use anyhow::Result;

use dccl::bitstream::Bitstream;
use dccl::codec::{CodecCx, FieldCodec};
use dccl::error::Error;
use dccl::registry::Dccl;
use dccl::schema::{require_field, DcclMessage, FieldDescriptor, FieldType, RecordSchema, RecordSchemaBuilder, Section};
use dccl::value::{FieldValue, Record};

/// A plain 32-bit unsigned codec with no missing-sentinel: every value
/// in `u32`'s range is legal, so there's no spare code to reserve for
/// "missing" the way the default `bounded_int` codec would.
struct RawU32Codec;

impl FieldCodec for RawU32Codec {
    fn encode(&self, _cx: &CodecCx, desc: &FieldDescriptor, value: &Option<FieldValue>) -> dccl::error::Result<Bitstream> {
        let v = match value {
            Some(FieldValue::Int(v)) => *v as u64,
            Some(other) => {
                return Err(Error::SchemaError {
                    record: String::new(),
                    reason: format!("field `{}` got non-integer value {other:?}", desc.name),
                })
            }
            None => 0,
        };
        Ok(Bitstream::with_value(32, v))
    }

    fn decode(
        &self,
        _cx: &CodecCx,
        desc: &FieldDescriptor,
        bits: &Bitstream,
    ) -> dccl::error::Result<(Option<FieldValue>, usize)> {
        if bits.len() < 32 {
            return Err(Error::DecodeUnderflow {
                record: String::new(),
                field: desc.name.clone(),
                needed: 32,
                had: bits.len(),
            });
        }
        let v = bits.slice(0, 32).to_unsigned()?;
        Ok((Some(FieldValue::Int(v as i64)), 32))
    }

    fn min_size_bits(&self, _desc: &FieldDescriptor) -> usize {
        32
    }

    fn max_size_bits(&self, _desc: &FieldDescriptor) -> usize {
        32
    }

    fn validate(&self, _desc: &FieldDescriptor) -> dccl::error::Result<()> {
        Ok(())
    }

    fn info(&self, desc: &FieldDescriptor) -> String {
        format!("{}: raw_u32(32 bits, no sentinel)", desc.name)
    }
}

struct BoundedSeq {
    seq: i64,
}

impl DcclMessage for BoundedSeq {
    const NAME: &'static str = "bounded_seq";

    fn schema(dccl_id: u32) -> RecordSchema {
        RecordSchemaBuilder::new(Self::NAME, dccl_id)
            .field(FieldDescriptor::new(
                "seq",
                FieldType::BoundedInt { lo: 0, hi: 1023, bits: None },
                Section::Body,
            ))
            .build()
    }

    fn to_record(&self) -> Record {
        Record::new().with("seq", FieldValue::Int(self.seq))
    }

    fn from_record(record: &Record) -> dccl::error::Result<Self> {
        let v = require_field(record, Self::NAME, "seq")?;
        let FieldValue::Int(seq) = v else {
            return Err(Error::DecodeCorrupt {
                record: Self::NAME.to_string(),
                field: "seq".to_string(),
                reason: "expected an integer".to_string(),
            });
        };
        Ok(Self { seq: *seq })
    }
}

#[test]
fn bounded_int_round_trip() -> Result<()> {
    let mut dccl = Dccl::new();
    dccl.register_record(BoundedSeq::schema(1))?;

    let bytes = dccl.encode::<BoundedSeq>(1, 2, 0).value(&BoundedSeq { seq: 700 })?;
    let decoded: BoundedSeq = dccl.decode(&bytes)?;
    assert_eq!(decoded.seq, 700);
    Ok(())
}

#[test]
fn missing_bounded_int_decodes_as_sentinel() -> Result<()> {
    let mut dccl = Dccl::new();
    dccl.register_record(BoundedSeq::schema(2))?;
    let registry = dccl.registry();
    let schema = registry.schema(BoundedSeq::NAME)?;

    // Leave "seq" unset: it should round-trip as the missing-sentinel,
    // not as some default value.
    let bits = dccl::message::encode_record(registry, schema, &Record::new())?;
    let (decoded, _) = dccl::message::decode_record(registry, schema, &bits)?;
    assert_eq!(decoded.get("seq"), Some(&None));
    Ok(())
}

#[test]
fn body_only_record_packs_a_32_bit_field_and_a_flag_into_33_bits() -> Result<()> {
    // `a` uses a custom 32-bit codec with no missing-sentinel (the
    // default `bounded_int` codec can't represent a full `u32` range
    // plus a sentinel in 32 bits); `b` uses the default bool codec.
    // Together they produce a 32+1=33-bit BODY with an empty HEAD.
    let mut dccl = Dccl::new();
    dccl.register_codec("raw_u32", Arc::new(RawU32Codec))?;
    let schema = RecordSchemaBuilder::new("ab_record", 3)
        .field(
            FieldDescriptor::new("a", FieldType::BoundedInt { lo: 0, hi: u32::MAX as i64, bits: None }, Section::Body)
                .with_codec("raw_u32"),
        )
        .field(FieldDescriptor::new("b", FieldType::Bool, Section::Body))
        .build();
    dccl.register_record(schema)?;

    let registry = dccl.registry();
    let schema = registry.schema("ab_record")?;
    let record = Record::new().with("a", FieldValue::Int(10)).with("b", FieldValue::Bool(true));
    let bits = dccl::message::encode_record(registry, schema, &record)?;
    assert_eq!(bits.len(), 33);

    let bytes = bits.to_bytes();
    assert_eq!(bytes.len(), 5);

    let reloaded = Bitstream::from_bytes(&bytes, 33);
    let (decoded, used) = dccl::message::decode_record(registry, schema, &reloaded)?;
    assert_eq!(used, 33);
    assert_eq!(decoded.get("a"), Some(&Some(FieldValue::Int(10))));
    assert_eq!(decoded.get("b"), Some(&Some(FieldValue::Bool(true))));
    Ok(())
}
