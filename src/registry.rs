//! The codec and schema registry, and the `Dccl` facade hosts drive it
//! through.
//!
//! Registration is process-wide, in-memory state, mutated only during
//! setup: the registry locks itself on the first `encode`/`decode` call
//! and any further `register_codec`/`register_record` fails with
//! [`Error::RegistryLocked`].

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::codec::{
    BoolCodec, BoundedIntCodec, EnumCodec, FieldCodec, FixedStringCodec, FloatCodec, RecordCodec, VarStringCodec,
};
use crate::constants::{MAX_PACKET_BYTES, MAX_USER_FRAME_BYTES};
use crate::error::{Error, Result};
use crate::header::HeaderLayout;
use crate::message;
use crate::schema::{DcclMessage, FieldType, RecordSchema};
use crate::value::Record;

fn default_max_user_frame_bytes() -> usize {
    MAX_USER_FRAME_BYTES
}
fn default_max_packet_bytes() -> usize {
    MAX_PACKET_BYTES
}

/// Packet-budget parameters a host can tune away from the wire
/// protocol's own hard ceiling, loadable like [`crate::queue::QueueConfig`]
/// from any `serde`-compatible format.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordLimits {
    /// Largest a single record's encoded bytes may be; checked at
    /// `register_record` time. Never legally above
    /// [`MAX_USER_FRAME_BYTES`], since the 1-byte
    /// `USER_FRAME_NEXT_SIZE` prefix can't address more.
    #[serde(default = "default_max_user_frame_bytes")]
    pub max_user_frame_bytes: usize,
    /// Largest a fully stitched packet may be.
    #[serde(default = "default_max_packet_bytes")]
    pub max_packet_bytes: usize,
}

impl Default for RecordLimits {
    fn default() -> Self {
        Self { max_user_frame_bytes: default_max_user_frame_bytes(), max_packet_bytes: default_max_packet_bytes() }
    }
}

/// Holds every registered field codec and record schema. Built-in
/// codecs (`bool`, `bounded_int`, `enum`, `float`, `fixed_string`,
/// `var_string`, `record`) are present from [`Registry::new`].
pub struct Registry {
    codecs: HashMap<String, Arc<dyn FieldCodec>>,
    schemas: HashMap<String, RecordSchema>,
    by_dccl_id: HashMap<u32, String>,
    locked: bool,
    header_layout: HeaderLayout,
    limits: RecordLimits,
}

impl Registry {
    /// A fresh registry with the built-in field codecs pre-registered
    /// and the default [`HeaderLayout`]/[`RecordLimits`].
    #[must_use]
    pub fn new() -> Self {
        let mut codecs: HashMap<String, Arc<dyn FieldCodec>> = HashMap::new();
        codecs.insert("bool".to_string(), Arc::new(BoolCodec));
        codecs.insert("bounded_int".to_string(), Arc::new(BoundedIntCodec));
        codecs.insert("enum".to_string(), Arc::new(EnumCodec));
        codecs.insert("float".to_string(), Arc::new(FloatCodec));
        codecs.insert("fixed_string".to_string(), Arc::new(FixedStringCodec));
        codecs.insert("var_string".to_string(), Arc::new(VarStringCodec));
        codecs.insert("record".to_string(), Arc::new(RecordCodec));
        Self {
            codecs,
            schemas: HashMap::new(),
            by_dccl_id: HashMap::new(),
            locked: false,
            header_layout: HeaderLayout::default(),
            limits: RecordLimits::default(),
        }
    }

    /// Use a non-default header layout (configurable id/address/time widths).
    #[must_use]
    pub fn with_header_layout(mut self, layout: HeaderLayout) -> Self {
        self.header_layout = layout;
        self
    }

    /// Use non-default packet-budget limits.
    #[must_use]
    pub fn with_limits(mut self, limits: RecordLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The packet-budget limits this registry validates new records against.
    #[must_use]
    pub fn limits(&self) -> RecordLimits {
        self.limits
    }

    /// The header layout this registry's `Dccl` facade encodes against.
    #[must_use]
    pub fn header_layout(&self) -> HeaderLayout {
        self.header_layout
    }

    /// Register a custom field codec under `name`. Re-registering the
    /// same `Arc` under the same name is idempotent; registering a
    /// different instance under an in-use name fails with
    /// [`Error::DuplicateCodec`].
    pub fn register_codec(&mut self, name: impl Into<String>, codec: Arc<dyn FieldCodec>) -> Result<()> {
        if self.locked {
            return Err(Error::RegistryLocked { what: "codec registration".to_string() });
        }
        let name = name.into();
        if let Some(existing) = self.codecs.get(&name) {
            if Arc::ptr_eq(existing, &codec) {
                trace!("codec `{name}` re-registered identically, treating as a no-op");
                return Ok(());
            }
            return Err(Error::DuplicateCodec { name });
        }
        debug!("registered codec `{name}`");
        self.codecs.insert(name, codec);
        Ok(())
    }

    /// Validate and register a record schema, returning its DCCL id.
    /// Fails with [`Error::SchemaError`] on any inconsistency; the
    /// registration is entirely rejected, not partially applied.
    pub fn register_record(&mut self, schema: RecordSchema) -> Result<u32> {
        if self.locked {
            return Err(Error::RegistryLocked { what: format!("record `{}`", schema.name) });
        }
        if self.schemas.contains_key(&schema.name) {
            return Err(Error::SchemaError {
                record: schema.name.clone(),
                reason: "a schema with this name is already registered".to_string(),
            });
        }
        if let Some(existing) = self.by_dccl_id.get(&schema.dccl_id) {
            return Err(Error::SchemaError {
                record: schema.name.clone(),
                reason: format!("dccl_id {} is already used by `{existing}`", schema.dccl_id),
            });
        }

        for field in &schema.fields {
            if field.omit {
                continue;
            }
            if let FieldType::Record { schema_name } = &field.field_type {
                if !self.schemas.contains_key(schema_name) {
                    return Err(Error::SchemaError {
                        record: schema.name.clone(),
                        reason: format!(
                            "field `{}` references unregistered nested schema `{schema_name}`",
                            field.name
                        ),
                    });
                }
            }
            let codec = self.codecs.get(&field.codec).ok_or_else(|| Error::CodecNotFound {
                name: field.codec.clone(),
                field: field.name.clone(),
            })?;
            codec.validate(field).map_err(|e| match e {
                Error::SchemaError { reason, .. } => {
                    Error::SchemaError { record: schema.name.clone(), reason: format!("field `{}`: {reason}", field.name) }
                }
                other => other,
            })?;
        }

        let min_bits = message::min_size_bits(self, &schema)?;
        let max_bits = message::max_size_bits(self, &schema)?;
        if min_bits > max_bits {
            return Err(Error::SchemaError {
                record: schema.name.clone(),
                reason: format!("min_size {min_bits} bits exceeds max_size {max_bits} bits"),
            });
        }
        let max_bytes = max_bits.div_ceil(8);
        let frame_limit = self.limits.max_user_frame_bytes.min(MAX_USER_FRAME_BYTES);
        if max_bytes > frame_limit {
            return Err(Error::SchemaError {
                record: schema.name.clone(),
                reason: format!("max_size {max_bytes}B exceeds the {frame_limit}B user-frame budget"),
            });
        }

        info!("registered record `{}` (dccl_id={}, {min_bits}-{max_bits} bits)", schema.name, schema.dccl_id);
        let dccl_id = schema.dccl_id;
        self.by_dccl_id.insert(dccl_id, schema.name.clone());
        self.schemas.insert(schema.name.clone(), schema);
        Ok(dccl_id)
    }

    fn lock(&mut self) {
        if !self.locked {
            self.locked = true;
            info!("registry lock: {} schemas, {} codecs", self.schemas.len(), self.codecs.len());
        }
    }

    /// Look up a registered codec by name.
    pub fn codec(&self, name: &str) -> Result<&Arc<dyn FieldCodec>> {
        self.codecs.get(name).ok_or_else(|| Error::CodecNotFound { name: name.to_string(), field: String::new() })
    }

    /// Look up a registered schema by record type name.
    pub fn schema(&self, name: &str) -> Result<&RecordSchema> {
        self.schemas.get(name).ok_or_else(|| Error::SchemaError {
            record: name.to_string(),
            reason: "no such registered record schema".to_string(),
        })
    }

    /// Look up a registered schema by its wire DCCL id.
    pub fn schema_by_dccl_id(&self, dccl_id: u32) -> Result<&RecordSchema> {
        let name = self.by_dccl_id.get(&dccl_id).ok_or_else(|| Error::SchemaError {
            record: format!("dccl_id {dccl_id}"),
            reason: "no schema registered for this DCCL id".to_string(),
        })?;
        self.schema(name)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// The host-facing codec engine: wraps a [`Registry`] with the
/// `encode`/`decode` entry points that prepend/consume the structural
/// header envelope around a schema's own fields.
pub struct Dccl {
    registry: Registry,
}

impl Dccl {
    /// A fresh engine with only the built-in field codecs registered.
    #[must_use]
    pub fn new() -> Self {
        Self { registry: Registry::new() }
    }

    /// Use a non-default header layout.
    #[must_use]
    pub fn with_header_layout(mut self, layout: HeaderLayout) -> Self {
        self.registry = self.registry.with_header_layout(layout);
        self
    }

    /// Use non-default packet-budget limits.
    #[must_use]
    pub fn with_limits(mut self, limits: RecordLimits) -> Self {
        self.registry = self.registry.with_limits(limits);
        self
    }

    /// Register a custom field codec. See [`Registry::register_codec`].
    pub fn register_codec(&mut self, name: impl Into<String>, codec: Arc<dyn FieldCodec>) -> Result<()> {
        self.registry.register_codec(name, codec)
    }

    /// Register a record schema. See [`Registry::register_record`].
    pub fn register_record(&mut self, schema: RecordSchema) -> Result<u32> {
        self.registry.register_record(schema)
    }

    /// Start encoding a `T`: the header envelope needs routing fields
    /// `T::to_record`/`T::from_record` don't carry, so they're supplied
    /// here and the value itself via [`EncodeBuilder::value`]. Implicitly
    /// locks the registry.
    pub fn encode<T: DcclMessage>(&mut self, source: u32, destination: u32, time: u32) -> EncodeBuilder<'_, T> {
        self.registry.lock();
        EncodeBuilder { dccl: self, source, destination, time, _marker: std::marker::PhantomData }
    }

    /// Decode bytes produced by [`Dccl::encode`] back into `T`, using
    /// the DCCL id in the header to pick the schema. Implicitly locks
    /// the registry.
    pub fn decode<T: DcclMessage>(&mut self, bytes: &[u8]) -> Result<T> {
        self.registry.lock();
        let layout = self.registry.header_layout();
        let header_bits = crate::bitstream::Bitstream::from_bytes(bytes, bytes.len() * 8);
        let (fields, consumed) = crate::header::decode_header(&header_bits, &layout)?;
        let schema = self.registry.schema_by_dccl_id(fields.dccl_id)?;
        if schema.name != T::NAME {
            return Err(Error::SchemaError {
                record: T::NAME.to_string(),
                reason: format!("DCCL id {} decodes to `{}`, not `{}`", fields.dccl_id, schema.name, T::NAME),
            });
        }
        let body_bits = header_bits.slice(consumed, header_bits.len() - consumed);
        let (record, used) = message::decode_record(&self.registry, schema, &body_bits)?;
        trace!("decoded `{}`: {used} body bits consumed", T::NAME);
        let result = T::from_record(&record)?;
        debug!("decoded record `{}` from {} bytes", T::NAME, bytes.len());
        Ok(result)
    }

    /// Direct access to the underlying registry, for hosts that want to
    /// inspect schema/codec state without going through the facade.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Dccl {
    fn default() -> Self {
        Self::new()
    }
}

/// Finishes an [`Dccl::encode`] call: holds the routing fields the
/// header needs until the caller supplies the value to serialize.
pub struct EncodeBuilder<'a, T> {
    dccl: &'a mut Dccl,
    source: u32,
    destination: u32,
    time: u32,
    _marker: std::marker::PhantomData<T>,
}

impl<'a, T: DcclMessage> EncodeBuilder<'a, T> {
    /// Encode `value` to its complete wire bytes (header + body).
    pub fn value(self, value: &T) -> Result<Vec<u8>> {
        let schema = self.dccl.registry.schema(T::NAME)?;
        let record: Record = value.to_record();
        let layout = self.dccl.registry.header_layout();
        let broadcast = self.destination == crate::constants::BROADCAST_ID;
        let header = HeaderFieldsWithSchema {
            dccl_id: schema.dccl_id,
            multi_frame: false,
            broadcast,
            source: self.source,
            destination: self.destination,
            time: self.time,
        };
        let mut bits = crate::header::encode_header(&header.into(), &layout)?;
        let body_bits = message::encode_record(&self.dccl.registry, schema, &record)?;
        let body_bit_len = body_bits.len();
        bits.append(&body_bits);
        let bytes = bits.to_bytes();
        let max_bits = message::max_size_bits(&self.dccl.registry, schema)?;
        if body_bit_len > max_bits {
            warn!("`{}` encoded to {body_bit_len} body bits, exceeding its validated max of {max_bits}", T::NAME);
            return Err(Error::EncodeOverflow { record: T::NAME.to_string(), got: body_bit_len, max: max_bits });
        }
        Ok(bytes)
    }
}

struct HeaderFieldsWithSchema {
    dccl_id: u32,
    multi_frame: bool,
    broadcast: bool,
    source: u32,
    destination: u32,
    time: u32,
}

impl From<HeaderFieldsWithSchema> for crate::header::HeaderFields {
    fn from(h: HeaderFieldsWithSchema) -> Self {
        crate::header::HeaderFields {
            dccl_id: h.dccl_id,
            multi_frame: h.multi_frame,
            broadcast: h.broadcast,
            source: h.source,
            destination: h.destination,
            time: h.time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_limits_round_trip_through_json() {
        let limits = RecordLimits { max_user_frame_bytes: 100, max_packet_bytes: 200 };
        let json = serde_json::to_string(&limits).unwrap();
        let parsed: RecordLimits = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, limits);
    }

    #[test]
    fn record_limits_defaults_fill_empty_json() {
        let parsed: RecordLimits = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, RecordLimits::default());
    }
}
