//! Record schemas: the declarative description of a DCCL message.

use crate::error::{Error, Result};
use crate::value::Record;

/// Which half of the record a field belongs to.
///
/// HEAD fields are encoded before BODY fields; within a section,
/// encoding order equals declaration order. Sub-records are always
/// traversed regardless of the enclosing field's section, since they
/// may themselves contain both HEAD and BODY fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    /// Routing and framing fields.
    Head,
    /// Payload fields.
    Body,
}

/// The semantic type of a field, and the parameters its default codec
/// needs to size and bound it.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldType {
    /// A single bit; 0 = false.
    Bool,
    /// An integer in `[lo, hi]`, plus a missing-sentinel.
    BoundedInt {
        /// Inclusive lower bound.
        lo: i64,
        /// Inclusive upper bound.
        hi: i64,
        /// Force a specific bit width instead of the natural minimum.
        /// `validate` rejects a width too narrow for `[lo, hi]` plus the
        /// missing-sentinel.
        bits: Option<u32>,
    },
    /// A closed set of named values, encoded as a value-index.
    Enum {
        /// The value set, in index order.
        values: Vec<String>,
        /// Force a specific bit width instead of the natural minimum.
        bits: Option<u32>,
    },
    /// A float quantized to `precision` decimal digits, bounded in `[lo, hi]`.
    Float {
        /// Decimal digits kept after the point.
        precision: u32,
        /// Inclusive lower bound.
        lo: f64,
        /// Inclusive upper bound.
        hi: f64,
    },
    /// Exactly `len` bytes, verbatim.
    FixedString {
        /// Fixed byte length.
        len: usize,
    },
    /// Up to `max` bytes, length-prefixed.
    VarString {
        /// Maximum byte length.
        max: usize,
    },
    /// A nested record, by the name it was registered under.
    Record {
        /// Name of the nested record's schema.
        schema_name: String,
    },
}

/// One field of a [`RecordSchema`].
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDescriptor {
    /// Field name, unique within its record.
    pub name: String,
    /// Semantic type and default-codec parameters.
    pub field_type: FieldType,
    /// HEAD or BODY.
    pub section: Section,
    /// If true, the field is never encoded or decoded (reserved for
    /// future use, or disabled in this deployment).
    pub omit: bool,
    /// `Some(n)` if the field is repeated, with at most `n` copies.
    pub max_repeat: Option<u32>,
    /// Name of the codec to dispatch to, resolved in the registry. Set
    /// to the built-in default for `field_type` unless overridden.
    pub codec: String,
}

impl FieldDescriptor {
    /// A new non-repeated field using the default codec for `field_type`.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType, section: Section) -> Self {
        let codec = default_codec_name(&field_type).to_string();
        Self {
            name: name.into(),
            field_type,
            section,
            omit: false,
            max_repeat: None,
            codec,
        }
    }

    /// Mark the field repeated, up to `max_repeat` copies.
    #[must_use]
    pub fn repeated(mut self, max_repeat: u32) -> Self {
        self.max_repeat = Some(max_repeat);
        self
    }

    /// Mark the field omitted (never encoded/decoded).
    #[must_use]
    pub fn omitted(mut self) -> Self {
        self.omit = true;
        self
    }

    /// Override the codec this field dispatches to.
    #[must_use]
    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    /// True if this field (or its repeat-count prefix) can take a
    /// different number of bits for different values.
    #[must_use]
    pub fn is_repeated(&self) -> bool {
        self.max_repeat.is_some()
    }
}

/// The built-in codec name for a field type, absent an override.
#[must_use]
pub fn default_codec_name(field_type: &FieldType) -> &'static str {
    match field_type {
        FieldType::Bool => "bool",
        FieldType::BoundedInt { .. } => "bounded_int",
        FieldType::Enum { .. } => "enum",
        FieldType::Float { .. } => "float",
        FieldType::FixedString { .. } => "fixed_string",
        FieldType::VarString { .. } => "var_string",
        FieldType::Record { .. } => "record",
    }
}

/// A complete record type: an ordered list of fields plus the DCCL id
/// it's registered under.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordSchema {
    /// Record type name, used in diagnostics and as the nested-record key.
    pub name: String,
    /// DCCL id this record type is assigned on the wire.
    pub dccl_id: u32,
    /// Fields, in declaration order.
    pub fields: Vec<FieldDescriptor>,
}

impl RecordSchema {
    /// Fields in HEAD, in declaration order.
    pub fn head_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.omit && matches!(f.section, Section::Head))
    }

    /// Fields in BODY, in declaration order.
    pub fn body_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.omit && matches!(f.section, Section::Body))
    }
}

/// Builder for [`RecordSchema`], mirroring the ergonomics of the
/// `#[derive(DcclMessage)]` macro for hosts that want to assemble a
/// schema by hand.
#[derive(Clone, Debug, Default)]
pub struct RecordSchemaBuilder {
    name: String,
    dccl_id: u32,
    fields: Vec<FieldDescriptor>,
}

impl RecordSchemaBuilder {
    /// Start building a schema for `name`, to be registered under `dccl_id`.
    #[must_use]
    pub fn new(name: impl Into<String>, dccl_id: u32) -> Self {
        Self {
            name: name.into(),
            dccl_id,
            fields: Vec::new(),
        }
    }

    /// Append a field.
    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> RecordSchema {
        RecordSchema {
            name: self.name,
            dccl_id: self.dccl_id,
            fields: self.fields,
        }
    }
}

/// Implemented by a Rust struct that can convert to and from a
/// schema-driven [`Record`] — normally via `#[derive(DcclMessage)]`
/// rather than by hand.
pub trait DcclMessage: Sized {
    /// The record type's name, used as the registry key.
    const NAME: &'static str;

    /// Build the schema this type encodes to/decodes from.
    fn schema(dccl_id: u32) -> RecordSchema;

    /// Convert `self` into a dynamic [`Record`] for encoding.
    fn to_record(&self) -> Record;

    /// Rebuild `Self` from a dynamic [`Record`] produced by decoding.
    fn from_record(record: &Record) -> Result<Self>;
}

/// Helper for `DcclMessage::from_record` implementations: look up a
/// required scalar field or fail with a descriptive [`Error::DecodeCorrupt`].
pub fn require_field<'a>(
    record: &'a Record,
    record_name: &str,
    field: &str,
) -> Result<&'a crate::value::FieldValue> {
    match record.get(field) {
        Some(Some(v)) => Ok(v),
        Some(None) => Err(Error::DecodeCorrupt {
            record: record_name.to_string(),
            field: field.to_string(),
            reason: "required field decoded as missing".to_string(),
        }),
        None => Err(Error::DecodeCorrupt {
            record: record_name.to_string(),
            field: field.to_string(),
            reason: "required field absent from decoded record".to_string(),
        }),
    }
}
