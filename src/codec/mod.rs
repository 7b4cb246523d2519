//! The field codec contract and the built-in codecs that implement it.
//!
//! A codec is a value, not a base class: [`FieldCodec`] is a capability
//! set (encode, decode, size, validate, hooks, info) and the registry
//! holds trait objects, never concrete types. Installing a custom codec
//! for a field is just registering another [`FieldCodec`] under a name
//! and pointing the field at it.

mod bool_codec;
mod enum_codec;
mod float_codec;
mod int_codec;
mod record_codec;
mod string_codec;

pub use bool_codec::BoolCodec;
pub use enum_codec::EnumCodec;
pub use float_codec::FloatCodec;
pub use int_codec::BoundedIntCodec;
pub use record_codec::RecordCodec;
pub use string_codec::{FixedStringCodec, VarStringCodec};

use crate::bitstream::Bitstream;
use crate::error::Result;
use crate::registry::Registry;
use crate::schema::FieldDescriptor;
use crate::value::FieldValue;

/// Context threaded through every codec call. Only [`RecordCodec`]
/// actually dereferences `registry` (to recurse into a nested schema),
/// but every codec takes it so the trait's shape doesn't change the day
/// a new codec needs it.
pub struct CodecCx<'a> {
    /// The live registry, for codecs that need to look up other schemas.
    pub registry: &'a Registry,
    /// Name of the record currently being encoded/decoded, for diagnostics.
    pub record_name: &'a str,
}

/// The per-field-type encode/decode/size/validate contract.
///
/// Implementors only need `encode`, `decode`, `min_size_bits`,
/// `max_size_bits`, `validate` and `info`; `encode_repeated` and
/// `decode_repeated` have a generic default built on top of the
/// singleton methods plus a `ceil(log2(max_repeat+1))`-bit count prefix.
pub trait FieldCodec: Send + Sync {
    /// Encode one value (or the missing-sentinel, if `value` is `None`).
    fn encode(
        &self,
        cx: &CodecCx,
        desc: &FieldDescriptor,
        value: &Option<FieldValue>,
    ) -> Result<Bitstream>;

    /// Decode one value, returning it (or `None` for the missing-sentinel)
    /// along with the number of bits consumed.
    fn decode(
        &self,
        cx: &CodecCx,
        desc: &FieldDescriptor,
        bits: &Bitstream,
    ) -> Result<(Option<FieldValue>, usize)>;

    /// Smallest possible encoded size, in bits.
    fn min_size_bits(&self, desc: &FieldDescriptor) -> usize;

    /// Largest possible encoded size, in bits.
    fn max_size_bits(&self, desc: &FieldDescriptor) -> usize;

    /// Check that `desc`'s parameters are internally consistent for this
    /// codec (e.g. bit width wide enough for the declared bounds).
    fn validate(&self, desc: &FieldDescriptor) -> Result<()>;

    /// Observer invoked during encode, for stats collection. No-op by
    /// default; only called for non-repeated scalar fields.
    fn hooks(&self, _desc: &FieldDescriptor, _value: &FieldValue) {}

    /// Human-readable description, for schema dumps and diagnostics.
    fn info(&self, desc: &FieldDescriptor) -> String;

    /// Encode a repeated field: a `ceil(log2(max_repeat+1))`-bit count,
    /// then each value via [`FieldCodec::encode`].
    fn encode_repeated(
        &self,
        cx: &CodecCx,
        desc: &FieldDescriptor,
        values: &[FieldValue],
    ) -> Result<Bitstream> {
        let max_repeat = u64::from(desc.max_repeat.unwrap_or(0));
        let count_bits = bits_needed(max_repeat + 1);
        let mut out = Bitstream::with_value(count_bits, values.len() as u64);
        for v in values {
            out.append(&self.encode(cx, desc, &Some(v.clone()))?);
        }
        Ok(out)
    }

    /// Decode a repeated field: the inverse of [`FieldCodec::encode_repeated`].
    fn decode_repeated(
        &self,
        cx: &CodecCx,
        desc: &FieldDescriptor,
        bits: &Bitstream,
    ) -> Result<(Vec<FieldValue>, usize)> {
        let max_repeat = u64::from(desc.max_repeat.unwrap_or(0));
        let count_bits = bits_needed(max_repeat + 1);
        let count = if count_bits == 0 {
            0
        } else {
            bits.slice(0, count_bits).to_unsigned()?
        };
        let mut consumed = count_bits;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let remaining = bits.slice(consumed, bits.len() - consumed);
            let (value, used) = self.decode(cx, desc, &remaining)?;
            consumed += used;
            out.push(value.unwrap_or(FieldValue::Bool(false)));
        }
        Ok((out, consumed))
    }

    /// Smallest possible encoded size of a repeated field (zero copies).
    fn min_size_repeated_bits(&self, desc: &FieldDescriptor) -> usize {
        let max_repeat = u64::from(desc.max_repeat.unwrap_or(0));
        bits_needed(max_repeat + 1)
    }

    /// Largest possible encoded size of a repeated field (`max_repeat` copies).
    fn max_size_repeated_bits(&self, desc: &FieldDescriptor) -> usize {
        let max_repeat = u64::from(desc.max_repeat.unwrap_or(0));
        bits_needed(max_repeat + 1) + (max_repeat as usize) * self.max_size_bits(desc)
    }
}

/// Minimum number of bits needed to represent `n_values` distinct values
/// (`ceil(log2(n_values))`, and `0` for `n_values <= 1`).
#[must_use]
pub fn bits_needed(n_values: u64) -> usize {
    if n_values <= 1 {
        return 0;
    }
    let mut bits = 0usize;
    let mut capacity: u64 = 1;
    while capacity < n_values {
        capacity <<= 1;
        bits += 1;
    }
    bits
}
