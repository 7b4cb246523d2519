//! The fixed HEAD envelope every DCCL packet carries ahead of a
//! schema's own declared fields: CCL id, DCCL id, the two stitching
//! flags, source/destination addresses, and a coarse timestamp.
//!
//! This is structural, not a [`crate::schema::RecordSchema`] a host
//! declares fields for — every registered record gets it automatically,
//! which guarantees HEAD always carries the mandatory routing fields by
//! construction rather than by validation.

use crate::bitstream::Bitstream;
use crate::constants::DCCL_CCL_HEADER;
use crate::error::{Error, Result};

/// Bit widths of the configurable header fields. `dccl_id_bits` must be
/// in `8..=14`; `address_bits` and `time_bits` are otherwise
/// unconstrained apart from fitting in a `u32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderLayout {
    /// Width of the DCCL id field.
    pub dccl_id_bits: u32,
    /// Width of each of the source and destination address fields.
    pub address_bits: u32,
    /// Width of the coarse timestamp field.
    pub time_bits: u32,
}

impl Default for HeaderLayout {
    fn default() -> Self {
        Self {
            dccl_id_bits: crate::constants::DCCL_ID_WIDTH,
            address_bits: 8,
            time_bits: 32,
        }
    }
}

impl HeaderLayout {
    /// Total header bits before byte-alignment padding.
    fn raw_bits(&self) -> usize {
        8 + self.dccl_id_bits as usize + 1 + 1 + 2 * self.address_bits as usize + self.time_bits as usize
    }

    /// Header length in bytes. Every user-frame begins with exactly this
    /// many bytes of envelope, byte-aligned, so `DCCL_NUM_HEADER_BYTES`
    /// offsets (the `USER_FRAME_NEXT_SIZE` prefix, in particular) land on
    /// a fixed byte boundary.
    #[must_use]
    pub fn header_bytes(&self) -> usize {
        self.raw_bits().div_ceil(8)
    }

    fn multi_frame_bit_offset(&self) -> usize {
        8 + self.dccl_id_bits as usize
    }

    fn broadcast_bit_offset(&self) -> usize {
        self.multi_frame_bit_offset() + 1
    }

    fn source_bit_offset(&self) -> usize {
        self.broadcast_bit_offset() + 1
    }

    fn destination_bit_offset(&self) -> usize {
        self.source_bit_offset() + self.address_bits as usize
    }

    fn time_bit_offset(&self) -> usize {
        self.destination_bit_offset() + self.address_bits as usize
    }

    fn validate(&self) -> Result<()> {
        if !(8..=14).contains(&self.dccl_id_bits) {
            return Err(Error::SchemaError {
                record: String::new(),
                reason: format!(
                    "header dccl_id_bits {} outside the legal 8-14 range",
                    self.dccl_id_bits
                ),
            });
        }
        Ok(())
    }
}

/// The decoded contents of a header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderFields {
    /// Registered message type discriminator.
    pub dccl_id: u32,
    /// Set if another user-frame follows this one in the same packet.
    pub multi_frame: bool,
    /// Set if `destination` is the broadcast sentinel.
    pub broadcast: bool,
    /// Sending modem id.
    pub source: u32,
    /// Receiving modem id, or the broadcast sentinel.
    pub destination: u32,
    /// Coarse timestamp, in whatever unit the host's clock uses.
    pub time: u32,
}

/// Encode `fields` per `layout`, with the CCL id byte (always
/// [`DCCL_CCL_HEADER`]) first, zero-padded to [`HeaderLayout::header_bytes`].
pub fn encode_header(fields: &HeaderFields, layout: &HeaderLayout) -> Result<Bitstream> {
    layout.validate()?;
    let mut out = Bitstream::with_value(8, u64::from(DCCL_CCL_HEADER));
    out.append(&Bitstream::with_value(layout.dccl_id_bits as usize, u64::from(fields.dccl_id)));
    out.append(&Bitstream::with_value(1, u64::from(fields.multi_frame)));
    out.append(&Bitstream::with_value(1, u64::from(fields.broadcast)));
    out.append(&Bitstream::with_value(layout.address_bits as usize, u64::from(fields.source)));
    out.append(&Bitstream::with_value(layout.address_bits as usize, u64::from(fields.destination)));
    out.append(&Bitstream::with_value(layout.time_bits as usize, u64::from(fields.time)));
    out.resize(layout.header_bytes() * 8);
    Ok(out)
}

/// Inverse of [`encode_header`]. Returns the decoded fields and the
/// number of bits consumed (always `layout.header_bytes() * 8`).
pub fn decode_header(bits: &Bitstream, layout: &HeaderLayout) -> Result<(HeaderFields, usize)> {
    layout.validate()?;
    let total_bits = layout.header_bytes() * 8;
    if bits.len() < total_bits {
        return Err(Error::DecodeUnderflow {
            record: String::new(),
            field: "header".to_string(),
            needed: total_bits,
            had: bits.len(),
        });
    }
    let ccl_id = bits.slice(0, 8).to_unsigned()?;
    if ccl_id as u8 != DCCL_CCL_HEADER {
        return Err(Error::DecodeCorrupt {
            record: String::new(),
            field: "header".to_string(),
            reason: format!("CCL id byte 0x{ccl_id:02x} is not the DCCL header marker"),
        });
    }
    let dccl_id = bits.slice(8, layout.dccl_id_bits as usize).to_unsigned()? as u32;
    let multi_frame = bits.slice(layout.multi_frame_bit_offset(), 1).to_unsigned()? != 0;
    let broadcast = bits.slice(layout.broadcast_bit_offset(), 1).to_unsigned()? != 0;
    let source = bits.slice(layout.source_bit_offset(), layout.address_bits as usize).to_unsigned()? as u32;
    let destination =
        bits.slice(layout.destination_bit_offset(), layout.address_bits as usize).to_unsigned()? as u32;
    let time = bits.slice(layout.time_bit_offset(), layout.time_bits as usize).to_unsigned()? as u32;
    Ok((
        HeaderFields { dccl_id, multi_frame, broadcast, source, destination, time },
        total_bits,
    ))
}

fn flag_bit(layout: &HeaderLayout, offset: usize) -> (usize, u8) {
    (offset / 8, 1u8 << (offset % 8))
}

/// Read the multi-frame flag directly out of an encoded user-frame's
/// bytes, without decoding the whole header.
#[must_use]
pub fn multi_frame_flag(bytes: &[u8], layout: &HeaderLayout) -> bool {
    let (byte_idx, mask) = flag_bit(layout, layout.multi_frame_bit_offset());
    bytes[byte_idx] & mask != 0
}

/// Set or clear the multi-frame flag directly in an encoded user-frame's
/// bytes, without re-encoding the record behind it.
pub fn set_multi_frame_flag(bytes: &mut [u8], layout: &HeaderLayout, value: bool) {
    let (byte_idx, mask) = flag_bit(layout, layout.multi_frame_bit_offset());
    if value {
        bytes[byte_idx] |= mask;
    } else {
        bytes[byte_idx] &= !mask;
    }
}

/// Read the broadcast flag directly out of an encoded user-frame's bytes.
#[must_use]
pub fn broadcast_flag(bytes: &[u8], layout: &HeaderLayout) -> bool {
    let (byte_idx, mask) = flag_bit(layout, layout.broadcast_bit_offset());
    bytes[byte_idx] & mask != 0
}

/// Set or clear the broadcast flag directly in an encoded user-frame's bytes.
pub fn set_broadcast_flag(bytes: &mut [u8], layout: &HeaderLayout, value: bool) {
    let (byte_idx, mask) = flag_bit(layout, layout.broadcast_bit_offset());
    if value {
        bytes[byte_idx] |= mask;
    } else {
        bytes[byte_idx] &= !mask;
    }
}

/// Read the destination address directly out of an encoded user-frame's
/// bytes, for stitching eligibility checks that shouldn't pay for a full
/// header decode.
#[must_use]
pub fn destination_addr(bytes: &[u8], layout: &HeaderLayout) -> u32 {
    let bits = Bitstream::from_bytes(bytes, layout.header_bytes() * 8);
    bits.slice(layout.destination_bit_offset(), layout.address_bits as usize)
        .to_unsigned()
        .unwrap_or(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> HeaderLayout {
        HeaderLayout { dccl_id_bits: 10, address_bits: 8, time_bits: 32 }
    }

    fn sample() -> HeaderFields {
        HeaderFields {
            dccl_id: 5,
            multi_frame: true,
            broadcast: false,
            source: 1,
            destination: 2,
            time: 1_000,
        }
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let layout = layout();
        let bits = encode_header(&sample(), &layout).unwrap();
        assert_eq!(bits.len(), layout.header_bytes() * 8);
        let (decoded, used) = decode_header(&bits, &layout).unwrap();
        assert_eq!(used, bits.len());
        assert_eq!(decoded, sample());
    }

    #[test]
    fn rejects_a_non_dccl_ccl_id_byte() {
        let layout = layout();
        let mut bits = encode_header(&sample(), &layout).unwrap();
        // Corrupt the CCL id byte.
        let mut bytes = bits.to_bytes();
        bytes[0] = 0xFF;
        bits = Bitstream::from_bytes(&bytes, bits.len());
        assert!(decode_header(&bits, &layout).is_err());
    }

    #[test]
    fn flag_mutators_rewrite_bytes_in_place() {
        let layout = layout();
        let bits = encode_header(&sample(), &layout).unwrap();
        let mut bytes = bits.to_bytes();
        assert!(multi_frame_flag(&bytes, &layout));
        set_multi_frame_flag(&mut bytes, &layout, false);
        assert!(!multi_frame_flag(&bytes, &layout));

        assert!(!broadcast_flag(&bytes, &layout));
        set_broadcast_flag(&mut bytes, &layout, true);
        assert!(broadcast_flag(&bytes, &layout));

        // Untouched fields still decode correctly.
        let roundtrip = Bitstream::from_bytes(&bytes, bits.len());
        let (decoded, _) = decode_header(&roundtrip, &layout).unwrap();
        assert_eq!(decoded.dccl_id, 5);
        assert_eq!(decoded.destination, 2);
    }

    #[test]
    fn destination_addr_reads_without_full_decode() {
        let layout = layout();
        let bits = encode_header(&sample(), &layout).unwrap();
        let bytes = bits.to_bytes();
        assert_eq!(destination_addr(&bytes, &layout), 2);
    }
}
