//! Wire-format constants shared by the header codec and queue manager.

use std::time::Duration;

/// CCL id byte that marks a packet as DCCL-encoded rather than legacy CCL.
pub const DCCL_CCL_HEADER: u8 = 0x20;

/// Destination sentinel meaning "deliver to every receiver".
pub const BROADCAST_ID: u32 = 0;

/// Destination placeholder used before the first user-frame picks a real one.
pub const QUERY_DESTINATION_ID: i64 = -1;

/// Lowest legal DCCL id.
pub const MIN_ID: u32 = 0;

/// Bit width of the DCCL id field in the wire header (see [`crate::header`]).
pub const DCCL_ID_WIDTH: u32 = 10;

/// Highest legal DCCL id, given [`DCCL_ID_WIDTH`].
pub const MAX_ID: u32 = (1 << DCCL_ID_WIDTH) - 1;

/// An on-demand queue is re-polled if its newest message is older than this.
pub const ON_DEMAND_SKEW: Duration = Duration::from_secs(1);

/// Width, in bytes, of the intra-frame "next payload size" prefix used
/// while stitching. Locked at one byte: a schema whose max user-frame
/// exceeds 255 bytes is rejected at registration.
pub const USER_FRAME_NEXT_SIZE_BYTES: usize = 1;

/// Largest payload size representable by [`USER_FRAME_NEXT_SIZE_BYTES`].
pub const MAX_USER_FRAME_BYTES: usize = 255;

/// Largest legal packet, in bytes.
pub const MAX_PACKET_BYTES: usize = 255;

/// Fixed size of a legacy CCL packet.
pub const CCL_PACKET_BYTES: usize = 32;
