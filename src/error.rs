//! Error types for the DCCL codec engine and queue manager.
//!
//! Registry and schema errors are caller-fatal (see [`Error`] variants
//! documented below); runtime decode/ack/receive faults are recovered
//! internally by the queue manager and never surface here.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes exposed by the DCCL engine and queue manager.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A field or record schema is internally inconsistent (e.g. a bit
    /// width too small for the declared bounds). Caught at
    /// `register_record` time; fatal to that registration only.
    #[error("schema error in `{record}`: {reason}")]
    SchemaError {
        /// Record type name being registered.
        record: String,
        /// Human-readable description of the inconsistency.
        reason: String,
    },

    /// A `register_codec` or `register_record` call arrived after the
    /// registry was locked by a first `encode`/`decode`.
    #[error("registry is locked: cannot register `{what}` after first encode/decode")]
    RegistryLocked {
        /// Name of the thing that could not be registered.
        what: String,
    },

    /// A field named a codec that isn't in the registry.
    #[error("no codec named `{name}` for field `{field}`")]
    CodecNotFound {
        /// Codec name the field asked for.
        name: String,
        /// Field that named the codec.
        field: String,
    },

    /// `register_codec` was called twice for the same name with
    /// different codecs.
    #[error("codec `{name}` is already registered with a different implementation")]
    DuplicateCodec {
        /// Codec name in conflict.
        name: String,
    },

    /// Encoded size exceeded the `max_size` computed at validation time.
    /// Indicates a codec bug, since validation should have caught this.
    #[error("encoding `{record}` produced {got} bits, more than the validated max of {max}")]
    EncodeOverflow {
        /// Record type name.
        record: String,
        /// Bits actually produced.
        got: usize,
        /// Bits validation promised as an upper bound.
        max: usize,
    },

    /// The bitstream ran out before a field finished decoding.
    #[error("decode of `{record}` underflowed in field `{field}`: needed {needed} bits, had {had}")]
    DecodeUnderflow {
        /// Record type name.
        record: String,
        /// Field being decoded when the stream ran out.
        field: String,
        /// Bits the field needed.
        needed: usize,
        /// Bits actually remaining.
        had: usize,
    },

    /// A decoded value violated a codec invariant (e.g. an enum index
    /// beyond its value set that isn't the missing-sentinel).
    #[error("decode of `{record}` found corrupt data in field `{field}`: {reason}")]
    DecodeCorrupt {
        /// Record type name.
        record: String,
        /// Field that failed to decode.
        field: String,
        /// Description of the corruption.
        reason: String,
    },

    /// A push exceeded `max_queue` under a reject-new policy.
    #[error("queue `{queue}` is full (max {max})")]
    QueueFull {
        /// Queue key's debug form.
        queue: String,
        /// Configured maximum depth.
        max: usize,
    },

    /// Push or on-demand registration referenced an unregistered queue key.
    #[error("no queue for key `{queue}`")]
    NoSuchQueue {
        /// Queue key's debug form.
        queue: String,
    },

    /// An ack referenced a frame this manager wasn't expecting. Logged
    /// and ignored by the manager; only raised here for callers that
    /// want to observe it directly.
    #[error("ack for frame {frame} did not match any ack-pending record")]
    AckMismatch {
        /// Frame number named by the ack.
        frame: u32,
    },
}
