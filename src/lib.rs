#![warn(missing_docs)]
/*! This crate implements DCCL (Dynamic Compact Control Language), a
bit-packed field codec for acoustic modem traffic, together with a
queue manager that multiplexes several record streams onto one
modem's airtime.

# Architecture overview

A host registers [`schema::RecordSchema`]s and [`codec::FieldCodec`]s
into a [`registry::Registry`], normally through the
[`Dccl`][registry::Dccl] facade and a `#[derive(DcclMessage)]`'d
struct. Once the first record is encoded or decoded the registry locks
itself: field widths and the per-record byte budget are now fixed for
the rest of the process's life.

```text
[ host struct ]
      ↓  #[derive(DcclMessage)]
[ schema::RecordSchema ] ---registered into---> [ registry::Registry ]
      ↓  Dccl::encode / Dccl::decode                      ↑
[ message::encode_record / decode_record ] --dispatches-- [ codec::FieldCodec impls ]
      ↓
[ header envelope + body bits ] -> [ bitstream::Bitstream ] -> bytes
```

On top of the codec, [`queue_manager::QueueManager`] holds one
[`queue::Queue`] per registered record type, runs a priority contest
each time the modem has airtime, stitches winning records into a
single packet, and splits a received packet back into its constituent
user-frames:

```text
[ queue per record type ] --priority contest--> [ stitched packet ] -> modem
                                                        ↓
[ per-record on_receive/on_receive_ccl callbacks ] <- unstitch <- modem
```

# Examples

```
use dccl::registry::Dccl;
use dccl::schema::{DcclMessage, FieldDescriptor, FieldType, RecordSchema, RecordSchemaBuilder, Section};
use dccl::value::{FieldValue, Record};
use dccl::error::Result;

struct Ping {
    seq: i64,
}

impl DcclMessage for Ping {
    const NAME: &'static str = "ping";

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

    fn from_record(record: &Record) -> Result<Self> {
        let seq = dccl::schema::require_field(record, Self::NAME, "seq")?;
        let FieldValue::Int(seq) = seq else {
            unreachable!("bounded_int codec always produces FieldValue::Int");
        };
        Ok(Self { seq: *seq })
    }
}

let mut dccl = Dccl::new();
dccl.register_record(Ping::schema(1))?;
let bytes = dccl.encode::<Ping>(1, 2, 0).value(&Ping { seq: 7 })?;
let decoded: Ping = dccl.decode(&bytes)?;
assert_eq!(decoded.seq, 7);
# Ok::<(), dccl::error::Error>(())
```
 */

pub mod bitstream;
pub mod codec;
pub mod constants;
pub mod error;
pub mod header;
pub mod message;
pub mod queue;
pub mod queue_manager;
pub mod registry;
pub mod schema;
pub mod value;

pub use error::{Error, Result};
pub use queue_manager::{Ack, DataRequest, QueueKey, QueueKind, QueueManager};
pub use registry::{Dccl, Registry};
pub use schema::DcclMessage;
