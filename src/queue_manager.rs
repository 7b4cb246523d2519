//! The Queue Manager: a priority contest across named queues feeding
//! fixed-byte modem frames.
//!
//! This is the host-facing half of the acoustic stack. It never builds
//! or reads field values itself — that's [`crate::message`]'s job — it
//! only moves already-encoded bytes between queues and the modem,
//! stitching several user-frames into one packet and splitting them
//! back apart on receive. The one exception is the very first
//! user-frame of an incoming DCCL packet: since it carries no
//! next-frame-size prefix of its own, finding where it ends means
//! asking the registry to decode it (see [`QueueManager::handle_modem_receive`]).

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use log::{debug, trace, warn};

use crate::bitstream::Bitstream;
use crate::constants::{BROADCAST_ID, CCL_PACKET_BYTES, DCCL_CCL_HEADER, MAX_ID, MIN_ID, ON_DEMAND_SKEW};
use crate::error::{Error, Result};
use crate::header::{self, HeaderLayout};
use crate::message;
use crate::queue::{Queue, QueueConfig, QueueEntry};
use crate::registry::Registry;

/// Which protocol family a queue's id belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Dynamic Compact Control Language: bit-packed, schema-driven.
    Dccl,
    /// Legacy fixed 32-byte Compact Control Language.
    Ccl,
}

/// Unique key naming one queue within a [`QueueManager`]. `(type, id)`
/// pairs are unique across the whole manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueKey {
    /// DCCL or legacy CCL.
    pub kind: QueueKind,
    /// Record type id (DCCL id, or CCL id byte) within `kind`.
    pub id: u32,
}

impl QueueKey {
    /// A DCCL-typed key for `dccl_id`.
    #[must_use]
    pub fn dccl(dccl_id: u32) -> Self {
        Self { kind: QueueKind::Dccl, id: dccl_id }
    }

    /// A legacy-CCL-typed key for `ccl_id`.
    #[must_use]
    pub fn ccl(ccl_id: u32) -> Self {
        Self { kind: QueueKind::Ccl, id: ccl_id }
    }
}

impl std::fmt::Display for QueueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            QueueKind::Dccl => write!(f, "dccl:{}", self.id),
            QueueKind::Ccl => write!(f, "ccl:{}", self.id),
        }
    }
}

/// What the modem driver asks for when it has `max_bytes` of airtime
/// available for outbound packet number `frame`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataRequest {
    /// Packet sequence number, used later to correlate an ack.
    pub frame: u32,
    /// Airtime budget in bytes for the whole stitched packet.
    pub max_bytes: usize,
    /// Destination the modem driver expects, if it already knows one
    /// (used only to seed on-demand callbacks; the contest picks the
    /// real destination from the winning queue).
    pub destination_hint: Option<u32>,
}

/// What the modem driver reports once it learns a transmitted packet
/// was acknowledged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ack {
    /// Packet sequence number this ack refers to.
    pub frame: u32,
    /// Modem id the ack arrived from.
    pub src: u32,
}

/// Callbacks the host installs on a [`QueueManager`]. Each is optional
/// and at most one may be registered per slot.
#[derive(Default)]
pub struct Callbacks {
    /// A record's TTL expired before it could be sent.
    pub on_expire: Option<Box<dyn FnMut(QueueKey, QueueEntry)>>,
    /// An ack popped a record out of its ack-pending set.
    pub on_ack: Option<Box<dyn FnMut(QueueKey, u32, QueueEntry)>>,
    /// A DCCL user-frame was reassembled off the wire: `(key, payload, destination)`.
    pub on_receive: Option<Box<dyn FnMut(QueueKey, Vec<u8>, u32)>>,
    /// A legacy CCL packet arrived: `(key, raw 32 bytes)`.
    pub on_receive_ccl: Option<Box<dyn FnMut(QueueKey, Vec<u8>)>>,
    /// An on-demand queue needs a fresh record before the contest runs.
    /// Returns the complete encoded bytes to push, or `None` to skip.
    pub on_demand: Option<Box<dyn FnMut(QueueKey, &DataRequest) -> Option<Vec<u8>>>>,
    /// A queue's live depth changed.
    pub on_queue_size_change: Option<Box<dyn FnMut(QueueKey, usize)>>,
    /// Opaque byte-in/byte-out transform applied to a fully stitched
    /// packet right before it's returned to the modem driver, and its
    /// inverse applied to a packet right as it arrives (before
    /// unstitching). Neither direction is implemented by this crate —
    /// the actual cipher and key material are the host's concern; this
    /// is only the injection point.
    pub encrypt_packet: Option<Box<dyn FnMut(&[u8]) -> Vec<u8>>>,
    /// Inverse of [`Callbacks::encrypt_packet`].
    pub decrypt_packet: Option<Box<dyn FnMut(&[u8]) -> Vec<u8>>>,
}

/// Priority contest across named queues, frame stitching/unstitching,
/// ack routing, and on-demand callback dispatch.
pub struct QueueManager<'r> {
    registry: &'r Registry,
    self_id: u32,
    header_layout: HeaderLayout,
    queues: HashMap<QueueKey, Queue>,
    /// Which queues had a record move to ack-pending for a given
    /// in-flight frame number, so [`QueueManager::handle_modem_ack`]
    /// knows where to look and a subsequent `frame == 0` knows what to
    /// abandon if no ack ever arrives.
    frames_in_flight: HashMap<u32, HashSet<QueueKey>>,
    callbacks: Callbacks,
}

impl<'r> QueueManager<'r> {
    /// A manager with no queues yet, keyed against `registry` for the
    /// header layout and (for the first user-frame of an incoming
    /// packet only) schema lookups.
    #[must_use]
    pub fn new(registry: &'r Registry, self_id: u32) -> Self {
        Self {
            registry,
            self_id,
            header_layout: registry.header_layout(),
            queues: HashMap::new(),
            frames_in_flight: HashMap::new(),
            callbacks: Callbacks::default(),
        }
    }

    /// Mutable access to the callback slots.
    pub fn callbacks_mut(&mut self) -> &mut Callbacks {
        &mut self.callbacks
    }

    /// Register a new queue under `key`. Fails with [`Error::SchemaError`]
    /// if `key`'s id is outside the legal range for its kind.
    pub fn add_queue(&mut self, key: QueueKey, config: QueueConfig) -> Result<()> {
        let (lo, hi) = match key.kind {
            QueueKind::Dccl => (MIN_ID, MAX_ID),
            QueueKind::Ccl => (0, 255),
        };
        if key.id < lo || key.id > hi {
            return Err(Error::SchemaError {
                record: key.to_string(),
                reason: format!("id {} outside the legal [{lo}, {hi}] range for {:?}", key.id, key.kind),
            });
        }
        debug!("added queue {key}");
        self.queues.insert(key, Queue::new(config));
        Ok(())
    }

    /// Enable on-demand refresh for an already-registered queue.
    pub fn set_on_demand(&mut self, key: QueueKey) -> Result<()> {
        let queue = self.queues.get_mut(&key).ok_or_else(|| Error::NoSuchQueue { queue: key.to_string() })?;
        queue.set_on_demand(true);
        Ok(())
    }

    /// Push one complete, pre-encoded record into its queue. `bytes`
    /// must already be the full wire form (header included for DCCL;
    /// the whole 32-byte packet for CCL). If the record's own
    /// destination is this manager's `self_id`, it bypasses the queue
    /// entirely and is fed straight to the receive path (loopback).
    pub fn push(&mut self, key: QueueKey, bytes: Vec<u8>, ack_requested: Option<bool>) -> Result<()> {
        let now = Instant::now();
        let destination = match key.kind {
            QueueKind::Dccl => header::destination_addr(&bytes, &self.header_layout),
            // The legacy CCL format carries no address field in this
            // implementation's scope; loopback can't be expressed
            // for it, so every CCL push goes out over the air.
            QueueKind::Ccl => BROADCAST_ID.wrapping_add(if self.self_id == BROADCAST_ID { 1 } else { 0 }),
        };
        if key.kind == QueueKind::Dccl && destination == self.self_id {
            debug!("loopback push for {key}");
            self.unstitch_dccl(&bytes);
            return Ok(());
        }
        let queue = self.queues.get_mut(&key).ok_or_else(|| Error::NoSuchQueue { queue: key.to_string() })?;
        let ack = ack_requested.unwrap_or(queue.config().ack_required_default);
        queue.push(bytes, ack, destination, now, &key.to_string())?;
        let new_len = queue.len();
        if let Some(cb) = &mut self.callbacks.on_queue_size_change {
            cb(key, new_len);
        }
        Ok(())
    }

    /// Expire stale records across every queue, firing `on_expire` and
    /// `on_queue_size_change` for each one. Driven by the host's event
    /// loop tick.
    pub fn do_work(&mut self) {
        let now = Instant::now();
        let mut expired_by_queue = Vec::new();
        for (key, queue) in &mut self.queues {
            let expired = queue.expire(now);
            if !expired.is_empty() {
                expired_by_queue.push((*key, expired, queue.len()));
            }
        }
        for (key, expired, new_len) in expired_by_queue {
            for entry in expired {
                if let Some(cb) = &mut self.callbacks.on_expire {
                    cb(key, entry);
                }
            }
            if let Some(cb) = &mut self.callbacks.on_queue_size_change {
                cb(key, new_len);
            }
        }
    }

    /// Build one complete outbound packet for `request`, stitching
    /// winners from the priority contest together until no more room or
    /// eligible content remains.
    pub fn handle_modem_data_request(&mut self, request: DataRequest) -> Vec<u8> {
        let now = Instant::now();
        if request.frame == 0 {
            self.clear_packet();
        }

        let header_bytes = self.header_layout.header_bytes();
        let mut payload: Vec<u8> = Vec::new();
        let mut dest: Option<u32> = None;
        let mut ack_required = false;
        let mut touched: HashSet<QueueKey> = HashSet::new();
        let mut drawn: HashSet<QueueKey> = HashSet::new();
        let mut prev_header_offset: Option<usize> = None;
        let mut bytes_remaining = request.max_bytes;

        loop {
            if bytes_remaining <= header_bytes {
                break;
            }
            let is_first = prev_header_offset.is_none();
            let exclude_ccl = !is_first;
            let Some(key) = self.contest(now, &request, exclude_ccl, dest, &drawn) else {
                break;
            };

            let Some(entry_len) = self.queues.get(&key).and_then(|q| q.peek_for(now)).map(|(e, ..)| e.bytes.len())
            else {
                break;
            };
            let needed = entry_len + usize::from(!is_first);
            if needed > bytes_remaining {
                trace!("winner {key} ({entry_len}B) would overflow {bytes_remaining}B remaining, stopping stitch");
                break;
            }

            let queue = self.queues.get_mut(&key).expect("contest only names a registered queue");
            let Some(entry) = queue.take(request.frame, now) else {
                break;
            };
            drawn.insert(key);
            let new_len = queue.len();
            if let Some(cb) = &mut self.callbacks.on_queue_size_change {
                cb(key, new_len);
            }

            if entry.ack_requested {
                touched.insert(key);
            }
            ack_required |= entry.ack_requested;
            if dest.is_none() {
                dest = Some(entry.destination);
            }

            let mut bytes = entry.bytes.clone();
            if key.kind == QueueKind::Dccl {
                header::set_broadcast_flag(&mut bytes, &self.header_layout, entry.destination == BROADCAST_ID);
                header::set_multi_frame_flag(&mut bytes, &self.header_layout, false);
            }

            if let Some(offset) = prev_header_offset {
                payload.push((bytes.len().saturating_sub(header_bytes)) as u8);
                header::set_multi_frame_flag(&mut payload[offset..], &self.header_layout, true);
            }
            let frame_offset = payload.len();
            bytes_remaining -= needed;
            payload.extend_from_slice(&bytes);
            prev_header_offset = Some(frame_offset);

            if key.kind == QueueKind::Ccl {
                // CCL must be the whole packet.
                break;
            }
        }

        if ack_required && !touched.is_empty() {
            self.frames_in_flight.entry(request.frame).or_default().extend(touched);
        }
        trace!("built frame {}: {} bytes, ack_required={ack_required}", request.frame, payload.len());
        if let Some(cb) = &mut self.callbacks.encrypt_packet {
            payload = cb(&payload);
        }
        payload
    }

    /// Route an ack to the queues it concerns, popping each matching
    /// ack-pending record and firing `on_ack` once per record.
    /// Loopback acks (`src == self_id`) and acks for frames this
    /// manager never tracked are dropped silently.
    pub fn handle_modem_ack(&mut self, ack: Ack) {
        if ack.src == self.self_id {
            return;
        }
        let Some(keys) = self.frames_in_flight.remove(&ack.frame) else {
            warn!("ack for untracked frame {} (AckMismatch)", ack.frame);
            return;
        };
        for key in keys {
            let Some(queue) = self.queues.get_mut(&key) else { continue };
            let popped = queue.ack(ack.frame);
            let new_len = queue.len();
            for entry in popped {
                debug!("ack for frame {} popped a record from {key}", ack.frame);
                if let Some(cb) = &mut self.callbacks.on_ack {
                    cb(key, ack.frame, entry);
                }
            }
            if let Some(cb) = &mut self.callbacks.on_queue_size_change {
                cb(key, new_len);
            }
        }
    }

    /// Unstitch a received packet: split it into its constituent
    /// user-frames (or dispatch a legacy CCL packet whole) and fire
    /// `on_receive`/`on_receive_ccl` for each.
    pub fn handle_modem_receive(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            warn!("dropping empty received frame");
            return;
        }
        let owned;
        let bytes: &[u8] = if let Some(cb) = &mut self.callbacks.decrypt_packet {
            owned = cb(bytes);
            owned.as_slice()
        } else {
            bytes
        };
        if bytes[0] == DCCL_CCL_HEADER {
            self.unstitch_dccl(bytes);
        } else {
            self.unstitch_ccl(bytes);
        }
    }

    /// Abandon every record still in an ack-pending set, returning each
    /// to its queue's live FIFO for retry. Called at the start of a new
    /// packet cycle (`frame == 0`).
    fn clear_packet(&mut self) {
        for (_, keys) in self.frames_in_flight.drain() {
            for key in keys {
                if let Some(queue) = self.queues.get_mut(&key) {
                    queue.clear_ack_queue();
                }
            }
        }
    }

    /// Run on-demand refreshers, then pick the highest-priority
    /// eligible queue, tie-broken by earliest `last_send_time` (a queue
    /// that has never sent sorts first, since `None < Some(_)`).
    /// `drawn` excludes queues that already contributed a user-frame to
    /// this packet: one user-frame per queue per packet, even if its
    /// next record would still win on priority.
    fn contest(
        &mut self,
        now: Instant,
        request: &DataRequest,
        exclude_ccl: bool,
        dest_lock: Option<u32>,
        drawn: &HashSet<QueueKey>,
    ) -> Option<QueueKey> {
        self.run_on_demand_refreshers(now, request);

        let mut best: Option<(QueueKey, f64, Option<Instant>)> = None;
        for (key, queue) in &self.queues {
            if exclude_ccl && key.kind == QueueKind::Ccl {
                continue;
            }
            if drawn.contains(key) {
                continue;
            }
            let Some((entry, priority, last_send)) = queue.peek_for(now) else { continue };
            if let Some(d) = dest_lock {
                if entry.destination != d && entry.destination != BROADCAST_ID {
                    continue;
                }
            }
            let better = match &best {
                None => true,
                Some((_, best_priority, best_last)) => {
                    priority > *best_priority || (priority == *best_priority && last_send < *best_last)
                }
            };
            if better {
                best = Some((*key, priority, last_send));
            }
        }
        best.map(|(key, ..)| key)
    }

    fn run_on_demand_refreshers(&mut self, now: Instant, request: &DataRequest) {
        let stale: Vec<QueueKey> = self
            .queues
            .iter()
            .filter(|(_, q)| q.config().on_demand)
            .filter(|(_, q)| q.newest_message_age(now).is_none_or(|age| age > ON_DEMAND_SKEW))
            .map(|(key, _)| *key)
            .collect();

        for key in stale {
            let Some(cb) = &mut self.callbacks.on_demand else { break };
            let Some(bytes) = cb(key, request) else { continue };
            let destination = match key.kind {
                QueueKind::Dccl => header::destination_addr(&bytes, &self.header_layout),
                QueueKind::Ccl => request.destination_hint.unwrap_or(BROADCAST_ID),
            };
            let Some(queue) = self.queues.get_mut(&key) else { continue };
            let ack_default = queue.config().ack_required_default;
            if let Err(e) = queue.push(bytes, ack_default, destination, now, &key.to_string()) {
                warn!("on-demand refresh for {key} could not be queued: {e}");
            }
        }
    }

    fn unstitch_dccl(&mut self, bytes: &[u8]) {
        let header_bytes = self.header_layout.header_bytes();
        let mut offset = 0usize;
        let mut first = true;

        loop {
            if bytes.len() < offset + header_bytes {
                warn!("DCCL packet truncated at offset {offset}");
                return;
            }
            let header_bits = Bitstream::from_bytes(&bytes[offset..offset + header_bytes], header_bytes * 8);
            let fields = match header::decode_header(&header_bits, &self.header_layout) {
                Ok((fields, _)) => fields,
                Err(e) => {
                    warn!("corrupt DCCL header at offset {offset}: {e}");
                    return;
                }
            };

            // Only the very first user-frame lacks a next-size prefix
            // of its own; its length has to come from actually decoding
            // its schema's body.
            let payload_len = if first {
                let schema = match self.registry.schema_by_dccl_id(fields.dccl_id) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("unknown DCCL id {}: {e}", fields.dccl_id);
                        return;
                    }
                };
                let body_bits = Bitstream::from_bytes(
                    &bytes[offset + header_bytes..],
                    (bytes.len() - offset - header_bytes) * 8,
                );
                match message::decode_record(self.registry, schema, &body_bits) {
                    Ok((_, used_bits)) => used_bits.div_ceil(8),
                    Err(e) => {
                        warn!("failed to size first user-frame for dccl_id {}: {e}", fields.dccl_id);
                        return;
                    }
                }
            } else {
                bytes[offset - 1] as usize
            };

            let frame_end = offset + header_bytes + payload_len;
            if bytes.len() < frame_end {
                warn!("DCCL user-frame at offset {offset} truncated: need {frame_end}B, have {}B", bytes.len());
                return;
            }

            let payload = bytes[offset + header_bytes..frame_end].to_vec();
            let destination = if fields.broadcast { BROADCAST_ID } else { fields.destination };
            let key = QueueKey::dccl(fields.dccl_id);
            debug!("received DCCL user-frame dccl_id={} {}B dest={destination}", fields.dccl_id, payload.len());
            if let Some(cb) = &mut self.callbacks.on_receive {
                cb(key, payload, destination);
            }

            if !fields.multi_frame {
                return;
            }
            if frame_end >= bytes.len() {
                warn!("multi-frame flag set but packet ended before a next-size byte");
                return;
            }
            offset = frame_end + 1;
            first = false;
        }
    }

    fn unstitch_ccl(&mut self, bytes: &[u8]) {
        if bytes.len() != CCL_PACKET_BYTES {
            warn!("legacy CCL packet is {}B, expected the fixed {CCL_PACKET_BYTES}B", bytes.len());
        }
        let ccl_id = u32::from(bytes[0]);
        let key = QueueKey::ccl(ccl_id);
        debug!("received legacy CCL packet ccl_id={ccl_id}");
        if let Some(cb) = &mut self.callbacks.on_receive_ccl {
            cb(key, bytes.to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HeaderFields;
    use crate::schema::{FieldDescriptor, FieldType, RecordSchemaBuilder, Section};
    use crate::value::{FieldValue, Record};
    use std::cell::RefCell;
    use std::time::Duration;

    fn registry_with(dccl_id: u32) -> Registry {
        let mut registry = Registry::new();
        let schema = RecordSchemaBuilder::new(format!("msg{dccl_id}"), dccl_id)
            .field(FieldDescriptor::new("flag", FieldType::Bool, Section::Body))
            .build();
        registry.register_record(schema).unwrap();
        registry
    }

    fn encode_standalone(registry: &Registry, dccl_id: u32, destination: u32) -> Vec<u8> {
        let layout = registry.header_layout();
        let header = HeaderFields {
            dccl_id,
            multi_frame: false,
            broadcast: destination == BROADCAST_ID,
            source: 1,
            destination,
            time: 0,
        };
        let mut bits = header::encode_header(&header, &layout).unwrap();
        let schema = registry.schema_by_dccl_id(dccl_id).unwrap();
        let record = Record::new().with("flag", FieldValue::Bool(true));
        let body = message::encode_record(registry, schema, &record).unwrap();
        bits.append(&body);
        bits.to_bytes()
    }

    // Stitching/unstitching is covered end-to-end in
    // `tests/stitching.rs`, against the public API only.

    #[test]
    fn ack_pops_exactly_the_sent_record() {
        let registry = registry_with(30);
        let mut manager = QueueManager::new(&registry, 99);
        let key = QueueKey::dccl(30);
        manager.add_queue(key, QueueConfig::default()).unwrap();
        manager.push(key, encode_standalone(&registry, 30, 7), Some(true)).unwrap();
        manager.push(key, encode_standalone(&registry, 30, 7), Some(true)).unwrap();

        let acked = RefCell::new(0u32);
        manager.callbacks_mut().on_ack = Some(Box::new(|_key, _frame, _entry| {
            *acked.borrow_mut() += 1;
        }));

        let _ = manager.handle_modem_data_request(DataRequest { frame: 0, max_bytes: 64, destination_hint: None });
        manager.handle_modem_ack(Ack { frame: 0, src: 7 });
        assert_eq!(*acked.borrow(), 1);
    }

    #[test]
    fn loopback_ack_is_ignored() {
        let registry = registry_with(31);
        let mut manager = QueueManager::new(&registry, 99);
        let key = QueueKey::dccl(31);
        manager.add_queue(key, QueueConfig::default()).unwrap();
        manager.push(key, encode_standalone(&registry, 31, 7), Some(true)).unwrap();
        let _ = manager.handle_modem_data_request(DataRequest { frame: 0, max_bytes: 64, destination_hint: None });
        // Loopback: an ack claiming to be from ourselves is dropped, so the
        // frame stays in flight and a real ack still pops it afterward.
        manager.handle_modem_ack(Ack { frame: 0, src: 99 });
        manager.handle_modem_ack(Ack { frame: 0, src: 7 });
    }

    #[test]
    fn ttl_expiry_fires_on_expire() {
        let registry = registry_with(32);
        let mut manager = QueueManager::new(&registry, 99);
        let key = QueueKey::dccl(32);
        manager.add_queue(key, QueueConfig { ttl_secs: 1.0, ..QueueConfig::default() }).unwrap();
        manager.push(key, encode_standalone(&registry, 32, 7), Some(false)).unwrap();

        let expired = RefCell::new(0u32);
        manager.callbacks_mut().on_expire = Some(Box::new(|_key, _entry| {
            *expired.borrow_mut() += 1;
        }));
        manager.do_work();
        assert_eq!(*expired.borrow(), 0);

        std::thread::sleep(Duration::from_millis(0));
        // Can't advance a real clock in a unit test without sleeping for
        // the full TTL; the queue-level expiry timing is already covered
        // in `crate::queue`'s tests, so this only checks the callback wiring
        // fires zero times when nothing has expired yet.
    }
}
