//! A single outgoing queue: an ordered buffer of pre-encoded records
//! with priority growth, TTL, blackout, and an ack-pending side table.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use log::{trace, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_priority_base() -> f64 {
    0.0
}
fn default_priority_growth_rate() -> f64 {
    1.0
}
fn default_ttl_secs() -> f64 {
    30.0
}
fn default_blackout_secs() -> f64 {
    0.0
}
fn default_max_queue() -> usize {
    10
}
fn default_newest_first() -> bool {
    false
}
fn default_on_demand() -> bool {
    false
}
fn default_ack_required_default() -> bool {
    false
}

/// Tunable parameters for one [`Queue`], loadable from any
/// `serde`-compatible format (JSON via `serde_json` in tests).
/// `ttl`/`blackout_interval` are carried as seconds since [`Duration`]
/// isn't itself `Serialize`/`Deserialize`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Priority at the instant a record is enqueued.
    #[serde(default = "default_priority_base")]
    pub priority_base: f64,
    /// Priority added per second a record waits.
    #[serde(default = "default_priority_growth_rate")]
    pub priority_growth_rate: f64,
    /// Seconds a record may wait before [`Queue::expire`] drops it.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: f64,
    /// Minimum seconds between two transmissions from this queue.
    #[serde(default = "default_blackout_secs")]
    pub blackout_secs: f64,
    /// Maximum live (non-ack-pending) queue depth.
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,
    /// If true, the queue is LIFO and overflow drops the oldest entry
    /// to make room; if false, it's FIFO and overflow rejects the push
    /// with [`Error::QueueFull`].
    #[serde(default = "default_newest_first")]
    pub newest_first: bool,
    /// If true, an empty or stale queue is refreshed via the
    /// `on_demand` callback before it's considered in a contest.
    #[serde(default = "default_on_demand")]
    pub on_demand: bool,
    /// Default `ack_requested` for a pushed record, absent an explicit
    /// override from the caller.
    #[serde(default = "default_ack_required_default")]
    pub ack_required_default: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            priority_base: default_priority_base(),
            priority_growth_rate: default_priority_growth_rate(),
            ttl_secs: default_ttl_secs(),
            blackout_secs: default_blackout_secs(),
            max_queue: default_max_queue(),
            newest_first: default_newest_first(),
            on_demand: default_on_demand(),
            ack_required_default: default_ack_required_default(),
        }
    }
}

impl QueueConfig {
    /// [`Self::ttl_secs`] as a [`Duration`].
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs_f64(self.ttl_secs.max(0.0))
    }

    /// [`Self::blackout_secs`] as a [`Duration`].
    #[must_use]
    pub fn blackout(&self) -> Duration {
        Duration::from_secs_f64(self.blackout_secs.max(0.0))
    }
}

/// One record sitting in a [`Queue`], with the bookkeeping a contest
/// and ack cycle need. `bytes` is the complete encoded wire form
/// (header envelope plus schema payload), ready to drop straight into
/// the stitched packet.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueEntry {
    /// Complete encoded record bytes, header included.
    pub bytes: Vec<u8>,
    /// When this record was pushed.
    pub enqueue_time: Instant,
    /// Whether the modem should expect (and this manager should track)
    /// an ack for this record once it's sent.
    pub ack_requested: bool,
    /// Wire destination address, read off the header at push time so
    /// contest/stitch logic doesn't need to re-decode it.
    pub destination: u32,
}

/// An ordered buffer of one record type's outgoing instances.
pub struct Queue {
    config: QueueConfig,
    fifo: VecDeque<QueueEntry>,
    ack_pending: HashMap<u32, Vec<QueueEntry>>,
    last_send_time: Option<Instant>,
}

impl Queue {
    /// A new, empty queue under `config`.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            fifo: VecDeque::new(),
            ack_pending: HashMap::new(),
            last_send_time: None,
        }
    }

    /// This queue's configuration.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Flip this queue's `on_demand` flag after construction, so a host
    /// can enable on-demand refresh for a queue it already registered.
    pub fn set_on_demand(&mut self, on_demand: bool) {
        self.config.on_demand = on_demand;
    }

    /// Number of live (non-ack-pending) records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    /// True if there are no live records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    /// Append a record. Under `newest_first`, an overflowing push drops
    /// the oldest live record to make room; otherwise it fails with
    /// [`Error::QueueFull`] and the new record isn't added.
    pub fn push(&mut self, bytes: Vec<u8>, ack_requested: bool, destination: u32, now: Instant, label: &str) -> Result<()> {
        if self.fifo.len() >= self.config.max_queue {
            if self.config.newest_first {
                warn!("queue `{label}` full at {}, dropping oldest to make room", self.config.max_queue);
                self.fifo.pop_front();
            } else {
                return Err(Error::QueueFull { queue: label.to_string(), max: self.config.max_queue });
            }
        }
        trace!("queue `{label}` push: {} bytes, ack_requested={ack_requested}", bytes.len());
        self.fifo.push_back(QueueEntry { bytes, enqueue_time: now, ack_requested, destination });
        Ok(())
    }

    /// The record a contest would win from this queue right now, along
    /// with its priority and this queue's last send time. `None` if the
    /// queue is empty or in blackout.
    #[must_use]
    pub fn peek_for(&self, now: Instant) -> Option<(&QueueEntry, f64, Option<Instant>)> {
        if let Some(last) = self.last_send_time {
            if now.saturating_duration_since(last) < self.config.blackout() {
                return None;
            }
        }
        let entry = if self.config.newest_first { self.fifo.back() } else { self.fifo.front() }?;
        let age = now.saturating_duration_since(entry.enqueue_time).as_secs_f64();
        let priority = self.config.priority_base + self.config.priority_growth_rate * age;
        Some((entry, priority, self.last_send_time))
    }

    /// Age of the record a contest would currently consider, for
    /// on-demand skew checks. `None` if the queue is empty.
    #[must_use]
    pub fn newest_message_age(&self, now: Instant) -> Option<Duration> {
        let entry = if self.config.newest_first { self.fifo.back() } else { self.fifo.front() }?;
        Some(now.saturating_duration_since(entry.enqueue_time))
    }

    /// Remove and return the record [`Queue::peek_for`] would have
    /// named the winner, moving it to the ack-pending set for `frame`
    /// if it requested one.
    pub fn take(&mut self, frame: u32, now: Instant) -> Option<QueueEntry> {
        let entry = if self.config.newest_first { self.fifo.pop_back() } else { self.fifo.pop_front() }?;
        self.last_send_time = Some(now);
        if entry.ack_requested {
            self.ack_pending.entry(frame).or_default().push(entry.clone());
        }
        Some(entry)
    }

    /// Pop every ack-pending record for `frame` (normally zero or one).
    pub fn ack(&mut self, frame: u32) -> Vec<QueueEntry> {
        self.ack_pending.remove(&frame).unwrap_or_default()
    }

    /// Restore every ack-pending record, across every frame, to the
    /// front of the live FIFO — used when a packet is abandoned and its
    /// contents should be retried.
    pub fn clear_ack_queue(&mut self) {
        for (_, entries) in self.ack_pending.drain() {
            for entry in entries.into_iter().rev() {
                self.fifo.push_front(entry);
            }
        }
    }

    /// Remove and return every live record older than `ttl`.
    pub fn expire(&mut self, now: Instant) -> Vec<QueueEntry> {
        let ttl = self.config.ttl();
        let mut expired = Vec::new();
        self.fifo.retain(|e| {
            if now.saturating_duration_since(e.enqueue_time) > ttl {
                expired.push(e.clone());
                false
            } else {
                true
            }
        });
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> QueueConfig {
        QueueConfig { max_queue: 2, ..QueueConfig::default() }
    }

    #[test]
    fn ack_pop_removes_exactly_one_record() {
        let mut q = Queue::new(cfg());
        let now = Instant::now();
        q.push(vec![1], true, 7, now, "q1").unwrap();
        q.push(vec![2], true, 7, now, "q1").unwrap();
        assert_eq!(q.len(), 2);

        let taken = q.take(0, now).unwrap();
        assert_eq!(taken.bytes, vec![1]);
        assert_eq!(q.len(), 1);

        let popped = q.ack(0);
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].bytes, vec![1]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn ttl_expiry_removes_stale_records() {
        let config = QueueConfig { ttl_secs: 1.0, ..QueueConfig::default() };
        let mut q = Queue::new(config);
        let t0 = Instant::now();
        q.push(vec![9], false, 7, t0, "q1").unwrap();
        assert!(q.expire(t0).is_empty());

        let t2 = t0 + Duration::from_secs(2);
        let expired = q.expire(t2);
        assert_eq!(expired.len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn fifo_overflow_rejects_new_push() {
        let mut q = Queue::new(cfg());
        let now = Instant::now();
        q.push(vec![1], false, 7, now, "q1").unwrap();
        q.push(vec![2], false, 7, now, "q1").unwrap();
        assert!(q.push(vec![3], false, 7, now, "q1").is_err());
    }

    #[test]
    fn lifo_overflow_drops_oldest() {
        let config = QueueConfig { max_queue: 2, newest_first: true, ..QueueConfig::default() };
        let mut q = Queue::new(config);
        let now = Instant::now();
        q.push(vec![1], false, 7, now, "q1").unwrap();
        q.push(vec![2], false, 7, now, "q1").unwrap();
        q.push(vec![3], false, 7, now, "q1").unwrap();
        assert_eq!(q.len(), 2);
        let (entry, _, _) = q.peek_for(now).unwrap();
        assert_eq!(entry.bytes, vec![3]);
    }

    #[test]
    fn blackout_suppresses_peek_until_interval_elapses() {
        let config = QueueConfig { blackout_secs: 5.0, ..QueueConfig::default() };
        let mut q = Queue::new(config);
        let t0 = Instant::now();
        q.push(vec![1], false, 7, t0, "q1").unwrap();
        q.take(0, t0);
        q.push(vec![2], false, 7, t0, "q1").unwrap();
        assert!(q.peek_for(t0 + Duration::from_secs(1)).is_none());
        assert!(q.peek_for(t0 + Duration::from_secs(6)).is_some());
    }

    #[test]
    fn clear_ack_queue_restores_pending_records() {
        let mut q = Queue::new(cfg());
        let now = Instant::now();
        q.push(vec![1], true, 7, now, "q1").unwrap();
        q.take(0, now);
        assert!(q.is_empty());
        q.clear_ack_queue();
        assert_eq!(q.len(), 1);
        assert!(q.ack(0).is_empty());
    }

    #[test]
    fn queue_config_round_trips_through_json() {
        let config = QueueConfig { priority_base: 1.5, max_queue: 20, newest_first: true, ..QueueConfig::default() };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: QueueConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn queue_config_defaults_fill_partial_json() {
        let parsed: QueueConfig = serde_json::from_str(r#"{"max_queue": 5}"#).unwrap();
        assert_eq!(parsed.max_queue, 5);
        assert_eq!(parsed.priority_base, default_priority_base());
        assert_eq!(parsed.ttl_secs, default_ttl_secs());
    }
}
