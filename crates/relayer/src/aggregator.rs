//! Blob batching and flush triggers.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use darelay_merkle::{Hash32, MerkleCommitment, MerkleHasher, Sha256Hasher};
use tracing::*;

/// Why a batch was flushed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlushTrigger {
    /// The message counter hit a multiple of the modulus.
    Count,
    /// An interval boundary was crossed.
    Interval {
        /// Start of the interval that opened.
        boundary: DateTime<Utc>,
    },
    /// The relay is stopping and cut whatever was pending.
    Shutdown,
}

/// Leaves frozen at a flush.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Batch {
    /// Flush sequence number, starting at 0.
    pub seq: u64,
    /// Leaf hashes in arrival order.
    pub leaves: Vec<Hash32>,
    /// What caused the flush.
    pub trigger: FlushTrigger,
}

impl Batch {
    /// Commitment over the batch leaves.
    pub fn commitment(&self) -> MerkleCommitment {
        MerkleCommitment::from_leaves(self.leaves.clone())
    }
}

#[derive(Debug)]
struct State {
    leaves: Vec<Hash32>,
    counter: u64,
    last_boundary: DateTime<Utc>,
    next_seq: u64,
}

impl State {
    fn take(&mut self, trigger: FlushTrigger) -> Batch {
        let seq = self.next_seq;
        self.next_seq += 1;
        Batch {
            seq,
            leaves: std::mem::take(&mut self.leaves),
            trigger,
        }
    }
}

/// Accumulates leaves and decides when to flush.
///
/// A flush happens when the global message counter reaches a multiple of the
/// modulus, or when the current time, truncated to the interval, passes the
/// last boundary seen. At most one interval flush happens per boundary.
#[derive(Debug)]
pub struct Aggregator {
    count_modulus: u64,
    interval: Duration,
    state: Mutex<State>,
}

/// Start of the `interval`-aligned window containing `now`.
pub fn truncate(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = i64::try_from(interval.as_secs()).unwrap_or(i64::MAX).max(1);
    let secs = now.timestamp().div_euclid(step) * step;
    DateTime::from_timestamp(secs, 0).unwrap_or(now)
}

impl Aggregator {
    /// Creates an aggregator whose first interval is the one containing
    /// `now`.
    pub fn new(count_modulus: u64, interval: Duration, now: DateTime<Utc>) -> Self {
        Self {
            count_modulus: count_modulus.max(1),
            interval,
            state: Mutex::new(State {
                leaves: Vec::new(),
                counter: 0,
                last_boundary: truncate(now, interval),
                next_seq: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends the leaf hash of `blob`, returning any batches this closes.
    ///
    /// The interval check runs before the append, so an interval batch holds
    /// exactly the blobs that arrived inside the closed interval.
    pub fn aggregate(&self, blob: &[u8], now: DateTime<Utc>) -> Vec<Batch> {
        let leaf = Sha256Hasher::hash_leaf(blob);
        let mut state = self.state();
        let mut out = Vec::new();

        if let Some(batch) = self.interval_flush(&mut state, now) {
            out.push(batch);
        }

        state.leaves.push(leaf);
        state.counter += 1;
        if state.counter % self.count_modulus == 0 {
            out.push(state.take(FlushTrigger::Count));
        }

        out
    }

    /// Flushes if `now` opened a new interval since the last check.
    pub fn check_interval(&self, now: DateTime<Utc>) -> Option<Batch> {
        let mut state = self.state();
        self.interval_flush(&mut state, now)
    }

    fn interval_flush(&self, state: &mut State, now: DateTime<Utc>) -> Option<Batch> {
        let boundary = truncate(now, self.interval);
        if boundary <= state.last_boundary {
            return None;
        }
        state.last_boundary = boundary;

        if state.leaves.is_empty() {
            trace!(%boundary, "interval boundary with nothing to flush");
            return None;
        }
        Some(state.take(FlushTrigger::Interval { boundary }))
    }

    /// Puts the leaves of a failed batch back in front of the current batch.
    pub fn requeue(&self, leaves: Vec<Hash32>) {
        if leaves.is_empty() {
            return;
        }
        let mut state = self.state();
        let n = leaves.len();
        let current = std::mem::replace(&mut state.leaves, leaves);
        state.leaves.extend(current);
        debug!(requeued = n, pending = state.leaves.len(), "requeued leaves");
    }

    /// Cuts a batch from every pending leaf, regardless of triggers.
    pub fn flush_remaining(&self) -> Option<Batch> {
        let mut state = self.state();
        if state.leaves.is_empty() {
            return None;
        }
        Some(state.take(FlushTrigger::Shutdown))
    }

    /// Leaves waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.state().leaves.len()
    }

    /// Messages aggregated since startup.
    pub fn counter(&self) -> u64 {
        self.state().counter
    }
}
