//! Pending rows and the size/time flush trigger
//!
//! The trigger is evaluated by the caller after every message; there is no
//! timer of its own.

use std::time::Duration;

use tokio::time::Instant;

use crate::model::{PendingBatch, Record};

#[derive(Debug)]
pub struct BatchAccumulator {
    pending: PendingBatch,
    batch_size: usize,
    flush_interval: Duration,
    last_flush: Instant,
}

impl BatchAccumulator {
    pub fn new(batch_size: usize, flush_interval: Duration, now: Instant) -> Self {
        Self {
            pending: PendingBatch::default(),
            batch_size,
            flush_interval,
            last_flush: now,
        }
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.pending.push(record);
        }
    }

    /// Combined row count across all four lists
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Size reached, or the flush interval elapsed since the last flush
    pub fn should_flush(&self, now: Instant) -> bool {
        self.pending.len() >= self.batch_size
            || now.saturating_duration_since(self.last_flush) >= self.flush_interval
    }

    /// Hand over every pending row and restart the interval
    pub fn take(&mut self, now: Instant) -> PendingBatch {
        self.last_flush = now;
        std::mem::take(&mut self.pending)
    }
}
