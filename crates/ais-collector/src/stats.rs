//! Periodic ingestion summaries
//!
//! Counters are owned here and updated through method calls from the
//! ingestion loop; nothing in here affects control flow.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::feed::message::MessageKind;
use crate::identity::Coverage;
use crate::writer::{WriterSnapshot, WriterStats};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// In-region messages that produced a classification
    pub collected: u64,
    /// Outside the region boundary, or without coordinates
    pub filtered: u64,
    /// Undecodable payloads and bad timestamps
    pub malformed: u64,
    pub static_messages: u64,
    pub position_messages: u64,
    /// No usable IMO and retention disabled
    pub unidentified_dropped: u64,
}

impl Counters {
    /// Share of geofenced messages among everything that reached the filter, in percent
    pub fn filtered_percent(&self) -> f64 {
        let seen = self.collected + self.filtered;
        if seen == 0 {
            0.0
        } else {
            self.filtered as f64 * 100.0 / seen as f64
        }
    }
}

/// One emitted summary
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSummary {
    pub total: Counters,
    pub interval: Counters,
    pub coverage: Coverage,
    pub writer: Option<WriterSnapshot>,
}

pub struct StatsReporter {
    interval: Duration,
    last_report: Instant,
    total: Counters,
    window: Counters,
    writer: Option<Arc<WriterStats>>,
}

impl StatsReporter {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_report: now,
            total: Counters::default(),
            window: Counters::default(),
            writer: None,
        }
    }

    /// Include the writer's counters in every summary
    pub fn with_writer_stats(mut self, writer: Arc<WriterStats>) -> Self {
        self.writer = Some(writer);
        self
    }

    fn bump(&mut self, f: impl Fn(&mut Counters)) {
        f(&mut self.total);
        f(&mut self.window);
    }

    pub fn record_collected(&mut self, kind: MessageKind) {
        self.bump(|c| {
            c.collected += 1;
            match kind {
                MessageKind::ShipStaticData => c.static_messages += 1,
                MessageKind::PositionReport => c.position_messages += 1,
            }
        });
    }

    pub fn record_filtered(&mut self) {
        self.bump(|c| c.filtered += 1);
    }

    pub fn record_malformed(&mut self) {
        self.bump(|c| c.malformed += 1);
    }

    pub fn record_unidentified_dropped(&mut self) {
        self.bump(|c| c.unidentified_dropped += 1);
    }

    pub fn totals(&self) -> Counters {
        self.total
    }

    /// Emit and return a summary once the interval has elapsed, then start a new interval
    pub fn maybe_report(&mut self, now: Instant, coverage: Coverage) -> Option<StatsSummary> {
        if now.saturating_duration_since(self.last_report) < self.interval {
            return None;
        }

        let summary = StatsSummary {
            total: self.total,
            interval: self.window,
            coverage,
            writer: self.writer.as_ref().map(|w| w.snapshot()),
        };
        emit(&summary, self.interval);

        self.window = Counters::default();
        self.last_report = now;
        Some(summary)
    }
}

fn emit(summary: &StatsSummary, interval: Duration) {
    let StatsSummary {
        total,
        interval: window,
        coverage,
        writer,
    } = summary;

    info!(
        interval_secs = interval.as_secs(),
        collected = window.collected,
        filtered = window.filtered,
        malformed = window.malformed,
        static_messages = window.static_messages,
        position_messages = window.position_messages,
        unidentified_dropped = window.unidentified_dropped,
        "Interval statistics"
    );

    info!(
        collected = total.collected,
        filtered = total.filtered,
        filtered_pct = %format!("{:.1}", total.filtered_percent()),
        malformed = total.malformed,
        static_messages = total.static_messages,
        position_messages = total.position_messages,
        unidentified_dropped = total.unidentified_dropped,
        unique_vessels = coverage.seen,
        unique_vessels_with_imo = coverage.resolved,
        coverage_pct = %format!("{:.1}", coverage.ratio_percent()),
        identity_map_size = coverage.mapped,
        "Total statistics"
    );

    if let Some(writer) = writer {
        info!(
            batches_committed = writer.batches_committed,
            rows_committed = writer.rows_committed,
            transient_failures = writer.transient_failures,
            permanent_failures = writer.permanent_failures,
            rows_dropped = writer.rows_dropped,
            "Writer statistics"
        );
    }
}
