//! Dimension correction mode
//!
//! Listens to in-region static data only and rewrites registry length/width
//! from the antenna offsets, once per vessel. Vessels missing from the
//! registry are left for the collector.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::config::CorrectionConfig;
use crate::feed::{FeedEnvelope, FeedHandler, FeedMessage};
use crate::geofence::GeoFilter;
use crate::model::ImoStatus;
use crate::store::{CorrectionOutcome, VesselStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrectionCounters {
    /// In-region static messages with a valid IMO
    pub processed: u64,
    pub corrected: u64,
    /// Unknown to the registry, or already corrected
    pub ignored: u64,
    /// No usable dimension offsets
    pub incomplete: u64,
    pub failed: u64,
}

pub struct DimensionCorrector<S> {
    store: Arc<S>,
    geofence: GeoFilter,
    counters: CorrectionCounters,
    progress_every: u64,
    stats_interval: Duration,
    last_report: Instant,
}

impl<S: VesselStore> DimensionCorrector<S> {
    pub fn new(store: Arc<S>, geofence: GeoFilter, config: &CorrectionConfig) -> Self {
        Self {
            store,
            geofence,
            counters: CorrectionCounters::default(),
            progress_every: config.batch_size.max(1) as u64,
            stats_interval: config.stats_interval,
            last_report: Instant::now(),
        }
    }

    pub fn counters(&self) -> CorrectionCounters {
        self.counters
    }

    pub async fn handle(&mut self, raw: &str) {
        let Ok(envelope) = FeedEnvelope::decode(raw) else {
            trace!("Skipping undecodable feed message");
            return;
        };

        let FeedMessage::Static(meta, data) = envelope.into_message() else {
            return;
        };

        if !self.geofence.admits(meta.latitude, meta.longitude) {
            return;
        }

        let Some(imo) = ImoStatus::from_raw(data.imo_number).valid() else {
            return;
        };

        self.counters.processed += 1;

        let dimensions = data.dimensions();
        if dimensions.is_empty() {
            self.counters.incomplete += 1;
        } else {
            match self.store.correct_dimensions(imo, dimensions).await {
                Ok(CorrectionOutcome::Corrected) => {
                    self.counters.corrected += 1;
                    info!(
                        imo,
                        length = ?dimensions.length,
                        width = ?dimensions.width,
                        "Corrected vessel dimensions"
                    );
                }
                Ok(CorrectionOutcome::AlreadyCorrected | CorrectionOutcome::UnknownVessel) => {
                    self.counters.ignored += 1;
                }
                Err(e) => {
                    self.counters.failed += 1;
                    error!(imo, error = %e, "Dimension correction failed");
                }
            }
        }

        if self.counters.processed % self.progress_every == 0 {
            debug!(processed = self.counters.processed, "Correction progress");
        }
        self.maybe_report(Instant::now());
    }

    fn maybe_report(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_report) < self.stats_interval {
            return;
        }

        let c = self.counters;
        info!(
            processed = c.processed,
            corrected = c.corrected,
            ignored = c.ignored,
            incomplete = c.incomplete,
            failed = c.failed,
            "Correction statistics"
        );
        self.last_report = now;
    }
}

#[async_trait]
impl<S: VesselStore + 'static> FeedHandler for DimensionCorrector<S> {
    async fn on_message(&mut self, raw: &str) {
        self.handle(raw).await;
    }

    async fn on_disconnect(&mut self) {
        // Corrections are written per message; nothing is buffered
        debug!(processed = self.counters.processed, "Correction feed disconnected");
    }
}
