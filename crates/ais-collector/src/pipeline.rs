//! The ingestion loop body
//!
//! decode -> geofence -> timestamp -> classify -> accumulate -> (flush to writer)
//!
//! Everything here runs on the single receive task, so the identity map,
//! destination cache and pending rows need no locking. Feed order is kept
//! all the way into the writer's queue.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::batch::BatchAccumulator;
use crate::classifier::{ClassifierSettings, MessageClassifier, Sighting};
use crate::config::IngestConfig;
use crate::feed::{FeedEnvelope, FeedHandler, FeedMessage};
use crate::geofence::GeoFilter;
use crate::identity::IdentityResolver;
use crate::stats::{Counters, StatsReporter};
use crate::store::VesselStore;
use crate::timestamp;
use crate::writer::{BatchWriter, WriterHandle, WriterSettings};

pub struct IngestPipeline<S> {
    geofence: GeoFilter,
    classifier: MessageClassifier<S>,
    accumulator: BatchAccumulator,
    writer: WriterHandle,
    stats: StatsReporter,
}

impl<S: VesselStore + 'static> IngestPipeline<S> {
    /// Wire the pipeline and spawn its writer task
    ///
    /// `identity` should already be loaded from the store.
    pub fn new(
        store: Arc<S>,
        identity: IdentityResolver<S>,
        geofence: GeoFilter,
        config: &IngestConfig,
    ) -> Self {
        let now = Instant::now();

        let writer = BatchWriter::spawn(
            Arc::clone(&store),
            WriterSettings {
                queue_capacity: config.writer_queue_capacity,
                retry_interval: config.flush_interval,
                max_retained_rows: config.max_retained_rows,
            },
        );
        let classifier = MessageClassifier::new(
            store,
            identity,
            ClassifierSettings {
                save_unidentified: config.save_unidentified,
                destination_lookback: config.destination_lookback,
            },
        );

        Self {
            geofence,
            classifier,
            accumulator: BatchAccumulator::new(config.batch_size, config.flush_interval, now),
            stats: StatsReporter::new(config.stats_interval, now).with_writer_stats(writer.stats()),
            writer,
        }
    }

    /// Process one raw feed payload, then evaluate the flush and report triggers
    pub async fn handle(&mut self, raw: &str) {
        self.process(raw).await;

        let now = Instant::now();
        if self.accumulator.should_flush(now) {
            self.submit_pending(now).await;
        }
        self.stats.maybe_report(now, self.classifier.coverage());
    }

    async fn process(&mut self, raw: &str) {
        let envelope = match FeedEnvelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.record_malformed();
                warn!(error = %e, len = raw.len(), "Discarding undecodable feed message");
                return;
            }
        };

        let message = envelope.into_message();
        let meta = match &message {
            FeedMessage::Static(meta, _) | FeedMessage::Position(meta, _) => meta,
            FeedMessage::MissingPayload(kind) => {
                self.stats.record_malformed();
                warn!(kind = kind.as_str(), "Discarding message without a payload");
                return;
            }
            FeedMessage::Other(kind) => {
                trace!(kind = %kind, "Ignoring unsubscribed message kind");
                return;
            }
        };

        let (latitude, longitude) = match (meta.latitude, meta.longitude) {
            (Some(lat), Some(lon)) if self.geofence.contains(lat, lon) => (lat, lon),
            _ => {
                self.stats.record_filtered();
                return;
            }
        };

        let raw_time = meta.time_utc.as_deref().unwrap_or_default();
        let observed_at = match timestamp::normalize(raw_time) {
            Ok(ts) => ts,
            Err(e) => {
                self.stats.record_malformed();
                warn!(mmsi = ?meta.mmsi, error = %e, "Discarding message with bad timestamp");
                return;
            }
        };

        let sighting = Sighting {
            mmsi: meta.mmsi,
            latitude,
            longitude,
            observed_at,
        };

        let classified = match &message {
            FeedMessage::Static(_, data) => self.classifier.classify_static(sighting, data),
            FeedMessage::Position(_, report) => {
                self.classifier.classify_position(sighting, report).await
            }
            FeedMessage::MissingPayload(_) | FeedMessage::Other(_) => return,
        };

        self.stats.record_collected(classified.kind);
        if classified.unidentified_dropped {
            self.stats.record_unidentified_dropped();
        }
        self.accumulator.extend(classified.records);
    }

    async fn submit_pending(&mut self, now: Instant) {
        let batch = self.accumulator.take(now);
        if batch.is_empty() {
            return;
        }

        let summary = batch.summary();
        debug!(%summary, "Flushing batch to writer");
        if let Err(e) = self.writer.submit(batch).await {
            error!(error = %e, %summary, "Batch lost, writer is not running");
        }
    }

    /// Hand every pending row to the writer and wait for it to attempt a commit
    pub async fn flush(&mut self) {
        self.submit_pending(Instant::now()).await;
        if let Err(e) = self.writer.flush().await {
            error!(error = %e, "Writer flush failed");
        }
    }

    pub fn counters(&self) -> Counters {
        self.stats.totals()
    }

    pub fn pending_rows(&self) -> usize {
        self.accumulator.pending_len()
    }

    pub fn writer(&self) -> &WriterHandle {
        &self.writer
    }

    /// Flush, then stop the writer task
    pub async fn shutdown(mut self) {
        self.flush().await;
        self.writer.shutdown().await;
    }
}

#[async_trait]
impl<S: VesselStore + 'static> FeedHandler for IngestPipeline<S> {
    async fn on_message(&mut self, raw: &str) {
        self.handle(raw).await;
    }

    async fn on_disconnect(&mut self) {
        debug!(rows = self.pending_rows(), "Flushing pending rows after disconnect");
        self.flush().await;
    }
}
