//! Dedicated persistence task
//!
//! The ingestion loop hands flushed batches to a single writer task over a
//! bounded FIFO channel, so commits happen strictly in feed order without the
//! loop waiting on the database.
//!
//! On a transient fault the writer keeps the failed rows and merges the next
//! batch behind them; with nothing new arriving it retries after one retry
//! interval. On a permanent fault the rows are discarded and counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::model::PendingBatch;
use crate::store::VesselStore;

#[derive(Debug, Error)]
#[error("Batch writer has stopped")]
pub struct WriterClosed;

#[derive(Debug, Clone, Copy)]
pub struct WriterSettings {
    pub queue_capacity: usize,
    /// Delay before retrying retained rows when no new batch arrives
    pub retry_interval: Duration,
    /// Oldest retained batches are dropped beyond this many rows
    pub max_retained_rows: usize,
}

/// Counters shared with the statistics reporter
#[derive(Debug, Default)]
pub struct WriterStats {
    batches_committed: AtomicU64,
    rows_committed: AtomicU64,
    transient_failures: AtomicU64,
    permanent_failures: AtomicU64,
    rows_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterSnapshot {
    pub batches_committed: u64,
    pub rows_committed: u64,
    pub transient_failures: u64,
    pub permanent_failures: u64,
    pub rows_dropped: u64,
}

impl WriterStats {
    pub fn snapshot(&self) -> WriterSnapshot {
        WriterSnapshot {
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            rows_committed: self.rows_committed.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
        }
    }
}

enum Command {
    Write(PendingBatch),
    Flush(oneshot::Sender<()>),
}

/// Sending side of the writer task
pub struct WriterHandle {
    tx: mpsc::Sender<Command>,
    stats: Arc<WriterStats>,
    task: JoinHandle<()>,
}

impl WriterHandle {
    /// Queue a batch behind every batch submitted before it
    pub async fn submit(&self, batch: PendingBatch) -> Result<(), WriterClosed> {
        self.tx
            .send(Command::Write(batch))
            .await
            .map_err(|_| WriterClosed)
    }

    /// Wait until everything queued so far has been attempted once more
    pub async fn flush(&self) -> Result<(), WriterClosed> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack))
            .await
            .map_err(|_| WriterClosed)?;
        done.await.map_err(|_| WriterClosed)
    }

    pub fn stats(&self) -> Arc<WriterStats> {
        Arc::clone(&self.stats)
    }

    /// Close the queue, let the writer make a final attempt and wait for it
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            error!(error = %e, "Batch writer task failed");
        }
    }
}

pub struct BatchWriter<S> {
    store: Arc<S>,
    settings: WriterSettings,
    stats: Arc<WriterStats>,
    retained: VecDeque<PendingBatch>,
}

impl<S: VesselStore + 'static> BatchWriter<S> {
    pub fn spawn(store: Arc<S>, settings: WriterSettings) -> WriterHandle {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let stats = Arc::new(WriterStats::default());

        let writer = BatchWriter {
            store,
            settings,
            stats: Arc::clone(&stats),
            retained: VecDeque::new(),
        };
        let task = tokio::spawn(writer.run(rx));

        WriterHandle { tx, stats, task }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        loop {
            let command = if self.retained.is_empty() {
                rx.recv().await
            } else {
                tokio::select! {
                    command = rx.recv() => command,
                    _ = tokio::time::sleep(self.settings.retry_interval) => {
                        self.attempt().await;
                        continue;
                    }
                }
            };

            match command {
                Some(Command::Write(batch)) => {
                    if !batch.is_empty() {
                        self.retained.push_back(batch);
                    }
                    self.attempt().await;
                }
                Some(Command::Flush(ack)) => {
                    self.attempt().await;
                    let _ = ack.send(());
                }
                None => {
                    self.attempt().await;
                    if !self.retained.is_empty() {
                        let rows = self.retained_rows();
                        self.stats
                            .rows_dropped
                            .fetch_add(rows as u64, Ordering::Relaxed);
                        error!(rows, "Batch writer stopping with uncommitted rows");
                    }
                    break;
                }
            }
        }

        debug!("Batch writer stopped");
    }

    fn retained_rows(&self) -> usize {
        self.retained.iter().map(PendingBatch::len).sum()
    }

    /// Commit every retained row in one transaction
    async fn attempt(&mut self) {
        if self.retained.is_empty() {
            return;
        }

        let result = if self.retained.len() == 1 {
            self.store.commit(&self.retained[0]).await
        } else {
            let mut merged = PendingBatch::default();
            for batch in &self.retained {
                merged.append(batch.clone());
            }
            self.store.commit(&merged).await
        };

        let rows = self.retained_rows();
        match result {
            Ok(()) => {
                let batches = self.retained.len();
                self.retained.clear();
                self.stats.batches_committed.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .rows_committed
                    .fetch_add(rows as u64, Ordering::Relaxed);
                if batches > 1 {
                    info!(rows, batches, "Committed retained rows after recovery");
                } else {
                    debug!(rows, "Batch committed");
                }
            }
            Err(e) if e.is_transient() => {
                self.stats.transient_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    error = %e,
                    rows,
                    batches = self.retained.len(),
                    "Transient commit failure, keeping rows for retry"
                );
                self.enforce_retention_cap();
            }
            Err(e) => {
                self.stats.permanent_failures.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .rows_dropped
                    .fetch_add(rows as u64, Ordering::Relaxed);
                error!(
                    error = %e,
                    rows,
                    batches = self.retained.len(),
                    "Commit rejected, discarding rows"
                );
                self.retained.clear();
            }
        }
    }

    fn enforce_retention_cap(&mut self) {
        while self.retained.len() > 1 && self.retained_rows() > self.settings.max_retained_rows {
            if let Some(oldest) = self.retained.pop_front() {
                self.stats
                    .rows_dropped
                    .fetch_add(oldest.len() as u64, Ordering::Relaxed);
                error!(
                    rows = oldest.len(),
                    cap = self.settings.max_retained_rows,
                    "Retained rows over cap, dropping oldest batch"
                );
            }
        }
    }
}
