//! In-process vessel store
//!
//! Mirrors the PostgreSQL semantics the pipeline relies on: atomic commits,
//! upsert on IMO without touching MMSI, and the observation-to-registry
//! reference. Faults can be scripted to exercise the writer's recovery paths.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{CorrectionOutcome, StoreError, StoreResult, VesselStore};
use crate::model::{
    Dimensions, Imo, Mmsi, PendingBatch, PositionObservation, StaticObservation,
    UnidentifiedObservation, VesselUpsert,
};

/// Registry row as held by the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVessel {
    pub imo: Imo,
    pub mmsi: Option<Mmsi>,
    pub name: String,
    pub ship_type: Option<i32>,
    pub length: Option<i32>,
    pub width: Option<i32>,
    pub max_draught: Option<f64>,
    pub lw_corrected: bool,
    pub lw_corrected_at: Option<DateTime<Utc>>,
    revision: u64,
}

/// Scripted commit failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    Permanent,
}

#[derive(Debug, Default, Clone)]
struct Tables {
    vessels: BTreeMap<Imo, StoredVessel>,
    statics: Vec<StaticObservation>,
    positions: Vec<PositionObservation>,
    unidentified: Vec<UnidentifiedObservation>,
    revision: u64,
}

impl Tables {
    fn upsert(&mut self, row: &VesselUpsert) {
        self.revision += 1;
        let revision = self.revision;

        self.vessels
            .entry(row.imo)
            .and_modify(|v| {
                v.name = row.name.clone();
                v.ship_type = row.ship_type;
                v.length = row.length;
                v.width = row.width;
                v.max_draught = row.max_draught;
                v.revision = revision;
            })
            .or_insert_with(|| StoredVessel {
                imo: row.imo,
                mmsi: row.mmsi,
                name: row.name.clone(),
                ship_type: row.ship_type,
                length: row.length,
                width: row.width,
                max_draught: row.max_draught,
                lw_corrected: false,
                lw_corrected_at: None,
                revision,
            });
    }

    fn apply(&mut self, batch: &PendingBatch) -> StoreResult<()> {
        batch.vessels.iter().for_each(|row| self.upsert(row));

        let dangling = batch
            .statics
            .iter()
            .map(|r| r.imo)
            .chain(batch.positions.iter().map(|r| r.imo))
            .find(|imo| !self.vessels.contains_key(imo));
        if let Some(imo) = dangling {
            return Err(StoreError::Rejected(format!(
                "observation references unknown vessel {imo}"
            )));
        }

        self.statics.extend(batch.statics.iter().cloned());
        self.positions.extend(batch.positions.iter().cloned());
        self.unidentified.extend(batch.unidentified.iter().cloned());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryVesselStore {
    tables: Mutex<Tables>,
    faults: Mutex<VecDeque<Fault>>,
    identity_queries: AtomicUsize,
    destination_queries: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryVesselStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a registry row as if it had been committed earlier
    pub async fn insert_vessel(&self, row: VesselUpsert) {
        self.tables.lock().await.upsert(&row);
    }

    /// Seed a static observation as if it had been committed earlier
    pub async fn insert_static(&self, row: StaticObservation) {
        self.tables.lock().await.statics.push(row);
    }

    /// Make the next `count` commits fail with `fault`
    pub async fn fail_next_commits(&self, fault: Fault, count: usize) {
        self.faults
            .lock()
            .await
            .extend(std::iter::repeat(fault).take(count));
    }

    pub async fn vessel(&self, imo: Imo) -> Option<StoredVessel> {
        self.tables.lock().await.vessels.get(&imo).cloned()
    }

    pub async fn vessel_count(&self) -> usize {
        self.tables.lock().await.vessels.len()
    }

    pub async fn statics(&self) -> Vec<StaticObservation> {
        self.tables.lock().await.statics.clone()
    }

    pub async fn positions(&self) -> Vec<PositionObservation> {
        self.tables.lock().await.positions.clone()
    }

    pub async fn unidentified(&self) -> Vec<UnidentifiedObservation> {
        self.tables.lock().await.unidentified.clone()
    }

    /// Number of `find_imo_by_mmsi` calls served
    pub fn identity_queries(&self) -> usize {
        self.identity_queries.load(Ordering::Relaxed)
    }

    /// Number of `recent_destination` calls served
    pub fn destination_queries(&self) -> usize {
        self.destination_queries.load(Ordering::Relaxed)
    }

    /// Number of successful commits
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl VesselStore for MemoryVesselStore {
    async fn load_identities(&self) -> StoreResult<Vec<(Mmsi, Imo)>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<_> = tables
            .vessels
            .values()
            .filter_map(|v| v.mmsi.map(|mmsi| (v.revision, mmsi, v.imo)))
            .collect();
        rows.sort_unstable_by_key(|(revision, _, _)| *revision);

        Ok(rows.into_iter().map(|(_, mmsi, imo)| (mmsi, imo)).collect())
    }

    async fn find_imo_by_mmsi(&self, mmsi: Mmsi) -> StoreResult<Option<Imo>> {
        self.identity_queries.fetch_add(1, Ordering::Relaxed);

        let tables = self.tables.lock().await;
        Ok(tables
            .vessels
            .values()
            .filter(|v| v.mmsi == Some(mmsi))
            .max_by_key(|v| v.revision)
            .map(|v| v.imo))
    }

    async fn recent_destination(
        &self,
        imo: Imo,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Option<String>> {
        self.destination_queries.fetch_add(1, Ordering::Relaxed);

        let tables = self.tables.lock().await;
        Ok(tables
            .statics
            .iter()
            .enumerate()
            .filter(|(_, s)| s.imo == imo && s.observed_at >= since && s.observed_at <= until)
            .max_by_key(|(idx, s)| (s.observed_at, *idx))
            .map(|(_, s)| s.destination.clone()))
    }

    async fn commit(&self, batch: &PendingBatch) -> StoreResult<()> {
        match self.faults.lock().await.pop_front() {
            Some(Fault::Transient) => {
                return Err(StoreError::Unavailable("connection reset".to_string()))
            }
            Some(Fault::Permanent) => {
                return Err(StoreError::Rejected("value out of range".to_string()))
            }
            None => {}
        }

        let mut tables = self.tables.lock().await;
        let mut staged = tables.clone();
        staged.apply(batch)?;
        *tables = staged;

        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn correct_dimensions(
        &self,
        imo: Imo,
        dimensions: Dimensions,
    ) -> StoreResult<CorrectionOutcome> {
        let mut tables = self.tables.lock().await;
        let Some(vessel) = tables.vessels.get_mut(&imo) else {
            return Ok(CorrectionOutcome::UnknownVessel);
        };

        if vessel.lw_corrected {
            return Ok(CorrectionOutcome::AlreadyCorrected);
        }

        vessel.length = dimensions.length;
        vessel.width = dimensions.width;
        vessel.lw_corrected = true;
        vessel.lw_corrected_at = Some(Utc::now());
        Ok(CorrectionOutcome::Corrected)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Record;

    fn vessel(imo: Imo, mmsi: Mmsi, name: &str) -> VesselUpsert {
        VesselUpsert {
            imo,
            mmsi: Some(mmsi),
            name: name.to_string(),
            ship_type: Some(70),
            length: Some(150),
            width: Some(20),
            max_draught: Some(7.4),
        }
    }

    fn position(imo: Imo) -> PositionObservation {
        PositionObservation {
            imo,
            observed_at: Utc::now(),
            latitude: 53.5,
            longitude: 3.5,
            destination: None,
            sog: Some(12.3),
            cog: None,
            navigational_status: None,
            rate_of_turn: None,
            true_heading: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_last_write_wins_and_keeps_mmsi() {
        let store = MemoryVesselStore::new();
        let mut batch = PendingBatch::default();
        batch.push(Record::Vessel(vessel(9123456, 230000001, "FIRST")));
        batch.push(Record::Vessel(vessel(9123456, 230000999, "SECOND")));
        store.commit(&batch).await.unwrap();

        assert_eq!(store.vessel_count().await, 1);
        let row = store.vessel(9123456).await.unwrap();
        assert_eq!(row.name, "SECOND");
        assert_eq!(row.mmsi, Some(230000001));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_no_rows() {
        let store = MemoryVesselStore::new();
        let mut batch = PendingBatch::default();
        batch.push(Record::Vessel(vessel(9123456, 230000001, "A")));
        batch.push(Record::Position(position(9999999)));

        assert!(matches!(
            store.commit(&batch).await,
            Err(StoreError::Rejected(_))
        ));
        assert_eq!(store.vessel_count().await, 0);
        assert!(store.positions().await.is_empty());

        store.fail_next_commits(Fault::Transient, 1).await;
        let err = store.commit(&PendingBatch::default()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.commits(), 0);
    }

    #[tokio::test]
    async fn test_find_imo_prefers_latest_registry_row() {
        let store = MemoryVesselStore::new();
        store.insert_vessel(vessel(1111111, 230000001, "OLD")).await;
        store.insert_vessel(vessel(2222222, 230000001, "NEW")).await;

        assert_eq!(store.find_imo_by_mmsi(230000001).await.unwrap(), Some(2222222));
        assert_eq!(store.find_imo_by_mmsi(999).await.unwrap(), None);
        assert_eq!(store.identity_queries(), 2);
        assert_eq!(store.load_identities().await.unwrap().len(), 2);
    }
}
