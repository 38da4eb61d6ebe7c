//! Persistence boundary
//!
//! Everything the pipeline needs from the relational store goes through
//! [`VesselStore`]. [`postgres::PgVesselStore`] is the production
//! implementation; [`memory::MemoryVesselStore`] backs tests and dry runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Dimensions, Imo, Mmsi, PendingBatch};

pub use memory::MemoryVesselStore;
pub use postgres::PgVesselStore;

/// SQLSTATE classes treated as recoverable: connection exception,
/// transaction rollback, insufficient resources, operator intervention
const TRANSIENT_SQLSTATE_CLASSES: [&str; 4] = ["08", "40", "53", "57"];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Store could not be reached; the same write may succeed later
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Store refused the data; retrying the same write will fail again
    #[error("Store rejected write: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Whether retrying the same operation later can succeed
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlx(err) => is_transient_sqlx(err),
            StoreError::Unavailable(_) => true,
            StoreError::Migrate(_) | StoreError::Rejected(_) => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| TRANSIENT_SQLSTATE_CLASSES.iter().any(|c| code.starts_with(c)))
            .unwrap_or(false),
        _ => false,
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of applying a dimension correction to one registry row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionOutcome {
    Corrected,
    AlreadyCorrected,
    UnknownVessel,
}

#[async_trait]
pub trait VesselStore: Send + Sync {
    /// Every (MMSI, IMO) pair known to the vessel registry
    async fn load_identities(&self) -> StoreResult<Vec<(Mmsi, Imo)>>;

    /// IMO of the most recently updated registry row carrying this MMSI
    async fn find_imo_by_mmsi(&self, mmsi: Mmsi) -> StoreResult<Option<Imo>>;

    /// Destination of the latest static observation for `imo` observed in `[since, until]`
    async fn recent_destination(
        &self,
        imo: Imo,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Option<String>>;

    /// Write every pending row in one transaction; nothing is kept on error
    async fn commit(&self, batch: &PendingBatch) -> StoreResult<()>;

    /// Overwrite length/width once per vessel and mark the row corrected
    async fn correct_dimensions(
        &self,
        imo: Imo,
        dimensions: Dimensions,
    ) -> StoreResult<CorrectionOutcome>;
}
