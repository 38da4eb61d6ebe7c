//! Startup failures
//!
//! Once the receive loop runs, faults are handled in place (logged, counted,
//! retried). Only the steps before it can stop the process.

use thiserror::Error;

use crate::config::ConfigError;
use crate::geofence::GeofenceError;
use crate::store::StoreError;

pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Region boundary could not be loaded: {0}")]
    Boundary(#[from] GeofenceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
