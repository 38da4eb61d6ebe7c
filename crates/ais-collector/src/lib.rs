//! AIS Collector
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Subscribes to a live AIS position/static-data feed, keeps what falls inside
//! a region boundary, resolves every position to a vessel IMO and persists the
//! result in batches.
//!
//! # Layout
//!
//! - [`feed`]: websocket session, subscription and wire types
//! - [`geofence`], [`timestamp`]: per-message filtering and normalization
//! - [`identity`], [`classifier`]: MMSI to IMO resolution and row building
//! - [`batch`], [`writer`]: pending rows and the dedicated persistence task
//! - [`store`]: the [`store::VesselStore`] boundary (PostgreSQL and in-memory)
//! - [`pipeline`]: the collector loop body
//! - [`correction`]: the dimension-correction mode
//! - [`config`], [`startup`], [`error`]: process wiring

pub mod batch;
pub mod classifier;
pub mod config;
pub mod correction;
pub mod error;
pub mod feed;
pub mod geofence;
pub mod identity;
pub mod model;
pub mod pipeline;
pub mod startup;
pub mod stats;
pub mod store;
pub mod timestamp;
pub mod writer;

pub use config::CollectorConfig;
pub use correction::DimensionCorrector;
pub use error::{IngestError, IngestResult};
pub use geofence::GeoFilter;
pub use pipeline::IngestPipeline;
pub use store::{MemoryVesselStore, PgVesselStore, VesselStore};
