//! Process startup shared by both modes
//!
//! Order matters: the region boundary is checked before any database work, so
//! a bad boundary file fails fast without waiting on connection retries.

use std::sync::Arc;

use tracing::info;

use crate::config::CollectorConfig;
use crate::error::IngestResult;
use crate::geofence::GeoFilter;
use crate::identity::IdentityResolver;
use crate::store::postgres::{connect_with_retry, run_migrations};
use crate::store::{PgVesselStore, VesselStore};

/// Everything the receive loop needs, ready to use
pub struct Bootstrap {
    pub geofence: GeoFilter,
    pub store: Arc<PgVesselStore>,
}

pub async fn bootstrap(config: &CollectorConfig) -> IngestResult<Bootstrap> {
    let geofence = load_boundary(config)?;

    let pool = connect_with_retry(&config.database).await?;
    run_migrations(&pool).await?;

    Ok(Bootstrap {
        geofence,
        store: Arc::new(PgVesselStore::new(pool)),
    })
}

pub fn load_boundary(config: &CollectorConfig) -> IngestResult<GeoFilter> {
    let path = &config.ingest.region_boundary;
    let geofence = GeoFilter::load(path)?;

    info!(
        path = %path.display(),
        polygons = geofence.polygon_count(),
        "Region boundary loaded"
    );
    Ok(geofence)
}

/// Build an identity resolver preloaded with every registry pair
pub async fn load_identities<S: VesselStore>(store: Arc<S>) -> IngestResult<IdentityResolver<S>> {
    let mut identity = IdentityResolver::new(store);
    identity.load_from_store().await?;
    Ok(identity)
}
