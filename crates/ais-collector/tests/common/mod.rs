//! Shared helpers for the collector integration tests
//!
//! - [`TestPostgres`]: a throwaway PostgreSQL container with migrations applied
//!   (requires Docker; tests using it are `#[ignore = "requires Docker"]`)
//! - feed message builders and a region boundary fixture for pipeline tests
//!
//! ```bash
//! cargo test -p ais-collector --test postgres -- --ignored --nocapture
//! ```

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use ais_collector::store::postgres::run_migrations;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tempfile::TempDir;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

pub const POSTGRES_TAG: &str = "16-alpine";

/// PostgreSQL container plus a pool connected to it
///
/// The container is stopped when this value is dropped.
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag(POSTGRES_TAG)
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/postgres");
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,ais_collector=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Feed fixtures
// ============================================================================

/// Square around the southern North Sea: lon 2..5, lat 52..55
pub const REGION_GEOJSON: &str = r#"{
  "type": "FeatureCollection",
  "features": [{
    "type": "Feature",
    "properties": {"name": "test region"},
    "geometry": {
      "type": "Polygon",
      "coordinates": [[[2.0, 52.0], [5.0, 52.0], [5.0, 55.0], [2.0, 55.0], [2.0, 52.0]]]
    }
  }]
}"#;

pub const INSIDE: (f64, f64) = (53.5, 3.5);
pub const OUTSIDE: (f64, f64) = (58.0, 3.5);

/// Write the region boundary to a temp dir; keep the dir alive for the test
pub fn region_boundary() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("temp dir: {e}"));
    let path = dir.path().join("region.geojson");
    std::fs::write(&path, REGION_GEOJSON).unwrap_or_else(|e| panic!("write boundary: {e}"));
    (dir, path)
}

pub struct StaticMsg<'a> {
    pub mmsi: i64,
    pub imo: i64,
    pub name: &'a str,
    pub destination: &'a str,
    pub position: (f64, f64),
    pub time: &'a str,
}

impl StaticMsg<'_> {
    pub fn to_json(&self) -> String {
        let (lat, lon) = self.position;
        format!(
            r#"{{"MessageType": "ShipStaticData",
                "MetaData": {{"MMSI": {mmsi}, "latitude": {lat}, "longitude": {lon},
                             "time_utc": "{time}"}},
                "Message": {{"ShipStaticData": {{
                    "ImoNumber": {imo}, "Name": "{name}", "Type": 70,
                    "Dimension": {{"A": 100, "B": 50, "C": 10, "D": 10}},
                    "MaximumStaticDraught": 8.5, "Destination": "{destination}"}}}}}}"#,
            mmsi = self.mmsi,
            imo = self.imo,
            name = self.name,
            destination = self.destination,
            time = self.time,
        )
    }
}

pub fn position_msg(mmsi: i64, position: (f64, f64), time: &str) -> String {
    let (lat, lon) = position;
    format!(
        r#"{{"MessageType": "PositionReport",
            "MetaData": {{"MMSI": {mmsi}, "latitude": {lat}, "longitude": {lon},
                         "time_utc": "{time}"}},
            "Message": {{"PositionReport": {{
                "Sog": 12.3, "Cog": 181.5, "NavigationalStatus": 0,
                "RateOfTurn": 0, "TrueHeading": 180}}}}}}"#
    )
}
