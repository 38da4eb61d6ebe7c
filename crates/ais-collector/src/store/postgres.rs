//! PostgreSQL vessel store

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use tracing::{debug, info, warn};

use super::{CorrectionOutcome, StoreError, StoreResult, VesselStore};
use crate::config::DatabaseConfig;
use crate::model::{
    Dimensions, Imo, Mmsi, PendingBatch, PositionObservation, StaticObservation,
    UnidentifiedObservation,
};

/// Rows per multi-row INSERT, keeping bind parameters well under the protocol limit
const INSERT_CHUNK_ROWS: usize = 1000;

/// Base of the startup backoff: attempt `n` failing waits `STARTUP_BACKOFF_BASE * 2^n`
const STARTUP_BACKOFF_BASE: Duration = Duration::from_secs(1);

pub async fn create_pool(config: &DatabaseConfig) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Create the pool, retrying with exponential backoff up to `max_startup_attempts`
pub async fn connect_with_retry(config: &DatabaseConfig) -> StoreResult<PgPool> {
    with_startup_retries(config.max_startup_attempts, STARTUP_BACKOFF_BASE, || {
        create_pool(config)
    })
    .await
}

/// Apply pending schema migrations
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

pub(crate) async fn with_startup_retries<T, F, Fut>(
    max_attempts: u32,
    base: Duration,
    mut op: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                let delay = base * 2u32.saturating_pow(attempt);
                warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    retry_in_secs = delay.as_secs(),
                    "Database connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgVesselStore {
    pool: PgPool,
}

impl PgVesselStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn upsert_vessels(
        tx: &mut Transaction<'_, Postgres>,
        batch: &PendingBatch,
    ) -> StoreResult<()> {
        // One statement per row: a multi-row upsert cannot touch the same IMO twice
        for vessel in &batch.vessels {
            sqlx::query(
                r#"
                INSERT INTO vessels (imo, mmsi, name, ship_type, length, width, max_draught)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (imo) DO UPDATE SET
                    name = EXCLUDED.name,
                    ship_type = EXCLUDED.ship_type,
                    length = EXCLUDED.length,
                    width = EXCLUDED.width,
                    max_draught = EXCLUDED.max_draught,
                    updated_at = NOW()
                "#,
            )
            .bind(vessel.imo)
            .bind(vessel.mmsi)
            .bind(&vessel.name)
            .bind(vessel.ship_type)
            .bind(vessel.length)
            .bind(vessel.width)
            .bind(vessel.max_draught)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn insert_statics(
        tx: &mut Transaction<'_, Postgres>,
        rows: &[StaticObservation],
    ) -> StoreResult<()> {
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut query_builder = QueryBuilder::new(
                r#"
                INSERT INTO static_observations (
                    imo, mmsi, name, ship_type, length, width, max_draught,
                    destination, observed_at, latitude, longitude
                )
                "#,
            );

            query_builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.imo)
                    .push_bind(row.mmsi)
                    .push_bind(&row.name)
                    .push_bind(row.ship_type)
                    .push_bind(row.length)
                    .push_bind(row.width)
                    .push_bind(row.max_draught)
                    .push_bind(&row.destination)
                    .push_bind(row.observed_at)
                    .push_bind(row.latitude)
                    .push_bind(row.longitude);
            });

            query_builder.build().execute(&mut **tx).await?;
        }
        Ok(())
    }

    async fn insert_positions(
        tx: &mut Transaction<'_, Postgres>,
        rows: &[PositionObservation],
    ) -> StoreResult<()> {
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut query_builder = QueryBuilder::new(
                r#"
                INSERT INTO position_observations (
                    imo, observed_at, latitude, longitude, destination,
                    sog, cog, navigational_status, rate_of_turn, true_heading
                )
                "#,
            );

            query_builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.imo)
                    .push_bind(row.observed_at)
                    .push_bind(row.latitude)
                    .push_bind(row.longitude)
                    .push_bind(&row.destination)
                    .push_bind(row.sog)
                    .push_bind(row.cog)
                    .push_bind(row.navigational_status)
                    .push_bind(row.rate_of_turn)
                    .push_bind(row.true_heading);
            });

            query_builder.build().execute(&mut **tx).await?;
        }
        Ok(())
    }

    async fn insert_unidentified(
        tx: &mut Transaction<'_, Postgres>,
        rows: &[UnidentifiedObservation],
    ) -> StoreResult<()> {
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut query_builder = QueryBuilder::new(
                r#"
                INSERT INTO unidentified_observations (
                    imo_marker, mmsi, name, ship_type, length, width, max_draught,
                    destination, observed_at, latitude, longitude,
                    sog, cog, navigational_status, rate_of_turn, true_heading
                )
                "#,
            );

            query_builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.imo_marker)
                    .push_bind(row.mmsi)
                    .push_bind(&row.name)
                    .push_bind(row.ship_type)
                    .push_bind(row.length)
                    .push_bind(row.width)
                    .push_bind(row.max_draught)
                    .push_bind(&row.destination)
                    .push_bind(row.observed_at)
                    .push_bind(row.latitude)
                    .push_bind(row.longitude)
                    .push_bind(row.sog)
                    .push_bind(row.cog)
                    .push_bind(row.navigational_status)
                    .push_bind(row.rate_of_turn)
                    .push_bind(row.true_heading);
            });

            query_builder.build().execute(&mut **tx).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VesselStore for PgVesselStore {
    async fn load_identities(&self) -> StoreResult<Vec<(Mmsi, Imo)>> {
        let pairs = sqlx::query_as::<_, (Mmsi, Imo)>(
            "SELECT mmsi, imo FROM vessels WHERE mmsi IS NOT NULL ORDER BY updated_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(pairs)
    }

    async fn find_imo_by_mmsi(&self, mmsi: Mmsi) -> StoreResult<Option<Imo>> {
        let imo = sqlx::query_scalar::<_, Imo>(
            "SELECT imo FROM vessels WHERE mmsi = $1 ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(mmsi)
        .fetch_optional(&self.pool)
        .await?;

        Ok(imo)
    }

    async fn recent_destination(
        &self,
        imo: Imo,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Option<String>> {
        let destination = sqlx::query_scalar::<_, String>(
            r#"
            SELECT destination
            FROM static_observations
            WHERE imo = $1 AND observed_at BETWEEN $2 AND $3
            ORDER BY observed_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(imo)
        .bind(since)
        .bind(until)
        .fetch_optional(&self.pool)
        .await?;

        Ok(destination)
    }

    async fn commit(&self, batch: &PendingBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        Self::upsert_vessels(&mut tx, batch).await?;
        Self::insert_statics(&mut tx, &batch.statics).await?;
        Self::insert_positions(&mut tx, &batch.positions).await?;
        Self::insert_unidentified(&mut tx, &batch.unidentified).await?;

        tx.commit().await?;

        debug!(summary = %batch.summary(), "Batch committed");
        Ok(())
    }

    async fn correct_dimensions(
        &self,
        imo: Imo,
        dimensions: Dimensions,
    ) -> StoreResult<CorrectionOutcome> {
        let mut tx = self.pool.begin().await?;

        let corrected = sqlx::query_scalar::<_, bool>(
            "SELECT lw_corrected FROM vessels WHERE imo = $1 FOR UPDATE",
        )
        .bind(imo)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match corrected {
            None => CorrectionOutcome::UnknownVessel,
            Some(true) => CorrectionOutcome::AlreadyCorrected,
            Some(false) => {
                sqlx::query(
                    r#"
                    UPDATE vessels
                    SET length = $2, width = $3,
                        lw_corrected = TRUE, lw_corrected_at = NOW(), updated_at = NOW()
                    WHERE imo = $1
                    "#,
                )
                .bind(imo)
                .bind(dimensions.length)
                .bind(dimensions.width)
                .execute(&mut *tx)
                .await?;
                CorrectionOutcome::Corrected
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_startup_retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = tokio::time::Instant::now();

        let result = with_startup_retries(3, Duration::from_secs(1), move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::Unavailable("refused".into()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 2s after the first failure, 4s after the second
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_retries_exhausted() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: StoreResult<()> = with_startup_retries(3, Duration::from_secs(1), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("refused".into()))
        })
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
