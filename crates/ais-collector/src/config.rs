//! Collector configuration
//!
//! Values come from the process environment (after `.env` is loaded), fall
//! back to the `DEFAULT_*` constants below, and are checked by
//! [`CollectorConfig::validate`] before anything connects.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::geofence::BoundingBox;

// ============================================================================
// Database
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/ais";

/// Default maximum database connections in the pool.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Default pool acquire timeout in seconds.
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default number of database connection attempts at startup before giving up.
pub const DEFAULT_MAX_STARTUP_DB_ATTEMPTS: u32 = 3;

// ============================================================================
// Feed
// ============================================================================

/// Default AIS feed endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://stream.aisstream.io/v0/stream";

/// Default reconnect base delay in milliseconds.
pub const DEFAULT_RECONNECT_MIN_DELAY_MS: u64 = 1_000;

/// Default reconnect delay ceiling in milliseconds.
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 60_000;

// ============================================================================
// Ingestion
// ============================================================================

/// Default combined pending row count that triggers a flush.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default maximum time between flushes in milliseconds.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 10_000;

/// Default statistics summary interval in seconds.
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;

/// Default destination look-back window in hours.
pub const DEFAULT_DESTINATION_LOOKBACK_HOURS: u64 = 5;

/// Default capacity of the writer's input queue, in batches.
pub const DEFAULT_WRITER_QUEUE_CAPACITY: usize = 16;

/// Default cap on rows held by the writer across failed commits.
pub const DEFAULT_MAX_RETAINED_ROWS: usize = 50_000;

// ============================================================================
// Dimension correction
// ============================================================================

/// Default number of processed messages between correction progress logs.
pub const DEFAULT_CORRECTION_BATCH_SIZE: usize = 50;

/// Default correction statistics interval in seconds.
pub const DEFAULT_CORRECTION_STATS_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    pub ingest: IngestConfig,
    pub correction: CorrectionConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub max_startup_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub api_key: String,
    pub bounding_box: BoundingBox,
    pub reconnect_min_delay: Duration,
    pub reconnect_max_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// GeoJSON file holding the authoritative region boundary
    pub region_boundary: PathBuf,
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Retention switch for observations without a usable IMO
    pub save_unidentified: bool,
    pub stats_interval: Duration,
    pub destination_lookback: Duration,
    pub writer_queue_capacity: usize,
    pub max_retained_rows: usize,
}

#[derive(Debug, Clone)]
pub struct CorrectionConfig {
    pub batch_size: usize,
    pub stats_interval: Duration,
}

impl CollectorConfig {
    /// Load configuration from the process environment and validate it
    ///
    /// Values returned by `overrides` win over the environment.
    pub fn load<F>(overrides: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::from_lookup(|key| overrides(key).or_else(|| std::env::var(key).ok()))?;
        config.validate()?;

        Ok(config)
    }

    /// Build configuration from an arbitrary key lookup (no validation)
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        Ok(Self {
            database: DatabaseConfig {
                url: env.string("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env.parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
                connect_timeout_secs: env
                    .parse("DB_CONNECT_TIMEOUT", DEFAULT_DB_CONNECT_TIMEOUT_SECS)?,
                max_startup_attempts: env
                    .parse("AIS_MAX_STARTUP_DB_ATTEMPTS", DEFAULT_MAX_STARTUP_DB_ATTEMPTS)?,
            },
            feed: FeedConfig {
                url: env.string("AIS_FEED_URL", DEFAULT_FEED_URL),
                api_key: env.required("AIS_API_KEY")?,
                bounding_box: match env.get("AIS_BOUNDING_BOX") {
                    Some(raw) => parse_bounding_box(&raw)?,
                    None => BoundingBox::NORTH_SEA,
                },
                reconnect_min_delay: Duration::from_millis(
                    env.parse("AIS_RECONNECT_MIN_DELAY_MS", DEFAULT_RECONNECT_MIN_DELAY_MS)?,
                ),
                reconnect_max_delay: Duration::from_millis(
                    env.parse("AIS_RECONNECT_MAX_DELAY_MS", DEFAULT_RECONNECT_MAX_DELAY_MS)?,
                ),
            },
            ingest: IngestConfig {
                region_boundary: env.required("AIS_REGION_BOUNDARY")?.into(),
                batch_size: env.parse("AIS_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
                flush_interval: Duration::from_millis(
                    env.parse("AIS_FLUSH_INTERVAL_MS", DEFAULT_FLUSH_INTERVAL_MS)?,
                ),
                save_unidentified: env.flag("AIS_SAVE_UNIDENTIFIED")?,
                stats_interval: Duration::from_secs(
                    env.parse("AIS_STATS_INTERVAL_SECS", DEFAULT_STATS_INTERVAL_SECS)?,
                ),
                destination_lookback: Duration::from_secs(
                    env.parse(
                        "AIS_DESTINATION_LOOKBACK_HOURS",
                        DEFAULT_DESTINATION_LOOKBACK_HOURS,
                    )? * 3600,
                ),
                writer_queue_capacity: env
                    .parse("AIS_WRITER_QUEUE_CAPACITY", DEFAULT_WRITER_QUEUE_CAPACITY)?,
                max_retained_rows: env.parse("AIS_MAX_RETAINED_ROWS", DEFAULT_MAX_RETAINED_ROWS)?,
            },
            correction: CorrectionConfig {
                batch_size: env.parse("AIS_CORRECTION_BATCH_SIZE", DEFAULT_CORRECTION_BATCH_SIZE)?,
                stats_interval: Duration::from_secs(env.parse(
                    "AIS_CORRECTION_STATS_INTERVAL_SECS",
                    DEFAULT_CORRECTION_STATS_INTERVAL_SECS,
                )?),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.url.is_empty() {
            return Err(invalid("Database URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.database.max_startup_attempts == 0 {
            return Err(invalid("AIS_MAX_STARTUP_DB_ATTEMPTS must be greater than 0"));
        }

        if self.feed.api_key.trim().is_empty() {
            return Err(invalid("AIS_API_KEY cannot be empty"));
        }

        if !self.feed.bounding_box.is_valid() {
            return Err(invalid(format!(
                "bounding box {:?} is inverted or out of range",
                self.feed.bounding_box
            )));
        }

        if self.feed.reconnect_min_delay.is_zero() {
            return Err(invalid("reconnect min delay must be greater than 0"));
        }

        if self.feed.reconnect_min_delay > self.feed.reconnect_max_delay {
            return Err(invalid(format!(
                "reconnect min delay ({:?}) cannot be greater than max delay ({:?})",
                self.feed.reconnect_min_delay, self.feed.reconnect_max_delay
            )));
        }

        if self.ingest.batch_size == 0 {
            return Err(invalid("AIS_BATCH_SIZE must be greater than 0"));
        }

        if self.ingest.flush_interval.is_zero() {
            return Err(invalid("AIS_FLUSH_INTERVAL_MS must be greater than 0"));
        }

        if self.ingest.stats_interval.is_zero() || self.correction.stats_interval.is_zero() {
            return Err(invalid("statistics intervals must be greater than 0"));
        }

        if self.ingest.writer_queue_capacity == 0 {
            return Err(invalid("AIS_WRITER_QUEUE_CAPACITY must be greater than 0"));
        }

        if self.ingest.max_retained_rows < self.ingest.batch_size {
            return Err(invalid(format!(
                "AIS_MAX_RETAINED_ROWS ({}) cannot be smaller than AIS_BATCH_SIZE ({})",
                self.ingest.max_retained_rows, self.ingest.batch_size
            )));
        }

        if self.correction.batch_size == 0 {
            return Err(invalid("AIS_CORRECTION_BATCH_SIZE must be greater than 0"));
        }

        Ok(())
    }
}

/// Parse `lat_min,lon_min,lat_max,lon_max`
pub fn parse_bounding_box(raw: &str) -> ConfigResult<BoundingBox> {
    let bad = || ConfigError::Invalid {
        key: "AIS_BOUNDING_BOX",
        value: raw.to_string(),
    };

    let values = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| bad())?;

    match values.as_slice() {
        [south, west, north, east] => Ok(BoundingBox::new(*south, *west, *north, *east)),
        _ => Err(bad()),
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &'static str) -> ConfigResult<String> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> ConfigResult<T> {
        match self.get(key) {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key,
                value: raw,
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &'static str) -> ConfigResult<bool> {
        match self.get(key).map(|v| v.trim().to_lowercase()) {
            None => Ok(false),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(ConfigError::Invalid { key, value: v }),
        }
    }
}
