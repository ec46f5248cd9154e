//! Configuration management

use holocron_common::{HolocronError, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use crate::models::Identifier;
use crate::source::IdRange;

// ============================================================================
// Source Configuration Constants
// ============================================================================

/// Default endpoint serving one record per identifier.
pub const DEFAULT_BASE_URL: &str = "https://swapi.py4e.com/api/people";

/// Default number of simultaneous fetches (and chunk size).
pub const DEFAULT_CONCURRENCY_CAP: usize = 5;

/// Default first identifier (inclusive).
pub const DEFAULT_START_ID: Identifier = 1;

/// Default end identifier (exclusive).
pub const DEFAULT_END_ID: Identifier = 100;

/// Default delay before the first retry; later retries wait proportionally longer.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default SQLite database location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://holocron.db";

/// Default maximum pooled connections.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default time a writer waits on a locked database, in seconds.
pub const DEFAULT_DATABASE_BUSY_TIMEOUT_SECS: u64 = 30;

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub source: SourceConfig,
    pub database: DatabaseConfig,
}

/// External source and fetch behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub start_id: Identifier,
    /// Exclusive
    pub end_id: Identifier,
    pub concurrency_cap: NonZeroUsize,
    /// Limit for a single fetch attempt, each retry gets its own; `None`
    /// waits indefinitely
    pub fetch_timeout_secs: Option<u64>,
    /// Extra attempts after a transport error; 0 disables retries
    pub fetch_retries: u32,
    pub retry_backoff_ms: u64,
}

/// Destination store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

impl SourceConfig {
    pub fn id_range(&self) -> IdRange {
        IdRange::new(self.start_id, self.end_id)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }

    /// Validate the store settings alone
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(HolocronError::config("Database URL cannot be empty"));
        }

        if self.max_connections == 0 {
            return Err(HolocronError::config(
                "Database max_connections must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl IngestConfig {
    /// Load configuration from `.env`, the process environment and defaults
    ///
    /// Values are parsed but not validated, so callers can layer overrides
    /// on top before calling [`IngestConfig::validate`].
    ///
    /// Variables: `HOLOCRON_BASE_URL`, `HOLOCRON_START_ID`, `HOLOCRON_END_ID`,
    /// `HOLOCRON_CONCURRENCY`, `HOLOCRON_FETCH_TIMEOUT_SECS`,
    /// `HOLOCRON_FETCH_RETRIES`, `HOLOCRON_RETRY_BACKOFF_MS`, `DATABASE_URL`,
    /// `DATABASE_MAX_CONNECTIONS`, `DATABASE_BUSY_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let source = &mut config.source;
        let database = &mut config.database;

        if let Some(url) = lookup("HOLOCRON_BASE_URL") {
            source.base_url = url;
        }
        if let Some(start) = parse_var(&lookup, "HOLOCRON_START_ID")? {
            source.start_id = start;
        }
        if let Some(end) = parse_var(&lookup, "HOLOCRON_END_ID")? {
            source.end_id = end;
        }
        if let Some(cap) = parse_var(&lookup, "HOLOCRON_CONCURRENCY")? {
            source.concurrency_cap = cap;
        }
        if let Some(secs) = parse_var(&lookup, "HOLOCRON_FETCH_TIMEOUT_SECS")? {
            source.fetch_timeout_secs = Some(secs);
        }
        if let Some(retries) = parse_var(&lookup, "HOLOCRON_FETCH_RETRIES")? {
            source.fetch_retries = retries;
        }
        if let Some(ms) = parse_var(&lookup, "HOLOCRON_RETRY_BACKOFF_MS")? {
            source.retry_backoff_ms = ms;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            database.url = url;
        }
        if let Some(max) = parse_var(&lookup, "DATABASE_MAX_CONNECTIONS")? {
            database.max_connections = max;
        }
        if let Some(secs) = parse_var(&lookup, "DATABASE_BUSY_TIMEOUT_SECS")? {
            database.busy_timeout_secs = secs;
        }

        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.source.base_url = url.into();
        self
    }

    pub fn with_id_range(mut self, start: Identifier, end: Identifier) -> Self {
        self.source.start_id = start;
        self.source.end_id = end;
        self
    }

    pub fn with_concurrency_cap(mut self, cap: NonZeroUsize) -> Self {
        self.source.concurrency_cap = cap;
        self
    }

    pub fn with_fetch_timeout(mut self, secs: u64) -> Self {
        self.source.fetch_timeout_secs = Some(secs);
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database.url = url.into();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let source = &self.source;

        if !(source.base_url.starts_with("http://") || source.base_url.starts_with("https://")) {
            return Err(HolocronError::config(format!(
                "Base URL must be an http(s) URL, got '{}'",
                source.base_url
            )));
        }

        if source.start_id < 1 {
            return Err(HolocronError::config(format!(
                "Identifiers are positive; start id {} is invalid",
                source.start_id
            )));
        }

        if source.end_id <= source.start_id {
            return Err(HolocronError::config(format!(
                "Identifier range {}..{} is empty",
                source.start_id, source.end_id
            )));
        }

        if source.fetch_timeout_secs == Some(0) {
            return Err(HolocronError::config(
                "Fetch timeout must be greater than 0 seconds",
            ));
        }

        self.database.validate()?;

        if (self.database.max_connections as usize) < source.concurrency_cap.get() {
            tracing::warn!(
                max_connections = self.database.max_connections,
                concurrency_cap = source.concurrency_cap.get(),
                "Pool is smaller than the concurrency cap; overlapping batch loads will queue for connections"
            );
        }

        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| HolocronError::invalid_setting(name, raw)),
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
                start_id: DEFAULT_START_ID,
                end_id: DEFAULT_END_ID,
                concurrency_cap: NonZeroUsize::new(DEFAULT_CONCURRENCY_CAP)
                    .unwrap_or(NonZeroUsize::MIN),
                fetch_timeout_secs: None,
                fetch_retries: 0,
                retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                busy_timeout_secs: DEFAULT_DATABASE_BUSY_TIMEOUT_SECS,
            },
        }
    }
}
