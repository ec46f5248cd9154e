//! Holocron Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls records from an ID-addressable HTTP source, normalizes them and
//! writes them to a relational store, with a hard cap on in-flight requests.
//!
//! # Components
//!
//! - [`source`]: identifier ranges and chunking
//! - [`fetcher`]: per-identifier transport and the bounded [`fetcher::FetcherPool`]
//! - [`normalizer`]: ordered field coercion rules
//! - [`loader`]: non-blocking batch writes and the outstanding-write registry
//! - [`pipeline`]: the orchestrator tying them together
//! - [`store`]: the storage contract and its SQLite implementation
//!
//! # Example
//!
//! ```no_run
//! use holocron_ingest::{IngestConfig, IngestPipeline, SqliteStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     config.validate()?;
//!     let store = Arc::new(SqliteStore::connect(&config.database).await?);
//!     let pipeline = IngestPipeline::from_config(&config, store)?;
//!
//!     let report = pipeline.run(config.source.id_range()).await;
//!     tracing::info!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fetcher;
pub mod loader;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod source;
pub mod store;

pub use config::IngestConfig;
pub use error::{FetchError, NormalizationError, StoreError};
pub use fetcher::{FetcherPool, HttpFetcher, RecordFetcher, RetryingFetcher, TimeoutFetcher};
pub use loader::{BatchLoader, LoadHandle, LoadRegistry, LoadReport};
pub use models::{Batch, CanonicalRecord, FetchOutcome, Identifier, RawRecord};
pub use pipeline::{BatchFailure, IngestPipeline, RunReport, RunState};
pub use source::IdRange;
pub use store::{RecordStore, SqliteStore};
