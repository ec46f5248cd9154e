//! Ingestion orchestrator
//!
//! Drives one run end to end:
//! 1. Split identifiers into chunks of `concurrency_cap`
//! 2. Fetch a chunk (never more than `concurrency_cap` requests in flight)
//! 3. Normalize found records into a batch and hand it to the loader without
//!    waiting for the write
//! 4. After the last chunk, or on abort/cancel, drain every outstanding write

use chrono::{DateTime, Utc};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::{FetchError, StoreError};
use crate::fetcher::{FetcherPool, HttpFetcher, RecordFetcher, RetryingFetcher, TimeoutFetcher};
use crate::loader::{BatchLoader, LoadRegistry, LoadReport};
use crate::models::{Batch, FetchOutcome, Identifier};
use crate::normalizer::normalize;
use crate::source::chunked;
use crate::store::RecordStore;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching { chunk: usize },
    /// Batch handed off; its write overlaps the next chunk's fetches
    Loading { chunk: usize },
    Draining,
    Done,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Aborted)
    }
}

/// A batch whose transaction was rolled back
#[derive(Debug)]
pub struct BatchFailure {
    pub chunk: usize,
    pub records: usize,
    pub error: StoreError,
}

/// Outcome of one pipeline run
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub state: RunState,
    /// Set when dispatch stopped because of a cancellation request
    pub cancelled: bool,
    pub chunks_dispatched: usize,
    pub requested: usize,
    pub found: usize,
    pub not_found: usize,
    pub transport_failed: usize,
    pub normalization_dropped: usize,
    pub persisted: u64,
    /// Identifiers skipped after a transport error, for reconciliation
    pub transport_failed_ids: Vec<Identifier>,
    /// Identifiers whose payload failed normalization, for reconciliation
    pub normalization_dropped_ids: Vec<Identifier>,
    pub batch_failures: Vec<BatchFailure>,
    /// Writes still registered when the run returned; always 0
    pub outstanding_loads: usize,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            state: RunState::Idle,
            cancelled: false,
            chunks_dispatched: 0,
            requested: 0,
            found: 0,
            not_found: 0,
            transport_failed: 0,
            normalization_dropped: 0,
            persisted: 0,
            transport_failed_ids: Vec::new(),
            normalization_dropped_ids: Vec::new(),
            batch_failures: Vec::new(),
            outstanding_loads: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Done && self.batch_failures.is_empty()
    }

    fn storage_unavailable(&self) -> bool {
        self.batch_failures.iter().any(|f| f.error.is_fatal())
    }

    fn record_load(&mut self, report: LoadReport) {
        match report.result {
            Ok(rows) => self.persisted += rows,
            Err(error) => {
                error!(chunk = report.chunk, records = report.records, error = %error, "Batch failed");
                self.batch_failures.push(BatchFailure {
                    chunk: report.chunk,
                    records: report.records,
                    error,
                });
            }
        }
    }

    /// Human-readable multi-line summary
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Ingestion Summary ({:?}):\n\
             - Run id: {}\n\
             - Duration: {:.2?}\n\
             - Identifiers requested: {}\n\
             - Fetched: {}\n\
             - Skipped (not found): {}\n\
             - Skipped (transport error): {}\n\
             - Dropped (normalization): {}\n\
             - Persisted: {}\n\
             - Batch failures: {}",
            self.state,
            self.run_id,
            self.elapsed,
            self.requested,
            self.found,
            self.not_found,
            self.transport_failed,
            self.normalization_dropped,
            self.persisted,
            self.batch_failures.len(),
        );
        for failure in &self.batch_failures {
            summary.push_str(&format!(
                "\n  - chunk {} ({} records): {}",
                failure.chunk, failure.records, failure.error
            ));
        }
        if self.cancelled {
            summary.push_str("\n- Stopped early: cancellation requested");
        }
        summary
    }
}

/// Fetch, normalize and load pipeline
pub struct IngestPipeline {
    fetchers: FetcherPool,
    loader: BatchLoader,
    cancel: CancellationToken,
}

impl IngestPipeline {
    pub fn new(fetchers: FetcherPool, loader: BatchLoader) -> Self {
        Self {
            fetchers,
            loader,
            cancel: CancellationToken::new(),
        }
    }

    /// HTTP source, optional retries and timeout, all from configuration
    ///
    /// The timeout wraps each attempt, beneath the retry layer.
    pub fn from_config(
        config: &IngestConfig,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, FetchError> {
        let source = &config.source;
        let mut fetcher: Arc<dyn RecordFetcher> = Arc::new(HttpFetcher::new(&source.base_url)?);
        if let Some(limit) = source.fetch_timeout() {
            fetcher = Arc::new(TimeoutFetcher::new(fetcher, limit));
        }
        if source.fetch_retries > 0 {
            fetcher = Arc::new(RetryingFetcher::new(
                fetcher,
                source.fetch_retries,
                source.retry_backoff(),
            ));
        }

        let fetchers = FetcherPool::new(fetcher, source.concurrency_cap);
        Ok(Self::new(fetchers, BatchLoader::new(store)))
    }

    /// Token that stops dispatch of further chunks when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn concurrency_cap(&self) -> NonZeroUsize {
        self.fetchers.cap()
    }

    /// Ingest every identifier from `ids`
    ///
    /// Always returns with no write outstanding, whether the run completed,
    /// aborted on an unreachable store, or was cancelled.
    pub async fn run<I>(&self, ids: I) -> RunReport
    where
        I: IntoIterator<Item = Identifier>,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id, cap = self.concurrency_cap().get());
        self.run_inner(run_id, ids).instrument(span).await
    }

    async fn run_inner<I>(&self, run_id: Uuid, ids: I) -> RunReport
    where
        I: IntoIterator<Item = Identifier>,
    {
        let clock = Instant::now();
        let mut report = RunReport::new(run_id);
        let mut registry = LoadRegistry::new();
        let mut aborted = false;

        info!("Starting ingestion run");

        for (index, chunk) in chunked(ids, self.concurrency_cap()).enumerate() {
            if self.cancel.is_cancelled() {
                info!(chunk = index, "Cancellation requested, no further chunks dispatched");
                report.cancelled = true;
                break;
            }

            transition(&mut report.state, RunState::Fetching { chunk: index });
            let outcomes = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(chunk = index, "Cancellation requested mid-chunk, discarding its fetches");
                    report.cancelled = true;
                    break;
                }
                outcomes = self.fetchers.fetch_chunk(&chunk) => outcomes,
            };
            report.requested += chunk.len();
            report.chunks_dispatched += 1;

            let batch = self.assemble_batch(index, outcomes, &mut report);
            transition(&mut report.state, RunState::Loading { chunk: index });
            if batch.is_empty() {
                debug!(chunk = index, "Nothing to persist for chunk");
            } else {
                registry.register(self.loader.load(batch));
            }

            for load in registry.reap_finished().await {
                report.record_load(load);
            }
            if report.storage_unavailable() {
                warn!(chunk = index, "Store unavailable, halting dispatch");
                aborted = true;
                break;
            }
        }

        transition(&mut report.state, RunState::Draining);
        info!(outstanding = registry.len(), "Draining outstanding loads");
        for load in registry.drain().await {
            report.record_load(load);
        }
        report.outstanding_loads = registry.len();

        let final_state = if aborted || report.cancelled || report.storage_unavailable() {
            RunState::Aborted
        } else {
            RunState::Done
        };
        transition(&mut report.state, final_state);
        report.elapsed = clock.elapsed();

        info!(
            state = ?report.state,
            persisted = report.persisted,
            batch_failures = report.batch_failures.len(),
            elapsed = ?report.elapsed,
            "Ingestion run finished"
        );

        report
    }

    /// Normalize a chunk's found records; everything else is counted and logged
    fn assemble_batch(
        &self,
        chunk: usize,
        outcomes: Vec<(Identifier, FetchOutcome)>,
        report: &mut RunReport,
    ) -> Batch {
        let mut records = Vec::with_capacity(outcomes.len());

        for (id, outcome) in outcomes {
            match outcome {
                FetchOutcome::Found(raw) => {
                    report.found += 1;
                    match normalize(id, raw) {
                        Ok(record) => records.push(record),
                        Err(e) => {
                            warn!(id, error = %e, "Dropping record that failed normalization");
                            report.normalization_dropped += 1;
                            report.normalization_dropped_ids.push(id);
                        }
                    }
                }
                FetchOutcome::NotFound => {
                    debug!(id, "Record not found at source");
                    report.not_found += 1;
                }
                FetchOutcome::TransportError(e) => {
                    warn!(id, error = %e, "Fetch failed, skipping identifier");
                    report.transport_failed += 1;
                    report.transport_failed_ids.push(id);
                }
            }
        }

        Batch::new(chunk, records)
    }
}

fn transition(state: &mut RunState, next: RunState) {
    debug!(from = ?*state, to = ?next, "Run state change");
    *state = next;
}
