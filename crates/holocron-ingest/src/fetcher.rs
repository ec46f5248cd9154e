//! Record fetching with bounded concurrency
//!
//! [`RecordFetcher`] is the per-identifier transport contract. [`HttpFetcher`]
//! implements it against `GET <base>/<id>`. [`TimeoutFetcher`] bounds a single
//! attempt and [`RetryingFetcher`] layers an optional retry policy on top, so
//! a stack of `Retrying(Timeout(Http))` times out each attempt on its own.
//! [`FetcherPool`] runs one chunk of fetches at a time without ever exceeding
//! the concurrency cap.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::models::{FetchOutcome, Identifier};
use crate::normalizer::json_kind;

/// Field the source uses to report a missing record
pub const NOT_FOUND_FIELD: &str = "detail";

/// Value of [`NOT_FOUND_FIELD`] for a missing record
pub const NOT_FOUND_DETAIL: &str = "Not found";

const USER_AGENT: &str = concat!("holocron-ingest/", env!("CARGO_PKG_VERSION"));

/// Fetches one record by identifier
///
/// Implementations never fail the call itself; every problem is folded into
/// [`FetchOutcome::TransportError`].
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    async fn fetch(&self, id: Identifier) -> FetchOutcome;
}

/// HTTP transport for `GET <base>/<id>`
pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn record_url(&self, id: Identifier) -> String {
        format!("{}/{}", self.base_url, id)
    }

    async fn request(&self, id: Identifier) -> Result<FetchOutcome, FetchError> {
        let response = self.client.get(self.record_url(id)).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice::<Value>(&bytes);

        if status == StatusCode::NOT_FOUND || body.as_ref().is_ok_and(is_not_found) {
            return Ok(FetchOutcome::NotFound);
        }

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        match body? {
            Value::Object(record) => Ok(FetchOutcome::Found(record)),
            other => Err(FetchError::UnexpectedPayload(json_kind(&other))),
        }
    }
}

#[async_trait]
impl RecordFetcher for HttpFetcher {
    async fn fetch(&self, id: Identifier) -> FetchOutcome {
        self.request(id)
            .await
            .unwrap_or_else(FetchOutcome::TransportError)
    }
}

/// Whether a payload is the source's "not found" sentinel
pub fn is_not_found(body: &Value) -> bool {
    body.get(NOT_FOUND_FIELD).and_then(Value::as_str) == Some(NOT_FOUND_DETAIL)
}

/// Resolves an attempt still pending after `limit` as
/// [`FetchError::Timeout`]
pub struct TimeoutFetcher {
    inner: Arc<dyn RecordFetcher>,
    limit: Duration,
}

impl TimeoutFetcher {
    pub fn new(inner: Arc<dyn RecordFetcher>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl RecordFetcher for TimeoutFetcher {
    async fn fetch(&self, id: Identifier) -> FetchOutcome {
        tokio::time::timeout(self.limit, self.inner.fetch(id))
            .await
            .unwrap_or_else(|_| FetchOutcome::TransportError(FetchError::Timeout(self.limit)))
    }
}

/// Retries transport errors with linear backoff
///
/// `NotFound` and `Found` are final and returned immediately.
pub struct RetryingFetcher {
    inner: Arc<dyn RecordFetcher>,
    max_retries: u32,
    backoff: Duration,
}

impl RetryingFetcher {
    pub fn new(inner: Arc<dyn RecordFetcher>, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
        }
    }
}

#[async_trait]
impl RecordFetcher for RetryingFetcher {
    async fn fetch(&self, id: Identifier) -> FetchOutcome {
        let mut attempt = 0;
        loop {
            match self.inner.fetch(id).await {
                FetchOutcome::TransportError(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(id, attempt, error = %e, "Fetch failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                outcome => return outcome,
            }
        }
    }
}

/// Runs a chunk of fetches, at most `cap` at a time
pub struct FetcherPool {
    fetcher: Arc<dyn RecordFetcher>,
    cap: NonZeroUsize,
}

impl FetcherPool {
    pub fn new(fetcher: Arc<dyn RecordFetcher>, cap: NonZeroUsize) -> Self {
        Self { fetcher, cap }
    }

    pub fn cap(&self) -> NonZeroUsize {
        self.cap
    }

    /// Fetch every identifier in `ids`, returning one outcome per identifier
    /// in input order
    ///
    /// Chunks are expected to be at most `cap` long; longer slices are still
    /// capped at `cap` in-flight requests.
    pub async fn fetch_chunk(&self, ids: &[Identifier]) -> Vec<(Identifier, FetchOutcome)> {
        stream::iter(ids.iter().copied())
            .map(|id| async move { (id, self.fetch_one(id).await) })
            .buffered(self.cap.get())
            .collect()
            .await
    }

    async fn fetch_one(&self, id: Identifier) -> FetchOutcome {
        let outcome = self.fetcher.fetch(id).await;
        debug!(id, outcome = outcome.kind(), "Fetch resolved");
        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with a transport error until `failures` attempts have been made
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RecordFetcher for Flaky {
        async fn fetch(&self, _id: Identifier) -> FetchOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                FetchOutcome::TransportError(FetchError::Transport("connection reset".into()))
            } else {
                FetchOutcome::Found(serde_json::Map::new())
            }
        }
    }

    /// First attempt hangs, later ones answer at once
    struct StallsOnce {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RecordFetcher for StallsOnce {
        async fn fetch(&self, _id: Identifier) -> FetchOutcome {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            FetchOutcome::Found(serde_json::Map::new())
        }
    }

    struct Missing {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RecordFetcher for Missing {
        async fn fetch(&self, _id: Identifier) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            FetchOutcome::NotFound
        }
    }

    #[test]
    fn test_not_found_sentinel() {
        assert!(is_not_found(&json!({"detail": "Not found"})));
        assert!(!is_not_found(&json!({"detail": "not found"})));
        assert!(!is_not_found(&json!({"name": "Not found"})));
        assert!(!is_not_found(&json!(["Not found"])));
    }

    #[test]
    fn test_record_url_trims_trailing_slash() {
        let fetcher = HttpFetcher::with_client(Client::new(), "http://example.test/api/people/");
        assert_eq!(fetcher.record_url(17), "http://example.test/api/people/17");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transport_errors() {
        let inner = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let fetcher = RetryingFetcher::new(inner.clone(), 3, Duration::from_millis(100));

        assert!(fetcher.fetch(1).await.is_found());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_retries() {
        let inner = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let fetcher = RetryingFetcher::new(inner.clone(), 2, Duration::from_millis(100));

        assert!(matches!(fetcher.fetch(1).await, FetchOutcome::TransportError(_)));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_never_retried() {
        let inner = Arc::new(Missing {
            calls: AtomicU32::new(0),
        });
        let fetcher = RetryingFetcher::new(inner.clone(), 5, Duration::from_millis(1));

        assert!(matches!(fetcher.fetch(1).await, FetchOutcome::NotFound));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_hung_attempt() {
        let inner = Arc::new(StallsOnce {
            calls: AtomicU32::new(0),
        });
        let fetcher = TimeoutFetcher::new(inner, Duration::from_millis(500));

        assert!(matches!(
            fetcher.fetch(1).await,
            FetchOutcome::TransportError(FetchError::Timeout(limit)) if limit == Duration::from_millis(500)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_retry_gets_a_fresh_timeout() {
        let inner = Arc::new(StallsOnce {
            calls: AtomicU32::new(0),
        });
        let timed: Arc<dyn RecordFetcher> =
            Arc::new(TimeoutFetcher::new(inner.clone(), Duration::from_millis(500)));
        let fetcher = RetryingFetcher::new(timed, 1, Duration::from_millis(400));

        assert!(fetcher.fetch(1).await.is_found());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pool_returns_outcomes_in_input_order() {
        let inner = Arc::new(Missing {
            calls: AtomicU32::new(0),
        });
        let pool = FetcherPool::new(inner, NonZeroUsize::new(2).unwrap());

        let outcomes = pool.fetch_chunk(&[9, 4, 6]).await;
        let ids: Vec<_> = outcomes.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![9, 4, 6]);
    }
}
