//! Non-blocking batch persistence with explicit completion tracking
//!
//! [`BatchLoader::load`] spawns the write and hands back a [`LoadHandle`].
//! Every handle goes into a [`LoadRegistry`], which the pipeline drains before
//! it reports completion, so no write is ever left running at exit.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::StoreError;
use crate::models::Batch;
use crate::store::RecordStore;

/// Schedules batch writes against a [`RecordStore`]
#[derive(Clone)]
pub struct BatchLoader {
    store: Arc<dyn RecordStore>,
}

impl BatchLoader {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Start persisting `batch` and return immediately
    pub fn load(&self, batch: Batch) -> LoadHandle {
        let store = Arc::clone(&self.store);
        let chunk = batch.chunk;
        let records = batch.len();
        let span = info_span!("load_batch", chunk, records);

        let task = tokio::spawn(
            async move {
                let result = store.insert_all(&batch.records).await;
                match &result {
                    Ok(rows) => info!(rows, "Batch committed"),
                    Err(e) => error!(error = %e, ids = ?batch.ids(), "Batch rolled back"),
                }
                result
            }
            .instrument(span),
        );

        LoadHandle {
            chunk,
            records,
            task,
        }
    }
}

/// A scheduled batch write
#[derive(Debug)]
pub struct LoadHandle {
    chunk: usize,
    records: usize,
    task: JoinHandle<Result<u64, StoreError>>,
}

impl LoadHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the write to resolve
    ///
    /// A panicked or cancelled task is reported as a failed batch.
    pub async fn wait(self) -> LoadReport {
        let result = match self.task.await {
            Ok(result) => result,
            Err(join_err) => Err(StoreError::TaskFailed(join_err.to_string())),
        };
        LoadReport {
            chunk: self.chunk,
            records: self.records,
            result,
        }
    }
}

/// Final state of one batch write
#[derive(Debug)]
pub struct LoadReport {
    pub chunk: usize,
    /// Records submitted in the batch
    pub records: usize,
    pub result: Result<u64, StoreError>,
}

/// Outstanding batch writes owned by one pipeline run
#[derive(Debug, Default)]
pub struct LoadRegistry {
    pending: Vec<LoadHandle>,
}

impl LoadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: LoadHandle) {
        self.pending.push(handle);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Collect reports for writes that have already finished, leaving the
    /// rest registered
    pub async fn reap_finished(&mut self) -> Vec<LoadReport> {
        let (finished, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(LoadHandle::is_finished);
        self.pending = pending;

        let mut reports = Vec::with_capacity(finished.len());
        for handle in finished {
            reports.push(handle.wait().await);
        }
        reports
    }

    /// Wait for every registered write, in registration order
    pub async fn drain(&mut self) -> Vec<LoadReport> {
        let handles = std::mem::take(&mut self.pending);
        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            reports.push(handle.wait().await);
        }
        reports
    }
}

impl Drop for LoadRegistry {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                outstanding = self.pending.len(),
                "Load registry dropped with writes still registered"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{CanonicalRecord, Identifier};
    use async_trait::async_trait;
    use std::time::Duration;

    struct SlowStore {
        delay: Duration,
    }

    #[async_trait]
    impl RecordStore for SlowStore {
        async fn insert_all(&self, records: &[CanonicalRecord]) -> Result<u64, StoreError> {
            tokio::time::sleep(self.delay).await;
            if records.iter().any(|r| r.name.is_empty()) {
                panic!("unnamed record reached the store");
            }
            Ok(records.len() as u64)
        }

        async fn get(&self, _id: Identifier) -> Result<Option<CanonicalRecord>, StoreError> {
            Ok(None)
        }
    }

    fn batch(chunk: usize, ids: &[Identifier]) -> Batch {
        Batch::new(
            chunk,
            ids.iter().map(|&id| CanonicalRecord::new(id, format!("person {id}"))).collect(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_does_not_block_caller() {
        let loader = BatchLoader::new(Arc::new(SlowStore {
            delay: Duration::from_secs(60),
        }));

        let handle = loader.load(batch(0, &[1, 2]));
        assert!(!handle.is_finished());

        let report = handle.wait().await;
        assert_eq!(report.chunk, 0);
        assert_eq!(report.result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_empties_registry() {
        let loader = BatchLoader::new(Arc::new(SlowStore {
            delay: Duration::from_millis(50),
        }));
        let mut registry = LoadRegistry::new();
        for chunk in 0..3 {
            registry.register(loader.load(batch(chunk, &[chunk as Identifier + 1])));
        }
        assert_eq!(registry.len(), 3);

        let reports = registry.drain().await;
        assert!(registry.is_empty());
        let chunks: Vec<_> = reports.iter().map(|r| r.chunk).collect();
        assert_eq!(chunks, vec![0, 1, 2]);
        assert!(reports.iter().all(|r| r.result.is_ok()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_keeps_unfinished_handles() {
        let fast = BatchLoader::new(Arc::new(SlowStore {
            delay: Duration::from_millis(1),
        }));
        let slow = BatchLoader::new(Arc::new(SlowStore {
            delay: Duration::from_secs(3600),
        }));
        let mut registry = LoadRegistry::new();
        registry.register(fast.load(batch(0, &[1])));
        registry.register(slow.load(batch(1, &[2])));

        tokio::time::sleep(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;

        let reaped = registry.reap_finished().await;
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].chunk, 0);
        assert_eq!(registry.len(), 1);

        registry.drain().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_load_is_reported_as_failure() {
        let loader = BatchLoader::new(Arc::new(SlowStore {
            delay: Duration::from_millis(1),
        }));
        let report = loader.load(Batch::new(4, vec![CanonicalRecord::new(9, "")])).wait().await;

        assert_eq!(report.chunk, 4);
        assert!(matches!(report.result, Err(StoreError::TaskFailed(_))));
    }
}
