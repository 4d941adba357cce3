//! Storage sink contract and the in-memory reference implementation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::job::NormalizedJob;

/// Outcome of a single upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// A stored job row: the record plus sink-managed seen timestamps.
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub job: NormalizedJob,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Persistence contract consumed by the orchestrator.
///
/// The natural key is `job.job_key()`. Implementations must preserve
/// `first_seen_at` across updates and refresh `last_seen_at` on every call.
pub trait JobSink: Send + Sync + Clone {
    fn upsert(&self, job: &NormalizedJob) -> impl Future<Output = Result<Upsert, AppError>> + Send;
}

/// In-memory sink backed by a `HashMap`, used by the CLI and tests.
#[derive(Clone, Default)]
pub struct MemorySink {
    rows: Arc<Mutex<HashMap<String, StoredJob>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_rows(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredJob>> {
        self.rows.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned sink mutex");
            poisoned.into_inner()
        })
    }

    pub fn len(&self) -> usize {
        self.lock_rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, job_key: &str) -> Option<StoredJob> {
        self.lock_rows().get(job_key).cloned()
    }

    pub fn all(&self) -> Vec<StoredJob> {
        self.lock_rows().values().cloned().collect()
    }
}

impl JobSink for MemorySink {
    async fn upsert(&self, job: &NormalizedJob) -> Result<Upsert, AppError> {
        let key = job.job_key();
        let now = Utc::now();
        let mut rows = self.lock_rows();
        match rows.get_mut(&key) {
            Some(existing) => {
                let first_seen = existing.first_seen_at;
                existing.job = job.clone();
                existing.first_seen_at = first_seen;
                existing.last_seen_at = now;
                Ok(Upsert::Updated)
            }
            None => {
                rows.insert(
                    key,
                    StoredJob {
                        job: job.clone(),
                        first_seen_at: now,
                        last_seen_at: now,
                    },
                );
                Ok(Upsert::Inserted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> NormalizedJob {
        let mut j = NormalizedJob::new(id, "test");
        j.title = "Engineer".into();
        j.company = "Acme".into();
        j
    }

    #[tokio::test]
    async fn insert_then_update() {
        let sink = MemorySink::new();
        let j = job("1");

        assert_eq!(sink.upsert(&j).await.unwrap(), Upsert::Inserted);
        assert_eq!(sink.upsert(&j).await.unwrap(), Upsert::Updated);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn first_seen_is_preserved_last_seen_refreshed() {
        let sink = MemorySink::new();
        let j = job("1");
        sink.upsert(&j).await.unwrap();
        let before = sink.get(&j.job_key()).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        sink.upsert(&j).await.unwrap();
        let after = sink.get(&j.job_key()).unwrap();

        assert_eq!(after.first_seen_at, before.first_seen_at);
        assert!(after.last_seen_at > before.last_seen_at);
    }

    #[tokio::test]
    async fn distinct_identity_pairs_create_distinct_rows() {
        let sink = MemorySink::new();
        sink.upsert(&job("1")).await.unwrap();
        sink.upsert(&job("2")).await.unwrap();
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn recovers_from_a_poisoned_lock() {
        let sink = MemorySink::new();
        sink.upsert(&job("1")).await.unwrap();

        let clone = sink.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.rows.lock().unwrap();
            panic!("poison the sink mutex");
        })
        .join();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.upsert(&job("2")).await.unwrap(), Upsert::Inserted);
    }
}
