//! LLM provider contract and the single-flight response cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use moka::future::Cache;
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// One structured-completion request to the AI backend.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Pipeline stage issuing the call ("classify", "rank", "dedupe", ...).
    pub stage: String,
    /// Natural key of the job (or pair) the call is about.
    pub job_key: String,
    pub system: String,
    pub user: String,
    pub schema_name: String,
    /// JSON Schema the response must validate against.
    pub schema: serde_json::Value,
}

impl LlmRequest {
    /// Deterministic cache key: SHA-256 over everything that influences the
    /// response. Two identical requests must map to one upstream call.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.stage.as_str(),
            self.job_key.as_str(),
            self.system.as_str(),
            self.user.as_str(),
            self.schema_name.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update(b"\x1f");
        }
        hasher.update(self.schema.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A structured-completion capability. Object-safe so pipelines can hold any
/// backend (or a mock) behind `Arc<dyn LlmClient>`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<serde_json::Value, AppError>;
}

/// Response cache over any [`LlmClient`].
///
/// Keyed by [`LlmRequest::fingerprint`]; `moka`'s `try_get_with` coalesces
/// concurrent requesters so a miss triggers exactly one upstream call per
/// key. Errors are not cached, so a failed call can be retried later.
#[derive(Clone)]
pub struct CachedLlm {
    inner: Arc<dyn LlmClient>,
    cache: Cache<String, serde_json::Value>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl CachedLlm {
    pub fn new(inner: Arc<dyn LlmClient>, capacity: u64) -> Self {
        Self {
            inner,
            cache: Cache::new(capacity),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// (hits, misses) counters for run diagnostics.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl LlmClient for CachedLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<serde_json::Value, AppError> {
        let key = request.fingerprint();

        if self.cache.contains_key(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        self.cache
            .try_get_with(key, async { self.inner.complete(request).await })
            .await
            .map_err(|e: Arc<AppError>| {
                let status_code = match &*e {
                    AppError::Llm { status_code, .. } => *status_code,
                    _ => 0,
                };
                AppError::Llm {
                    message: e.to_string(),
                    status_code,
                    retryable: e.is_retryable(),
                }
            })
    }
}
