//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests. All mocks use
//! `Arc<Mutex<_>>` for interior mutability, allowing assertions on recorded
//! calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::AppError;
use crate::job::NormalizedJob;
use crate::llm::{LlmClient, LlmRequest};
use crate::normalize::canonicalize_url;
use crate::sink::{JobSink, Upsert};
use crate::traits::{FetchResponse, Fetcher, SearchClient, SearchHit};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher with a queue of responses and optional per-URL routes.
///
/// Routes (substring match on the URL) win over the queue; an exhausted
/// queue yields a default page. Every requested URL is recorded.
#[derive(Clone)]
pub struct MockFetcher {
    responses: Arc<Mutex<Vec<Result<FetchResponse, AppError>>>>,
    routes: Arc<Mutex<Vec<(String, String)>>>,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new(body: &str) -> Self {
        Self::with_responses(vec![Ok(FetchResponse::ok("http://example.com", body))])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<FetchResponse, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            routes: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Serve `body` for any URL containing `url_part`.
    pub fn route(self, url_part: &str, body: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((url_part.to_string(), body.to_string()));
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, AppError> {
        self.requests.lock().unwrap().push(url.to_string());

        let routes = self.routes.lock().unwrap();
        if let Some((_, body)) = routes.iter().find(|(part, _)| url.contains(part.as_str())) {
            return Ok(FetchResponse::ok(url, body.clone()));
        }
        drop(routes);

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(FetchResponse::ok(url, "<html><body>default</body></html>"))
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockLlm
// ---------------------------------------------------------------------------

/// Mock LLM that serves queued, per-stage, or constant responses and records
/// every request it sees.
pub struct MockLlm {
    responses: Arc<Mutex<Vec<Result<serde_json::Value, AppError>>>>,
    by_stage: Arc<Mutex<HashMap<String, serde_json::Value>>>,
    default: Arc<Mutex<Option<serde_json::Value>>>,
    pub calls: Arc<Mutex<Vec<LlmRequest>>>,
}

impl MockLlm {
    /// Every call returns `value`.
    pub fn always(value: serde_json::Value) -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            by_stage: Arc::new(Mutex::new(HashMap::new())),
            default: Arc::new(Mutex::new(Some(value))),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Calls pop responses in order; afterwards they fail.
    pub fn with_responses(responses: Vec<Result<serde_json::Value, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            by_stage: Arc::new(Mutex::new(HashMap::new())),
            default: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Route responses by `LlmRequest::stage`.
    pub fn by_stage(pairs: Vec<(&str, serde_json::Value)>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            by_stage: Arc::new(Mutex::new(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            )),
            default: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// An LLM that always fails with a retryable 503.
    pub fn unavailable() -> Self {
        Self::with_responses(Vec::new())
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Stages seen so far, in call order.
    pub fn stages_called(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.stage.clone())
            .collect()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<serde_json::Value, AppError> {
        self.calls.lock().unwrap().push(request.clone());

        let mut responses = self.responses.lock().unwrap();
        if !responses.is_empty() {
            return responses.remove(0);
        }
        drop(responses);

        if let Some(value) = self.by_stage.lock().unwrap().get(&request.stage) {
            return Ok(value.clone());
        }
        if let Some(value) = self.default.lock().unwrap().clone() {
            return Ok(value);
        }
        Err(AppError::Llm {
            message: "mock has no response".into(),
            status_code: 503,
            retryable: true,
        })
    }
}

// ---------------------------------------------------------------------------
// FailingSink
// ---------------------------------------------------------------------------

/// Sink that rejects every upsert, for run-fatal persistence tests.
#[derive(Clone, Default)]
pub struct FailingSink;

impl JobSink for FailingSink {
    async fn upsert(&self, _job: &NormalizedJob) -> Result<Upsert, AppError> {
        Err(AppError::Storage("disk full".into()))
    }
}

// ---------------------------------------------------------------------------
// MockSearch
// ---------------------------------------------------------------------------

/// Search client returning a preset hit list (truncated to `max_results`).
pub struct MockSearch {
    hits: Vec<SearchHit>,
    pub queries: Arc<Mutex<Vec<String>>>,
}

impl MockSearch {
    pub fn with_urls(urls: Vec<&str>) -> Self {
        Self {
            hits: urls
                .into_iter()
                .map(|u| SearchHit {
                    url: u.to_string(),
                    title: String::new(),
                })
                .collect(),
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl SearchClient for MockSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AppError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.hits.iter().take(max_results).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a minimal valid job for tests.
pub fn make_test_job(provider_id: &str, source: &str, title: &str, company: &str) -> NormalizedJob {
    let mut job = NormalizedJob::new(provider_id, source);
    job.title = title.to_string();
    job.company = company.to_string();
    job.job_url = format!("https://{source}.example/jobs/{provider_id}");
    job.job_url_canonical = canonicalize_url(&job.job_url);
    job.description_text = format!("{title} at {company}");
    job
}
