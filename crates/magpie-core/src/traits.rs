use std::future::Future;

use async_trait::async_trait;

use crate::error::AppError;

/// Response from a single HTTP fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn ok(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            final_url: url.into(),
            status: 200,
            body: body.into(),
        }
    }
}

/// Fetches content from a URL.
///
/// Implementations compose: the HTTP client sits at the bottom and wrappers
/// add throttling, robots.txt checks, and the headless-render fallback.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchResponse, AppError>> + Send;
}

/// One web-search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
}

/// Bounded web search used by the discovery provider to find ATS-hosted
/// career pages. Object-safe so discovery can hold any backend.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AppError>;
}
