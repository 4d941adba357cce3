//! robots.txt enforcement for scraping and discovery fetches.

use std::collections::HashMap;
use std::sync::Arc;

use magpie_core::error::AppError;
use magpie_core::traits::{FetchResponse, Fetcher};
use robotstxt::DefaultMatcher;
use tokio::sync::Mutex;
use url::Url;

const USER_AGENT: &str = "Magpie";

/// A [`Fetcher`] wrapper that consults robots.txt before every fetch.
///
/// The robots body is fetched once per host and cached for the lifetime of
/// the wrapper. A missing or unfetchable robots.txt allows everything; a
/// disallow rule yields [`AppError::Fetch`]. API endpoints talk to hosts
/// that exist to be queried, so providers only wrap their page-scraping
/// fetchers.
#[derive(Clone)]
pub struct RobotsFetcher<F> {
    inner: F,
    /// Per-host robots.txt body; `None` records a failed fetch.
    cache: Arc<Mutex<HashMap<String, Option<String>>>>,
}

impl<F: Fetcher> RobotsFetcher<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn robots_body(&self, origin: &str) -> Option<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(origin) {
            return cached.clone();
        }

        let robots_url = format!("{origin}/robots.txt");
        let body = match self.inner.fetch(&robots_url).await {
            Ok(response) => Some(response.body),
            Err(e) => {
                tracing::debug!(origin = %origin, error = %e, "No usable robots.txt, allowing");
                None
            }
        };
        cache.insert(origin.to_string(), body.clone());
        body
    }

    async fn allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        let Some(host) = parsed.host_str() else {
            return true;
        };
        let origin = format!("{}://{host}", parsed.scheme());

        match self.robots_body(&origin).await {
            Some(body) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(&body, USER_AGENT, url)
            }
            None => true,
        }
    }
}

impl<F: Fetcher> Fetcher for RobotsFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, AppError> {
        if !self.allowed(url).await {
            return Err(AppError::Fetch(format!("robots.txt disallows {url}")));
        }
        self.inner.fetch(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_core::testutil::MockFetcher;

    #[tokio::test]
    async fn disallowed_path_is_blocked() {
        let inner = MockFetcher::new("page")
            .route("/robots.txt", "User-agent: *\nDisallow: /private/");
        let fetcher = RobotsFetcher::new(inner);

        let err = fetcher
            .fetch("https://example.com/private/jobs")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Fetch(_)));

        assert!(fetcher.fetch("https://example.com/jobs").await.is_ok());
    }

    #[tokio::test]
    async fn missing_robots_allows_everything() {
        let inner = MockFetcher::with_responses(vec![
            Err(AppError::Http {
                status: 404,
                url: "https://example.com/robots.txt".into(),
            }),
            Ok(FetchResponse::ok("https://example.com/jobs", "page")),
        ]);
        let fetcher = RobotsFetcher::new(inner);

        assert!(fetcher.fetch("https://example.com/jobs").await.is_ok());
    }

    #[tokio::test]
    async fn robots_is_fetched_once_per_host() {
        let inner = MockFetcher::new("page").route("/robots.txt", "User-agent: *\nAllow: /");
        let fetcher = RobotsFetcher::new(inner.clone());

        fetcher.fetch("https://example.com/a").await.unwrap();
        fetcher.fetch("https://example.com/b").await.unwrap();

        let robots_requests = inner
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.ends_with("/robots.txt"))
            .count();
        assert_eq!(robots_requests, 1);
    }
}
