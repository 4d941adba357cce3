//! Per-host request throttling.
//!
//! Wraps any [`Fetcher`] with a minimum interval between requests to the
//! same host. Providers fan out over few hosts, so this is the main
//! politeness control; it is shared state and safe under concurrent use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use url::Url;

use crate::error::AppError;
use crate::traits::{FetchResponse, Fetcher};

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive requests to the same host.
    pub delay: Duration,
    /// Random jitter added on top of `delay` (uniform `[0, jitter]`).
    pub jitter: Duration,
}

impl ThrottleConfig {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn effective_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        self.delay + Duration::from_millis(rand_jitter_ms(self.jitter.as_millis() as u64))
    }
}

impl Default for ThrottleConfig {
    /// 1 second delay, 300ms jitter.
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            jitter: Duration::from_millis(300),
        }
    }
}

/// A [`Fetcher`] wrapper enforcing per-host throttling.
///
/// Tracks the last request time per host key (scheme + host + port); clones
/// share the map, so all concurrent users of one wrapper observe the same
/// throttle state.
#[derive(Clone)]
pub struct ThrottledFetcher<F> {
    inner: F,
    config: ThrottleConfig,
    last_request: Arc<Mutex<HashMap<String, Instant>>>,
}

impl<F: Fetcher> ThrottledFetcher<F> {
    pub fn new(inner: F, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config,
            last_request: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn host_key(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        let host = url.host_str()?;
        let port = url
            .port_or_known_default()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{host}{port}", url.scheme()))
    }

    async fn wait_for_host(&self, host: &str) {
        loop {
            let sleep_for = {
                let mut map = self.last_request.lock().await;
                match map.get(host) {
                    Some(&last) if last.elapsed() < self.config.effective_delay() => {
                        Some(self.config.effective_delay() - last.elapsed())
                    }
                    _ => {
                        map.insert(host.to_string(), Instant::now());
                        None
                    }
                }
            };
            match sleep_for {
                // Lock released while sleeping so other hosts are not blocked.
                Some(d) => {
                    tracing::debug!(host = %host, sleep_ms = %d.as_millis(), "Throttling request");
                    tokio::time::sleep(d).await;
                }
                None => return,
            }
        }
    }
}

impl<F: Fetcher> Fetcher for ThrottledFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, AppError> {
        if let Some(host) = Self::host_key(url) {
            self.wait_for_host(&host).await;
        }
        self.inner.fetch(url).await
    }
}

// Jitter from a clock-seeded xorshift; good enough for pacing, avoids a
// `rand` dependency.
fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockFetcher;

    #[test]
    fn host_key_includes_scheme_and_port() {
        assert_eq!(
            ThrottledFetcher::<MockFetcher>::host_key("https://example.com/jobs?q=1"),
            Some("https://example.com:443".to_string())
        );
        assert_eq!(
            ThrottledFetcher::<MockFetcher>::host_key("http://example.com:8080/api"),
            Some("http://example.com:8080".to_string())
        );
        assert_eq!(ThrottledFetcher::<MockFetcher>::host_key("not-a-url"), None);
    }

    #[tokio::test]
    async fn same_host_requests_are_delayed() {
        let fetcher = ThrottledFetcher::new(
            MockFetcher::new("ok"),
            ThrottleConfig::new(Duration::from_millis(100)),
        );

        let start = Instant::now();
        fetcher.fetch("http://example.com/a").await.unwrap();
        fetcher.fetch("http://example.com/b").await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn different_hosts_are_not_delayed_against_each_other() {
        let fetcher = ThrottledFetcher::new(
            MockFetcher::new("ok"),
            ThrottleConfig::new(Duration::from_millis(200)),
        );

        let start = Instant::now();
        fetcher.fetch("http://example.com/a").await.unwrap();
        fetcher.fetch("http://other.com/a").await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn passes_through_results_and_errors() {
        let fetcher = ThrottledFetcher::new(
            MockFetcher::new("hello"),
            ThrottleConfig::new(Duration::ZERO),
        );
        assert_eq!(
            fetcher.fetch("http://example.com").await.unwrap().body,
            "hello"
        );

        let failing = ThrottledFetcher::new(
            MockFetcher::with_error(AppError::Network("refused".into())),
            ThrottleConfig::new(Duration::ZERO),
        );
        assert!(matches!(
            failing.fetch("http://example.com").await.unwrap_err(),
            AppError::Network(_)
        ));
    }
}
