//! Circuit breaker guarding the LLM backend.
//!
//! A dead or rate-limited AI provider should fail fast instead of costing a
//! per-item timeout across the whole enrichment set.
//!
//! States: `Closed` (healthy) opens after N consecutive trip-worthy
//! failures; `Open` rejects immediately until the recovery timeout elapses;
//! `HalfOpen` lets probes through and closes again after M successes.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// Successful half-open probes before closing.
    pub success_threshold: u32,
    /// Wait before probing an open circuit.
    pub recovery_timeout: Duration,
    /// Recovery timeout multiplier applied on rate-limit failures.
    pub rate_limit_backoff_multiplier: f32,
    pub max_recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
            rate_limit_backoff_multiplier: 2.0,
            max_recovery_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    current_recovery_timeout: Duration,
}

/// Thread-safe circuit breaker for external API calls.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let inner = Inner {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            current_recovery_timeout: config.recovery_timeout,
        };
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Executes `operation` through the breaker. When open, returns a
    /// non-retryable [`AppError::Llm`] without calling the operation.
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        {
            let mut inner = self.lock_inner();
            self.maybe_half_open(&mut inner);
            if inner.state == CircuitState::Open {
                let retry_after = inner
                    .last_failure_time
                    .map(|t| inner.current_recovery_timeout.saturating_sub(t.elapsed()))
                    .unwrap_or(inner.current_recovery_timeout);
                return Err(AppError::Llm {
                    message: format!(
                        "circuit '{}' open, retry in {}s",
                        self.name,
                        retry_after.as_secs()
                    ),
                    status_code: 0,
                    retryable: false,
                });
            }
        }

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(e) if e.should_trip_circuit() => self.record_failure(e),
            Err(_) => {}
        }
        result
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(circuit = %self.name, "Circuit breaker closing");
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.current_recovery_timeout = self.config.recovery_timeout;
                }
            }
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock_inner();
        let is_rate_limit = matches!(error, AppError::RateLimited)
            || matches!(error, AppError::Llm { status_code: 429, .. });

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(Instant::now());
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.failure_count,
                        error = %error,
                        "Circuit breaker opening"
                    );
                    inner.state = CircuitState::Open;
                    if is_rate_limit {
                        self.extend_recovery(&mut inner);
                    }
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(circuit = %self.name, error = %error, "Probe failed, reopening");
                inner.state = CircuitState::Open;
                inner.last_failure_time = Some(Instant::now());
                inner.success_count = 0;
                if is_rate_limit {
                    self.extend_recovery(&mut inner);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn extend_recovery(&self, inner: &mut Inner) {
        inner.current_recovery_timeout = std::cmp::min(
            Duration::from_secs_f32(
                inner.current_recovery_timeout.as_secs_f32()
                    * self.config.rate_limit_backoff_multiplier,
            ),
            self.config.max_recovery_timeout,
        );
    }

    fn maybe_half_open(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open
            && let Some(last_failure) = inner.last_failure_time
            && last_failure.elapsed() >= inner.current_recovery_timeout
        {
            tracing::info!(circuit = %self.name, "Circuit breaker half-open");
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_error() -> AppError {
        AppError::Llm {
            message: "overloaded".into(),
            status_code: 503,
            retryable: true,
        }
    }

    #[test]
    fn starts_closed_and_opens_after_threshold() {
        let cb = CircuitBreaker::new(
            "llm",
            CircuitBreakerConfig {
                failure_threshold: 3,
                ..Default::default()
            },
        );
        assert_eq!(cb.state(), CircuitState::Closed);

        for _ in 0..2 {
            cb.record_failure(&llm_error());
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure(&llm_error());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = CircuitBreaker::new(
            "llm",
            CircuitBreakerConfig {
                failure_threshold: 3,
                ..Default::default()
            },
        );
        cb.record_failure(&llm_error());
        cb.record_failure(&llm_error());
        cb.record_success();
        cb.record_failure(&llm_error());
        cb.record_failure(&llm_error());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn recovers_through_half_open() {
        let cb = CircuitBreaker::new(
            "llm",
            CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 2,
                recovery_timeout: Duration::from_millis(5),
                ..Default::default()
            },
        );
        cb.record_failure(&llm_error());
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_rejects_without_calling() {
        let cb = CircuitBreaker::new(
            "llm",
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(60),
                ..Default::default()
            },
        );
        cb.record_failure(&llm_error());

        let called = std::sync::atomic::AtomicBool::new(false);
        let result = cb
            .call(|| async {
                called.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, AppError>(())
            })
            .await;

        assert!(matches!(
            result,
            Err(AppError::Llm {
                retryable: false,
                ..
            })
        ));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn call_records_trip_worthy_failures_only() {
        let cb = CircuitBreaker::new(
            "llm",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );

        // Schema validation errors are the caller's problem, not the backend's.
        let _ = cb
            .call(|| async { Err::<(), _>(AppError::Extract("bad json".into())) })
            .await;
        assert_eq!(cb.state(), CircuitState::Closed);

        let _ = cb.call(|| async { Err::<(), _>(llm_error()) }).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
