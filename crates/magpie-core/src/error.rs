use thiserror::Error;

/// Application-wide error types for Magpie.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request returned a non-success status.
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// Network/connection error.
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded (HTTP 429).
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Fetch was refused before any request was made (robots.txt,
    /// SSRF protection, invalid URL).
    #[error("Fetch blocked: {0}")]
    Fetch(String),

    /// All extraction strategies failed for a page.
    #[error("Extraction failed: {0}")]
    Extract(String),

    /// LLM API call failed.
    #[error("LLM error (HTTP {status_code}): {message}")]
    Llm {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// Web search backend failed.
    #[error("Search error: {0}")]
    Search(String),

    /// The storage sink rejected a write. Run-fatal.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration (bad board URL, missing API key, ...).
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network(_) | AppError::Timeout(_) | AppError::RateLimited => true,
            AppError::Http { status, .. } => *status == 429 || *status >= 500,
            AppError::Llm { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Returns true if this error should trip the LLM circuit breaker.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::Network(_) | AppError::Timeout(_) | AppError::RateLimited => true,
            AppError::Llm {
                status_code,
                retryable,
                ..
            } => *status_code == 429 || *status_code >= 500 || *retryable,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(AppError::Network("reset".into()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::RateLimited.is_retryable());
        assert!(
            AppError::Http {
                status: 503,
                url: "https://example.com".into()
            }
            .is_retryable()
        );
        assert!(
            !AppError::Http {
                status: 404,
                url: "https://example.com".into()
            }
            .is_retryable()
        );
        assert!(!AppError::Extract("no structured data".into()).is_retryable());
        assert!(!AppError::Fetch("robots.txt disallows".into()).is_retryable());
    }

    #[test]
    fn circuit_tripping() {
        assert!(AppError::RateLimited.should_trip_circuit());
        assert!(AppError::Timeout(30).should_trip_circuit());
        assert!(
            AppError::Llm {
                message: "overloaded".into(),
                status_code: 503,
                retryable: true,
            }
            .should_trip_circuit()
        );
        assert!(!AppError::Storage("constraint violation".into()).should_trip_circuit());
    }
}
