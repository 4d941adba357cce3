//! Mock provider for orchestrator and pipeline tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use magpie_core::criteria::Criteria;
use magpie_core::error::AppError;
use magpie_core::job::NormalizedJob;
use magpie_core::stats::ProviderStats;

use crate::{Collected, JobProvider};

/// Provider serving a fixed job list, an optional wholesale failure, or an
/// artificial delay. Records how many times it was collected.
pub struct MockProvider {
    name: String,
    jobs: Vec<NormalizedJob>,
    row_errors: Vec<String>,
    fail_message: Option<String>,
    delay: Option<std::time::Duration>,
    pub collect_calls: Arc<Mutex<usize>>,
}

impl MockProvider {
    pub fn with_jobs(name: &str, jobs: Vec<NormalizedJob>) -> Self {
        Self {
            name: name.to_string(),
            jobs,
            row_errors: Vec::new(),
            fail_message: None,
            delay: None,
            collect_calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Always fails wholesale with an HTTP 500.
    pub fn failing(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            jobs: Vec::new(),
            row_errors: Vec::new(),
            fail_message: Some(message.to_string()),
            delay: None,
            collect_calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Record these as row-level errors alongside the jobs.
    pub fn with_row_errors(mut self, errors: Vec<&str>) -> Self {
        self.row_errors = errors.into_iter().map(String::from).collect();
        self
    }

    /// Sleep before responding, for deadline tests.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl JobProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, criteria: &Criteria) -> Result<Collected, AppError> {
        *self.collect_calls.lock().unwrap() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.fail_message {
            return Err(AppError::Http {
                status: 500,
                url: format!("https://{}.example/api: {message}", self.name),
            });
        }

        let mut stats = ProviderStats::default();
        for error in &self.row_errors {
            stats.record_error(error.clone());
        }
        let jobs: Vec<NormalizedJob> = self
            .jobs
            .iter()
            .take(criteria.max_results_per_source)
            .cloned()
            .collect();
        stats.jobs_collected = jobs.len();
        Ok(Collected { jobs, stats })
    }
}
