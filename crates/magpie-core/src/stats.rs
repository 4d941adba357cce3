use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::criteria::Criteria;

/// Cap on stored per-provider error messages; later errors only bump the
/// counter.
const MAX_ERROR_MESSAGES: usize = 8;

/// Per-provider counters for one collection call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderStats {
    pub jobs_collected: usize,
    pub errors: usize,
    pub error_messages: Vec<String>,
}

impl ProviderStats {
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors += 1;
        if self.error_messages.len() < MAX_ERROR_MESSAGES {
            self.error_messages.push(message.into());
        }
    }

    /// Fold another stats block's errors into this one, keeping messages up
    /// to the same cap. Used by providers that aggregate sub-collections.
    pub fn merge_errors(&mut self, other: ProviderStats) {
        self.errors += other.errors;
        for message in other.error_messages {
            if self.error_messages.len() >= MAX_ERROR_MESSAGES {
                break;
            }
            self.error_messages.push(message);
        }
    }
}

/// Final per-source entry in the [`RunSummary`]. Every attempted provider
/// appears here, including ones that failed with zero jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReport {
    pub name: String,
    pub jobs_collected: usize,
    pub errors: usize,
    pub error_messages: Vec<String>,
}

impl SourceReport {
    pub fn from_stats(name: impl Into<String>, stats: ProviderStats) -> Self {
        Self {
            name: name.into(),
            jobs_collected: stats.jobs_collected,
            errors: stats.errors,
            error_messages: stats.error_messages,
        }
    }

    /// Report for a provider that failed wholesale (or timed out).
    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs_collected: 0,
            errors: 1,
            error_messages: vec![message.into()],
        }
    }
}

/// Aggregate result of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub jobs_collected: usize,
    pub jobs_new: usize,
    pub jobs_updated: usize,
    pub jobs_filtered: usize,
    pub duplicates_merged: usize,
    pub errors: usize,
    pub sources: Vec<SourceReport>,
    pub criteria: Criteria,
    pub error_summary: Option<String>,
}

impl RunSummary {
    pub fn new(criteria: Criteria) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            jobs_collected: 0,
            jobs_new: 0,
            jobs_updated: 0,
            jobs_filtered: 0,
            duplicates_merged: 0,
            errors: 0,
            sources: Vec::new(),
            criteria,
            error_summary: None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_bounded() {
        let mut stats = ProviderStats::default();
        for i in 0..20 {
            stats.record_error(format!("error {i}"));
        }
        assert_eq!(stats.errors, 20);
        assert_eq!(stats.error_messages.len(), MAX_ERROR_MESSAGES);
    }

    #[test]
    fn merged_errors_keep_messages_up_to_the_cap() {
        let mut stats = ProviderStats::default();
        stats.record_error("first");
        let mut sub = ProviderStats::default();
        for i in 0..10 {
            sub.record_error(format!("sub {i}"));
        }

        stats.merge_errors(sub);
        assert_eq!(stats.errors, 11);
        assert_eq!(stats.error_messages.len(), MAX_ERROR_MESSAGES);
        assert_eq!(stats.error_messages[0], "first");
        assert_eq!(stats.error_messages[1], "sub 0");
    }

    #[test]
    fn failed_report_has_one_error() {
        let report = SourceReport::failed("remotive", "HTTP 500 for https://remotive.com");
        assert_eq!(report.jobs_collected, 0);
        assert_eq!(report.errors, 1);
        assert!(report.error_messages[0].contains("500"));
    }
}
