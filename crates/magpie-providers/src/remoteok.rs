//! RemoteOK JSON API provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use magpie_client::extract::plain_text;
use magpie_core::criteria::Criteria;
use magpie_core::error::AppError;
use magpie_core::job::{NormalizedJob, RemoteType};
use magpie_core::normalize::canonicalize_url;
use magpie_core::traits::Fetcher;
use serde::Deserialize;
use tracing::debug;

use crate::{Collected, JobProvider, query_matches};

const API_URL: &str = "https://remoteok.com/api";
const SOURCE: &str = "remoteok";

/// The API has no search parameter; the whole board is fetched and filtered
/// client-side against the criteria query.
#[derive(Clone)]
pub struct RemoteOkProvider<F> {
    fetcher: F,
}

impl<F: Fetcher> RemoteOkProvider<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

#[derive(Deserialize)]
struct RemoteOkJob {
    id: serde_json::Value,
    position: String,
    company: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    apply_url: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    salary_min: Option<i64>,
    #[serde(default)]
    salary_max: Option<i64>,
    #[serde(default)]
    date: String,
}

#[async_trait]
impl<F: Fetcher + 'static> JobProvider for RemoteOkProvider<F> {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn collect(&self, criteria: &Criteria) -> Result<Collected, AppError> {
        let response = self.fetcher.fetch(API_URL).await?;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&response.body)?;

        let mut collected = Collected::default();
        // The first array element is a legal notice, not a job row.
        for row in rows.into_iter().skip(1) {
            if collected.jobs.len() >= criteria.max_results_per_source {
                break;
            }
            match serde_json::from_value::<RemoteOkJob>(row) {
                Ok(raw) => {
                    let haystack =
                        format!("{} {} {}", raw.position, raw.tags.join(" "), raw.description);
                    if query_matches(&haystack, &criteria.query) {
                        collected.jobs.push(normalize(raw));
                    }
                }
                Err(e) => collected.stats.record_error(format!("bad job row: {e}")),
            }
        }
        collected.stats.jobs_collected = collected.jobs.len();
        debug!(
            jobs = collected.jobs.len(),
            errors = collected.stats.errors,
            "remoteok collection finished"
        );
        Ok(collected)
    }
}

fn normalize(raw: RemoteOkJob) -> NormalizedJob {
    let id = match &raw.id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut job = NormalizedJob::new(id, SOURCE);
    job.source_url = API_URL.to_string();
    job.title = raw.position;
    job.company = raw.company;
    job.location_raw = raw.location;
    job.remote_type = RemoteType::Remote;
    job.salary_min = raw.salary_min.filter(|v| *v > 0);
    job.salary_max = raw.salary_max.filter(|v| *v > 0);
    if job.salary_min.is_some() || job.salary_max.is_some() {
        job.salary_currency = Some("USD".to_string());
    }
    job.job_url = raw.url;
    job.job_url_canonical = canonicalize_url(&job.job_url);
    job.apply_url = raw.apply_url.filter(|u| !u.is_empty());
    job.description_text = plain_text(&raw.description);
    job.tags = raw.tags;
    job.posted_at = DateTime::parse_from_rfc3339(&raw.date)
        .ok()
        .map(|d| d.with_timezone(&Utc));
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_core::testutil::MockFetcher;

    const BODY: &str = r#"[
        {"legal": "API terms: attribution required."},
        {"id": "900001", "position": "Rust Developer", "company": "Acme",
         "location": "Worldwide", "url": "https://remoteok.com/remote-jobs/900001",
         "apply_url": "https://remoteok.com/l/900001",
         "description": "<p>Systems work in Rust.</p>", "tags": ["rust", "dev"],
         "salary_min": 80000, "salary_max": 120000,
         "date": "2024-02-20T08:00:00+00:00"},
        {"id": "900002", "position": "Marketing Manager", "company": "Globex",
         "url": "https://remoteok.com/remote-jobs/900002",
         "description": "Campaigns.", "tags": ["marketing"],
         "salary_min": 0, "salary_max": 0, "date": ""}
    ]"#;

    #[tokio::test]
    async fn skips_legal_notice_and_filters_by_query() {
        let provider = RemoteOkProvider::new(MockFetcher::new(BODY));
        let collected = provider.collect(&Criteria::new("rust")).await.unwrap();

        assert_eq!(collected.jobs.len(), 1);
        assert_eq!(collected.stats.errors, 0);

        let job = &collected.jobs[0];
        assert_eq!(job.provider_id, "900001");
        assert_eq!(job.title, "Rust Developer");
        assert_eq!(job.salary_min, Some(80_000));
        assert_eq!(job.salary_currency.as_deref(), Some("USD"));
        assert_eq!(job.apply_url.as_deref(), Some("https://remoteok.com/l/900001"));
    }

    #[tokio::test]
    async fn empty_query_keeps_all_rows() {
        let provider = RemoteOkProvider::new(MockFetcher::new(BODY));
        let collected = provider.collect(&Criteria::new("")).await.unwrap();
        assert_eq!(collected.jobs.len(), 2);
        // Zero salaries are dropped, not stored as 0.
        assert_eq!(collected.jobs[1].salary_min, None);
        assert_eq!(collected.jobs[1].salary_currency, None);
    }
}
