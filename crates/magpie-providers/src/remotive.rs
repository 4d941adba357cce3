//! Remotive JSON API provider.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use magpie_client::extract::plain_text;
use magpie_core::criteria::Criteria;
use magpie_core::error::AppError;
use magpie_core::job::{NormalizedJob, RemoteType};
use magpie_core::normalize::{canonicalize_url, derive_location};
use magpie_core::traits::Fetcher;
use serde::Deserialize;
use tracing::debug;

use crate::{Collected, JobProvider};

const API_URL: &str = "https://remotive.com/api/remote-jobs";
const SOURCE: &str = "remotive";

#[derive(Clone)]
pub struct RemotiveProvider<F> {
    fetcher: F,
}

impl<F: Fetcher> RemotiveProvider<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

#[derive(Deserialize)]
struct Envelope {
    jobs: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RemotiveJob {
    id: serde_json::Value,
    url: String,
    title: String,
    company_name: String,
    #[serde(default)]
    candidate_required_location: String,
    #[serde(default)]
    job_type: String,
    #[serde(default)]
    publication_date: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[async_trait]
impl<F: Fetcher + 'static> JobProvider for RemotiveProvider<F> {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn collect(&self, criteria: &Criteria) -> Result<Collected, AppError> {
        let url = format!(
            "{}?search={}&limit={}",
            API_URL,
            urlencode(&criteria.query),
            criteria.max_results_per_source
        );
        let response = self.fetcher.fetch(&url).await?;
        let envelope: Envelope = serde_json::from_str(&response.body)?;

        let mut collected = Collected::default();
        for row in envelope.jobs {
            if collected.jobs.len() >= criteria.max_results_per_source {
                break;
            }
            match serde_json::from_value::<RemotiveJob>(row) {
                Ok(raw) => collected.jobs.push(normalize(raw)),
                Err(e) => collected.stats.record_error(format!("bad job row: {e}")),
            }
        }
        collected.stats.jobs_collected = collected.jobs.len();
        debug!(
            jobs = collected.jobs.len(),
            errors = collected.stats.errors,
            "remotive collection finished"
        );
        Ok(collected)
    }
}

fn normalize(raw: RemotiveJob) -> NormalizedJob {
    // The API has served ids as both numbers and strings.
    let id = match &raw.id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut job = NormalizedJob::new(id, SOURCE);
    job.source_url = API_URL.to_string();
    job.title = raw.title;
    job.company = raw.company_name;
    job.location_raw = raw.candidate_required_location.clone();
    (job.country, job.city) = derive_location(&raw.candidate_required_location);
    job.remote_type = RemoteType::Remote;
    job.employment_types = magpie_core::job::EmploymentType::parse(&raw.job_type)
        .into_iter()
        .collect();
    job.job_url = raw.url;
    job.job_url_canonical = canonicalize_url(&job.job_url);
    job.description_text = plain_text(&raw.description);
    job.tags = raw.tags;
    job.posted_at = parse_publication_date(&raw.publication_date);
    job
}

/// Remotive serves naive local-less timestamps like `2024-03-01T12:30:00`.
fn parse_publication_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
