//! Arbeitnow job board API provider.

use async_trait::async_trait;
use chrono::DateTime;
use magpie_client::extract::plain_text;
use magpie_core::criteria::Criteria;
use magpie_core::error::AppError;
use magpie_core::job::{EmploymentType, NormalizedJob, RemoteType};
use magpie_core::normalize::{canonicalize_url, derive_location};
use magpie_core::traits::Fetcher;
use serde::Deserialize;
use tracing::debug;

use crate::{Collected, JobProvider, query_matches};

const API_URL: &str = "https://www.arbeitnow.com/api/job-board-api";
const SOURCE: &str = "arbeitnow";

#[derive(Clone)]
pub struct ArbeitnowProvider<F> {
    fetcher: F,
}

impl<F: Fetcher> ArbeitnowProvider<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

#[derive(Deserialize)]
struct Envelope {
    data: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct ArbeitnowJob {
    slug: String,
    company_name: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    remote: bool,
    url: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    job_types: Vec<String>,
    #[serde(default)]
    location: String,
    #[serde(default)]
    created_at: i64,
}

#[async_trait]
impl<F: Fetcher + 'static> JobProvider for ArbeitnowProvider<F> {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn collect(&self, criteria: &Criteria) -> Result<Collected, AppError> {
        let response = self.fetcher.fetch(API_URL).await?;
        let envelope: Envelope = serde_json::from_str(&response.body)?;

        let mut collected = Collected::default();
        for row in envelope.data {
            if collected.jobs.len() >= criteria.max_results_per_source {
                break;
            }
            match serde_json::from_value::<ArbeitnowJob>(row) {
                Ok(raw) => {
                    let haystack =
                        format!("{} {} {}", raw.title, raw.tags.join(" "), raw.description);
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
            "arbeitnow collection finished"
        );
        Ok(collected)
    }
}

fn normalize(raw: ArbeitnowJob) -> NormalizedJob {
    let mut job = NormalizedJob::new(raw.slug, SOURCE);
    job.source_url = API_URL.to_string();
    job.title = raw.title;
    job.company = raw.company_name;
    job.location_raw = raw.location.clone();
    (job.country, job.city) = derive_location(&raw.location);
    job.remote_type = if raw.remote {
        RemoteType::Remote
    } else {
        RemoteType::Unknown
    };
    job.employment_types = raw
        .job_types
        .iter()
        .filter_map(|t| EmploymentType::parse(t))
        .collect();
    job.employment_types.sort();
    job.employment_types.dedup();
    job.job_url = raw.url;
    job.job_url_canonical = canonicalize_url(&job.job_url);
    job.description_text = plain_text(&raw.description);
    job.tags = raw.tags;
    job.posted_at = DateTime::from_timestamp(raw.created_at, 0).filter(|_| raw.created_at > 0);
    job
}
