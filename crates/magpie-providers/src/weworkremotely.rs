//! We Work Remotely RSS provider.

use async_trait::async_trait;
use magpie_client::extract::{FeedItem, parse_feed, plain_text};
use magpie_core::criteria::Criteria;
use magpie_core::error::AppError;
use magpie_core::job::{NormalizedJob, RemoteType};
use magpie_core::normalize::canonicalize_url;
use magpie_core::traits::Fetcher;
use tracing::debug;

use crate::{Collected, JobProvider, query_matches};

const FEED_URL: &str = "https://weworkremotely.com/remote-jobs.rss";
const SOURCE: &str = "weworkremotely";

#[derive(Clone)]
pub struct WeWorkRemotelyProvider<F> {
    fetcher: F,
}

impl<F: Fetcher> WeWorkRemotelyProvider<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl<F: Fetcher + 'static> JobProvider for WeWorkRemotelyProvider<F> {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn collect(&self, criteria: &Criteria) -> Result<Collected, AppError> {
        let response = self.fetcher.fetch(FEED_URL).await?;
        let items = parse_feed(&response.body);
        if items.is_empty() {
            return Err(AppError::Extract("feed contained no items".into()));
        }

        let mut collected = Collected::default();
        for item in items {
            if collected.jobs.len() >= criteria.max_results_per_source {
                break;
            }
            match normalize(item) {
                Ok(job) => {
                    let haystack = format!(
                        "{} {} {}",
                        job.title,
                        job.description_text,
                        job.tags.join(" ")
                    );
                    if query_matches(&haystack, &criteria.query) {
                        collected.jobs.push(job);
                    }
                }
                Err(message) => collected.stats.record_error(message),
            }
        }
        collected.stats.jobs_collected = collected.jobs.len();
        debug!(
            jobs = collected.jobs.len(),
            errors = collected.stats.errors,
            "weworkremotely collection finished"
        );
        Ok(collected)
    }
}

fn normalize(item: FeedItem) -> Result<NormalizedJob, String> {
    // Feed titles are "Company: Job Title" composites.
    let (company, title) = match item.title.split_once(':') {
        Some((company, title)) => (company.trim().to_string(), title.trim().to_string()),
        None => return Err(format!("title without company prefix: {}", item.title)),
    };

    let provider_id = if item.guid.is_empty() {
        item.link.clone()
    } else {
        item.guid.clone()
    };

    let mut job = NormalizedJob::new(provider_id, SOURCE);
    job.source_url = FEED_URL.to_string();
    job.title = title;
    job.company = company;
    job.remote_type = RemoteType::Remote;
    // The region category ("Anywhere in the World", "USA Only", ...) is the
    // only location signal the feed carries.
    job.location_raw = item
        .categories
        .iter()
        .find(|c| c.to_lowercase().contains("anywhere") || c.to_lowercase().contains("only"))
        .cloned()
        .unwrap_or_default();
    job.job_url = item.link;
    job.job_url_canonical = canonicalize_url(&job.job_url);
    job.description_text = plain_text(&item.description);
    job.tags = item.categories;
    job.posted_at = item.published;
    job.extraction_method = "feed".to_string();
    Ok(job)
}
