//! Template provider for a fixed careers page.

use async_trait::async_trait;
use magpie_client::extract::extract_job;
use magpie_core::criteria::Criteria;
use magpie_core::error::AppError;
use magpie_core::job::{EmploymentType, NormalizedJob, RemoteType};
use magpie_core::normalize::{canonicalize_url, derive_location};
use magpie_core::traits::Fetcher;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::{Collected, JobProvider};

const DEFAULT_LINK_SELECTOR: &str = "a[href*='job'], a[href*='position'], a[href*='career']";

/// Scrapes postings off a company careers page: fetch the listing, select
/// posting links, fetch each posting through the extraction stack.
///
/// Wrap the fetcher in throttling and robots wrappers before constructing;
/// this provider only decides which URLs to visit.
#[derive(Clone)]
pub struct PageScrapeProvider<F> {
    fetcher: F,
    name: String,
    listing_url: String,
    link_selector: String,
}

impl<F: Fetcher> PageScrapeProvider<F> {
    pub fn new(fetcher: F, name: impl Into<String>, listing_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            name: name.into(),
            listing_url: listing_url.into(),
            link_selector: DEFAULT_LINK_SELECTOR.to_string(),
        }
    }

    /// Override the CSS selector used to pick posting links off the listing.
    pub fn with_link_selector(mut self, selector: impl Into<String>) -> Self {
        self.link_selector = selector.into();
        self
    }

    fn posting_urls(&self, listing_html: &str, base: &str, cap: usize) -> Vec<String> {
        let document = Html::parse_document(listing_html);
        let Ok(selector) = Selector::parse(&self.link_selector) else {
            return Vec::new();
        };
        let base_url = Url::parse(base).ok();

        let mut urls = Vec::new();
        for link in document.select(&selector) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let resolved = match (Url::parse(href), &base_url) {
                (Ok(absolute), _) => absolute.to_string(),
                (Err(_), Some(base)) => match base.join(href) {
                    Ok(joined) => joined.to_string(),
                    Err(_) => continue,
                },
                (Err(_), None) => continue,
            };
            if !urls.contains(&resolved) {
                urls.push(resolved);
            }
            if urls.len() >= cap {
                break;
            }
        }
        urls
    }
}

#[async_trait]
impl<F: Fetcher + 'static> JobProvider for PageScrapeProvider<F> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, criteria: &Criteria) -> Result<Collected, AppError> {
        let listing = self.fetcher.fetch(&self.listing_url).await?;
        let urls = self.posting_urls(
            &listing.body,
            &listing.final_url,
            criteria.max_results_per_source,
        );

        let mut collected = Collected::default();
        for url in urls {
            match self.scrape_posting(&url).await {
                Ok(job) => collected.jobs.push(job),
                Err(e) => collected.stats.record_error(format!("{url}: {e}")),
            }
        }
        collected.stats.jobs_collected = collected.jobs.len();
        debug!(
            provider = %self.name,
            jobs = collected.jobs.len(),
            errors = collected.stats.errors,
            "page scrape finished"
        );
        Ok(collected)
    }
}

impl<F: Fetcher> PageScrapeProvider<F> {
    async fn scrape_posting(&self, url: &str) -> Result<NormalizedJob, AppError> {
        let response = self.fetcher.fetch(url).await?;
        let extracted = extract_job(&response.body)?;

        let canonical = canonicalize_url(&response.final_url);
        let mut job = NormalizedJob::new(canonical.clone(), &self.name);
        job.source_url = self.listing_url.clone();
        job.title = extracted.title;
        job.company = extracted.company;
        job.location_raw = extracted.location.clone();
        (job.country, job.city) = derive_location(&extracted.location);
        job.remote_type = extracted
            .remote_hint
            .as_deref()
            .map(RemoteType::parse)
            .unwrap_or(RemoteType::Unknown);
        job.employment_types = extracted
            .employment_types
            .iter()
            .filter_map(|t| EmploymentType::parse(t))
            .collect();
        job.salary_min = extracted.salary_min;
        job.salary_max = extracted.salary_max;
        job.salary_currency = extracted.salary_currency;
        job.job_url = response.final_url;
        job.job_url_canonical = canonical;
        job.apply_url = extracted.apply_url;
        job.description_text = extracted.description;
        job.posted_at = extracted.posted_at;
        job.expires_at = extracted.expires_at;
        job.extraction_method = extracted.method.to_string();
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_core::testutil::MockFetcher;

    const LISTING: &str = r#"<html><body>
        <a href="/careers/job/1">Backend Engineer</a>
        <a href="/careers/job/1">Backend Engineer (again)</a>
        <a href="https://acme.example/careers/job/2">Data Engineer</a>
        <a href="/blog/post">Blog</a>
        </body></html>"#;

    const POSTING_1: &str = r#"<html><head><script type="application/ld+json">
        {"@type": "JobPosting", "title": "Backend Engineer",
         "hiringOrganization": {"name": "Acme"},
         "jobLocationType": "TELECOMMUTE"}
        </script></head><body></body></html>"#;

    const POSTING_2: &str = r#"<html><head>
        <meta property="og:title" content="Data Engineer"/>
        <meta property="og:site_name" content="Acme"/>
        </head><body><h1>Data Engineer</h1></body></html>"#;

    fn fetcher() -> MockFetcher {
        MockFetcher::new("")
            .route("/careers", LISTING)
            .route("/job/1", POSTING_1)
            .route("/job/2", POSTING_2)
    }

    #[tokio::test]
    async fn scrapes_listing_links_through_extraction() {
        let fetcher = MockFetcher::with_responses(vec![Ok(
            magpie_core::traits::FetchResponse::ok("https://acme.example/careers", LISTING),
        )])
        .route("/job/1", POSTING_1)
        .route("/job/2", POSTING_2);

        let provider = PageScrapeProvider::new(
            fetcher,
            "acme-careers",
            "https://acme.example/careers",
        );
        let collected = provider.collect(&Criteria::new("engineer")).await.unwrap();

        assert_eq!(collected.jobs.len(), 2);
        assert_eq!(collected.jobs[0].extraction_method, "jsonld");
        assert_eq!(collected.jobs[0].remote_type, RemoteType::Remote);
        assert_eq!(collected.jobs[1].extraction_method, "html");
        assert_eq!(collected.jobs[1].source, "acme-careers");
    }

    #[tokio::test]
    async fn unextractable_posting_is_a_row_error() {
        let fetcher = MockFetcher::with_responses(vec![
            Ok(magpie_core::traits::FetchResponse::ok(
                "https://acme.example/careers",
                r#"<a href="/careers/job/9">x</a>"#,
            )),
            Ok(magpie_core::traits::FetchResponse::ok(
                "https://acme.example/careers/job/9",
                "<html><body><p>splash page</p></body></html>",
            )),
        ]);
        let provider =
            PageScrapeProvider::new(fetcher, "acme-careers", "https://acme.example/careers");
        let collected = provider.collect(&Criteria::new("x")).await.unwrap();

        assert!(collected.jobs.is_empty());
        assert_eq!(collected.stats.errors, 1);
        assert!(collected.stats.error_messages[0].contains("job/9"));
    }

    #[test]
    fn link_dedupe_and_resolution() {
        let provider = PageScrapeProvider::new(
            fetcher(),
            "acme-careers",
            "https://acme.example/careers",
        );
        let urls = provider.posting_urls(LISTING, "https://acme.example/careers", 10);
        // "/blog/post" matches no selector branch; duplicates collapse.
        assert_eq!(
            urls,
            vec![
                "https://acme.example/careers/job/1".to_string(),
                "https://acme.example/careers/job/2".to_string(),
            ]
        );
    }
}
