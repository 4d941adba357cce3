//! Ad-hoc provider for hosted ATS job boards.
//!
//! Six applicant-tracking platforms expose public JSON endpoints keyed by a
//! board token. [`parse_board_url`] recognizes a platform from a careers-page
//! URL and pulls the token out; [`AtsBoardProvider`] fetches and normalizes
//! one `(platform, token)` board. Discovery builds these on the fly from
//! search hits.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use magpie_client::extract::plain_text;
use magpie_core::criteria::Criteria;
use magpie_core::error::AppError;
use magpie_core::job::{EmploymentType, NormalizedJob, RemoteType};
use magpie_core::normalize::canonicalize_url;
use magpie_core::stats::ProviderStats;
use magpie_core::traits::Fetcher;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::{Collected, JobProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtsPlatform {
    Greenhouse,
    Lever,
    Ashby,
    Workable,
    Recruitee,
    SmartRecruiters,
}

impl AtsPlatform {
    pub fn slug(&self) -> &'static str {
        match self {
            AtsPlatform::Greenhouse => "greenhouse",
            AtsPlatform::Lever => "lever",
            AtsPlatform::Ashby => "ashby",
            AtsPlatform::Workable => "workable",
            AtsPlatform::Recruitee => "recruitee",
            AtsPlatform::SmartRecruiters => "smartrecruiters",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "greenhouse" => Some(AtsPlatform::Greenhouse),
            "lever" => Some(AtsPlatform::Lever),
            "ashby" => Some(AtsPlatform::Ashby),
            "workable" => Some(AtsPlatform::Workable),
            "recruitee" => Some(AtsPlatform::Recruitee),
            "smartrecruiters" => Some(AtsPlatform::SmartRecruiters),
            _ => None,
        }
    }

    /// Public jobs endpoint for a board token.
    pub fn api_url(&self, token: &str) -> String {
        match self {
            AtsPlatform::Greenhouse => format!(
                "https://boards-api.greenhouse.io/v1/boards/{token}/jobs?content=true"
            ),
            AtsPlatform::Lever => format!("https://api.lever.co/v0/postings/{token}?mode=json"),
            AtsPlatform::Ashby => {
                format!("https://api.ashbyhq.com/posting-api/job-board/{token}")
            }
            AtsPlatform::Workable => {
                format!("https://apply.workable.com/api/v1/widget/accounts/{token}")
            }
            AtsPlatform::Recruitee => format!("https://{token}.recruitee.com/api/offers/"),
            AtsPlatform::SmartRecruiters => {
                format!("https://api.smartrecruiters.com/v1/companies/{token}/postings")
            }
        }
    }
}

/// Recognize an ATS-hosted careers URL and extract `(platform, token)`.
pub fn parse_board_url(raw: &str) -> Option<(AtsPlatform, String)> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_lowercase();
    let first_segment = || {
        url.path_segments()?
            .find(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
    };

    let (platform, token) = match host.as_str() {
        "boards.greenhouse.io" | "job-boards.greenhouse.io" | "boards.eu.greenhouse.io" => {
            (AtsPlatform::Greenhouse, first_segment()?)
        }
        "jobs.lever.co" | "jobs.eu.lever.co" => (AtsPlatform::Lever, first_segment()?),
        "jobs.ashbyhq.com" => (AtsPlatform::Ashby, first_segment()?),
        "apply.workable.com" => (AtsPlatform::Workable, first_segment()?),
        "jobs.smartrecruiters.com" | "careers.smartrecruiters.com" => {
            (AtsPlatform::SmartRecruiters, first_segment()?)
        }
        other => {
            let token = other.strip_suffix(".recruitee.com")?;
            if token.is_empty() || token.contains('.') {
                return None;
            }
            (AtsPlatform::Recruitee, token.to_string())
        }
    };

    if token.is_empty() || !token.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        return None;
    }
    Some((platform, token))
}

/// Provider for one `(platform, token)` board.
#[derive(Clone)]
pub struct AtsBoardProvider<F> {
    fetcher: F,
    platform: AtsPlatform,
    token: String,
    name: String,
}

impl<F: Fetcher> AtsBoardProvider<F> {
    pub fn new(fetcher: F, platform: AtsPlatform, token: impl Into<String>) -> Self {
        let token = token.into();
        let name = format!("{}:{}", platform.slug(), token);
        Self {
            fetcher,
            platform,
            token,
            name,
        }
    }
}

#[async_trait]
impl<F: Fetcher + 'static> JobProvider for AtsBoardProvider<F> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, criteria: &Criteria) -> Result<Collected, AppError> {
        let url = self.platform.api_url(&self.token);
        let response = self.fetcher.fetch(&url).await?;

        let mut stats = ProviderStats::default();
        let mut jobs = parse_board(
            self.platform,
            &self.token,
            &self.name,
            &response.body,
            &mut stats,
        )?;
        jobs.truncate(criteria.max_results_per_source);
        stats.jobs_collected = jobs.len();
        debug!(
            board = %self.name,
            jobs = jobs.len(),
            errors = stats.errors,
            "ats board collection finished"
        );
        Ok(Collected { jobs, stats })
    }
}

fn parse_board(
    platform: AtsPlatform,
    token: &str,
    source: &str,
    body: &str,
    stats: &mut ProviderStats,
) -> Result<Vec<NormalizedJob>, AppError> {
    match platform {
        AtsPlatform::Greenhouse => parse_greenhouse(token, source, body, stats),
        AtsPlatform::Lever => parse_lever(token, source, body, stats),
        AtsPlatform::Ashby => parse_ashby(token, source, body, stats),
        AtsPlatform::Workable => parse_workable(token, source, body, stats),
        AtsPlatform::Recruitee => parse_recruitee(token, source, body, stats),
        AtsPlatform::SmartRecruiters => parse_smartrecruiters(token, source, body, stats),
    }
}

/// "acme-corp" -> "Acme Corp". Used where the board payload carries no
/// company name of its own.
fn humanize_token(token: &str) -> String {
    token
        .split(['-', '_'])
        .filter(|s| !s.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Greenhouse escapes the HTML in `content`.
fn unescape_html(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn base_job(id: String, source: &str, token: &str, source_url: String) -> NormalizedJob {
    let mut job = NormalizedJob::new(id, source);
    job.source_url = source_url;
    job.company = humanize_token(token);
    job
}

// ---- Greenhouse ----

#[derive(Deserialize)]
struct GreenhouseEnvelope {
    jobs: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct GreenhouseJob {
    id: i64,
    title: String,
    absolute_url: String,
    #[serde(default)]
    location: Option<GreenhouseLocation>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    first_published: Option<String>,
}

#[derive(Deserialize)]
struct GreenhouseLocation {
    name: String,
}

fn parse_greenhouse(
    token: &str,
    source: &str,
    body: &str,
    stats: &mut ProviderStats,
) -> Result<Vec<NormalizedJob>, AppError> {
    let envelope: GreenhouseEnvelope = serde_json::from_str(body)?;
    let api = AtsPlatform::Greenhouse.api_url(token);

    let mut jobs = Vec::new();
    for row in envelope.jobs {
        match serde_json::from_value::<GreenhouseJob>(row) {
            Ok(raw) => {
                let mut job = base_job(raw.id.to_string(), source, token, api.clone());
                job.title = raw.title;
                job.location_raw = raw.location.map(|l| l.name).unwrap_or_default();
                job.remote_type = RemoteType::parse(&job.location_raw);
                job.job_url = raw.absolute_url;
                job.job_url_canonical = canonicalize_url(&job.job_url);
                job.description_text = plain_text(&unescape_html(&raw.content));
                job.posted_at = raw
                    .first_published
                    .or(raw.updated_at)
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|d| d.with_timezone(&Utc));
                jobs.push(job);
            }
            Err(e) => stats.record_error(format!("bad greenhouse row: {e}")),
        }
    }
    Ok(jobs)
}

// ---- Lever ----

#[derive(Deserialize)]
struct LeverJob {
    id: String,
    text: String,
    #[serde(rename = "hostedUrl")]
    hosted_url: String,
    #[serde(rename = "applyUrl", default)]
    apply_url: Option<String>,
    #[serde(default)]
    categories: LeverCategories,
    #[serde(rename = "descriptionPlain", default)]
    description_plain: String,
    #[serde(rename = "createdAt", default)]
    created_at: i64,
    #[serde(rename = "workplaceType", default)]
    workplace_type: String,
}

#[derive(Deserialize, Default)]
struct LeverCategories {
    #[serde(default)]
    location: String,
    #[serde(default)]
    commitment: String,
}

fn parse_lever(
    token: &str,
    source: &str,
    body: &str,
    stats: &mut ProviderStats,
) -> Result<Vec<NormalizedJob>, AppError> {
    let rows: Vec<serde_json::Value> = serde_json::from_str(body)?;
    let api = AtsPlatform::Lever.api_url(token);

    let mut jobs = Vec::new();
    for row in rows {
        match serde_json::from_value::<LeverJob>(row) {
            Ok(raw) => {
                let mut job = base_job(raw.id, source, token, api.clone());
                job.title = raw.text;
                job.location_raw = raw.categories.location;
                job.remote_type = RemoteType::parse(&raw.workplace_type);
                job.employment_types = EmploymentType::parse(&raw.categories.commitment)
                    .into_iter()
                    .collect();
                job.job_url = raw.hosted_url;
                job.job_url_canonical = canonicalize_url(&job.job_url);
                job.apply_url = raw.apply_url;
                job.description_text = raw.description_plain;
                job.posted_at = DateTime::from_timestamp_millis(raw.created_at)
                    .filter(|_| raw.created_at > 0);
                jobs.push(job);
            }
            Err(e) => stats.record_error(format!("bad lever row: {e}")),
        }
    }
    Ok(jobs)
}

// ---- Ashby ----

#[derive(Deserialize)]
struct AshbyEnvelope {
    jobs: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct AshbyJob {
    id: String,
    title: String,
    #[serde(default)]
    location: String,
    #[serde(rename = "employmentType", default)]
    employment_type: String,
    #[serde(rename = "isRemote", default)]
    is_remote: bool,
    #[serde(rename = "jobUrl")]
    job_url: String,
    #[serde(rename = "publishedAt", default)]
    published_at: Option<String>,
    #[serde(rename = "descriptionHtml", default)]
    description_html: String,
}

fn parse_ashby(
    token: &str,
    source: &str,
    body: &str,
    stats: &mut ProviderStats,
) -> Result<Vec<NormalizedJob>, AppError> {
    let envelope: AshbyEnvelope = serde_json::from_str(body)?;
    let api = AtsPlatform::Ashby.api_url(token);

    let mut jobs = Vec::new();
    for row in envelope.jobs {
        match serde_json::from_value::<AshbyJob>(row) {
            Ok(raw) => {
                let mut job = base_job(raw.id, source, token, api.clone());
                job.title = raw.title;
                job.location_raw = raw.location;
                job.remote_type = if raw.is_remote {
                    RemoteType::Remote
                } else {
                    RemoteType::parse(&job.location_raw)
                };
                job.employment_types = EmploymentType::parse(&raw.employment_type)
                    .into_iter()
                    .collect();
                job.job_url = raw.job_url;
                job.job_url_canonical = canonicalize_url(&job.job_url);
                job.description_text = plain_text(&raw.description_html);
                job.posted_at = raw
                    .published_at
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|d| d.with_timezone(&Utc));
                jobs.push(job);
            }
            Err(e) => stats.record_error(format!("bad ashby row: {e}")),
        }
    }
    Ok(jobs)
}

// ---- Workable ----

#[derive(Deserialize)]
struct WorkableEnvelope {
    #[serde(default)]
    name: String,
    jobs: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct WorkableJob {
    shortcode: String,
    title: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    city: String,
    url: String,
    #[serde(rename = "application_url", default)]
    application_url: Option<String>,
    #[serde(rename = "published_on", default)]
    published_on: String,
    #[serde(rename = "employment_type", default)]
    employment_type: String,
    #[serde(default)]
    telecommuting: bool,
}

fn parse_workable(
    token: &str,
    source: &str,
    body: &str,
    stats: &mut ProviderStats,
) -> Result<Vec<NormalizedJob>, AppError> {
    let envelope: WorkableEnvelope = serde_json::from_str(body)?;
    let api = AtsPlatform::Workable.api_url(token);
    let company = if envelope.name.is_empty() {
        humanize_token(token)
    } else {
        envelope.name
    };

    let mut jobs = Vec::new();
    for row in envelope.jobs {
        match serde_json::from_value::<WorkableJob>(row) {
            Ok(raw) => {
                let mut job = base_job(raw.shortcode, source, token, api.clone());
                job.company = company.clone();
                job.title = raw.title;
                job.location_raw = [raw.city.as_str(), raw.country.as_str()]
                    .iter()
                    .filter(|s| !s.is_empty())
                    .copied()
                    .collect::<Vec<_>>()
                    .join(", ");
                job.country = Some(raw.country).filter(|s| !s.is_empty());
                job.city = Some(raw.city).filter(|s| !s.is_empty());
                job.remote_type = if raw.telecommuting {
                    RemoteType::Remote
                } else {
                    RemoteType::Unknown
                };
                job.employment_types = EmploymentType::parse(&raw.employment_type)
                    .into_iter()
                    .collect();
                job.job_url = raw.url;
                job.job_url_canonical = canonicalize_url(&job.job_url);
                job.apply_url = raw.application_url;
                job.posted_at = NaiveDate::parse_from_str(&raw.published_on, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|naive| naive.and_utc());
                jobs.push(job);
            }
            Err(e) => stats.record_error(format!("bad workable row: {e}")),
        }
    }
    Ok(jobs)
}

// ---- Recruitee ----

#[derive(Deserialize)]
struct RecruiteeEnvelope {
    offers: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RecruiteeOffer {
    id: i64,
    title: String,
    #[serde(rename = "careers_url")]
    careers_url: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    remote: bool,
    #[serde(rename = "employment_type_code", default)]
    employment_type_code: String,
    #[serde(rename = "created_at", default)]
    created_at: String,
    #[serde(default)]
    description: String,
}

fn parse_recruitee(
    token: &str,
    source: &str,
    body: &str,
    stats: &mut ProviderStats,
) -> Result<Vec<NormalizedJob>, AppError> {
    let envelope: RecruiteeEnvelope = serde_json::from_str(body)?;
    let api = AtsPlatform::Recruitee.api_url(token);

    let mut jobs = Vec::new();
    for row in envelope.offers {
        match serde_json::from_value::<RecruiteeOffer>(row) {
            Ok(raw) => {
                let mut job = base_job(raw.id.to_string(), source, token, api.clone());
                job.title = raw.title;
                job.location_raw = [raw.city.as_str(), raw.country.as_str()]
                    .iter()
                    .filter(|s| !s.is_empty())
                    .copied()
                    .collect::<Vec<_>>()
                    .join(", ");
                job.country = Some(raw.country).filter(|s| !s.is_empty());
                job.city = Some(raw.city).filter(|s| !s.is_empty());
                job.remote_type = if raw.remote {
                    RemoteType::Remote
                } else {
                    RemoteType::Unknown
                };
                job.employment_types = EmploymentType::parse(&raw.employment_type_code)
                    .into_iter()
                    .collect();
                job.job_url = raw.careers_url;
                job.job_url_canonical = canonicalize_url(&job.job_url);
                job.description_text = plain_text(&raw.description);
                job.posted_at = parse_recruitee_date(&raw.created_at);
                jobs.push(job);
            }
            Err(e) => stats.record_error(format!("bad recruitee row: {e}")),
        }
    }
    Ok(jobs)
}

fn parse_recruitee_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

// ---- SmartRecruiters ----

#[derive(Deserialize)]
struct SmartRecruitersEnvelope {
    content: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct SmartRecruitersPosting {
    id: String,
    name: String,
    #[serde(default)]
    company: Option<SmartRecruitersCompany>,
    #[serde(default)]
    location: Option<SmartRecruitersLocation>,
    #[serde(rename = "releasedDate", default)]
    released_date: Option<String>,
    #[serde(rename = "typeOfEmployment", default)]
    type_of_employment: Option<SmartRecruitersLabel>,
}

#[derive(Deserialize)]
struct SmartRecruitersCompany {
    name: String,
}

#[derive(Deserialize, Default)]
struct SmartRecruitersLocation {
    #[serde(default)]
    city: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    remote: bool,
}

#[derive(Deserialize)]
struct SmartRecruitersLabel {
    #[serde(default)]
    label: String,
}

fn parse_smartrecruiters(
    token: &str,
    source: &str,
    body: &str,
    stats: &mut ProviderStats,
) -> Result<Vec<NormalizedJob>, AppError> {
    let envelope: SmartRecruitersEnvelope = serde_json::from_str(body)?;
    let api = AtsPlatform::SmartRecruiters.api_url(token);

    let mut jobs = Vec::new();
    for row in envelope.content {
        match serde_json::from_value::<SmartRecruitersPosting>(row) {
            Ok(raw) => {
                let mut job = base_job(raw.id.clone(), source, token, api.clone());
                if let Some(company) = raw.company {
                    job.company = company.name;
                }
                job.title = raw.name;
                let location = raw.location.unwrap_or_default();
                job.location_raw = [location.city.as_str(), location.country.as_str()]
                    .iter()
                    .filter(|s| !s.is_empty())
                    .copied()
                    .collect::<Vec<_>>()
                    .join(", ");
                job.country = Some(location.country).filter(|s| !s.is_empty());
                job.city = Some(location.city).filter(|s| !s.is_empty());
                job.remote_type = if location.remote {
                    RemoteType::Remote
                } else {
                    RemoteType::Unknown
                };
                job.employment_types = raw
                    .type_of_employment
                    .map(|t| t.label)
                    .and_then(|l| EmploymentType::parse(&l))
                    .into_iter()
                    .collect();
                job.job_url = format!("https://jobs.smartrecruiters.com/{token}/{}", raw.id);
                job.job_url_canonical = canonicalize_url(&job.job_url);
                job.posted_at = raw
                    .released_date
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|d| d.with_timezone(&Utc));
                jobs.push(job);
            }
            Err(e) => stats.record_error(format!("bad smartrecruiters row: {e}")),
        }
    }
    Ok(jobs)
}
