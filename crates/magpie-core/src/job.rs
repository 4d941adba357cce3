use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How a job can be performed with respect to location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteType {
    Remote,
    Hybrid,
    Onsite,
    Unknown,
}

impl RemoteType {
    pub fn parse(s: &str) -> Self {
        let s = s.to_lowercase();
        if s.contains("hybrid") {
            RemoteType::Hybrid
        } else if s.contains("remote") || s.contains("telecommute") || s.contains("anywhere") {
            RemoteType::Remote
        } else if s.contains("on-site") || s.contains("onsite") || s.contains("office") {
            RemoteType::Onsite
        } else {
            RemoteType::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentType {
    FullTime,
    PartTime,
    Contract,
    Internship,
    Temporary,
}

impl EmploymentType {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_lowercase().replace(['-', '_'], " ");
        if s.contains("full") {
            Some(EmploymentType::FullTime)
        } else if s.contains("part") {
            Some(EmploymentType::PartTime)
        } else if s.contains("contract") || s.contains("freelance") {
            Some(EmploymentType::Contract)
        } else if s.contains("intern") {
            Some(EmploymentType::Internship)
        } else if s.contains("temp") {
            Some(EmploymentType::Temporary)
        } else {
            None
        }
    }
}

/// AI-derived shadow fields. Never overwrite the heuristic record directly;
/// classification only promotes into `remote_type` above a confidence floor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiInsights {
    pub score: Option<u8>,
    pub reasons: Vec<String>,
    pub remote_type: Option<RemoteType>,
    pub seniority: Option<String>,
    pub summary: Option<String>,
    pub requirements: Vec<String>,
    pub tech_stack: Vec<String>,
    pub company_domain: Option<String>,
    pub company_summary: Option<String>,
    pub flags: Vec<String>,
}

/// Canonical, source-independent job record.
///
/// Created by a provider, mutated only by the dedupe engine (field merges)
/// and the AI pipeline (the `ai` block).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedJob {
    /// Source-native identifier.
    pub provider_id: String,
    /// Provider name ("remotive", "greenhouse:acme", ...).
    pub source: String,
    pub source_url: String,
    pub title: String,
    pub company: String,
    pub location_raw: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub remote_type: RemoteType,
    pub employment_types: Vec<EmploymentType>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_currency: Option<String>,
    pub job_url: String,
    /// `job_url` after tracking-parameter stripping; the dedupe URL key.
    pub job_url_canonical: String,
    pub apply_url: Option<String>,
    pub description_text: String,
    pub contact_emails: Vec<String>,
    pub company_website: Option<String>,
    pub company_social: Vec<String>,
    pub tags: Vec<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    /// Which extraction strategy produced this record: "api", "feed",
    /// "jsonld", "html", or "text".
    pub extraction_method: String,
    pub ai: Option<AiInsights>,
}

impl NormalizedJob {
    pub fn new(provider_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            source: source.into(),
            source_url: String::new(),
            title: String::new(),
            company: String::new(),
            location_raw: String::new(),
            country: None,
            city: None,
            remote_type: RemoteType::Unknown,
            employment_types: Vec::new(),
            salary_min: None,
            salary_max: None,
            salary_currency: None,
            job_url: String::new(),
            job_url_canonical: String::new(),
            apply_url: None,
            description_text: String::new(),
            contact_emails: Vec::new(),
            company_website: None,
            company_social: Vec::new(),
            tags: Vec::new(),
            posted_at: None,
            expires_at: None,
            first_seen_at: Utc::now(),
            extraction_method: "api".to_string(),
            ai: None,
        }
    }

    /// Natural storage key: SHA-256 over `(provider_id, source)`.
    pub fn job_key(&self) -> String {
        job_key(&self.provider_id, &self.source)
    }

    /// A record without a title or company is unusable and is dropped
    /// before dedupe.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() && !self.company.trim().is_empty()
    }
}

/// Compute the natural job key from its identity pair.
pub fn job_key(provider_id: &str, source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
