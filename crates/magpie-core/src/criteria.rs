use serde::{Deserialize, Serialize};

/// Immutable search specification for one collection run.
///
/// Built once from caller input and passed by reference through the whole
/// pipeline; nothing mutates it after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criteria {
    /// Free-text search query (e.g., "rust backend engineer").
    pub query: String,
    /// Optional location filter, matched case-insensitively as a substring.
    pub location: Option<String>,
    /// Keep only jobs classified as fully remote.
    pub remote_only: bool,
    /// Every keyword must appear in title/description/tags.
    pub must_keywords: Vec<String>,
    /// At least one keyword must appear (empty list = no constraint).
    pub any_keywords: Vec<String>,
    /// Cap on jobs collected from a single source.
    pub max_results_per_source: usize,
    /// Cap on ATS boards the discovery provider will collect from.
    pub max_discovered_ats_tokens: usize,
    /// Cap on web-search hits the discovery provider inspects.
    pub max_search_results: usize,
    /// Fetch company websites for contact/social signals during enrichment.
    pub enrich_company_pages: bool,
}

impl Criteria {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            location: None,
            remote_only: false,
            must_keywords: Vec::new(),
            any_keywords: Vec::new(),
            max_results_per_source: 100,
            max_discovered_ats_tokens: 10,
            max_search_results: 25,
            enrich_company_pages: false,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn remote_only(mut self) -> Self {
        self.remote_only = true;
        self
    }

    pub fn with_must_keywords(mut self, keywords: Vec<String>) -> Self {
        self.must_keywords = keywords;
        self
    }

    pub fn with_any_keywords(mut self, keywords: Vec<String>) -> Self {
        self.any_keywords = keywords;
        self
    }

    pub fn with_max_results_per_source(mut self, max: usize) -> Self {
        self.max_results_per_source = max;
        self
    }

    pub fn with_discovery_caps(mut self, max_tokens: usize, max_search_results: usize) -> Self {
        self.max_discovered_ats_tokens = max_tokens;
        self.max_search_results = max_search_results;
        self
    }

    pub fn with_company_enrichment(mut self) -> Self {
        self.enrich_company_pages = true;
        self
    }
}
