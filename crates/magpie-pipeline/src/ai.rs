//! Cost-capped AI stages over the post-dedupe job set.
//!
//! Every stage is a structured completion: fixed system prompt, job-specific
//! user prompt, JSON schema the response must match. Calls go through the
//! single-flight cache and a circuit breaker, each wrapped in a per-call
//! timeout. Any failure downgrades to a skipped stage; AI never aborts a run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use magpie_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use magpie_core::criteria::Criteria;
use magpie_core::dedupe::UncertainPair;
use magpie_core::job::{AiInsights, EmploymentType, NormalizedJob, RemoteType};
use magpie_core::llm::{CachedLlm, LlmClient, LlmRequest};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

const CACHE_CAPACITY: u64 = 10_000;
const DESCRIPTION_SNIPPET: usize = 1500;

/// Stage toggles and cost caps.
#[derive(Debug, Clone)]
pub struct AiOptions {
    pub enabled: bool,
    pub arbitration: bool,
    pub classification: bool,
    pub ranking: bool,
    pub enrichment: bool,
    pub company_research: bool,
    pub flags: bool,
    /// Hard cap on jobs receiving per-job stages. Jobs beyond the cap keep
    /// heuristic-only values.
    pub max_llm_jobs: usize,
    /// Hard cap on arbitration calls per run.
    pub max_llm_dedupe_checks: usize,
    /// Classification only overwrites the heuristic remote type at or above
    /// this confidence.
    pub confidence_floor: f64,
    pub call_timeout: Duration,
}

impl Default for AiOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            arbitration: true,
            classification: true,
            ranking: true,
            enrichment: true,
            company_research: true,
            flags: true,
            max_llm_jobs: 25,
            max_llm_dedupe_checks: 10,
            confidence_floor: 0.75,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs the AI stages against any [`LlmClient`].
pub struct AiPipeline {
    llm: CachedLlm,
    breaker: CircuitBreaker,
    options: AiOptions,
}

// ---- Response documents ----

#[derive(Deserialize)]
struct ArbitrationVerdict {
    same_job: bool,
}

#[derive(Deserialize)]
struct Classification {
    remote_type: String,
    #[serde(default)]
    employment_types: Vec<String>,
    #[serde(default)]
    seniority: Option<String>,
    confidence: f64,
}

#[derive(Deserialize)]
struct Ranking {
    score: u8,
    #[serde(default)]
    reasons: Vec<String>,
}

#[derive(Deserialize)]
struct Enrichment {
    summary: String,
    #[serde(default)]
    requirements: Vec<String>,
    #[serde(default)]
    tech_stack: Vec<String>,
}

#[derive(Deserialize)]
struct CompanyResearch {
    #[serde(default)]
    company_domain: Option<String>,
    summary: String,
}

#[derive(Deserialize)]
struct QualityFlags {
    #[serde(default)]
    flags: Vec<String>,
}

impl AiPipeline {
    pub fn new(client: Arc<dyn LlmClient>, options: AiOptions) -> Self {
        Self {
            llm: CachedLlm::new(client, CACHE_CAPACITY),
            breaker: CircuitBreaker::new("llm", CircuitBreakerConfig::default()),
            options,
        }
    }

    /// (cache hits, cache misses) for run diagnostics.
    pub fn cache_stats(&self) -> (u64, u64) {
        self.llm.stats()
    }

    /// One guarded call. `None` means the stage is skipped for this item:
    /// timeout, open circuit, backend error, or undeserializable response.
    async fn call<T: for<'de> Deserialize<'de>>(&self, request: LlmRequest) -> Option<T> {
        let result = tokio::time::timeout(
            self.options.call_timeout,
            self.breaker.call(|| self.llm.complete(&request)),
        )
        .await;

        let value = match result {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(stage = %request.stage, key = %request.job_key, error = %e, "AI call failed, skipping");
                return None;
            }
            Err(_) => {
                warn!(stage = %request.stage, key = %request.job_key, "AI call timed out, skipping");
                self.breaker.record_failure(&magpie_core::error::AppError::Timeout(
                    self.options.call_timeout.as_secs(),
                ));
                return None;
            }
        };

        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(stage = %request.stage, key = %request.job_key, error = %e, "AI response did not match stage document");
                None
            }
        }
    }

    /// Arbitrate uncertain dedupe pairs. Returns the pairs confirmed as the
    /// same job; beyond the cap or on any error a pair defaults to distinct.
    pub async fn arbitrate(
        &self,
        uncertain: &[UncertainPair],
        jobs_by_key: &HashMap<String, &NormalizedJob>,
    ) -> Vec<(String, String)> {
        if !self.options.enabled || !self.options.arbitration {
            return Vec::new();
        }

        let mut confirmed = Vec::new();
        for pair in uncertain.iter().take(self.options.max_llm_dedupe_checks) {
            let (Some(left), Some(right)) =
                (jobs_by_key.get(&pair.left_key), jobs_by_key.get(&pair.right_key))
            else {
                continue;
            };
            let request = arbitration_request(pair, left, right);
            if let Some(ArbitrationVerdict { same_job: true }) = self.call(request).await {
                confirmed.push((pair.left_key.clone(), pair.right_key.clone()));
            }
        }
        debug!(
            pairs = uncertain.len(),
            checked = uncertain.len().min(self.options.max_llm_dedupe_checks),
            confirmed = confirmed.len(),
            "arbitration finished"
        );
        confirmed
    }

    /// Stages 2/4/5/6 over the capped job set. `company_text` holds page
    /// snippets captured during company enrichment; company research never
    /// fetches anything itself.
    pub async fn enrich(
        &self,
        jobs: &mut [NormalizedJob],
        company_text: &HashMap<String, String>,
    ) {
        if !self.options.enabled {
            return;
        }
        for idx in capped_indices(jobs, self.options.max_llm_jobs) {
            let key = jobs[idx].job_key();
            if self.options.classification {
                self.classify(&mut jobs[idx], &key).await;
            }
            if self.options.enrichment {
                self.summarize(&mut jobs[idx], &key).await;
            }
            if self.options.company_research
                && let Some(text) = company_text.get(&key)
            {
                self.research_company(&mut jobs[idx], &key, text).await;
            }
            if self.options.flags {
                self.flag(&mut jobs[idx], &key).await;
            }
        }
    }

    /// Stage 3 over the same capped job set.
    pub async fn rank(&self, jobs: &mut [NormalizedJob], criteria: &Criteria) {
        if !self.options.enabled || !self.options.ranking {
            return;
        }
        for idx in capped_indices(jobs, self.options.max_llm_jobs) {
            let key = jobs[idx].job_key();
            let request = ranking_request(&jobs[idx], &key, criteria);
            if let Some(ranking) = self.call::<Ranking>(request).await {
                let ai = insights(&mut jobs[idx]);
                ai.score = Some(ranking.score.min(100));
                ai.reasons = ranking.reasons;
            }
        }
    }

    async fn classify(&self, job: &mut NormalizedJob, key: &str) {
        let request = classification_request(job, key);
        let Some(classification) = self.call::<Classification>(request).await else {
            return;
        };

        let parsed_remote = RemoteType::parse(&classification.remote_type);
        let confident = classification.confidence >= self.options.confidence_floor;

        if confident {
            if parsed_remote != RemoteType::Unknown {
                job.remote_type = parsed_remote;
            }
            if job.employment_types.is_empty() {
                job.employment_types = classification
                    .employment_types
                    .iter()
                    .filter_map(|t| EmploymentType::parse(t))
                    .collect();
            }
        }
        let ai = insights(job);
        ai.remote_type = Some(parsed_remote);
        ai.seniority = classification.seniority;
    }

    async fn summarize(&self, job: &mut NormalizedJob, key: &str) {
        let request = enrichment_request(job, key);
        if let Some(enrichment) = self.call::<Enrichment>(request).await {
            let ai = insights(job);
            ai.summary = Some(enrichment.summary);
            ai.requirements = enrichment.requirements;
            ai.tech_stack = enrichment.tech_stack;
        }
    }

    async fn research_company(&self, job: &mut NormalizedJob, key: &str, text: &str) {
        let request = company_request(job, key, text);
        if let Some(research) = self.call::<CompanyResearch>(request).await {
            let ai = insights(job);
            ai.company_domain = research.company_domain;
            ai.company_summary = Some(research.summary);
        }
    }

    async fn flag(&self, job: &mut NormalizedJob, key: &str) {
        let request = flags_request(job, key);
        if let Some(quality) = self.call::<QualityFlags>(request).await {
            insights(job).flags = quality.flags;
        }
    }
}

fn insights(job: &mut NormalizedJob) -> &mut AiInsights {
    job.ai.get_or_insert_with(AiInsights::default)
}

/// Indices of the jobs eligible for per-job AI, capped at `max`: newest
/// `posted_at` first, missing dates last, `job_key` as tiebreak.
fn capped_indices(jobs: &[NormalizedJob], max: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..jobs.len()).collect();
    order.sort_by(|&a, &b| {
        let ja = &jobs[a];
        let jb = &jobs[b];
        jb.posted_at
            .cmp(&ja.posted_at)
            .then_with(|| ja.job_key().cmp(&jb.job_key()))
    });
    order.truncate(max);
    order
}

fn snippet(text: &str) -> &str {
    match text.char_indices().nth(DESCRIPTION_SNIPPET) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

fn job_summary_block(job: &NormalizedJob) -> String {
    format!(
        "Title: {}\nCompany: {}\nLocation: {}\nTags: {}\nDescription:\n{}",
        job.title,
        job.company,
        job.location_raw,
        job.tags.join(", "),
        snippet(&job.description_text)
    )
}

// ---- Stage requests ----

fn arbitration_request(
    pair: &UncertainPair,
    left: &NormalizedJob,
    right: &NormalizedJob,
) -> LlmRequest {
    LlmRequest {
        stage: "dedupe".into(),
        job_key: format!("{}|{}", pair.left_key, pair.right_key),
        system: "You compare two job postings and decide whether they describe the same \
                 open position at the same company. Respond only with JSON."
            .into(),
        user: format!(
            "Posting A:\n{}\n\nPosting B:\n{}\n\nAre these the same job?",
            job_summary_block(left),
            job_summary_block(right)
        ),
        schema_name: "arbitration_verdict".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "same_job": { "type": "boolean" }
            },
            "required": ["same_job"],
            "additionalProperties": false
        }),
    }
}

fn classification_request(job: &NormalizedJob, key: &str) -> LlmRequest {
    LlmRequest {
        stage: "classify".into(),
        job_key: key.into(),
        system: "You classify job postings. Respond only with JSON.".into(),
        user: format!(
            "{}\n\nClassify the work arrangement (remote, hybrid, onsite, unknown), \
             employment types, and seniority level, with your confidence from 0 to 1.",
            job_summary_block(job)
        ),
        schema_name: "classification".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "remote_type": { "type": "string", "enum": ["remote", "hybrid", "onsite", "unknown"] },
                "employment_types": { "type": "array", "items": { "type": "string" } },
                "seniority": { "type": ["string", "null"] },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
            },
            "required": ["remote_type", "confidence"],
            "additionalProperties": false
        }),
    }
}

fn ranking_request(job: &NormalizedJob, key: &str, criteria: &Criteria) -> LlmRequest {
    LlmRequest {
        stage: "rank".into(),
        job_key: key.into(),
        system: "You score how well a job posting matches a search. Respond only with JSON."
            .into(),
        user: format!(
            "Search query: {}\nMust-have keywords: {}\nNice-to-have keywords: {}\n\n{}\n\n\
             Score the match from 0 to 100 and give short reasons.",
            criteria.query,
            criteria.must_keywords.join(", "),
            criteria.any_keywords.join(", "),
            job_summary_block(job)
        ),
        schema_name: "ranking".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "score": { "type": "integer", "minimum": 0, "maximum": 100 },
                "reasons": { "type": "array", "items": { "type": "string" }, "maxItems": 5 }
            },
            "required": ["score"],
            "additionalProperties": false
        }),
    }
}

fn enrichment_request(job: &NormalizedJob, key: &str) -> LlmRequest {
    LlmRequest {
        stage: "enrich".into(),
        job_key: key.into(),
        system: "You summarize job postings for a job seeker. Respond only with JSON.".into(),
        user: format!(
            "{}\n\nWrite a two-sentence summary, list the stated requirements, and list \
             the technologies mentioned.",
            job_summary_block(job)
        ),
        schema_name: "enrichment".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string" },
                "requirements": { "type": "array", "items": { "type": "string" } },
                "tech_stack": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["summary"],
            "additionalProperties": false
        }),
    }
}

fn company_request(job: &NormalizedJob, key: &str, text: &str) -> LlmRequest {
    LlmRequest {
        stage: "company".into(),
        job_key: key.into(),
        system: "You profile a company from its own website text. Respond only with JSON."
            .into(),
        user: format!(
            "Company: {}\nWebsite text:\n{}\n\nGive the canonical domain if stated and a \
             one-paragraph profile.",
            job.company,
            snippet(text)
        ),
        schema_name: "company_research".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "company_domain": { "type": ["string", "null"] },
                "summary": { "type": "string" }
            },
            "required": ["summary"],
            "additionalProperties": false
        }),
    }
}

fn flags_request(job: &NormalizedJob, key: &str) -> LlmRequest {
    LlmRequest {
        stage: "flags".into(),
        job_key: key.into(),
        system: "You spot scam and ghost-listing signals in job postings. Respond only \
                 with JSON."
            .into(),
        user: format!(
            "{}\n\nList any warning signs (pay-to-apply, vague employer, crypto-payment \
             promises, long-expired posting, unrealistic salary). Empty list if none.",
            job_summary_block(job)
        ),
        schema_name: "quality_flags".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "flags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["flags"],
            "additionalProperties": false
        }),
    }
}
