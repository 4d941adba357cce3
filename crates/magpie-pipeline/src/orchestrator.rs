//! The run orchestrator: collection through persistence.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use magpie_client::extract::company_signals;
use magpie_core::criteria::Criteria;
use magpie_core::dedupe::{DedupeConfig, dedupe};
use magpie_core::job::NormalizedJob;
use magpie_core::llm::LlmClient;
use magpie_core::sink::{JobSink, Upsert};
use magpie_core::stats::{RunSummary, SourceReport};
use magpie_core::traits::Fetcher;
use magpie_providers::{Collected, JobProvider};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ai::{AiOptions, AiPipeline};
use crate::filter::filter_jobs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovering,
    Collecting,
    Filtering,
    Deduping,
    Enriching,
    Ranking,
    Persisting,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Discovering => "discovering",
            Phase::Collecting => "collecting",
            Phase::Filtering => "filtering",
            Phase::Deduping => "deduping",
            Phase::Enriching => "enriching",
            Phase::Ranking => "ranking",
            Phase::Persisting => "persisting",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Clone)]
pub struct RunOptions {
    /// Restrict the provider list to these names; `None` runs all.
    pub providers_allowlist: Option<Vec<String>>,
    /// Concurrent provider collections.
    pub max_concurrency: usize,
    /// Per-provider wall-clock deadline.
    pub provider_deadline: Duration,
    pub ai: AiOptions,
    pub dedupe: DedupeConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            providers_allowlist: None,
            max_concurrency: 4,
            provider_deadline: Duration::from_secs(90),
            ai: AiOptions::default(),
            dedupe: DedupeConfig::default(),
        }
    }
}

/// Drives one collection run end to end. [`Orchestrator::run`] is
/// infallible: every provider, extraction, and AI failure is folded into the
/// summary, and only the sink can cut a run short.
pub struct Orchestrator<F, S> {
    providers: Vec<Box<dyn JobProvider>>,
    fetcher: F,
    sink: S,
    ai: Option<AiPipeline>,
    options: RunOptions,
}

impl<F: Fetcher + 'static, S: JobSink> Orchestrator<F, S> {
    pub fn new(
        providers: Vec<Box<dyn JobProvider>>,
        fetcher: F,
        sink: S,
        options: RunOptions,
    ) -> Self {
        Self {
            providers,
            fetcher,
            sink,
            ai: None,
            options,
        }
    }

    /// Attach an AI backend. The pipeline (response cache and circuit
    /// breaker included) lives as long as the orchestrator, so repeated
    /// runs reuse cached responses instead of re-calling upstream.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.ai = Some(AiPipeline::new(llm, self.options.ai.clone()));
        self
    }

    pub async fn run(&self, criteria: &Criteria, cancel: CancellationToken) -> RunSummary {
        let mut summary = RunSummary::new(criteria.clone());
        info!(run_id = %summary.run_id, query = %criteria.query, "run started");

        let ai = self.ai.as_ref().filter(|_| self.options.ai.enabled);

        // Discovery providers run under their own phase label; everything
        // else is plain collection.
        let (discovery, direct): (Vec<_>, Vec<_>) = self
            .active_providers()
            .into_iter()
            .partition(|p| p.name() == "discovery");

        let mut jobs: Vec<NormalizedJob> = Vec::new();
        if !discovery.is_empty() {
            info!(phase = %Phase::Discovering, providers = discovery.len(), "phase started");
            self.collect_all(discovery, criteria, &cancel, &mut summary, &mut jobs)
                .await;
        }
        info!(phase = %Phase::Collecting, providers = direct.len(), "phase started");
        self.collect_all(direct, criteria, &cancel, &mut summary, &mut jobs)
            .await;
        summary.jobs_collected = jobs.len();

        info!(phase = %Phase::Filtering, candidates = jobs.len(), "phase started");
        let (mut jobs, dropped) = filter_jobs(jobs, criteria);
        summary.jobs_filtered = dropped;

        info!(phase = %Phase::Deduping, candidates = jobs.len(), "phase started");
        let mut outcome = dedupe(std::mem::take(&mut jobs), &self.options.dedupe);
        if let Some(ai) = ai
            && !outcome.uncertain.is_empty()
        {
            // Pair keys come from group members, which may not be the
            // completeness winner; resolve each to its survivor.
            let jobs_by_key: HashMap<String, &NormalizedJob> = outcome
                .uncertain
                .iter()
                .flat_map(|p| [p.left_key.as_str(), p.right_key.as_str()])
                .filter_map(|key| outcome.survivor_for(key).map(|j| (key.to_string(), j)))
                .collect();
            let confirmed = ai.arbitrate(&outcome.uncertain, &jobs_by_key).await;
            drop(jobs_by_key);
            outcome.apply_verdicts(&confirmed);
        }
        summary.duplicates_merged = outcome.duplicates_merged;
        let mut jobs = outcome.survivors;

        info!(phase = %Phase::Enriching, survivors = jobs.len(), "phase started");
        let company_text = if criteria.enrich_company_pages {
            self.collect_company_signals(&mut jobs, &cancel).await
        } else {
            HashMap::new()
        };
        if let Some(ai) = ai {
            ai.enrich(&mut jobs, &company_text).await;
        }

        info!(phase = %Phase::Ranking, "phase started");
        if let Some(ai) = ai {
            ai.rank(&mut jobs, criteria).await;
        }

        info!(phase = %Phase::Persisting, jobs = jobs.len(), "phase started");
        for job in &jobs {
            match self.sink.upsert(job).await {
                Ok(Upsert::Inserted) => summary.jobs_new += 1,
                Ok(Upsert::Updated) => summary.jobs_updated += 1,
                Err(e) => {
                    warn!(error = %e, "sink rejected upsert, stopping persistence");
                    summary.errors += 1;
                    summary.error_summary = Some(format!("persistence failed: {e}"));
                    break;
                }
            }
        }

        summary.finish();
        info!(
            phase = %Phase::Done,
            run_id = %summary.run_id,
            collected = summary.jobs_collected,
            new = summary.jobs_new,
            updated = summary.jobs_updated,
            merged = summary.duplicates_merged,
            errors = summary.errors,
            "run finished"
        );
        summary
    }

    fn active_providers(&self) -> Vec<&dyn JobProvider> {
        self.providers
            .iter()
            .map(|p| p.as_ref())
            .filter(|p| match &self.options.providers_allowlist {
                Some(allow) => allow.iter().any(|name| name == p.name()),
                None => true,
            })
            .collect()
    }

    /// Dispatch providers concurrently, each isolated behind its deadline.
    async fn collect_all(
        &self,
        providers: Vec<&dyn JobProvider>,
        criteria: &Criteria,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
        jobs: &mut Vec<NormalizedJob>,
    ) {
        let deadline = self.options.provider_deadline;
        let results: Vec<(String, Result<Collected, String>)> =
            futures::stream::iter(providers.into_iter().map(|provider| {
                let cancel = cancel.clone();
                async move {
                    let name = provider.name().to_string();
                    if cancel.is_cancelled() {
                        return (name, Err("run cancelled".to_string()));
                    }
                    let result = tokio::select! {
                        _ = cancel.cancelled() => Err("run cancelled".to_string()),
                        outcome = tokio::time::timeout(deadline, provider.collect(criteria)) => {
                            match outcome {
                                Ok(Ok(collected)) => Ok(collected),
                                Ok(Err(e)) => Err(e.to_string()),
                                Err(_) => {
                                    Err(format!("deadline of {}s exceeded", deadline.as_secs()))
                                }
                            }
                        }
                    };
                    (name, result)
                }
            }))
            .buffer_unordered(self.options.max_concurrency)
            .collect()
            .await;

        for (name, result) in results {
            match result {
                Ok(collected) => {
                    info!(
                        provider = %name,
                        jobs = collected.stats.jobs_collected,
                        errors = collected.stats.errors,
                        "provider finished"
                    );
                    summary.errors += collected.stats.errors;
                    summary
                        .sources
                        .push(SourceReport::from_stats(&name, collected.stats));
                    jobs.extend(collected.jobs);
                }
                Err(message) => {
                    warn!(provider = %name, error = %message, "provider failed");
                    summary.errors += 1;
                    summary.sources.push(SourceReport::failed(&name, message));
                }
            }
        }
    }

    /// Fetch company-page signals for jobs that carry a website. The text
    /// snippet is kept aside for AI company research; emails and social
    /// links land on the job directly.
    async fn collect_company_signals(
        &self,
        jobs: &mut [NormalizedJob],
        cancel: &CancellationToken,
    ) -> HashMap<String, String> {
        let mut company_text = HashMap::new();
        let mut visited: HashMap<String, Option<usize>> = HashMap::new();

        for idx in 0..jobs.len() {
            if cancel.is_cancelled() {
                break;
            }
            let Some(website) = jobs[idx].company_website.clone() else {
                continue;
            };
            // One fetch per website per run.
            if let Some(&seen) = visited.get(&website) {
                if let Some(source_idx) = seen {
                    let (signals_emails, signals_social, text) = {
                        let source = &jobs[source_idx];
                        (
                            source.contact_emails.clone(),
                            source.company_social.clone(),
                            company_text.get(&source.job_key()).cloned(),
                        )
                    };
                    let key = jobs[idx].job_key();
                    merge_signal_lists(&mut jobs[idx], signals_emails, signals_social);
                    if let Some(text) = text {
                        company_text.insert(key, text);
                    }
                }
                continue;
            }

            match company_signals(&self.fetcher, &website).await {
                Ok(signals) => {
                    let key = jobs[idx].job_key();
                    merge_signal_lists(&mut jobs[idx], signals.emails, signals.social_links);
                    if !signals.text_snippet.is_empty() {
                        company_text.insert(key, signals.text_snippet);
                    }
                    visited.insert(website, Some(idx));
                }
                Err(e) => {
                    warn!(website = %website, error = %e, "company page enrichment failed");
                    visited.insert(website, None);
                }
            }
        }
        company_text
    }
}

fn merge_signal_lists(job: &mut NormalizedJob, emails: Vec<String>, social: Vec<String>) {
    for email in emails {
        if !job.contact_emails.contains(&email) {
            job.contact_emails.push(email);
        }
    }
    for link in social {
        if !job.company_social.contains(&link) {
            job.company_social.push(link);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_core::sink::MemorySink;
    use magpie_core::testutil::{FailingSink, MockFetcher, MockLlm, make_test_job};
    use magpie_providers::testutil::MockProvider;
    use serde_json::json;

    fn orchestrator(
        providers: Vec<Box<dyn JobProvider>>,
        sink: MemorySink,
    ) -> Orchestrator<MockFetcher, MemorySink> {
        Orchestrator::new(providers, MockFetcher::new(""), sink, RunOptions::default())
    }

    #[tokio::test]
    async fn failing_provider_does_not_poison_the_run() {
        let good = make_test_job("1", "alpha", "Rust Engineer", "Acme");
        let providers: Vec<Box<dyn JobProvider>> = vec![
            Box::new(MockProvider::with_jobs("alpha", vec![good])),
            Box::new(MockProvider::failing("beta", "boom")),
        ];
        let sink = MemorySink::new();
        let summary = orchestrator(providers, sink.clone())
            .run(&Criteria::new("rust"), CancellationToken::new())
            .await;

        assert!(summary.finished_at.is_some());
        assert_eq!(summary.jobs_new, 1);
        assert_eq!(sink.len(), 1);

        let beta = summary.sources.iter().find(|s| s.name == "beta").unwrap();
        assert_eq!(beta.jobs_collected, 0);
        assert_eq!(beta.errors, 1);
        assert!(beta.error_messages[0].contains("500"));
    }

    #[tokio::test]
    async fn all_providers_failing_still_reaches_done() {
        let providers: Vec<Box<dyn JobProvider>> = vec![
            Box::new(MockProvider::failing("alpha", "down")),
            Box::new(MockProvider::failing("beta", "down")),
        ];
        let summary = orchestrator(providers, MemorySink::new())
            .run(&Criteria::new("rust"), CancellationToken::new())
            .await;

        assert!(summary.finished_at.is_some());
        assert_eq!(summary.jobs_collected, 0);
        assert_eq!(summary.errors, 2);
        assert!(summary.sources.iter().all(|s| s.errors == 1));
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let jobs = vec![
            make_test_job("1", "alpha", "Rust Engineer", "Acme"),
            make_test_job("2", "alpha", "Go Engineer", "Globex"),
        ];
        let providers = || -> Vec<Box<dyn JobProvider>> {
            vec![Box::new(MockProvider::with_jobs("alpha", jobs.clone()))]
        };
        let sink = MemorySink::new();

        let first = orchestrator(providers(), sink.clone())
            .run(&Criteria::new(""), CancellationToken::new())
            .await;
        assert_eq!(first.jobs_new, 2);
        assert_eq!(first.jobs_updated, 0);

        let second = orchestrator(providers(), sink.clone())
            .run(&Criteria::new(""), CancellationToken::new())
            .await;
        assert_eq!(second.jobs_new, 0);
        assert_eq!(second.jobs_updated, 2);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn cross_source_duplicates_merge_with_completeness_survivor() {
        let mut rich = make_test_job("1", "remotive", "Senior Rust Engineer", "Acme");
        rich.description_text =
            "Long, detailed description of the role and the team. ".repeat(8);
        let mut poor = make_test_job("x9", "weworkremotely", "Senior Rust Engineer", "Acme Inc");
        poor.description_text = String::new();
        poor.job_url = "https://weworkremotely.com/jobs/x9".into();
        poor.job_url_canonical = "https://weworkremotely.com/jobs/x9".into();

        let providers: Vec<Box<dyn JobProvider>> = vec![
            Box::new(MockProvider::with_jobs("remotive", vec![rich])),
            Box::new(MockProvider::with_jobs("weworkremotely", vec![poor])),
        ];
        let sink = MemorySink::new();
        let summary = orchestrator(providers, sink.clone())
            .run(&Criteria::new(""), CancellationToken::new())
            .await;

        assert_eq!(summary.duplicates_merged, 1);
        assert_eq!(sink.len(), 1);
        let stored = sink.all();
        assert!(stored[0].job.description_text.contains("detailed description"));
    }

    #[tokio::test]
    async fn row_errors_surface_in_summary() {
        let provider = MockProvider::with_jobs(
            "alpha",
            vec![make_test_job("1", "alpha", "Rust Engineer", "Acme")],
        )
        .with_row_errors(vec!["bad row 7"]);
        let summary = orchestrator(vec![Box::new(provider)], MemorySink::new())
            .run(&Criteria::new(""), CancellationToken::new())
            .await;

        assert_eq!(summary.errors, 1);
        let alpha = &summary.sources[0];
        assert_eq!(alpha.jobs_collected, 1);
        assert_eq!(alpha.error_messages, vec!["bad row 7".to_string()]);
    }

    #[tokio::test]
    async fn slow_provider_times_out_into_a_failed_report() {
        let slow = MockProvider::with_jobs(
            "slow",
            vec![make_test_job("1", "slow", "Rust Engineer", "Acme")],
        )
        .with_delay(Duration::from_secs(5));
        let options = RunOptions {
            provider_deadline: Duration::from_millis(50),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(
            vec![Box::new(slow) as Box<dyn JobProvider>],
            MockFetcher::new(""),
            MemorySink::new(),
            options,
        );
        let summary = orchestrator
            .run(&Criteria::new(""), CancellationToken::new())
            .await;

        assert_eq!(summary.jobs_collected, 0);
        assert!(summary.sources[0].error_messages[0].contains("deadline"));
    }

    #[tokio::test]
    async fn allowlist_restricts_providers() {
        let alpha = MockProvider::with_jobs(
            "alpha",
            vec![make_test_job("1", "alpha", "Rust Engineer", "Acme")],
        );
        let beta = MockProvider::with_jobs(
            "beta",
            vec![make_test_job("2", "beta", "Go Engineer", "Globex")],
        );
        let options = RunOptions {
            providers_allowlist: Some(vec!["alpha".to_string()]),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(
            vec![
                Box::new(alpha) as Box<dyn JobProvider>,
                Box::new(beta) as Box<dyn JobProvider>,
            ],
            MockFetcher::new(""),
            MemorySink::new(),
            options,
        );
        let summary = orchestrator
            .run(&Criteria::new(""), CancellationToken::new())
            .await;

        assert_eq!(summary.sources.len(), 1);
        assert_eq!(summary.sources[0].name, "alpha");
    }

    #[tokio::test]
    async fn cancelled_token_skips_collection() {
        let provider = MockProvider::with_jobs(
            "alpha",
            vec![make_test_job("1", "alpha", "Rust Engineer", "Acme")],
        );
        let calls = provider.collect_calls.clone();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = orchestrator(vec![Box::new(provider)], MemorySink::new())
            .run(&Criteria::new(""), cancel)
            .await;

        assert!(summary.finished_at.is_some());
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(summary.jobs_collected, 0);
    }

    #[tokio::test]
    async fn sink_failure_is_run_fatal_but_still_summarized() {
        let provider = MockProvider::with_jobs(
            "alpha",
            vec![make_test_job("1", "alpha", "Rust Engineer", "Acme")],
        );
        let orchestrator = Orchestrator::new(
            vec![Box::new(provider) as Box<dyn JobProvider>],
            MockFetcher::new(""),
            FailingSink,
            RunOptions::default(),
        );
        let summary = orchestrator
            .run(&Criteria::new(""), CancellationToken::new())
            .await;

        assert!(summary.finished_at.is_some());
        assert_eq!(summary.jobs_new, 0);
        assert!(summary.error_summary.as_ref().unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn ai_disabled_and_over_cap_jobs_are_identical() {
        let jobs = vec![make_test_job("1", "alpha", "Rust Engineer", "Acme")];
        let sink_without = MemorySink::new();
        orchestrator(
            vec![Box::new(MockProvider::with_jobs("alpha", jobs.clone()))],
            sink_without.clone(),
        )
        .run(&Criteria::new(""), CancellationToken::new())
        .await;

        // AI on, but a zero-job cap: nothing may change.
        let options = RunOptions {
            ai: AiOptions {
                enabled: true,
                max_llm_jobs: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let llm = Arc::new(MockLlm::always(json!({"score": 99})));
        let sink_with = MemorySink::new();
        Orchestrator::new(
            vec![Box::new(MockProvider::with_jobs("alpha", jobs)) as Box<dyn JobProvider>],
            MockFetcher::new(""),
            sink_with.clone(),
            options,
        )
        .with_llm(llm.clone())
        .run(&Criteria::new(""), CancellationToken::new())
        .await;

        assert_eq!(llm.call_count(), 0);
        let a = &sink_without.all()[0].job;
        let b = &sink_with.all()[0].job;
        assert_eq!(serde_json::to_value(a).unwrap(), serde_json::to_value(b).unwrap());
    }

    #[tokio::test]
    async fn ai_ranking_lands_in_shadow_fields() {
        let job = make_test_job("1", "alpha", "Rust Engineer", "Acme");
        let llm = Arc::new(MockLlm::by_stage(vec![
            (
                "classify",
                json!({"remote_type": "remote", "confidence": 0.9}),
            ),
            ("rank", json!({"score": 87, "reasons": ["strong match"]})),
            ("enrich", json!({"summary": "Backend role."})),
            ("flags", json!({"flags": []})),
        ]));
        let options = RunOptions {
            ai: AiOptions {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let sink = MemorySink::new();
        Orchestrator::new(
            vec![Box::new(MockProvider::with_jobs("alpha", vec![job])) as Box<dyn JobProvider>],
            MockFetcher::new(""),
            sink.clone(),
            options,
        )
        .with_llm(llm)
        .run(&Criteria::new("rust"), CancellationToken::new())
        .await;

        let stored = sink.all();
        let ai = stored[0].job.ai.as_ref().unwrap();
        assert_eq!(ai.score, Some(87));
        assert_eq!(ai.reasons, vec!["strong match".to_string()]);
        assert_eq!(ai.summary.as_deref(), Some("Backend role."));
        assert_eq!(stored[0].job.remote_type, magpie_core::job::RemoteType::Remote);
    }

    #[tokio::test]
    async fn rerun_reuses_cached_ai_responses() {
        let job = make_test_job("1", "alpha", "Rust Engineer", "Acme");
        let llm = Arc::new(MockLlm::by_stage(vec![
            (
                "classify",
                json!({"remote_type": "remote", "confidence": 0.9}),
            ),
            ("rank", json!({"score": 87, "reasons": []})),
            ("enrich", json!({"summary": "Backend role."})),
            ("flags", json!({"flags": []})),
        ]));
        let options = RunOptions {
            ai: AiOptions {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(
            vec![Box::new(MockProvider::with_jobs("alpha", vec![job])) as Box<dyn JobProvider>],
            MockFetcher::new(""),
            MemorySink::new(),
            options,
        )
        .with_llm(llm.clone());

        orchestrator
            .run(&Criteria::new("rust"), CancellationToken::new())
            .await;
        let upstream_calls = llm.call_count();
        assert!(upstream_calls > 0);

        // Identical requests on a later run must hit the cache, not upstream.
        orchestrator
            .run(&Criteria::new("rust"), CancellationToken::new())
            .await;
        assert_eq!(llm.call_count(), upstream_calls);
    }

    #[tokio::test]
    async fn company_enrichment_fetches_signals_for_persisted_jobs() {
        let mut job = make_test_job("1", "alpha", "Rust Engineer", "Acme");
        job.company_website = Some("https://acme.example".to_string());

        let fetcher = MockFetcher::new(
            r#"<html><body><p>Contact us at jobs@acme.example</p>
               <a href="https://linkedin.com/company/acme">LinkedIn</a></body></html>"#,
        );
        let orchestrator = Orchestrator::new(
            vec![Box::new(MockProvider::with_jobs("alpha", vec![job])) as Box<dyn JobProvider>],
            fetcher,
            MemorySink::new(),
            RunOptions::default(),
        );
        let criteria = Criteria::new("").with_company_enrichment();
        let summary = orchestrator.run(&criteria, CancellationToken::new()).await;
        assert_eq!(summary.jobs_new, 1);

        let stored = orchestrator.sink.all();
        assert!(
            stored[0]
                .job
                .contact_emails
                .contains(&"jobs@acme.example".to_string())
        );
        assert!(
            stored[0]
                .job
                .company_social
                .iter()
                .any(|l| l.contains("linkedin.com"))
        );
    }
}
