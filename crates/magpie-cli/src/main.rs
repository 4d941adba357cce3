use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use magpie_client::{DuckDuckGoSearch, OpenAiClient, ReqwestFetcher};
use magpie_core::criteria::Criteria;
use magpie_core::sink::MemorySink;
use magpie_core::throttle::{ThrottleConfig, ThrottledFetcher};
use magpie_pipeline::{AiOptions, Orchestrator, RunOptions};
use magpie_providers::ats::{AtsBoardProvider, AtsPlatform, parse_board_url};
use magpie_providers::registry;
use magpie_providers::JobProvider;

#[derive(Parser)]
#[command(name = "magpie", version, about = "Job posting aggregator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect, dedupe, and rank jobs across all sources
    Run {
        /// Free-text search query
        #[arg(short, long)]
        query: String,

        /// Location filter (case-insensitive substring; remote jobs always pass)
        #[arg(short, long)]
        location: Option<String>,

        /// Keep only fully remote jobs
        #[arg(long, default_value_t = false)]
        remote_only: bool,

        /// Keyword that must appear (repeatable)
        #[arg(long = "must")]
        must_keywords: Vec<String>,

        /// Keyword of which at least one must appear (repeatable)
        #[arg(long = "any")]
        any_keywords: Vec<String>,

        /// Cap on jobs collected per source
        #[arg(long, default_value_t = 100)]
        max_per_source: usize,

        /// Restrict to these provider names (repeatable)
        #[arg(long = "provider")]
        providers: Vec<String>,

        /// Also search the web for ATS-hosted boards matching the query
        #[arg(long, default_value_t = false)]
        discover: bool,

        /// Fetch company websites for contact and social signals
        #[arg(long, default_value_t = false)]
        enrich_companies: bool,

        /// Enable the AI stages (requires --api-key or MAGPIE_API_KEY)
        #[arg(long, default_value_t = false)]
        ai: bool,

        /// LLM model for the AI stages
        #[arg(long, env = "MAGPIE_MODEL", default_value = "gpt-4o-mini")]
        model: String,

        /// OpenAI-compatible API base URL
        #[arg(
            long,
            env = "MAGPIE_BASE_URL",
            default_value = "https://api.openai.com/v1"
        )]
        base_url: String,

        /// API key for the AI stages
        #[arg(long, env = "MAGPIE_API_KEY")]
        api_key: Option<String>,

        /// Cap on jobs receiving AI enrichment and ranking
        #[arg(long, default_value_t = 25)]
        max_ai_jobs: usize,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Write results here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the built-in providers
    Providers,

    /// Collect one ATS board by its careers-page URL
    Board {
        /// Board URL (Greenhouse, Lever, Ashby, Workable, Recruitee, or
        /// SmartRecruiters careers page)
        #[arg(short, long)]
        url: String,

        /// Cap on jobs collected
        #[arg(long, default_value_t = 100)]
        max_results: usize,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("magpie=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            query,
            location,
            remote_only,
            must_keywords,
            any_keywords,
            max_per_source,
            providers,
            discover,
            enrich_companies,
            ai,
            model,
            base_url,
            api_key,
            max_ai_jobs,
            format,
            output,
        } => {
            let mut criteria = Criteria::new(query)
                .with_must_keywords(must_keywords)
                .with_any_keywords(any_keywords)
                .with_max_results_per_source(max_per_source);
            if let Some(location) = location {
                criteria = criteria.with_location(location);
            }
            if remote_only {
                criteria = criteria.remote_only();
            }
            if enrich_companies {
                criteria = criteria.with_company_enrichment();
            }

            let allowlist = if providers.is_empty() {
                None
            } else {
                Some(providers)
            };
            cmd_run(
                criteria,
                allowlist,
                discover,
                ai,
                &model,
                &base_url,
                api_key.as_deref(),
                max_ai_jobs,
                format,
                output.as_deref(),
            )
            .await?;
        }
        Commands::Providers => {
            let fetcher = ReqwestFetcher::new().map_err(|e| anyhow::anyhow!(e))?;
            for provider in registry::default_providers(throttled(fetcher)) {
                println!("{}", provider.name());
            }
            println!("discovery (with --discover)");
        }
        Commands::Board {
            url,
            max_results,
            format,
        } => {
            cmd_board(&url, max_results, format).await?;
        }
    }

    Ok(())
}

fn throttled(fetcher: ReqwestFetcher) -> ThrottledFetcher<ReqwestFetcher> {
    ThrottledFetcher::new(
        fetcher,
        ThrottleConfig::new(Duration::from_secs(1)).with_jitter(Duration::from_millis(300)),
    )
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    criteria: Criteria,
    allowlist: Option<Vec<String>>,
    discover: bool,
    ai: bool,
    model: &str,
    base_url: &str,
    api_key: Option<&str>,
    max_ai_jobs: usize,
    format: OutputFormat,
    output: Option<&std::path::Path>,
) -> Result<()> {
    let fetcher = throttled(ReqwestFetcher::new().map_err(|e| anyhow::anyhow!(e))?);

    let mut providers = registry::default_providers(fetcher.clone());
    if discover {
        let search = Arc::new(DuckDuckGoSearch::new(fetcher.clone()));
        providers.push(registry::discovery_provider(fetcher.clone(), search));
    }

    let options = RunOptions {
        providers_allowlist: allowlist,
        ai: AiOptions {
            enabled: ai,
            max_llm_jobs: max_ai_jobs,
            ..Default::default()
        },
        ..Default::default()
    };

    let sink = MemorySink::new();
    let mut orchestrator = Orchestrator::new(providers, fetcher, sink.clone(), options);
    if ai {
        let api_key = api_key.context("AI stages need --api-key or MAGPIE_API_KEY")?;
        let client = OpenAiClient::with_base_url(api_key, model, base_url)
            .map_err(|e| anyhow::anyhow!(e))?;
        orchestrator = orchestrator.with_llm(Arc::new(client));
    }

    // Ctrl-C stops dispatching new work and finalizes the summary.
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing current work");
            cancel_on_signal.cancel();
        }
    });

    let summary = orchestrator.run(&criteria, cancel).await;

    let mut jobs: Vec<_> = sink.all().into_iter().map(|stored| stored.job).collect();
    jobs.sort_by(|a, b| {
        let score = |j: &magpie_core::job::NormalizedJob| {
            j.ai.as_ref().and_then(|ai| ai.score).unwrap_or(0)
        };
        score(b).cmp(&score(a)).then(b.posted_at.cmp(&a.posted_at))
    });

    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "summary": summary,
            "jobs": jobs,
        }))?,
        OutputFormat::Csv => render_csv(&jobs)?,
    };
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), jobs = jobs.len(), "results written");
        }
        None => println!("{rendered}"),
    }

    if let Some(error) = &summary.error_summary {
        anyhow::bail!("run completed with a fatal error: {error}");
    }
    Ok(())
}

async fn cmd_board(url: &str, max_results: usize, format: OutputFormat) -> Result<()> {
    let (platform, token) = parse_board_url(url)
        .with_context(|| format!("Not a recognized ATS board URL: {url}"))?;
    tracing::info!(platform = platform.slug(), token = %token, "collecting board");

    let fetcher = throttled(ReqwestFetcher::new().map_err(|e| anyhow::anyhow!(e))?);
    let provider = AtsBoardProvider::new(fetcher, platform, token);
    let criteria = Criteria::new("").with_max_results_per_source(max_results);
    let collected = provider
        .collect(&criteria)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(
        jobs = collected.jobs.len(),
        errors = collected.stats.errors,
        "board collected"
    );
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&collected.jobs)?,
        OutputFormat::Csv => render_csv(&collected.jobs)?,
    };
    println!("{rendered}");
    Ok(())
}

fn render_csv(jobs: &[magpie_core::job::NormalizedJob]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "title",
        "company",
        "location",
        "remote_type",
        "salary_min",
        "salary_max",
        "url",
        "posted_at",
        "source",
        "ai_score",
    ])?;
    for job in jobs {
        writer.write_record([
            job.title.as_str(),
            job.company.as_str(),
            job.location_raw.as_str(),
            match job.remote_type {
                magpie_core::job::RemoteType::Remote => "remote",
                magpie_core::job::RemoteType::Hybrid => "hybrid",
                magpie_core::job::RemoteType::Onsite => "onsite",
                magpie_core::job::RemoteType::Unknown => "unknown",
            },
            &job.salary_min.map(|v| v.to_string()).unwrap_or_default(),
            &job.salary_max.map(|v| v.to_string()).unwrap_or_default(),
            job.job_url.as_str(),
            &job.posted_at.map(|d| d.to_rfc3339()).unwrap_or_default(),
            job.source.as_str(),
            &job.ai
                .as_ref()
                .and_then(|ai| ai.score)
                .map(|s| s.to_string())
                .unwrap_or_default(),
        ])?;
    }
    let bytes = writer.into_inner().context("CSV writer flush failed")?;
    Ok(String::from_utf8(bytes).context("CSV output was not UTF-8")?)
}
