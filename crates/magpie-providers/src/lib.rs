//! Job source providers.
//!
//! Each provider turns one external source (JSON API, RSS feed, ATS board,
//! or scraped careers page) into [`NormalizedJob`] records. Row-level
//! failures are recorded in the provider's own [`ProviderStats`]; only
//! wholesale failure (endpoint unreachable, malformed envelope) returns
//! `Err`, which the orchestrator folds into a zero-job source report.

pub mod arbeitnow;
pub mod ats;
pub mod discovery;
pub mod page;
pub mod registry;
pub mod remoteok;
pub mod remotive;
pub mod testutil;
pub mod weworkremotely;

use async_trait::async_trait;
use magpie_core::criteria::Criteria;
use magpie_core::error::AppError;
use magpie_core::job::NormalizedJob;
use magpie_core::stats::ProviderStats;

pub use ats::{AtsBoardProvider, AtsPlatform, parse_board_url};
pub use discovery::DiscoveryProvider;
pub use page::PageScrapeProvider;
pub use registry::default_providers;

/// Result of one provider collection call.
#[derive(Debug, Default)]
pub struct Collected {
    pub jobs: Vec<NormalizedJob>,
    pub stats: ProviderStats,
}

/// A source of job postings.
#[async_trait]
pub trait JobProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn collect(&self, criteria: &Criteria) -> Result<Collected, AppError>;
}

/// Case-insensitive client-side query match for APIs without a search
/// parameter: every whitespace token of `query` must appear in `haystack`.
/// An empty query matches everything.
pub(crate) fn query_matches(haystack: &str, query: &str) -> bool {
    let haystack = haystack.to_lowercase();
    query
        .split_whitespace()
        .all(|token| haystack.contains(&token.to_lowercase()))
}
