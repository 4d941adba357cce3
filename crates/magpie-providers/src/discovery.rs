//! Discovery provider: web search for ATS-hosted career boards.

use std::sync::Arc;

use async_trait::async_trait;
use magpie_core::criteria::Criteria;
use magpie_core::error::AppError;
use magpie_core::traits::{Fetcher, SearchClient};
use tracing::{debug, info};

use crate::ats::{AtsBoardProvider, AtsPlatform, parse_board_url};
use crate::{Collected, JobProvider};

const SOURCE: &str = "discovery";

/// Finds ATS boards matching the criteria query via bounded web search,
/// then collects each board like an ad-hoc [`AtsBoardProvider`].
///
/// Both ends are capped: at most `max_search_results` hits are inspected
/// and at most `max_discovered_ats_tokens` boards are collected. Per-board
/// failures accumulate in this provider's own stats instead of aborting
/// the remaining boards.
pub struct DiscoveryProvider<F> {
    fetcher: F,
    search: Arc<dyn SearchClient>,
}

impl<F: Fetcher> DiscoveryProvider<F> {
    pub fn new(fetcher: F, search: Arc<dyn SearchClient>) -> Self {
        Self { fetcher, search }
    }
}

#[async_trait]
impl<F: Fetcher + 'static> JobProvider for DiscoveryProvider<F> {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn collect(&self, criteria: &Criteria) -> Result<Collected, AppError> {
        let query = format!(
            "{} (site:boards.greenhouse.io OR site:jobs.lever.co OR site:jobs.ashbyhq.com OR site:apply.workable.com)",
            criteria.query
        );
        let hits = self
            .search
            .search(&query, criteria.max_search_results)
            .await?;

        let boards = board_tokens(
            hits.iter().map(|h| h.url.as_str()),
            criteria.max_discovered_ats_tokens,
        );
        info!(
            hits = hits.len(),
            boards = boards.len(),
            "discovery search finished"
        );

        let mut collected = Collected::default();
        for (platform, token) in boards {
            if collected.jobs.len() >= criteria.max_results_per_source {
                break;
            }
            let board = AtsBoardProvider::new(self.fetcher.clone(), platform, token);
            match board.collect(criteria).await {
                Ok(mut board_collected) => {
                    let room = criteria.max_results_per_source - collected.jobs.len();
                    board_collected.jobs.truncate(room);
                    debug!(
                        board = board.name(),
                        jobs = board_collected.jobs.len(),
                        "discovered board collected"
                    );
                    collected.jobs.extend(board_collected.jobs);
                    collected.stats.merge_errors(board_collected.stats);
                }
                Err(e) => collected
                    .stats
                    .record_error(format!("{}: {e}", board.name())),
            }
        }
        collected.stats.jobs_collected = collected.jobs.len();
        Ok(collected)
    }
}

/// Unique `(platform, token)` pairs from hit URLs, in first-seen order,
/// capped at `max_tokens`.
fn board_tokens<'a>(
    urls: impl Iterator<Item = &'a str>,
    max_tokens: usize,
) -> Vec<(AtsPlatform, String)> {
    let mut boards: Vec<(AtsPlatform, String)> = Vec::new();
    for url in urls {
        if boards.len() >= max_tokens {
            break;
        }
        if let Some(board) = parse_board_url(url)
            && !boards.contains(&board)
        {
            boards.push(board);
        }
    }
    boards
}
