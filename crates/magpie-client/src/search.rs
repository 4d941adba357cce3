//! Web search used by the discovery provider.

use async_trait::async_trait;
use magpie_core::error::AppError;
use magpie_core::traits::{Fetcher, SearchClient, SearchHit};
use scraper::{Html, Selector};
use url::Url;

/// Search backend scraping the DuckDuckGo HTML endpoint.
///
/// Keyless and tolerant of low request volumes, which suits discovery's
/// bounded usage. Result links are redirect URLs carrying the target in a
/// `uddg` query parameter.
#[derive(Clone)]
pub struct DuckDuckGoSearch<F> {
    fetcher: F,
}

impl<F: Fetcher> DuckDuckGoSearch<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl<F: Fetcher + 'static> SearchClient for DuckDuckGoSearch<F> {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AppError> {
        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            urlencode(query)
        );
        let response = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|e| AppError::Search(e.to_string()))?;

        Ok(parse_results(&response.body, max_results))
    }
}

fn parse_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a.result__a") else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for link in document.select(&selector) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Some(target) = resolve_redirect(href) else {
            continue;
        };
        hits.push(SearchHit {
            url: target,
            title: link.text().collect::<String>().trim().to_string(),
        });
        if hits.len() >= max_results {
            break;
        }
    }
    hits
}

/// Unwrap `//duckduckgo.com/l/?uddg=<encoded>` redirects; direct links pass
/// through unchanged.
fn resolve_redirect(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;

    if url.path().starts_with("/l/") {
        return url
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned());
    }
    Some(absolute)
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_core::testutil::MockFetcher;

    const RESULTS_PAGE: &str = r#"<html><body>
        <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fboards.greenhouse.io%2Facme&amp;rut=x">Acme jobs</a>
        <a class="result__a" href="https://jobs.lever.co/globex">Globex careers</a>
        <a class="other" href="https://ads.example.com">ad</a>
        </body></html>"#;

    #[tokio::test]
    async fn parses_and_unwraps_results() {
        let search = DuckDuckGoSearch::new(MockFetcher::new(RESULTS_PAGE));
        let hits = search.search("acme careers", 10).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://boards.greenhouse.io/acme");
        assert_eq!(hits[0].title, "Acme jobs");
        assert_eq!(hits[1].url, "https://jobs.lever.co/globex");
    }

    #[tokio::test]
    async fn respects_max_results() {
        let search = DuckDuckGoSearch::new(MockFetcher::new(RESULTS_PAGE));
        let hits = search.search("acme careers", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_maps_to_search_error() {
        let search = DuckDuckGoSearch::new(MockFetcher::with_error(AppError::Network(
            "offline".into(),
        )));
        let err = search.search("acme", 5).await.unwrap_err();
        assert!(matches!(err, AppError::Search(_)));
    }
}
