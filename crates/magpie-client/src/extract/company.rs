//! Company-page signal extraction for enrichment.
//!
//! Given a company website root, pull contact emails and social profile
//! links with a hard budget of two page fetches, plus a bounded text
//! snippet reused later by AI company research (which never browses).

use std::sync::LazyLock;

use magpie_core::error::AppError;
use magpie_core::traits::Fetcher;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use super::plain_text;

/// Max characters of page text kept for AI company research.
const SNIPPET_LIMIT: usize = 2000;

const SOCIAL_HOSTS: &[&str] = &[
    "linkedin.com",
    "twitter.com",
    "x.com",
    "github.com",
];

#[derive(Debug, Clone, Default)]
pub struct CompanySignals {
    pub emails: Vec<String>,
    pub social_links: Vec<String>,
    /// Canonical domain of the website root.
    pub domain: Option<String>,
    /// Bounded plain-text snippet of the pages fetched.
    pub text_snippet: String,
}

impl CompanySignals {
    fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.social_links.is_empty()
    }
}

/// Collect signals from a company website. Fetches the root page, and one
/// contact/about page only when the root yielded nothing.
pub async fn company_signals<F: Fetcher>(
    fetcher: &F,
    website: &str,
) -> Result<CompanySignals, AppError> {
    let mut signals = CompanySignals {
        domain: Url::parse(website)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string())),
        ..Default::default()
    };

    let root = fetcher.fetch(website).await?;
    harvest(&root.body, &mut signals);

    if signals.is_empty()
        && let Some(next) = contact_link(&root.body, website)
    {
        match fetcher.fetch(&next).await {
            Ok(page) => harvest(&page.body, &mut signals),
            Err(e) => {
                tracing::debug!(url = %next, error = %e, "Contact page fetch failed");
            }
        }
    }

    Ok(signals)
}

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid literal regex")
});

fn harvest(html: &str, signals: &mut CompanySignals) {
    for m in EMAIL_RE.find_iter(html) {
        let email = m.as_str().to_lowercase();
        // Asset filenames match the pattern too (logo@2x.png).
        if email.ends_with(".png") || email.ends_with(".jpg") || email.ends_with(".svg") {
            continue;
        }
        if !signals.emails.contains(&email) {
            signals.emails.push(email);
        }
    }

    let document = Html::parse_document(html);
    if let Ok(selector) = Selector::parse("a[href]") {
        for link in document.select(&selector) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            if let Ok(url) = Url::parse(href)
                && let Some(host) = url.host_str()
            {
                let host = host.trim_start_matches("www.");
                if SOCIAL_HOSTS.iter().any(|s| host == *s)
                    && !signals.social_links.contains(&href.to_string())
                {
                    signals.social_links.push(href.to_string());
                }
            }
        }
    }

    if signals.text_snippet.len() < SNIPPET_LIMIT {
        let text = plain_text(html);
        let remaining = SNIPPET_LIMIT - signals.text_snippet.len();
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < remaining)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        signals.text_snippet.push_str(&text[..cut]);
    }
}

/// First on-site link that looks like a contact or about page.
fn contact_link(html: &str, base: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").ok()?;

    for link in document.select(&selector) {
        let href = link.value().attr("href")?;
        let lower = href.to_lowercase();
        if lower.contains("contact") || lower.contains("about") {
            if let Ok(resolved) = base.join(href)
                && resolved.host_str() == base.host_str()
            {
                return Some(resolved.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_core::testutil::MockFetcher;

    #[tokio::test]
    async fn harvests_emails_and_social_links_from_root() {
        let fetcher = MockFetcher::new(
            r#"<html><body>
            <a href="https://linkedin.com/company/acme">LinkedIn</a>
            <a href="https://github.com/acme">GitHub</a>
            <p>Reach us at jobs@acme.com or Jobs@Acme.com</p>
            <img src="logo@2x.png"/>
            </body></html>"#,
        );

        let signals = company_signals(&fetcher, "https://www.acme.com").await.unwrap();
        assert_eq!(signals.emails, vec!["jobs@acme.com"]);
        assert_eq!(signals.social_links.len(), 2);
        assert_eq!(signals.domain.as_deref(), Some("acme.com"));
        assert_eq!(fetcher.request_count(), 1, "root page was enough");
    }

    #[tokio::test]
    async fn falls_back_to_contact_page_within_budget() {
        let fetcher = MockFetcher::with_responses(vec![Ok(
            magpie_core::traits::FetchResponse::ok(
                "https://acme.com",
                r#"<html><body><a href="/contact">Contact us</a></body></html>"#,
            ),
        )])
        .route("/contact", r#"<p>mail: hello@acme.com</p>"#);

        let signals = company_signals(&fetcher, "https://acme.com").await.unwrap();
        assert_eq!(signals.emails, vec!["hello@acme.com"]);
        assert_eq!(fetcher.request_count(), 2, "at most two fetches");
    }

    #[tokio::test]
    async fn snippet_is_bounded() {
        let big = format!("<html><body><p>{}</p></body></html>", "word ".repeat(2000));
        let fetcher = MockFetcher::new(&big);
        let signals = company_signals(&fetcher, "https://acme.com").await.unwrap();
        assert!(signals.text_snippet.len() <= SNIPPET_LIMIT);
        assert!(!signals.text_snippet.is_empty());
    }
}
