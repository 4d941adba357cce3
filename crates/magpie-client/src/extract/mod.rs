//! Extraction strategies for job pages.
//!
//! [`extract_job`] tries strategies in decreasing confidence order: JSON-LD
//! `JobPosting` structured data first, then heuristic HTML patterns. A
//! strategy that finds nothing is not an error; only exhausting all of them
//! is. Plain-text reduction and feed parsing are separate entry points used
//! directly by providers.

mod company;
mod feed;
mod html;
mod jsonld;

pub use company::{CompanySignals, company_signals};
pub use feed::{FeedItem, parse_feed};

use chrono::{DateTime, Utc};
use htmd::HtmlToMarkdown;
use magpie_core::error::AppError;
use scraper::Html;

/// Fields pulled out of one job page, before normalization into a
/// `NormalizedJob`. `method` tags which strategy produced it.
#[derive(Debug, Clone, Default)]
pub struct ExtractedJob {
    pub title: String,
    pub company: String,
    pub location: String,
    pub remote_hint: Option<String>,
    pub employment_types: Vec<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_currency: Option<String>,
    pub apply_url: Option<String>,
    pub description: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub method: &'static str,
}

/// Extract job fields from a fetched page.
pub fn extract_job(html: &str) -> Result<ExtractedJob, AppError> {
    if let Some(job) = jsonld::parse_jsonld(html) {
        return Ok(job);
    }
    if let Some(job) = html::heuristic_extract(html) {
        return Ok(job);
    }
    Err(AppError::Extract(
        "no JSON-LD JobPosting and no recognizable HTML markup".into(),
    ))
}

/// Reduce HTML to plain text for description storage.
///
/// Converts through htmd with boilerplate tags skipped; if conversion fails,
/// falls back to concatenated DOM text nodes.
pub fn plain_text(html: &str) -> String {
    let converter = HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
        ])
        .build();

    match converter.convert(html) {
        Ok(markdown) => collapse_whitespace(&markdown),
        Err(_) => {
            let document = Html::parse_document(html);
            collapse_whitespace(&document.root_element().text().collect::<String>())
        }
    }
}

/// Visible text length, used by the render-fallback heuristic to spot
/// JavaScript-only pages.
pub fn visible_text_len(html: &str) -> usize {
    plain_text(html).len()
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut blank = false;
    for line in s.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !blank && !out.is_empty() {
                out.push('\n');
            }
            blank = true;
        } else {
            out.push_str(line);
            out.push('\n');
            blank = false;
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonld_wins_over_heuristic_html() {
        let html = r#"<html><head>
            <title>Careers page title</title>
            <script type="application/ld+json">
            {"@type": "JobPosting", "title": "Backend Engineer",
             "hiringOrganization": {"name": "Acme"}}
            </script>
            </head><body><h1>A different heading</h1></body></html>"#;

        let job = extract_job(html).unwrap();
        assert_eq!(job.method, "jsonld");
        assert_eq!(job.title, "Backend Engineer");
        assert_eq!(job.company, "Acme");
    }

    #[test]
    fn falls_back_to_heuristic_html() {
        let html = r#"<html><head><meta property="og:title" content="Data Engineer"/>
            <meta property="og:site_name" content="Globex"/></head>
            <body><h1>Data Engineer</h1><p>Build pipelines.</p></body></html>"#;

        let job = extract_job(html).unwrap();
        assert_eq!(job.method, "html");
        assert_eq!(job.title, "Data Engineer");
        assert_eq!(job.company, "Globex");
    }

    #[test]
    fn unextractable_page_is_an_error() {
        let err = extract_job("<html><body><p>nothing here</p></body></html>").unwrap_err();
        assert!(matches!(err, AppError::Extract(_)));
    }

    #[test]
    fn plain_text_strips_boilerplate() {
        let text = plain_text(
            "<html><body><nav>menu</nav><p>Real content</p><script>x()</script></body></html>",
        );
        assert!(text.contains("Real content"));
        assert!(!text.contains("menu"));
        assert!(!text.contains("x()"));
    }
}
