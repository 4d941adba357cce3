//! Heuristic HTML extraction, used when a page carries no structured data.
//! Lower confidence than JSON-LD; tagged `"html"`.

use scraper::{Html, Selector};

use super::{ExtractedJob, plain_text};

/// Extract title/company/location from common markup patterns. Returns
/// `None` unless both a title and a company were found.
pub fn heuristic_extract(html: &str) -> Option<ExtractedJob> {
    let document = Html::parse_document(html);

    let title = meta_content(&document, r#"meta[property="og:title"]"#)
        .or_else(|| first_text(&document, "h1"))
        .or_else(|| first_text(&document, "title"))?;

    let company = meta_content(&document, r#"meta[property="og:site_name"]"#)
        .or_else(|| first_text(&document, r#"[itemprop="hiringOrganization"]"#))
        .or_else(|| first_text(&document, ".company, .company-name, [class*=\"companyName\"]"))?;

    let location = first_text(&document, r#"[itemprop="jobLocation"]"#)
        .or_else(|| first_text(&document, ".location, .job-location, [class*=\"jobLocation\"]"))
        .unwrap_or_default();

    let description = ["main", "article", r#"[class*="description"]"#, "body"]
        .iter()
        .find_map(|sel| first_html(&document, sel))
        .map(|fragment| plain_text(&fragment))
        .unwrap_or_default();

    Some(ExtractedJob {
        title,
        company,
        location,
        description,
        method: "html",
        ..Default::default()
    })
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn first_html(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next().map(|el| el.html())
}
