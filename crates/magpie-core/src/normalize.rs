//! String and URL normalization shared by providers and the dedupe engine.

use std::collections::BTreeSet;

use url::Url;

/// Query parameters carrying tracking state, stripped during URL
/// canonicalization.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "ref",
    "source",
    "src",
];

/// Canonicalize a job URL for use as a dedupe key.
///
/// Lowercases scheme and host, drops default ports, removes tracking query
/// parameters and fragments, and trims the trailing slash. Returns the input
/// unchanged when it does not parse as a URL.
pub fn canonicalize_url(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query: String = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    // Url already lowercases scheme/host and hides default ports.
    let mut out = url.to_string();
    while out.ends_with('/') && out.len() > url.scheme().len() + 3 + host_len(&url) {
        out.pop();
    }
    out
}

fn host_len(url: &Url) -> usize {
    url.host_str().map(str::len).unwrap_or(0)
}

/// Legal suffixes dropped when normalizing company names for fuzzy matching.
const COMPANY_SUFFIXES: &[&str] = &[
    "inc", "llc", "ltd", "gmbh", "corp", "co", "sa", "srl", "ag", "bv", "plc", "limited",
    "incorporated", "company",
];

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_space = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Normalize a company name: [`normalize_text`] plus trailing legal-suffix
/// removal ("Acme Inc" and "Acme" compare equal).
pub fn normalize_company(s: &str) -> String {
    let norm = normalize_text(s);
    let mut tokens: Vec<&str> = norm.split_whitespace().collect();
    while let Some(last) = tokens.last() {
        if tokens.len() > 1 && COMPANY_SUFFIXES.contains(last) {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens.join(" ")
}

/// Token-set ratio in `[0, 1]` over two normalized strings.
///
/// Compares the sorted token intersection against each full sorted token set,
/// so word order and repeated words do not matter. Both inputs should already
/// be normalized.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let inter: Vec<&str> = ta.intersection(&tb).copied().collect();
    let joined_inter = inter.join(" ");
    let joined_a = ta.into_iter().collect::<Vec<_>>().join(" ");
    let joined_b = tb.into_iter().collect::<Vec<_>>().join(" ");

    let r1 = strsim::normalized_levenshtein(&joined_inter, &joined_a);
    let r2 = strsim::normalized_levenshtein(&joined_inter, &joined_b);
    let r3 = strsim::normalized_levenshtein(&joined_a, &joined_b);
    r1.max(r2).max(r3)
}

/// Best-effort split of a raw location string into (country, city).
///
/// Job boards report locations as "City, Country" or a bare region; anything
/// ambiguous maps to `None` rather than a guess.
pub fn derive_location(raw: &str) -> (Option<String>, Option<String>) {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("remote") || raw.eq_ignore_ascii_case("anywhere")
    {
        return (None, None);
    }
    let parts: Vec<&str> = raw.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        [] => (None, None),
        [only] => (Some((*only).to_string()), None),
        [city, .., country] => (Some((*country).to_string()), Some((*city).to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_url_strips_tracking_params() {
        assert_eq!(
            canonicalize_url("https://Example.com/jobs/123?utm_source=feed&utm_medium=rss"),
            "https://example.com/jobs/123"
        );
        assert_eq!(
            canonicalize_url("https://example.com/jobs/123?page=2&ref=homepage"),
            "https://example.com/jobs/123?page=2"
        );
    }

    #[test]
    fn canonical_url_trims_slash_and_fragment() {
        assert_eq!(
            canonicalize_url("https://example.com/jobs/123/#apply"),
            "https://example.com/jobs/123"
        );
    }

    #[test]
    fn canonical_url_passes_through_non_urls() {
        assert_eq!(canonicalize_url("not a url"), "not a url");
    }

    #[test]
    fn company_normalization_drops_legal_suffix() {
        assert_eq!(normalize_company("Acme Inc."), "acme");
        assert_eq!(normalize_company("Acme GmbH"), "acme");
        assert_eq!(normalize_company("ACME"), "acme");
        // A suffix that is the whole name is kept.
        assert_eq!(normalize_company("Limited"), "limited");
    }

    #[test]
    fn token_set_ratio_ignores_order_and_subsets() {
        let a = normalize_text("Senior Automation Engineer");
        let b = normalize_text("Automation Engineer, Senior");
        assert!(token_set_ratio(&a, &b) > 0.99);

        let c = normalize_text("Automation Engineer");
        assert!(token_set_ratio(&a, &c) > 0.6);

        let d = normalize_text("Head of Marketing");
        assert!(token_set_ratio(&a, &d) < 0.5);
    }

    #[test]
    fn location_derivation() {
        assert_eq!(
            derive_location("Berlin, Germany"),
            (Some("Germany".into()), Some("Berlin".into()))
        );
        assert_eq!(derive_location("Germany"), (Some("Germany".into()), None));
        assert_eq!(derive_location("Remote"), (None, None));
        assert_eq!(derive_location(""), (None, None));
    }
}
