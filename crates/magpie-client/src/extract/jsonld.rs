//! JSON-LD `JobPosting` parsing (schema.org), the highest-confidence
//! extraction strategy.

use chrono::{DateTime, NaiveDate, Utc};
use scraper::{Html, Selector};
use serde_json::Value;

use super::{ExtractedJob, plain_text};

/// Find the first schema.org `JobPosting` in any `ld+json` script block.
/// Accepts top-level objects, arrays, and `@graph` containers.
pub fn parse_jsonld(html: &str) -> Option<ExtractedJob> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;

    for script in document.select(&selector) {
        let raw = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        for candidate in candidates(&value) {
            if is_job_posting(candidate) {
                return Some(map_posting(candidate));
            }
        }
    }
    None
}

fn candidates(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("@graph") {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => vec![value],
        },
        _ => Vec::new(),
    }
}

fn is_job_posting(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(s)) => s == "JobPosting",
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("JobPosting")),
        _ => false,
    }
}

fn map_posting(posting: &Value) -> ExtractedJob {
    let mut job = ExtractedJob {
        method: "jsonld",
        ..Default::default()
    };

    job.title = str_field(posting, "title").unwrap_or_default();

    job.company = match posting.get("hiringOrganization") {
        Some(Value::String(name)) => name.clone(),
        Some(org) => str_field(org, "name").unwrap_or_default(),
        None => String::new(),
    };

    job.location = location_text(posting.get("jobLocation"));
    if str_field(posting, "jobLocationType").as_deref() == Some("TELECOMMUTE") {
        job.remote_hint = Some("remote".to_string());
    }

    match posting.get("employmentType") {
        Some(Value::String(s)) => job.employment_types.push(s.clone()),
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(s) = item.as_str() {
                    job.employment_types.push(s.to_string());
                }
            }
        }
        _ => {}
    }

    if let Some(salary) = posting.get("baseSalary") {
        job.salary_currency = str_field(salary, "currency");
        let value = salary.get("value").unwrap_or(salary);
        job.salary_min = num_field(value, "minValue").or_else(|| num_field(value, "value"));
        job.salary_max = num_field(value, "maxValue").or_else(|| num_field(value, "value"));
    }

    job.posted_at = str_field(posting, "datePosted").as_deref().and_then(parse_date);
    job.expires_at = str_field(posting, "validThrough").as_deref().and_then(parse_date);

    job.apply_url = str_field(posting, "url").or_else(|| match posting.get("directApply") {
        Some(Value::String(url)) => Some(url.clone()),
        _ => None,
    });

    if let Some(description) = str_field(posting, "description") {
        job.description = plain_text(&description);
    }

    job
}

fn location_text(location: Option<&Value>) -> String {
    let Some(location) = location else {
        return String::new();
    };
    let place = match location {
        Value::Array(items) => match items.first() {
            Some(item) => item,
            None => return String::new(),
        },
        other => other,
    };

    if let Some(address) = place.get("address") {
        if let Some(s) = address.as_str() {
            return s.to_string();
        }
        let parts: Vec<String> = ["addressLocality", "addressRegion", "addressCountry"]
            .iter()
            .filter_map(|k| str_field(address, k))
            .collect();
        return parts.join(", ");
    }
    str_field(place, "name").unwrap_or_default()
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        // addressCountry may itself be a {"@type": "Country", "name": ...}.
        Some(obj @ Value::Object(_)) => str_field(obj, "name"),
        _ => None,
    }
}

fn num_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_f64().map(|f| f as i64),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}
