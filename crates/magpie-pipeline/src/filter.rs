//! Criteria filtering between collection and dedupe.

use magpie_core::criteria::Criteria;
use magpie_core::job::{NormalizedJob, RemoteType};
use tracing::debug;

/// Apply the criteria to a candidate list. Returns the surviving jobs and
/// the number dropped.
pub fn filter_jobs(jobs: Vec<NormalizedJob>, criteria: &Criteria) -> (Vec<NormalizedJob>, usize) {
    let before = jobs.len();
    let kept: Vec<NormalizedJob> = jobs
        .into_iter()
        .filter(|job| keep(job, criteria))
        .collect();
    let dropped = before - kept.len();
    debug!(kept = kept.len(), dropped, "filter pass finished");
    (kept, dropped)
}

fn keep(job: &NormalizedJob, criteria: &Criteria) -> bool {
    if !job.is_valid() {
        return false;
    }
    if criteria.remote_only && job.remote_type != RemoteType::Remote {
        return false;
    }

    let haystack = format!(
        "{} {} {}",
        job.title,
        job.description_text,
        job.tags.join(" ")
    )
    .to_lowercase();

    if !criteria
        .must_keywords
        .iter()
        .all(|kw| haystack.contains(&kw.to_lowercase()))
    {
        return false;
    }
    if !criteria.any_keywords.is_empty()
        && !criteria
            .any_keywords
            .iter()
            .any(|kw| haystack.contains(&kw.to_lowercase()))
    {
        return false;
    }

    // Remote jobs pass any location filter; a record that can be done from
    // anywhere is never excluded by where it is nominally based.
    if let Some(location) = &criteria.location
        && job.remote_type != RemoteType::Remote
    {
        let needle = location.to_lowercase();
        let fields = [
            job.location_raw.as_str(),
            job.country.as_deref().unwrap_or(""),
            job.city.as_deref().unwrap_or(""),
        ];
        if !fields.iter().any(|f| f.to_lowercase().contains(&needle)) {
            return false;
        }
    }
    true
}
