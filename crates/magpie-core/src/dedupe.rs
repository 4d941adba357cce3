//! Multi-stage duplicate collapsing across sources.
//!
//! Matching runs in strictly increasing cost order per candidate: exact
//! identity, canonical URL, then fuzzy title+company similarity. Scores in a
//! narrow band below the accept threshold become [`UncertainPair`]s for
//! optional AI arbitration; everything else in the band is conservatively
//! treated as distinct.
//!
//! The engine is pure and synchronous. Candidates are pre-sorted by
//! `(source, provider_id)` so the outcome does not depend on the order in
//! which providers completed.

use std::collections::HashMap;

use serde::Serialize;

use crate::job::NormalizedJob;
use crate::normalize::{normalize_company, normalize_text, token_set_ratio};

/// Tunable thresholds for the fuzzy stage.
#[derive(Debug, Clone)]
pub struct DedupeConfig {
    /// Combined similarity at or above this merges outright.
    pub accept_threshold: f64,
    /// Scores in `[uncertain_threshold, accept_threshold)` are escalated to
    /// arbitration instead of being merged or rejected.
    pub uncertain_threshold: f64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.90,
            uncertain_threshold: 0.82,
        }
    }
}

/// Why two records were considered the same job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSignal {
    ExactId,
    CanonicalUrl,
    Fuzzy(f64),
    AiVerdict,
}

/// A collapsed set of duplicate records. `signal` is the signal of the first
/// merge that formed the group.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub survivor_key: String,
    pub member_keys: Vec<String>,
    pub signal: MatchSignal,
}

/// Two records too similar to dismiss but not similar enough to merge.
#[derive(Debug, Clone, Serialize)]
pub struct UncertainPair {
    pub left_key: String,
    pub right_key: String,
    pub score: f64,
}

/// Result of one dedupe pass.
pub struct DedupeOutcome {
    pub survivors: Vec<NormalizedJob>,
    /// Groups with more than one member.
    pub groups: Vec<DuplicateGroup>,
    pub uncertain: Vec<UncertainPair>,
    pub duplicates_merged: usize,
    /// Every input job key, mapped to its survivor's position.
    key_to_survivor: HashMap<String, usize>,
}

struct GroupBuild {
    members: Vec<NormalizedJob>,
    first_signal: Option<MatchSignal>,
}

/// Collapse duplicates in one candidate list.
pub fn dedupe(mut candidates: Vec<NormalizedJob>, config: &DedupeConfig) -> DedupeOutcome {
    candidates.sort_by(|a, b| {
        (a.source.as_str(), a.provider_id.as_str())
            .cmp(&(b.source.as_str(), b.provider_id.as_str()))
    });

    let mut groups: Vec<GroupBuild> = Vec::new();
    let mut uncertain: Vec<UncertainPair> = Vec::new();

    for candidate in candidates {
        match find_match(&groups, &candidate, config) {
            Match::Merge(idx, signal) => {
                let group = &mut groups[idx];
                if group.first_signal.is_none() {
                    group.first_signal = Some(signal);
                }
                tracing::debug!(
                    key = %candidate.job_key(),
                    ?signal,
                    "Merging duplicate candidate"
                );
                group.members.push(candidate);
            }
            Match::Uncertain(idx, score) => {
                uncertain.push(UncertainPair {
                    left_key: groups[idx].members[0].job_key(),
                    right_key: candidate.job_key(),
                    score,
                });
                groups.push(GroupBuild {
                    members: vec![candidate],
                    first_signal: None,
                });
            }
            Match::None => {
                groups.push(GroupBuild {
                    members: vec![candidate],
                    first_signal: None,
                });
            }
        }
    }

    let mut survivors = Vec::with_capacity(groups.len());
    let mut out_groups = Vec::new();
    let mut key_to_survivor = HashMap::new();
    let mut duplicates_merged = 0;

    for group in groups {
        let member_keys: Vec<String> = group.members.iter().map(|m| m.job_key()).collect();
        let merged = merge_members(group.members);
        let idx = survivors.len();
        for key in &member_keys {
            key_to_survivor.insert(key.clone(), idx);
        }
        if member_keys.len() > 1 {
            duplicates_merged += member_keys.len() - 1;
            out_groups.push(DuplicateGroup {
                survivor_key: merged.job_key(),
                member_keys,
                signal: group.first_signal.unwrap_or(MatchSignal::ExactId),
            });
        }
        survivors.push(merged);
    }

    DedupeOutcome {
        survivors,
        groups: out_groups,
        uncertain,
        duplicates_merged,
        key_to_survivor,
    }
}

enum Match {
    Merge(usize, MatchSignal),
    Uncertain(usize, f64),
    None,
}

fn find_match(groups: &[GroupBuild], candidate: &NormalizedJob, config: &DedupeConfig) -> Match {
    // Stage 1: exact (provider_id, source) identity.
    for (idx, group) in groups.iter().enumerate() {
        if group.members.iter().any(|m| {
            m.provider_id == candidate.provider_id && m.source == candidate.source
        }) {
            return Match::Merge(idx, MatchSignal::ExactId);
        }
    }

    // Stage 2: canonical URL equality.
    if !candidate.job_url_canonical.is_empty() {
        for (idx, group) in groups.iter().enumerate() {
            if group
                .members
                .iter()
                .any(|m| m.job_url_canonical == candidate.job_url_canonical)
            {
                return Match::Merge(idx, MatchSignal::CanonicalUrl);
            }
        }
    }

    // Stage 3: fuzzy title + company similarity against every member, so
    // URL-chains and fuzzy-chains collapse transitively.
    let mut best: Option<(usize, f64)> = None;
    for (idx, group) in groups.iter().enumerate() {
        for member in &group.members {
            let score = similarity(member, candidate);
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((idx, score));
            }
        }
    }

    match best {
        Some((idx, score)) if score >= config.accept_threshold => {
            Match::Merge(idx, MatchSignal::Fuzzy(score))
        }
        Some((idx, score)) if score >= config.uncertain_threshold => {
            Match::Uncertain(idx, score)
        }
        _ => Match::None,
    }
}

/// Combined similarity: title weighted 0.6, company 0.4.
pub fn similarity(a: &NormalizedJob, b: &NormalizedJob) -> f64 {
    let title = token_set_ratio(&normalize_text(&a.title), &normalize_text(&b.title));
    let company = token_set_ratio(&normalize_company(&a.company), &normalize_company(&b.company));
    0.6 * title + 0.4 * company
}

/// Weighted count of populated fields; the merge survivor is the most
/// complete member.
fn completeness(job: &NormalizedJob) -> f64 {
    let mut score = 0.0;
    if !job.description_text.is_empty() {
        score += 2.0;
        if job.description_text.len() > 200 {
            score += 1.0;
        }
    }
    if job.salary_min.is_some() || job.salary_max.is_some() {
        score += 1.5;
    }
    if job.posted_at.is_some() {
        score += 1.0;
    }
    if job.apply_url.is_some() {
        score += 0.5;
    }
    if !job.location_raw.is_empty() {
        score += 0.5;
    }
    if !job.tags.is_empty() {
        score += 0.5;
    }
    if !job.employment_types.is_empty() {
        score += 0.5;
    }
    if job.company_website.is_some() {
        score += 0.5;
    }
    if !job.contact_emails.is_empty() {
        score += 0.5;
    }
    score
}

/// Merge a group into a canonical survivor.
///
/// The most complete member wins (earliest `first_seen_at` breaks ties);
/// losing members fill the survivor's empty fields in completeness order.
/// `first_seen_at` is always the minimum across members, and tag/email/social
/// lists are unioned.
fn merge_members(mut members: Vec<NormalizedJob>) -> NormalizedJob {
    if members.len() == 1
        && let Some(only) = members.pop()
    {
        return only;
    }

    members.sort_by(|a, b| {
        completeness(b)
            .partial_cmp(&completeness(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.first_seen_at.cmp(&b.first_seen_at))
            .then((a.source.as_str(), a.provider_id.as_str()).cmp(&(
                b.source.as_str(),
                b.provider_id.as_str(),
            )))
    });

    let first_seen = members
        .iter()
        .map(|m| m.first_seen_at)
        .min()
        .unwrap_or_else(chrono::Utc::now);

    let mut survivor = members.remove(0);
    for other in members {
        fill_missing(&mut survivor, other);
    }
    survivor.first_seen_at = first_seen;
    survivor
}

fn fill_missing(survivor: &mut NormalizedJob, other: NormalizedJob) {
    if survivor.description_text.is_empty() {
        survivor.description_text = other.description_text;
    }
    if survivor.location_raw.is_empty() {
        survivor.location_raw = other.location_raw;
        survivor.country = other.country;
        survivor.city = other.city;
    }
    if survivor.salary_min.is_none() && survivor.salary_max.is_none() {
        survivor.salary_min = other.salary_min;
        survivor.salary_max = other.salary_max;
        survivor.salary_currency = other.salary_currency;
    }
    if survivor.apply_url.is_none() {
        survivor.apply_url = other.apply_url;
    }
    if survivor.posted_at.is_none() {
        survivor.posted_at = other.posted_at;
    }
    if survivor.expires_at.is_none() {
        survivor.expires_at = other.expires_at;
    }
    if survivor.company_website.is_none() {
        survivor.company_website = other.company_website;
    }
    if survivor.remote_type == crate::job::RemoteType::Unknown {
        survivor.remote_type = other.remote_type;
    }
    if survivor.employment_types.is_empty() {
        survivor.employment_types = other.employment_types;
    }
    for tag in other.tags {
        if !survivor.tags.contains(&tag) {
            survivor.tags.push(tag);
        }
    }
    for email in other.contact_emails {
        if !survivor.contact_emails.contains(&email) {
            survivor.contact_emails.push(email);
        }
    }
    for link in other.company_social {
        if !survivor.company_social.contains(&link) {
            survivor.company_social.push(link);
        }
    }
}

impl DedupeOutcome {
    /// Survivor record for any input job key, including keys of members
    /// that were merged away. [`UncertainPair`] keys come from group
    /// members, so arbitration must resolve them through this lookup.
    pub fn survivor_for(&self, key: &str) -> Option<&NormalizedJob> {
        self.key_to_survivor
            .get(key)
            .and_then(|&idx| self.survivors.get(idx))
    }

    /// Merge survivor pairs that AI arbitration confirmed as the same job.
    ///
    /// Each pair names two job keys from the original candidate list. Pairs
    /// whose keys already share a survivor are no-ops, so verdicts compose
    /// transitively.
    pub fn apply_verdicts(&mut self, confirmed: &[(String, String)]) {
        for (left, right) in confirmed {
            let (Some(&li), Some(&ri)) = (
                self.key_to_survivor.get(left),
                self.key_to_survivor.get(right),
            ) else {
                continue;
            };
            if li == ri {
                continue;
            }
            let (keep, drop) = if li < ri { (li, ri) } else { (ri, li) };

            let removed = self.survivors.remove(drop);
            let kept = self.survivors.remove(keep);
            let removed_key = removed.job_key();
            let kept_key = kept.job_key();
            let merged = merge_members(vec![kept, removed]);
            self.survivors.insert(keep, merged);

            self.groups.push(DuplicateGroup {
                survivor_key: self.survivors[keep].job_key(),
                member_keys: vec![kept_key, removed_key],
                signal: MatchSignal::AiVerdict,
            });
            self.duplicates_merged += 1;

            for idx in self.key_to_survivor.values_mut() {
                if *idx == drop {
                    *idx = keep;
                } else if *idx > drop {
                    *idx -= 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NormalizedJob;
    use crate::normalize::canonicalize_url;

    fn job(provider_id: &str, source: &str, title: &str, company: &str) -> NormalizedJob {
        let mut j = NormalizedJob::new(provider_id, source);
        j.title = title.into();
        j.company = company.into();
        j
    }

    fn with_url(mut j: NormalizedJob, url: &str) -> NormalizedJob {
        j.job_url = url.into();
        j.job_url_canonical = canonicalize_url(url);
        j
    }

    #[test]
    fn exact_identity_collapses_recollection() {
        let a = job("123", "remotive", "Engineer", "Acme");
        let b = job("123", "remotive", "Engineer (updated)", "Acme");

        let outcome = dedupe(vec![a, b], &DedupeConfig::default());
        assert_eq!(outcome.survivors.len(), 1);
        assert_eq!(outcome.duplicates_merged, 1);
        assert_eq!(outcome.groups[0].signal, MatchSignal::ExactId);
    }

    #[test]
    fn canonical_url_collapses_across_sources() {
        let a = with_url(
            job("1", "remotive", "Engineer", "Acme"),
            "https://acme.com/jobs/42?utm_source=remotive",
        );
        let b = with_url(
            job("x9", "weworkremotely", "Software Engineer", "Acme Corp"),
            "https://ACME.com/jobs/42",
        );

        let outcome = dedupe(vec![a, b], &DedupeConfig::default());
        assert_eq!(outcome.survivors.len(), 1);
        assert_eq!(outcome.groups[0].signal, MatchSignal::CanonicalUrl);
    }

    #[test]
    fn fuzzy_merge_prefers_record_with_description() {
        let sparse = job("123", "remotive", "Automation Engineer", "Acme");
        let mut rich = job("abc", "weworkremotely", "Automation Engineer", "Acme Inc");
        rich.description_text = "We are hiring an automation engineer to build pipelines.".into();

        let outcome = dedupe(vec![sparse, rich], &DedupeConfig::default());
        assert_eq!(outcome.survivors.len(), 1);
        let survivor = &outcome.survivors[0];
        assert_eq!(survivor.source, "weworkremotely");
        assert!(!survivor.description_text.is_empty());
        assert!(matches!(outcome.groups[0].signal, MatchSignal::Fuzzy(_)));
    }

    #[test]
    fn transitive_chain_collapses_to_one_survivor() {
        // A and B share a canonical URL; C only fuzzy-matches B's title.
        let a = with_url(
            job("1", "remotive", "Automation Engineer", "Acme"),
            "https://acme.com/jobs/7",
        );
        let b = with_url(
            job("2", "weworkremotely", "Senior Automation Engineer", "Acme Inc"),
            "https://acme.com/jobs/7?ref=wwr",
        );
        let c = job("3", "arbeitnow", "Senior Automation Engineer", "Acme");

        let outcome = dedupe(vec![a, b, c], &DedupeConfig::default());
        assert_eq!(outcome.survivors.len(), 1, "chain must collapse fully");
        assert_eq!(outcome.duplicates_merged, 2);
    }

    #[test]
    fn uncertain_band_records_pair_without_merging() {
        let config = DedupeConfig {
            accept_threshold: 0.95,
            uncertain_threshold: 0.70,
        };
        let a = job("1", "remotive", "Automation Engineer", "Acme");
        let b = job("2", "remoteok", "Automation Engineering Lead", "Acme Labs");

        let outcome = dedupe(vec![a, b], &config);
        assert_eq!(outcome.survivors.len(), 2);
        assert_eq!(outcome.uncertain.len(), 1);
        let pair = &outcome.uncertain[0];
        assert!(pair.score >= config.uncertain_threshold);
        assert!(pair.score < config.accept_threshold);
    }

    #[test]
    fn uncertain_pair_keys_resolve_to_survivors() {
        let config = DedupeConfig {
            accept_threshold: 0.99,
            uncertain_threshold: 0.70,
        };
        // A canonical-URL group whose completeness winner is NOT its first
        // member, plus a candidate in the uncertain band against it.
        let sparse = with_url(
            job("1", "arbeitnow", "Automation Engineer", "Acme"),
            "https://acme.com/jobs/7",
        );
        let mut rich = with_url(
            job("2", "remotive", "Automation Engineer", "Acme Inc"),
            "https://acme.com/jobs/7",
        );
        rich.description_text = "We are hiring an automation engineer.".into();
        let other = job("3", "weworkremotely", "Automation Engineering Lead", "Acme Labs");

        let sparse_key = sparse.job_key();
        let rich_key = rich.job_key();
        let outcome = dedupe(vec![sparse, rich, other], &config);

        assert_eq!(outcome.survivors.len(), 2);
        assert_eq!(outcome.uncertain.len(), 1);
        let pair = &outcome.uncertain[0];
        // The pair carries the first member's key, not the survivor's.
        assert_eq!(pair.left_key, sparse_key);
        let resolved = outcome.survivor_for(&pair.left_key).map(|j| j.job_key());
        assert_eq!(resolved.as_deref(), Some(rich_key.as_str()));
        assert!(outcome.survivor_for(&pair.right_key).is_some());
    }

    #[test]
    fn distinct_jobs_stay_distinct() {
        let a = job("1", "remotive", "Automation Engineer", "Acme");
        let b = job("2", "remotive", "Head of Marketing", "Globex");

        let outcome = dedupe(vec![a, b], &DedupeConfig::default());
        assert_eq!(outcome.survivors.len(), 2);
        assert!(outcome.uncertain.is_empty());
        assert_eq!(outcome.duplicates_merged, 0);
    }

    #[test]
    fn outcome_is_independent_of_input_order() {
        let a = with_url(
            job("1", "remotive", "Automation Engineer", "Acme"),
            "https://acme.com/jobs/7",
        );
        let b = with_url(
            job("2", "weworkremotely", "Automation Engineer", "Acme Inc"),
            "https://acme.com/jobs/7",
        );
        let c = job("3", "arbeitnow", "Head of Marketing", "Globex");

        let forward = dedupe(vec![a.clone(), b.clone(), c.clone()], &DedupeConfig::default());
        let reverse = dedupe(vec![c, b, a], &DedupeConfig::default());

        let mut fwd_keys: Vec<String> = forward.survivors.iter().map(|j| j.job_key()).collect();
        let mut rev_keys: Vec<String> = reverse.survivors.iter().map(|j| j.job_key()).collect();
        fwd_keys.sort();
        rev_keys.sort();
        assert_eq!(fwd_keys, rev_keys);
    }

    #[test]
    fn merge_preserves_earliest_first_seen() {
        let mut a = job("1", "remotive", "Engineer", "Acme");
        a.first_seen_at = chrono::Utc::now() - chrono::Duration::days(3);
        let early = a.first_seen_at;
        let mut b = job("1", "remotive", "Engineer", "Acme");
        b.description_text = "long description that makes this record more complete".into();

        let outcome = dedupe(vec![b, a], &DedupeConfig::default());
        assert_eq!(outcome.survivors[0].first_seen_at, early);
        assert!(!outcome.survivors[0].description_text.is_empty());
    }

    #[test]
    fn apply_verdicts_merges_confirmed_pairs() {
        let config = DedupeConfig {
            accept_threshold: 0.99,
            uncertain_threshold: 0.70,
        };
        let a = job("1", "remotive", "Automation Engineer", "Acme");
        let b = job("2", "remoteok", "Automation Engineering Lead", "Acme Labs");
        let a_key = a.job_key();
        let b_key = b.job_key();

        let mut outcome = dedupe(vec![a, b], &config);
        assert_eq!(outcome.survivors.len(), 2);
        assert_eq!(outcome.uncertain.len(), 1);

        outcome.apply_verdicts(&[(a_key, b_key)]);
        assert_eq!(outcome.survivors.len(), 1);
        assert_eq!(outcome.duplicates_merged, 1);
        assert!(
            outcome
                .groups
                .iter()
                .any(|g| g.signal == MatchSignal::AiVerdict)
        );
    }

    #[test]
    fn unconfirmed_uncertain_pairs_stay_distinct() {
        let config = DedupeConfig {
            accept_threshold: 0.99,
            uncertain_threshold: 0.70,
        };
        let a = job("1", "remotive", "Automation Engineer", "Acme");
        let b = job("2", "remoteok", "Automation Engineering Lead", "Acme Labs");

        let mut outcome = dedupe(vec![a, b], &config);
        outcome.apply_verdicts(&[]);
        assert_eq!(outcome.survivors.len(), 2);
    }
}
