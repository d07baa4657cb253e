//! Smart selection of incidents to enrich: random order so scan order
//! leaks nothing, domain-diverse so no single site absorbs the first pass.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use tracing::info;

use eduthreat_store::CandidateRow;

use crate::rate_limit::DomainRateLimiter;

/// Over-fetch factor applied to the store query before diversity filtering.
pub const OVERFETCH_FACTOR: i64 = 3;

/// Pick up to `limit` candidates from a randomly-ordered pool.
///
/// First pass takes one candidate per distinct fetchable domain (the domain
/// of the first URL the rate limiter would currently allow, excluding
/// `exclude_domains`); remaining slots fill randomly from the leftovers,
/// including candidates with no currently fetchable domain.
pub fn select_for_enrichment(
    pool: Vec<CandidateRow>,
    limit: usize,
    limiter: &mut DomainRateLimiter,
    exclude_domains: &[String],
) -> Vec<CandidateRow> {
    if pool.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut by_domain: HashMap<String, Vec<CandidateRow>> = HashMap::new();
    let mut no_domain: Vec<CandidateRow> = Vec::new();

    for candidate in pool {
        let domain = candidate.urls().iter().find_map(|url| {
            let d = DomainRateLimiter::extract_domain(url)?;
            (!exclude_domains.contains(&d) && limiter.can_fetch(&d)).then_some(d)
        });
        match domain {
            Some(d) => by_domain.entry(d).or_default().push(candidate),
            None => no_domain.push(candidate),
        }
    }

    let mut selected: Vec<CandidateRow> = Vec::new();
    let mut leftovers: Vec<CandidateRow> = Vec::new();

    // One per domain first: diversity across the first pass.
    for (_, mut group) in by_domain {
        if selected.len() < limit {
            selected.push(group.remove(0));
        }
        leftovers.append(&mut group);
    }

    // Fill remaining slots randomly from whatever is left.
    let remaining = limit.saturating_sub(selected.len());
    if remaining > 0 {
        leftovers.append(&mut no_domain);
        leftovers.shuffle(&mut rand::rng());
        selected.extend(leftovers.into_iter().take(remaining));
    }

    info!(
        selected = selected.len(),
        "Selected incidents for enrichment (domain-diverse first pass)"
    );
    selected.truncate(limit);
    selected
}
