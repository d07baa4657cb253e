//! Post-enrichment institutional dedup: different sources can describe the
//! same attack with disjoint URLs, so after enrichment a second pass
//! collapses incidents whose normalized institution names match within a
//! date window, keeping the highest-confidence extraction.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use tracing::info;

use eduthreat_store::{EnrichedSummaryRow, Store};

use crate::error::Result;

/// Generic words that carry no identity.
const STOPWORDS: &[&str] = &["the", "of", "university", "college", "school", "institute", "state"];

/// Lowercase, strip punctuation, drop stopwords, collapse whitespace.
pub fn normalize_institution_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .filter(|word| !STOPWORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tolerant incident-date parsing: full dates, partial dates, and the
/// common natural-language forms articles use. Unparseable dates return
/// `None` and never match anything.
pub fn parse_incident_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    // Partial dates resolve to the start of the period.
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(year) = trimmed.parse::<i32>() {
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    for format in ["%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    None
}

/// True iff both dates parse and lie within `window_days` of each other.
pub fn dates_within_window(a: &str, b: &str, window_days: i64) -> bool {
    match (parse_incident_date(a), parse_incident_date(b)) {
        (Some(a), Some(b)) => (a - b).num_days().abs() <= window_days,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InstitutionDedupStats {
    pub checked: u32,
    pub removed: u32,
    pub remaining: u32,
}

impl fmt::Display for InstitutionDedupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "institution dedup: checked {}, removed {}, remaining {}",
            self.checked, self.removed, self.remaining
        )
    }
}

/// Collapse enriched incidents with matching normalized institution names
/// and incident dates within `window_days`. Within each group the highest
/// `extraction_confidence` wins; the rest are deleted (children cascade).
pub async fn dedupe_by_institution(store: &Store, window_days: i64) -> Result<InstitutionDedupStats> {
    let rows = store.enriched_rows().await?;
    let mut stats = InstitutionDedupStats {
        checked: rows.len() as u32,
        ..InstitutionDedupStats::default()
    };

    // Bucket by normalized name; the window test only applies inside a
    // bucket.
    let mut by_name: HashMap<String, Vec<EnrichedSummaryRow>> = HashMap::new();
    for row in rows {
        let label = if row.institution_name.is_empty() {
            row.victim_raw_name.clone().unwrap_or_default()
        } else {
            row.institution_name.clone()
        };
        let key = normalize_institution_name(&label);
        if key.is_empty() {
            stats.remaining += 1;
            continue;
        }
        by_name.entry(key).or_default().push(row);
    }

    for (name, bucket) in by_name {
        let mut groups = cluster_by_window(bucket, window_days);
        for group in &mut groups {
            if group.len() == 1 {
                stats.remaining += 1;
                continue;
            }
            // Highest extraction confidence survives.
            group.sort_by(|a, b| {
                b.extraction_confidence
                    .unwrap_or(0.0)
                    .total_cmp(&a.extraction_confidence.unwrap_or(0.0))
            });
            let winner = &group[0];
            info!(
                institution = %name,
                winner = %winner.incident_id,
                losers = group.len() - 1,
                "Collapsing same-institution incidents"
            );
            for loser in &group[1..] {
                store.delete_incident(&loser.incident_id).await?;
                stats.removed += 1;
            }
            stats.remaining += 1;
        }
    }

    Ok(stats)
}

/// Cluster rows into connected components of the window-adjacency graph:
/// two rows connect when their dates are within the window, and a row that
/// bridges two clusters merges them. Row order must not change the result,
/// since the store hands rows back in no particular order. Rows with
/// unparseable dates stand alone.
fn cluster_by_window(
    rows: Vec<EnrichedSummaryRow>,
    window_days: i64,
) -> Vec<Vec<EnrichedSummaryRow>> {
    let n = rows.len();
    if n <= 1 {
        return rows.into_iter().map(|row| vec![row]).collect();
    }

    let dates: Vec<Option<NaiveDate>> = rows
        .iter()
        .map(|row| row.incident_date.as_deref().and_then(parse_incident_date))
        .collect();

    // Union-find over row indices, connected through the window test.
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let up = parent[i];
            let root = find(parent, up);
            parent[i] = root;
        }
        parent[i]
    }

    for i in 0..n {
        let Some(a) = dates[i] else { continue };
        for j in (i + 1)..n {
            let Some(b) = dates[j] else { continue };
            if (a - b).num_days().abs() <= window_days {
                let (ra, rb) = (find(&mut parent, i), find(&mut parent, j));
                if ra != rb {
                    parent[rb] = ra;
                }
            }
        }
    }

    let mut groups: Vec<Vec<EnrichedSummaryRow>> = Vec::new();
    let mut root_to_group: HashMap<usize, usize> = HashMap::new();
    for (i, row) in rows.into_iter().enumerate() {
        let root = find(&mut parent, i);
        match root_to_group.get(&root) {
            Some(&g) => groups[g].push(row),
            None => {
                root_to_group.insert(root, groups.len());
                groups.push(vec![row]);
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_drops_stopwords_and_punctuation() {
        assert_eq!(
            normalize_institution_name("The University of California, Berkeley"),
            "california berkeley"
        );
        assert_eq!(normalize_institution_name("Test University"), "test");
        assert_eq!(normalize_institution_name("MIT"), "mit");
        assert_eq!(
            normalize_institution_name("Riverdale  High   School!!!"),
            "riverdale high"
        );
    }

    #[test]
    fn normalization_matches_name_variants() {
        assert_eq!(
            normalize_institution_name("University of Test"),
            normalize_institution_name("Test University")
        );
    }

    #[test]
    fn date_parsing_accepts_partial_forms() {
        assert_eq!(
            parse_incident_date("2025-01-15"),
            NaiveDate::from_ymd_opt(2025, 1, 15)
        );
        assert_eq!(
            parse_incident_date("2025-01"),
            NaiveDate::from_ymd_opt(2025, 1, 1)
        );
        assert_eq!(parse_incident_date("2025"), NaiveDate::from_ymd_opt(2025, 1, 1));
        assert_eq!(
            parse_incident_date("January 15, 2025"),
            NaiveDate::from_ymd_opt(2025, 1, 15)
        );
        assert_eq!(
            parse_incident_date("15 Jan 2025"),
            NaiveDate::from_ymd_opt(2025, 1, 15)
        );
        assert_eq!(parse_incident_date("sometime last week"), None);
        assert_eq!(parse_incident_date(""), None);
    }

    #[test]
    fn window_test_is_symmetric_and_bounded() {
        assert!(dates_within_window("2025-01-15", "2025-01-20", 14));
        assert!(dates_within_window("2025-01-20", "2025-01-15", 14));
        assert!(!dates_within_window("2025-01-15", "2025-02-01", 14));
        assert!(dates_within_window("2025-01-15", "2025-01-29", 14), "boundary is inclusive");
    }

    #[test]
    fn unparseable_dates_never_match() {
        assert!(!dates_within_window("unknown", "2025-01-15", 14));
        assert!(!dates_within_window("unknown", "unknown", 14));
    }

    fn row(id: &str, name: &str, date: &str, confidence: f64) -> EnrichedSummaryRow {
        EnrichedSummaryRow {
            incident_id: id.to_string(),
            institution_name: name.to_string(),
            victim_raw_name: None,
            incident_date: Some(date.to_string()),
            extraction_confidence: Some(confidence),
        }
    }

    #[test]
    fn window_clustering_chains_adjacent_dates() {
        let groups = cluster_by_window(
            vec![
                row("a", "Test University", "2025-01-01", 0.5),
                row("b", "Test University", "2025-01-10", 0.5),
                row("c", "Test University", "2025-01-20", 0.5),
                row("d", "Test University", "2025-03-01", 0.5),
            ],
            14,
        );
        assert_eq!(groups.len(), 2, "a-b-c chain through b; d stands alone");
    }

    #[test]
    fn late_bridging_row_merges_two_existing_clusters() {
        // The bridge (day 10) arrives after both endpoints (day 0, day 20)
        // already formed separate clusters; it must pull them together.
        let groups = cluster_by_window(
            vec![
                row("a", "Test University", "2025-01-01", 0.50),
                row("b", "Test University", "2025-01-21", 0.99),
                row("c", "Test University", "2025-01-11", 0.98),
            ],
            14,
        );
        assert_eq!(groups.len(), 1, "c bridges a and b into one cluster");
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn clustering_is_order_independent() {
        let rows = [
            ("a", "2025-01-01", 0.5),
            ("b", "2025-01-21", 0.9),
            ("c", "2025-01-11", 0.8),
        ];
        let forward: Vec<_> = rows.iter().map(|(id, d, c)| row(id, "Test University", d, *c)).collect();
        let reversed: Vec<_> = rows.iter().rev().map(|(id, d, c)| row(id, "Test University", d, *c)).collect();

        let f = cluster_by_window(forward, 14);
        let r = cluster_by_window(reversed, 14);
        assert_eq!(f.len(), r.len());
        assert_eq!(f.len(), 1);
    }

    #[test]
    fn unparseable_dates_stand_alone_in_clustering() {
        let groups = cluster_by_window(
            vec![
                row("a", "Test University", "2025-01-01", 0.5),
                row("b", "Test University", "around new year", 0.5),
            ],
            14,
        );
        assert_eq!(groups.len(), 2);
    }
}
