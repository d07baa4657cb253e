//! Cross-source deduplication: URL-graph clustering over a batch and the
//! confidence-ranked merge policy.

use std::collections::{HashMap, HashSet};

use eduthreat_common::{normalize_url, DatePrecision, Incident, InstitutionType};

/// All normalized URLs an incident can be matched on: the enrichment URL
/// set, the elected primary (if any), and the source platform's detail page.
pub fn extract_urls(incident: &Incident) -> HashSet<String> {
    let mut urls = HashSet::new();
    for url in &incident.all_urls {
        let n = normalize_url(url);
        if !n.is_empty() {
            urls.insert(n);
        }
    }
    for url in [&incident.primary_url, &incident.source_detail_url]
        .into_iter()
        .flatten()
    {
        let n = normalize_url(url);
        if !n.is_empty() {
            urls.insert(n);
        }
    }
    urls
}

/// Merge a group of incidents reporting the same real-world event.
///
/// The highest-confidence member is primary: the merged record keeps its id,
/// status, and confidence, takes each scalar field from the first member (in
/// rank order) that has it, unions every member's URL set, and appends a
/// `merged_from=` marker to notes. An unenriched merged record never has a
/// primary URL; the LLM stage elects one later.
pub fn merge_incidents(incidents: Vec<Incident>) -> Incident {
    assert!(!incidents.is_empty(), "cannot merge an empty group");
    if incidents.len() == 1 {
        return incidents.into_iter().next().unwrap();
    }

    let mut ranked = incidents;
    // Stable sort: equal confidence keeps input order for scalar picks.
    ranked.sort_by(|a, b| b.source_confidence.cmp(&a.source_confidence));

    let mut all_urls: HashSet<String> = HashSet::new();
    let mut sources: HashSet<String> = HashSet::new();
    for inc in &ranked {
        all_urls.extend(extract_urls(inc));
        sources.insert(inc.source.clone());
    }
    // Sorted union makes the merged URL set independent of input order.
    let mut all_urls: Vec<String> = all_urls.into_iter().collect();
    all_urls.sort();
    let mut sources: Vec<String> = sources.into_iter().collect();
    sources.sort();

    let primary = ranked[0].clone();

    let pick = |get: fn(&Incident) -> Option<String>| -> Option<String> {
        ranked.iter().find_map(|inc| get(inc).filter(|v| !v.is_empty()))
    };

    let institution_name = ranked
        .iter()
        .map(|i| i.institution_name.clone())
        .find(|n| !n.is_empty())
        .unwrap_or_default();
    let institution_type = ranked
        .iter()
        .map(|i| i.institution_type)
        .find(|t| *t != InstitutionType::Unknown)
        .unwrap_or(InstitutionType::Unknown);

    // Date precision follows whichever member supplied the date.
    let (incident_date, date_precision) = ranked
        .iter()
        .find(|i| i.incident_date.is_some())
        .map(|i| (i.incident_date.clone(), i.date_precision))
        .unwrap_or((None, DatePrecision::Unknown));

    let notes = {
        let merged_marker = format!("merged_from={}", sources.join(","));
        match primary.notes.as_deref().filter(|n| !n.is_empty()) {
            Some(existing) if existing.contains("merged_from=") => existing.to_string(),
            Some(existing) => format!("{merged_marker};{existing}"),
            None => merged_marker,
        }
    };

    Incident {
        incident_id: primary.incident_id,
        source: primary.source,
        source_event_id: primary.source_event_id,
        institution_name,
        victim_raw_name: pick(|i| i.victim_raw_name.clone()),
        institution_type,
        country: pick(|i| i.country.clone()),
        region: pick(|i| i.region.clone()),
        city: pick(|i| i.city.clone()),
        incident_date,
        date_precision,
        source_published_date: pick(|i| i.source_published_date.clone()),
        ingested_at: primary.ingested_at,
        title: pick(|i| i.title.clone()),
        subtitle: pick(|i| i.subtitle.clone()),
        primary_url: None,
        all_urls,
        leak_site_url: pick(|i| i.leak_site_url.clone()),
        source_detail_url: pick(|i| i.source_detail_url.clone()),
        screenshot_url: pick(|i| i.screenshot_url.clone()),
        attack_type_hint: pick(|i| i.attack_type_hint.clone()),
        status: primary.status,
        source_confidence: primary.source_confidence,
        notes: Some(notes),
    }
}

/// Deduplicate one collection batch: connect incidents sharing at least one
/// normalized URL, merge each connected component, keep the rest untouched.
/// Records with no URLs never match anything and pass through standalone.
pub fn dedupe_batch(incidents: Vec<Incident>) -> Vec<Incident> {
    let n = incidents.len();
    if n <= 1 {
        return incidents;
    }

    // Union-find over batch indices, connected through shared URLs.
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let up = parent[i];
            let root = find(parent, up);
            parent[i] = root;
        }
        parent[i]
    }
    fn union(parent: &mut Vec<usize>, a: usize, b: usize) {
        let (ra, rb) = (find(parent, a), find(parent, b));
        if ra != rb {
            parent[rb] = ra;
        }
    }

    let mut url_owner: HashMap<String, usize> = HashMap::new();
    for (i, incident) in incidents.iter().enumerate() {
        for url in extract_urls(incident) {
            match url_owner.get(&url) {
                Some(&j) => union(&mut parent, i, j),
                None => {
                    url_owner.insert(url, i);
                }
            }
        }
    }

    let mut groups: HashMap<usize, Vec<Incident>> = HashMap::new();
    let mut order: Vec<usize> = Vec::new();
    for (i, incident) in incidents.into_iter().enumerate() {
        let root = find(&mut parent, i);
        let group = groups.entry(root).or_insert_with(|| {
            order.push(root);
            Vec::new()
        });
        group.push(incident);
    }

    order
        .into_iter()
        .map(|root| merge_incidents(groups.remove(&root).unwrap()))
        .collect()
}
