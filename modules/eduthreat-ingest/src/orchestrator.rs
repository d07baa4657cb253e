//! Drives the registered adapters and applies the per-record ingest step.

use std::fmt;

use anyhow::{Context, Result};
use tracing::{info, warn};

use eduthreat_common::Incident;
use eduthreat_store::{EnrichmentPolicy, Store};

use crate::adapter::{AdapterOptions, BatchSink};
use crate::dedup::{extract_urls, merge_incidents};
use crate::registry::{SourceGroup, SourceRegistry};

/// What the ingest step did with one raw record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Fresh incident inserted under its own id.
    Inserted,
    /// Merged into an existing unenriched incident.
    Merged(String),
    /// All URLs already covered by an enriched incident; payload dropped,
    /// attribution still recorded.
    DroppedDuplicate(String),
    /// Brought new URLs to an enriched incident; its enrichment flag was
    /// reset so the pipeline revisits it.
    UrlUpgraded(String),
    /// The (source, event) pair was already in the ledger.
    AlreadyIngested,
}

/// Ingest a single raw record: per-source ledger check, against-store
/// dedup, attribution, and event registration. Each write is its own short
/// transaction and every step is idempotent on replay.
pub async fn ingest_one(store: &Store, incident: &Incident) -> Result<IngestOutcome> {
    let event_key = incident.event_key();

    if store.source_event_exists(&incident.source, &event_key).await? {
        return Ok(IngestOutcome::AlreadyIngested);
    }

    let candidate_urls = extract_urls(incident);
    let outcome = match store.find_duplicate_by_urls(&candidate_urls).await? {
        None => {
            store
                .upsert_incident(incident, EnrichmentPolicy::Preserve)
                .await?;
            IngestOutcome::Inserted
        }
        Some(m) if !m.enriched => {
            let existing = store
                .load_incident(&m.incident_id)
                .await?
                .with_context(|| format!("duplicate match vanished: {}", m.incident_id))?;
            let mut merged = merge_incidents(vec![existing, incident.clone()]);
            // The surviving row keeps its id so foreign keys stay valid.
            merged.incident_id = m.incident_id.clone();
            store
                .upsert_incident(&merged, EnrichmentPolicy::Preserve)
                .await?;
            IngestOutcome::Merged(m.incident_id)
        }
        Some(m) if !m.adds_new_urls => {
            info!(
                candidate = %incident.incident_id,
                existing = %m.incident_id,
                "Dropping subset duplicate of enriched incident"
            );
            IngestOutcome::DroppedDuplicate(m.incident_id)
        }
        Some(m) => {
            let existing = store
                .load_incident(&m.incident_id)
                .await?
                .with_context(|| format!("duplicate match vanished: {}", m.incident_id))?;
            let mut upgraded = existing;
            for url in &incident.all_urls {
                if !upgraded.all_urls.contains(url) {
                    upgraded.all_urls.push(url.clone());
                }
            }
            store
                .upsert_incident(&upgraded, EnrichmentPolicy::Reset)
                .await?;
            info!(
                incident_id = %m.incident_id,
                "Enriched incident gained new URLs, queued for re-enrichment"
            );
            IngestOutcome::UrlUpgraded(m.incident_id)
        }
    };

    let target_id = match &outcome {
        IngestOutcome::Inserted => incident.incident_id.clone(),
        IngestOutcome::Merged(id)
        | IngestOutcome::DroppedDuplicate(id)
        | IngestOutcome::UrlUpgraded(id) => id.clone(),
        IngestOutcome::AlreadyIngested => unreachable!("ledger hit returns early"),
    };

    store
        .add_incident_source(
            &target_id,
            &incident.source,
            incident.source_event_id.as_deref(),
            incident.source_confidence,
        )
        .await?;
    store
        .record_source_event(&incident.source, &event_key, &target_id)
        .await?;

    Ok(outcome)
}

/// Driver inputs for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub groups: Vec<SourceGroup>,
    /// Restrict to these source tags. `None` runs every registered adapter.
    pub sources: Option<Vec<String>>,
    pub max_pages: Option<u32>,
    pub max_age_days: Option<u32>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            groups: vec![SourceGroup::Curated, SourceGroup::News, SourceGroup::Rss],
            sources: None,
            max_pages: None,
            max_age_days: Some(1),
        }
    }
}

/// Counters for the run summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestStats {
    pub collected: u32,
    pub inserted: u32,
    pub merged: u32,
    pub dropped_duplicates: u32,
    pub url_upgrades: u32,
    pub already_ingested: u32,
    pub adapter_errors: u32,
}

impl fmt::Display for IngestStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Ingestion Complete ===")?;
        writeln!(f, "Records collected:  {}", self.collected)?;
        writeln!(f, "Newly inserted:     {}", self.inserted)?;
        writeln!(f, "Merged:             {}", self.merged)?;
        writeln!(f, "Subset duplicates:  {}", self.dropped_duplicates)?;
        writeln!(f, "URL upgrades:       {}", self.url_upgrades)?;
        writeln!(f, "Already ingested:   {}", self.already_ingested)?;
        write!(f, "Adapter errors:     {}", self.adapter_errors)
    }
}

/// Runs the selected adapter groups against the store.
pub struct Orchestrator {
    store: Store,
    registry: SourceRegistry,
}

impl Orchestrator {
    pub fn new(store: Store, registry: SourceRegistry) -> Self {
        Self { store, registry }
    }

    pub async fn run(&self, config: &IngestConfig) -> Result<IngestStats> {
        let mut stats = IngestStats::default();

        for group in &config.groups {
            info!(group = group.as_str(), "Ingesting source group");
            for adapter in self.registry.group(*group) {
                let tag = adapter.tag().to_string();
                if let Some(ref enabled) = config.sources {
                    if !enabled.iter().any(|s| s == &tag) {
                        continue;
                    }
                }

                let opts = AdapterOptions {
                    max_pages: config.max_pages,
                    max_age_days: config.max_age_days,
                    since_checkpoint: self.store.last_pubdate(&tag).await?,
                };

                let mut sink = BatchSink::new(&self.store);
                let result = adapter.collect(&opts, &mut sink).await;
                // Whatever the adapter buffered before failing is persisted.
                let (sink_stats, latest_pubdate) = sink.close().await?;

                stats.collected += sink_stats.collected;
                stats.inserted += sink_stats.inserted;
                stats.merged += sink_stats.merged;
                stats.dropped_duplicates += sink_stats.dropped_duplicates;
                stats.url_upgrades += sink_stats.url_upgrades;
                stats.already_ingested += sink_stats.already_ingested;

                match result {
                    Ok(()) => {
                        if let Some(pubdate) = latest_pubdate {
                            self.store.set_last_pubdate(&tag, &pubdate).await?;
                        }
                        info!(
                            source = %tag,
                            collected = sink_stats.collected,
                            inserted = sink_stats.inserted,
                            "Source complete"
                        );
                    }
                    Err(e) => {
                        stats.adapter_errors += 1;
                        warn!(source = %tag, error = %e, "Adapter failed; flushed partial batch");
                    }
                }
            }
        }

        Ok(stats)
    }
}
