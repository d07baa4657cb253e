//! CSV export of enriched incidents. A pure read of the store, outside any
//! pipeline transaction.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use eduthreat_store::Store;

/// Write one row per enriched incident. URL sets are `;`-joined strings;
/// source attributions join the same way.
pub async fn export_enriched_csv(store: &Store, output: &Path) -> Result<usize> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("creating {}", output.display()))?;

    writer.write_record([
        "incident_id",
        "sources",
        "institution_name",
        "victim_raw_name",
        "institution_type",
        "country",
        "region",
        "city",
        "incident_date",
        "date_precision",
        "source_published_date",
        "ingested_at",
        "last_updated_at",
        "title",
        "subtitle",
        "primary_url",
        "all_urls",
        "broken_urls",
        "leak_site_url",
        "source_detail_url",
        "screenshot_url",
        "attack_type_hint",
        "status",
        "source_confidence",
        "notes",
        "enriched_at",
        "summary",
        "timeline",
        "mitre_techniques",
        "attack_dynamics",
        "extraction_confidence",
    ])?;

    let mut exported = 0usize;
    for row in store.all_incident_rows().await? {
        if !row.enriched {
            continue;
        }
        let sources = store
            .incident_sources(&row.incident_id)
            .await?
            .into_iter()
            .map(|s| s.source)
            .collect::<Vec<_>>()
            .join(";");
        let confidence = row
            .extraction_confidence
            .map(|c| c.to_string())
            .unwrap_or_default();

        writer.write_record([
            row.incident_id.as_str(),
            sources.as_str(),
            row.institution_name.as_str(),
            row.victim_raw_name.as_deref().unwrap_or(""),
            row.institution_type.as_str(),
            row.country.as_deref().unwrap_or(""),
            row.region.as_deref().unwrap_or(""),
            row.city.as_deref().unwrap_or(""),
            row.incident_date.as_deref().unwrap_or(""),
            row.date_precision.as_str(),
            row.source_published_date.as_deref().unwrap_or(""),
            row.ingested_at.as_deref().unwrap_or(""),
            row.last_updated_at.as_deref().unwrap_or(""),
            row.title.as_deref().unwrap_or(""),
            row.subtitle.as_deref().unwrap_or(""),
            row.primary_url.as_deref().unwrap_or(""),
            row.all_urls.as_str(),
            row.broken_urls.as_str(),
            row.leak_site_url.as_deref().unwrap_or(""),
            row.source_detail_url.as_deref().unwrap_or(""),
            row.screenshot_url.as_deref().unwrap_or(""),
            row.attack_type_hint.as_deref().unwrap_or(""),
            row.status.as_str(),
            row.source_confidence.as_str(),
            row.notes.as_deref().unwrap_or(""),
            row.enriched_at.as_deref().unwrap_or(""),
            row.summary.as_deref().unwrap_or(""),
            row.timeline.as_deref().unwrap_or(""),
            row.mitre_techniques.as_deref().unwrap_or(""),
            row.attack_dynamics.as_deref().unwrap_or(""),
            confidence.as_str(),
        ])?;
        exported += 1;
    }

    writer.flush()?;
    info!(rows = exported, path = %output.display(), "Exported enriched dataset");
    Ok(exported)
}
