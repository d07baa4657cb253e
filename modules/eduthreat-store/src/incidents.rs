use std::collections::HashSet;

use chrono::Utc;
use sqlx::FromRow;
use tracing::debug;

use eduthreat_common::{join_urls, normalize_url, split_urls, Confidence, Incident, SourceAttribution};

use crate::error::Result;
use crate::types::{
    CandidateRow, DuplicateMatch, EnrichedSummaryRow, EnrichmentPolicy, EnrichmentStats,
    IncidentRow,
};
use crate::Store;

/// Existing enrichment state read before an upsert so a merge never
/// destroys it.
#[derive(Debug, Default, FromRow)]
struct ExistingEnrichment {
    enriched: bool,
    enriched_at: Option<String>,
    summary: Option<String>,
    timeline: Option<String>,
    mitre_techniques: Option<String>,
    attack_dynamics: Option<String>,
    extraction_confidence: Option<f64>,
    skip_reason: Option<String>,
    primary_url: Option<String>,
    broken_urls: String,
    ingested_at: Option<String>,
}

impl Store {
    /// Insert or replace an incident row.
    ///
    /// The enrichment block of an existing row is always carried over;
    /// `policy` only decides whether the `enriched` flag survives
    /// ([`EnrichmentPolicy::Preserve`]) or is cleared so the pipeline
    /// revisits the row ([`EnrichmentPolicy::Reset`]).
    pub async fn upsert_incident(
        &self,
        incident: &Incident,
        policy: EnrichmentPolicy,
    ) -> Result<()> {
        let existing = sqlx::query_as::<_, ExistingEnrichment>(
            r#"
            SELECT enriched, enriched_at, summary, timeline, mitre_techniques,
                   attack_dynamics, extraction_confidence, skip_reason,
                   primary_url, broken_urls, ingested_at
            FROM incidents WHERE incident_id = ?
            "#,
        )
        .bind(&incident.incident_id)
        .fetch_optional(self.pool())
        .await?
        .unwrap_or_default();

        let enriched = match policy {
            EnrichmentPolicy::Preserve => existing.enriched,
            EnrichmentPolicy::Reset => false,
        };
        // An enriched row keeps its elected primary URL unless the incoming
        // record explicitly carries one.
        let primary_url = incident
            .primary_url
            .clone()
            .or(existing.primary_url);
        let ingested_at = incident.ingested_at.clone().or(existing.ingested_at);
        let now = Utc::now().to_rfc3339();

        // A plain REPLACE would delete the conflicting row and cascade away
        // its attributions, events, and articles; the upsert updates in
        // place.
        sqlx::query(
            r#"
            INSERT INTO incidents (
                incident_id, institution_name, victim_raw_name, institution_type,
                country, region, city,
                incident_date, date_precision, source_published_date,
                ingested_at, last_updated_at,
                title, subtitle,
                primary_url, all_urls, broken_urls,
                leak_site_url, source_detail_url, screenshot_url,
                attack_type_hint, status, source_confidence, notes,
                enriched, enriched_at, summary, timeline, mitre_techniques,
                attack_dynamics, extraction_confidence, skip_reason
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(incident_id) DO UPDATE SET
                institution_name = excluded.institution_name,
                victim_raw_name = excluded.victim_raw_name,
                institution_type = excluded.institution_type,
                country = excluded.country,
                region = excluded.region,
                city = excluded.city,
                incident_date = excluded.incident_date,
                date_precision = excluded.date_precision,
                source_published_date = excluded.source_published_date,
                ingested_at = excluded.ingested_at,
                last_updated_at = excluded.last_updated_at,
                title = excluded.title,
                subtitle = excluded.subtitle,
                primary_url = excluded.primary_url,
                all_urls = excluded.all_urls,
                broken_urls = excluded.broken_urls,
                leak_site_url = excluded.leak_site_url,
                source_detail_url = excluded.source_detail_url,
                screenshot_url = excluded.screenshot_url,
                attack_type_hint = excluded.attack_type_hint,
                status = excluded.status,
                source_confidence = excluded.source_confidence,
                notes = excluded.notes,
                enriched = excluded.enriched,
                enriched_at = excluded.enriched_at,
                summary = excluded.summary,
                timeline = excluded.timeline,
                mitre_techniques = excluded.mitre_techniques,
                attack_dynamics = excluded.attack_dynamics,
                extraction_confidence = excluded.extraction_confidence,
                skip_reason = excluded.skip_reason
            "#,
        )
        .bind(&incident.incident_id)
        .bind(&incident.institution_name)
        .bind(&incident.victim_raw_name)
        .bind(incident.institution_type.as_str())
        .bind(&incident.country)
        .bind(&incident.region)
        .bind(&incident.city)
        .bind(&incident.incident_date)
        .bind(incident.date_precision.as_str())
        .bind(&incident.source_published_date)
        .bind(ingested_at)
        .bind(now)
        .bind(&incident.title)
        .bind(&incident.subtitle)
        .bind(primary_url)
        .bind(join_urls(&incident.all_urls))
        .bind(existing.broken_urls)
        .bind(&incident.leak_site_url)
        .bind(&incident.source_detail_url)
        .bind(&incident.screenshot_url)
        .bind(&incident.attack_type_hint)
        .bind(incident.status.as_str())
        .bind(incident.source_confidence.as_str())
        .bind(&incident.notes)
        .bind(enriched)
        .bind(existing.enriched_at)
        .bind(existing.summary)
        .bind(existing.timeline)
        .bind(existing.mitre_techniques)
        .bind(existing.attack_dynamics)
        .bind(existing.extraction_confidence)
        .bind(existing.skip_reason)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Full row, enrichment block included.
    pub async fn load_incident_row(&self, incident_id: &str) -> Result<Option<IncidentRow>> {
        let row = sqlx::query_as::<_, IncidentRow>("SELECT * FROM incidents WHERE incident_id = ?")
            .bind(incident_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    /// Base incident with its primary source resolved from the earliest
    /// attribution.
    pub async fn load_incident(&self, incident_id: &str) -> Result<Option<Incident>> {
        let Some(row) = self.load_incident_row(incident_id).await? else {
            return Ok(None);
        };
        let mut incident = row.to_incident();
        if let Some(attr) = self.incident_sources(incident_id).await?.into_iter().next() {
            incident.source = attr.source;
            incident.source_event_id = attr.source_event_id;
        }
        Ok(Some(incident))
    }

    /// Find a stored incident sharing at least one normalized URL with the
    /// candidate set. `candidate_urls` must already be normalized and
    /// non-empty strings.
    ///
    /// The match carries the enrichment state and whether the candidate
    /// introduces URLs the stored row lacks — the two facts the ingest step
    /// needs to pick between merge, subset-drop, and URL-upgrade.
    pub async fn find_duplicate_by_urls(
        &self,
        candidate_urls: &HashSet<String>,
    ) -> Result<Option<DuplicateMatch>> {
        if candidate_urls.is_empty() {
            return Ok(None);
        }

        let rows = sqlx::query_as::<_, (String, String, bool)>(
            "SELECT incident_id, all_urls, enriched FROM incidents",
        )
        .fetch_all(self.pool())
        .await?;

        for (incident_id, all_urls, enriched) in rows {
            let existing: HashSet<String> = split_urls(&all_urls)
                .iter()
                .map(|u| normalize_url(u))
                .filter(|u| !u.is_empty())
                .collect();

            if existing.is_disjoint(candidate_urls) {
                continue;
            }

            let adds_new_urls = !candidate_urls.is_subset(&existing);
            debug!(%incident_id, enriched, adds_new_urls, "URL overlap with stored incident");
            return Ok(Some(DuplicateMatch {
                incident_id,
                enriched,
                adds_new_urls,
            }));
        }

        Ok(None)
    }

    pub async fn source_event_exists(&self, source: &str, event_key: &str) -> Result<bool> {
        let row = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM source_events WHERE source = ? AND source_event_id = ?",
        )
        .bind(source)
        .bind(event_key)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.is_some())
    }

    pub async fn record_source_event(
        &self,
        source: &str,
        event_key: &str,
        incident_id: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO source_events (source, source_event_id, incident_id, first_seen_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(source)
        .bind(event_key)
        .bind(incident_id)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Append a source attribution. Attributions are append-only; replays
    /// of the same (incident, source, event) triple are ignored.
    pub async fn add_incident_source(
        &self,
        incident_id: &str,
        source: &str,
        source_event_id: Option<&str>,
        confidence: Confidence,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO incident_sources
                (incident_id, source, source_event_id, first_seen_at, confidence)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(incident_id)
        .bind(source)
        .bind(source_event_id.unwrap_or(""))
        .bind(Utc::now().to_rfc3339())
        .bind(confidence.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// All sources that contributed to an incident, earliest first.
    pub async fn incident_sources(&self, incident_id: &str) -> Result<Vec<SourceAttribution>> {
        let rows = sqlx::query_as::<_, (String, String, String, Option<String>)>(
            r#"
            SELECT source, source_event_id, first_seen_at, confidence
            FROM incident_sources
            WHERE incident_id = ?
            ORDER BY first_seen_at ASC, source ASC
            "#,
        )
        .bind(incident_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(source, event_id, first_seen_at, confidence)| SourceAttribution {
                source,
                source_event_id: (!event_id.is_empty()).then_some(event_id),
                first_seen_at,
                confidence: Confidence::parse(confidence.as_deref().unwrap_or("medium")),
            })
            .collect())
    }

    // --- Source checkpoints -------------------------------------------------

    pub async fn last_pubdate(&self, source: &str) -> Result<Option<String>> {
        let row = sqlx::query_scalar::<_, Option<String>>(
            "SELECT last_pubdate FROM source_state WHERE source = ?",
        )
        .bind(source)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.flatten())
    }

    pub async fn set_last_pubdate(&self, source: &str, last_pubdate: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_state (source, last_pubdate)
            VALUES (?, ?)
            ON CONFLICT(source) DO UPDATE SET last_pubdate = excluded.last_pubdate
            "#,
        )
        .bind(source)
        .bind(last_pubdate)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    // --- Broken-URL ledger --------------------------------------------------

    /// Record URLs whose most recent fetch failed to yield usable content.
    pub async fn mark_urls_broken(&self, incident_id: &str, urls: &[String]) -> Result<()> {
        self.update_broken_urls(incident_id, urls, true).await
    }

    /// Clear the broken flag after a successful re-fetch.
    pub async fn clear_broken_urls(&self, incident_id: &str, urls: &[String]) -> Result<()> {
        self.update_broken_urls(incident_id, urls, false).await
    }

    async fn update_broken_urls(
        &self,
        incident_id: &str,
        urls: &[String],
        broken: bool,
    ) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let current = sqlx::query_scalar::<_, String>(
            "SELECT broken_urls FROM incidents WHERE incident_id = ?",
        )
        .bind(incident_id)
        .fetch_optional(self.pool())
        .await?
        .unwrap_or_default();

        let mut set: Vec<String> = split_urls(&current);
        for url in urls {
            if broken {
                if !set.contains(url) {
                    set.push(url.clone());
                }
            } else {
                set.retain(|u| u != url);
            }
        }

        sqlx::query("UPDATE incidents SET broken_urls = ? WHERE incident_id = ?")
            .bind(join_urls(&set))
            .bind(incident_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    // --- Enrichment selection and bookkeeping -------------------------------

    /// Unenriched, unskipped rows with at least one URL, in random order.
    /// The smart selector over-fetches from here and applies domain
    /// diversity on top.
    pub async fn unenriched_candidates(&self, limit: i64) -> Result<Vec<CandidateRow>> {
        let rows = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT incident_id, institution_name, title, all_urls, broken_urls,
                   source_published_date
            FROM incidents
            WHERE enriched = 0
              AND skip_reason IS NULL
              AND all_urls != ''
            ORDER BY RANDOM()
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Mark an incident permanently skipped (e.g. not education-related).
    /// Skipped rows are never selected for enrichment again.
    pub async fn mark_incident_skipped(&self, incident_id: &str, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE incidents SET skip_reason = ?, last_updated_at = ? WHERE incident_id = ?",
        )
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(incident_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// All enriched rows, as inputs for the institutional dedup pass.
    pub async fn enriched_rows(&self) -> Result<Vec<EnrichedSummaryRow>> {
        let rows = sqlx::query_as::<_, EnrichedSummaryRow>(
            r#"
            SELECT incident_id, institution_name, victim_raw_name, incident_date,
                   extraction_confidence
            FROM incidents
            WHERE enriched = 1
            "#,
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Delete an incident; attributions, events, and articles cascade.
    pub async fn delete_incident(&self, incident_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM incidents WHERE incident_id = ?")
            .bind(incident_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn incident_count(&self) -> Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM incidents")
            .fetch_one(self.pool())
            .await?;
        Ok(n)
    }

    pub async fn enrichment_stats(&self) -> Result<EnrichmentStats> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM incidents")
            .fetch_one(self.pool())
            .await?;
        let enriched =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM incidents WHERE enriched = 1")
                .fetch_one(self.pool())
                .await?;
        let ready = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM incidents
            WHERE enriched = 0 AND skip_reason IS NULL AND all_urls != ''
            "#,
        )
        .fetch_one(self.pool())
        .await?;
        Ok(EnrichmentStats {
            total_incidents: total,
            enriched,
            unenriched: total - enriched,
            ready_for_enrichment: ready,
        })
    }

    /// All rows, newest ingestion first. Read-only surface for export.
    pub async fn all_incident_rows(&self) -> Result<Vec<IncidentRow>> {
        let rows = sqlx::query_as::<_, IncidentRow>(
            "SELECT * FROM incidents ORDER BY ingested_at DESC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}
