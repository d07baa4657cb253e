use eduthreat_common::{
    split_urls, Confidence, DatePrecision, Incident, IncidentStatus, InstitutionType,
};

/// What `upsert_incident` does with an existing enrichment block.
///
/// Merges into an enriched row must carry the block over verbatim; the
/// URL-upgrade path additionally clears the `enriched` flag so the pipeline
/// revisits the row. The block contents survive either way — only the
/// §4.10 upgrade decision may overwrite them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentPolicy {
    /// Keep flag and block exactly as stored.
    Preserve,
    /// Clear the `enriched` flag but keep the block contents.
    Reset,
}

/// Outcome of saving an enrichment result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// A previous enrichment with equal-or-higher confidence was kept.
    SkippedLowerConfidence,
}

/// A store row that shares at least one normalized URL with a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateMatch {
    pub incident_id: String,
    pub enriched: bool,
    /// True when the candidate carries URLs the stored row does not.
    pub adds_new_urls: bool,
}

/// Full incident row, enrichment block included.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IncidentRow {
    pub incident_id: String,
    pub institution_name: String,
    pub victim_raw_name: Option<String>,
    pub institution_type: String,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub incident_date: Option<String>,
    pub date_precision: String,
    pub source_published_date: Option<String>,
    pub ingested_at: Option<String>,
    pub last_updated_at: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub primary_url: Option<String>,
    pub all_urls: String,
    pub broken_urls: String,
    pub leak_site_url: Option<String>,
    pub source_detail_url: Option<String>,
    pub screenshot_url: Option<String>,
    pub attack_type_hint: Option<String>,
    pub status: String,
    pub source_confidence: String,
    pub notes: Option<String>,
    pub enriched: bool,
    pub enriched_at: Option<String>,
    pub summary: Option<String>,
    pub timeline: Option<String>,
    pub mitre_techniques: Option<String>,
    pub attack_dynamics: Option<String>,
    pub extraction_confidence: Option<f64>,
    pub skip_reason: Option<String>,
}

impl IncidentRow {
    /// Convert to the base [`Incident`]. `source` is a placeholder until the
    /// caller resolves the primary attribution.
    pub fn to_incident(&self) -> Incident {
        let institution_name = if self.institution_name.is_empty() {
            self.victim_raw_name.clone().unwrap_or_else(|| "Unknown".to_string())
        } else {
            self.institution_name.clone()
        };
        Incident {
            incident_id: self.incident_id.clone(),
            source: "merged".to_string(),
            source_event_id: None,
            institution_name,
            victim_raw_name: self.victim_raw_name.clone(),
            institution_type: InstitutionType::parse(&self.institution_type),
            country: self.country.clone(),
            region: self.region.clone(),
            city: self.city.clone(),
            incident_date: self.incident_date.clone(),
            date_precision: DatePrecision::parse(&self.date_precision),
            source_published_date: self.source_published_date.clone(),
            ingested_at: self.ingested_at.clone(),
            title: self.title.clone(),
            subtitle: self.subtitle.clone(),
            primary_url: self.primary_url.clone(),
            all_urls: split_urls(&self.all_urls),
            leak_site_url: self.leak_site_url.clone(),
            source_detail_url: self.source_detail_url.clone(),
            screenshot_url: self.screenshot_url.clone(),
            attack_type_hint: self.attack_type_hint.clone(),
            status: IncidentStatus::parse(&self.status),
            source_confidence: Confidence::parse(&self.source_confidence),
            notes: self.notes.clone(),
        }
    }

    pub fn broken_url_list(&self) -> Vec<String> {
        split_urls(&self.broken_urls)
    }
}

/// A cached article row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleRow {
    pub incident_id: String,
    pub url: String,
    pub title: Option<String>,
    pub body: String,
    pub author: Option<String>,
    pub publish_date: Option<String>,
    pub fetch_successful: bool,
    pub fetch_error: Option<String>,
    pub content_length: i64,
    pub fetched_at: String,
    pub url_score: Option<f64>,
    pub url_score_reasoning: Option<String>,
    pub is_primary: bool,
}

/// Article fields the fetcher persists. Scoring columns stay null for the
/// LLM stage.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub url: String,
    pub title: Option<String>,
    pub body: String,
    pub author: Option<String>,
    pub publish_date: Option<String>,
    pub fetch_successful: bool,
    pub fetch_error: Option<String>,
}

/// One article's LLM-assigned relevance score.
#[derive(Debug, Clone)]
pub struct UrlScore {
    pub url: String,
    pub score: f64,
    pub reasoning: String,
}

/// The enrichment fields the LLM stage writes back in one transaction.
#[derive(Debug, Clone)]
pub struct EnrichmentUpdate {
    pub primary_url: String,
    pub summary: String,
    pub timeline_json: String,
    pub mitre_json: String,
    pub attack_dynamics_json: String,
    pub extraction_confidence: f64,

    // Geographic / classification refinements. `None` keeps the stored value.
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub institution_type: Option<String>,
    pub incident_date: Option<String>,
    pub date_precision: Option<String>,
    pub attack_type: Option<String>,

    pub url_scores: Vec<UrlScore>,
    /// Drop non-primary article rows after an accepted save.
    pub purge_non_primary: bool,
}

/// An unenriched row eligible for selection by the enrichment pipeline.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CandidateRow {
    pub incident_id: String,
    pub institution_name: String,
    pub title: Option<String>,
    pub all_urls: String,
    pub broken_urls: String,
    pub source_published_date: Option<String>,
}

impl CandidateRow {
    pub fn urls(&self) -> Vec<String> {
        split_urls(&self.all_urls)
    }

    pub fn broken(&self) -> Vec<String> {
        split_urls(&self.broken_urls)
    }
}

/// Inputs to the post-enrichment institutional dedup pass.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EnrichedSummaryRow {
    pub incident_id: String,
    pub institution_name: String,
    pub victim_raw_name: Option<String>,
    pub incident_date: Option<String>,
    pub extraction_confidence: Option<f64>,
}

/// Counters for the run summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichmentStats {
    pub total_incidents: i64,
    pub enriched: i64,
    pub unenriched: i64,
    pub ready_for_enrichment: i64,
}
