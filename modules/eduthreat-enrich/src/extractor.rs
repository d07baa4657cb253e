//! The LLM extraction adapter: prompt construction, response validation and
//! standardization, and the sentinel outcomes the consumer acts on.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use eduthreat_store::{ArticleRow, EnrichmentUpdate, IncidentRow, UrlScore};
use llm_client::{Claude, LlmError};

use crate::error::Result;

/// Character budget for the concatenated article bodies in one prompt.
const ARTICLE_BUDGET_CHARS: usize = 60_000;

// ---------------------------------------------------------------------------
// Wire schema — what the LLM fills in
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TimelineEntry {
    /// ISO date if stated, else a relative phrase from the article.
    pub date: Option<String>,
    pub event: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MitreTechnique {
    /// e.g. "T1486"
    pub technique_id: String,
    pub name: String,
    /// Supporting quote or paraphrase from the articles.
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawUrlScore {
    pub url: String,
    /// Relevance/quality in [0,1].
    pub score: f64,
    pub reasoning: String,
}

/// The full structured response. Monetary amounts arrive in USD; durations
/// in days; both are standardized before storage.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawEnrichment {
    /// False when the victim is not an education-sector institution.
    pub is_education_related: bool,
    pub not_education_reason: Option<String>,

    pub summary: String,
    pub attack_type: Option<String>,
    pub threat_actor: Option<String>,

    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
    #[serde(default)]
    pub mitre_techniques: Vec<MitreTechnique>,

    // Attack dynamics
    pub initial_access_vector: Option<String>,
    pub persistence_mechanism: Option<String>,
    pub lateral_movement: Option<String>,
    pub exfiltration_method: Option<String>,

    // Data impact
    #[serde(default)]
    pub data_types_compromised: Vec<String>,
    pub records_affected: Option<i64>,
    pub data_encrypted: Option<bool>,
    pub data_exfiltrated: Option<bool>,

    // System impact
    #[serde(default)]
    pub systems_affected: Vec<String>,
    #[serde(default)]
    pub services_disrupted: Vec<String>,
    pub downtime_days: Option<f64>,

    // User impact
    pub students_affected: Option<i64>,
    pub staff_affected: Option<i64>,
    pub notifications_issued: Option<bool>,

    // Financial impact (USD)
    pub ransom_demanded_usd: Option<f64>,
    pub ransom_paid_usd: Option<f64>,
    pub estimated_cost_usd: Option<f64>,

    // Regulatory impact
    #[serde(default)]
    pub regulatory_notifications: Vec<String>,
    pub lawsuits_filed: Option<bool>,

    // Recovery
    pub recovery_time_days: Option<f64>,
    pub fully_recovered: Option<bool>,

    // Geographic / classification refinements
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    /// "university" | "school" | "research-institute" | "unknown"
    pub institution_type: Option<String>,
    pub incident_date: Option<String>,
    /// "day" | "month" | "year" | "unknown"
    pub date_precision: Option<String>,

    /// The single most informative article, chosen from the supplied URLs.
    pub primary_url: String,
    #[serde(default)]
    pub url_scores: Vec<RawUrlScore>,

    /// Overall extraction confidence in [0,1].
    pub extraction_confidence: f64,
}

// ---------------------------------------------------------------------------
// Standardized result
// ---------------------------------------------------------------------------

/// Impact, dynamics, and recovery fields after standardization: money in
/// integer minor units (cents), durations in integer hours. Stored as the
/// attack-dynamics blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackDynamics {
    pub attack_type: Option<String>,
    pub threat_actor: Option<String>,
    pub initial_access_vector: Option<String>,
    pub persistence_mechanism: Option<String>,
    pub lateral_movement: Option<String>,
    pub exfiltration_method: Option<String>,

    pub data_types_compromised: Vec<String>,
    pub records_affected: Option<i64>,
    pub data_encrypted: Option<bool>,
    pub data_exfiltrated: Option<bool>,

    pub systems_affected: Vec<String>,
    pub services_disrupted: Vec<String>,
    pub downtime_hours: Option<i64>,

    pub students_affected: Option<i64>,
    pub staff_affected: Option<i64>,
    pub notifications_issued: Option<bool>,

    pub ransom_demanded_minor: Option<i64>,
    pub ransom_paid_minor: Option<i64>,
    pub estimated_cost_minor: Option<i64>,

    pub regulatory_notifications: Vec<String>,
    pub lawsuits_filed: Option<bool>,

    pub recovery_time_hours: Option<i64>,
    pub fully_recovered: Option<bool>,
}

/// A validated, standardized enrichment ready to persist.
#[derive(Debug, Clone)]
pub struct EnrichmentResult {
    pub summary: String,
    pub timeline: Vec<TimelineEntry>,
    pub mitre_techniques: Vec<MitreTechnique>,
    pub dynamics: AttackDynamics,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub institution_type: Option<String>,
    pub incident_date: Option<String>,
    pub date_precision: Option<String>,
    pub primary_url: String,
    pub url_scores: Vec<UrlScore>,
    pub extraction_confidence: f64,
}

impl EnrichmentResult {
    pub fn to_update(&self) -> EnrichmentUpdate {
        EnrichmentUpdate {
            primary_url: self.primary_url.clone(),
            summary: self.summary.clone(),
            timeline_json: serde_json::to_string(&self.timeline).unwrap_or_else(|_| "[]".into()),
            mitre_json: serde_json::to_string(&self.mitre_techniques)
                .unwrap_or_else(|_| "[]".into()),
            attack_dynamics_json: serde_json::to_string(&self.dynamics)
                .unwrap_or_else(|_| "{}".into()),
            extraction_confidence: self.extraction_confidence,
            country: self.country.clone(),
            region: self.region.clone(),
            city: self.city.clone(),
            institution_type: self.institution_type.clone(),
            incident_date: self.incident_date.clone(),
            date_precision: self.date_precision.clone(),
            attack_type: self.dynamics.attack_type.clone(),
            url_scores: self.url_scores.clone(),
            purge_non_primary: true,
        }
    }
}

/// What the consumer does with one incident.
#[derive(Debug)]
pub enum ExtractionOutcome {
    Enriched(Box<EnrichmentResult>),
    /// Permanent skip, no retry.
    NotEducationRelated { reason: String },
    /// Transient: the incident stays untouched and is eligible next run.
    Failed { reason: String },
}

/// Seam for the consumer: Claude in production, scripted outcomes in tests.
#[async_trait]
pub trait EnrichmentExtractor: Send + Sync {
    async fn extract(
        &self,
        incident: &IncidentRow,
        articles: &[ArticleRow],
    ) -> Result<ExtractionOutcome>;
}

// ---------------------------------------------------------------------------
// Claude-backed implementation
// ---------------------------------------------------------------------------

const SYSTEM_PROMPT: &str = "You are a cyber-threat-intelligence analyst specializing in \
attacks on the education sector (universities, schools, research institutes). \
Given an incident record and the news articles covering it, extract a complete \
structured intelligence report. Only state facts supported by the articles; \
use null for anything not reported. Express monetary amounts in USD and \
durations in days. Score every supplied article URL for how informative it is \
about this specific incident and pick the single best one as primary_url. \
If the victim is not an education-sector institution, set \
is_education_related to false and explain briefly in not_education_reason.";

pub struct LlmEnrichmentExtractor {
    claude: Claude,
}

impl LlmEnrichmentExtractor {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            claude: Claude::new(api_key, model),
        }
    }
}

#[async_trait]
impl EnrichmentExtractor for LlmEnrichmentExtractor {
    async fn extract(
        &self,
        incident: &IncidentRow,
        articles: &[ArticleRow],
    ) -> Result<ExtractionOutcome> {
        let usable: Vec<&ArticleRow> = articles
            .iter()
            .filter(|a| a.fetch_successful && !a.body.trim().is_empty())
            .collect();
        if usable.is_empty() {
            return Ok(ExtractionOutcome::Failed {
                reason: "no usable articles".to_string(),
            });
        }

        let prompt = build_user_prompt(incident, &usable);

        let raw: RawEnrichment = match self.claude.extract(SYSTEM_PROMPT, &prompt).await {
            Ok(raw) => raw,
            Err(e @ LlmError::RateLimited(_)) => return Err(e.into()),
            Err(e) => {
                warn!(incident_id = %incident.incident_id, error = %e, "Extraction failed");
                return Ok(ExtractionOutcome::Failed {
                    reason: e.to_string(),
                });
            }
        };

        if !raw.is_education_related {
            let reason = raw
                .not_education_reason
                .unwrap_or_else(|| "victim is not an education-sector institution".to_string());
            return Ok(ExtractionOutcome::NotEducationRelated { reason });
        }

        let supplied: Vec<&str> = usable.iter().map(|a| a.url.as_str()).collect();
        match standardize(raw, &supplied) {
            Ok(result) => Ok(ExtractionOutcome::Enriched(Box::new(result))),
            Err(reason) => Ok(ExtractionOutcome::Failed { reason }),
        }
    }
}

/// Incident snapshot plus article digest, trimmed longest-first to the
/// character budget.
fn build_user_prompt(incident: &IncidentRow, articles: &[&ArticleRow]) -> String {
    let mut prompt = String::new();
    prompt.push_str("## Incident record\n");
    prompt.push_str(&format!("Institution: {}\n", incident.institution_name));
    if let Some(ref raw) = incident.victim_raw_name {
        prompt.push_str(&format!("Raw victim label: {raw}\n"));
    }
    if let Some(ref title) = incident.title {
        prompt.push_str(&format!("Report title: {title}\n"));
    }
    if let Some(ref date) = incident.incident_date {
        prompt.push_str(&format!("Reported incident date: {date}\n"));
    }
    if let Some(ref country) = incident.country {
        prompt.push_str(&format!("Country: {country}\n"));
    }
    if let Some(ref hint) = incident.attack_type_hint {
        prompt.push_str(&format!("Attack type hint: {hint}\n"));
    }

    prompt.push_str("\n## Articles\n");
    for (i, (article, body)) in articles
        .iter()
        .zip(digest_bodies(articles, ARTICLE_BUDGET_CHARS))
        .enumerate()
    {
        prompt.push_str(&format!(
            "\n### Article {} — {}\nTitle: {}\n\n{}\n",
            i + 1,
            article.url,
            article.title.as_deref().unwrap_or("(untitled)"),
            body,
        ));
    }
    prompt
}

/// Allocate the character budget across article bodies, trimming the
/// longest ones first until everything fits.
fn digest_bodies(articles: &[&ArticleRow], budget: usize) -> Vec<String> {
    let mut allowance: Vec<usize> = articles.iter().map(|a| a.body.len()).collect();
    let mut total: usize = allowance.iter().sum();

    while total > budget {
        let excess = total - budget;
        let (longest, &len) = allowance
            .iter()
            .enumerate()
            .max_by_key(|(_, len)| **len)
            .expect("non-empty");
        let second = allowance
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != longest)
            .map(|(_, len)| *len)
            .max()
            .unwrap_or(0);
        // Trim the longest body down to its peer (or by the full excess).
        let cut = (len - second).max(1).min(excess);
        allowance[longest] = len - cut;
        total -= cut;
    }

    articles
        .iter()
        .zip(allowance)
        .map(|(article, limit)| truncate_on_char_boundary(&article.body, limit))
        .collect()
}

fn truncate_on_char_boundary(s: &str, mut limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    while limit > 0 && !s.is_char_boundary(limit) {
        limit -= 1;
    }
    s[..limit].to_string()
}

/// Validate and standardize the raw response: confidence clamped to [0,1],
/// primary URL forced into the supplied set, USD → minor units, days →
/// hours.
fn standardize(raw: RawEnrichment, supplied_urls: &[&str]) -> std::result::Result<EnrichmentResult, String> {
    if raw.summary.trim().is_empty() {
        return Err("empty summary".to_string());
    }

    let primary_url = if supplied_urls.contains(&raw.primary_url.as_str()) {
        raw.primary_url.clone()
    } else {
        // An unknown election is a schema violation; fall back to the
        // best-scored supplied URL rather than discarding the extraction.
        warn!(elected = %raw.primary_url, "Primary URL not in supplied set, re-electing");
        raw.url_scores
            .iter()
            .filter(|s| supplied_urls.contains(&s.url.as_str()))
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .map(|s| s.url.clone())
            .or_else(|| supplied_urls.first().map(|u| u.to_string()))
            .ok_or_else(|| "no supplied URLs to elect primary from".to_string())?
    };

    let url_scores = raw
        .url_scores
        .iter()
        .filter(|s| supplied_urls.contains(&s.url.as_str()))
        .map(|s| UrlScore {
            url: s.url.clone(),
            score: s.score.clamp(0.0, 1.0),
            reasoning: s.reasoning.clone(),
        })
        .collect();

    let dynamics = AttackDynamics {
        attack_type: raw.attack_type,
        threat_actor: raw.threat_actor,
        initial_access_vector: raw.initial_access_vector,
        persistence_mechanism: raw.persistence_mechanism,
        lateral_movement: raw.lateral_movement,
        exfiltration_method: raw.exfiltration_method,
        data_types_compromised: raw.data_types_compromised,
        records_affected: raw.records_affected,
        data_encrypted: raw.data_encrypted,
        data_exfiltrated: raw.data_exfiltrated,
        systems_affected: raw.systems_affected,
        services_disrupted: raw.services_disrupted,
        downtime_hours: raw.downtime_days.map(days_to_hours),
        students_affected: raw.students_affected,
        staff_affected: raw.staff_affected,
        notifications_issued: raw.notifications_issued,
        ransom_demanded_minor: raw.ransom_demanded_usd.map(usd_to_minor),
        ransom_paid_minor: raw.ransom_paid_usd.map(usd_to_minor),
        estimated_cost_minor: raw.estimated_cost_usd.map(usd_to_minor),
        regulatory_notifications: raw.regulatory_notifications,
        lawsuits_filed: raw.lawsuits_filed,
        recovery_time_hours: raw.recovery_time_days.map(days_to_hours),
        fully_recovered: raw.fully_recovered,
    };

    Ok(EnrichmentResult {
        summary: raw.summary,
        timeline: raw.timeline,
        mitre_techniques: raw.mitre_techniques,
        dynamics,
        country: raw.country,
        region: raw.region,
        city: raw.city,
        institution_type: raw.institution_type,
        incident_date: raw.incident_date,
        date_precision: raw.date_precision,
        primary_url,
        url_scores,
        extraction_confidence: raw.extraction_confidence.clamp(0.0, 1.0),
    })
}

fn usd_to_minor(usd: f64) -> i64 {
    (usd * 100.0).round() as i64
}

fn days_to_hours(days: f64) -> i64 {
    (days * 24.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(url: &str, body_len: usize) -> ArticleRow {
        ArticleRow {
            incident_id: "inc_1".to_string(),
            url: url.to_string(),
            title: Some("Coverage".to_string()),
            body: "x".repeat(body_len),
            author: None,
            publish_date: None,
            fetch_successful: true,
            fetch_error: None,
            content_length: body_len as i64,
            fetched_at: "2025-06-01T00:00:00Z".to_string(),
            url_score: None,
            url_score_reasoning: None,
            is_primary: false,
        }
    }

    fn raw(primary: &str, confidence: f64) -> RawEnrichment {
        RawEnrichment {
            is_education_related: true,
            not_education_reason: None,
            summary: "Ransomware attack encrypted campus systems.".to_string(),
            attack_type: Some("ransomware".to_string()),
            threat_actor: None,
            timeline: Vec::new(),
            mitre_techniques: Vec::new(),
            initial_access_vector: None,
            persistence_mechanism: None,
            lateral_movement: None,
            exfiltration_method: None,
            data_types_compromised: Vec::new(),
            records_affected: None,
            data_encrypted: Some(true),
            data_exfiltrated: None,
            systems_affected: Vec::new(),
            services_disrupted: Vec::new(),
            downtime_days: Some(2.5),
            students_affected: None,
            staff_affected: None,
            notifications_issued: None,
            ransom_demanded_usd: Some(150_000.5),
            ransom_paid_usd: None,
            estimated_cost_usd: None,
            regulatory_notifications: Vec::new(),
            lawsuits_filed: None,
            recovery_time_days: Some(7.0),
            fully_recovered: None,
            country: Some("US".to_string()),
            region: None,
            city: None,
            institution_type: Some("university".to_string()),
            incident_date: Some("2025-01-15".to_string()),
            date_precision: Some("day".to_string()),
            primary_url: primary.to_string(),
            url_scores: vec![RawUrlScore {
                url: "https://a.example/1".to_string(),
                score: 0.9,
                reasoning: "detailed first-party coverage".to_string(),
            }],
            extraction_confidence: confidence,
        }
    }

    #[test]
    fn standardize_converts_money_and_durations() {
        let result = standardize(raw("https://a.example/1", 0.8), &["https://a.example/1"]).unwrap();
        assert_eq!(result.dynamics.ransom_demanded_minor, Some(15_000_050));
        assert_eq!(result.dynamics.downtime_hours, Some(60));
        assert_eq!(result.dynamics.recovery_time_hours, Some(168));
    }

    #[test]
    fn confidence_is_clamped() {
        let result = standardize(raw("https://a.example/1", 1.7), &["https://a.example/1"]).unwrap();
        assert_eq!(result.extraction_confidence, 1.0);
        let result = standardize(raw("https://a.example/1", -0.2), &["https://a.example/1"]).unwrap();
        assert_eq!(result.extraction_confidence, 0.0);
    }

    #[test]
    fn unknown_primary_url_reelects_from_supplied_set() {
        let result = standardize(
            raw("https://hallucinated.example/x", 0.8),
            &["https://a.example/1", "https://b.example/2"],
        )
        .unwrap();
        assert_eq!(result.primary_url, "https://a.example/1", "best-scored supplied URL wins");
    }

    #[test]
    fn empty_summary_is_a_schema_failure() {
        let mut r = raw("https://a.example/1", 0.8);
        r.summary = "   ".to_string();
        assert!(standardize(r, &["https://a.example/1"]).is_err());
    }

    #[test]
    fn scores_for_unknown_urls_are_dropped() {
        let mut r = raw("https://a.example/1", 0.8);
        r.url_scores.push(RawUrlScore {
            url: "https://unknown.example/z".to_string(),
            score: 0.5,
            reasoning: "n/a".to_string(),
        });
        let result = standardize(r, &["https://a.example/1"]).unwrap();
        assert_eq!(result.url_scores.len(), 1);
    }

    #[test]
    fn digest_trims_longest_bodies_first() {
        let a = article("https://a.example/1", 500);
        let b = article("https://b.example/2", 100);
        let bodies = digest_bodies(&[&a, &b], 300);
        assert_eq!(bodies[0].len() + bodies[1].len(), 300);
        assert_eq!(bodies[1].len(), 100, "short article untouched");
        assert_eq!(bodies[0].len(), 200, "long article absorbed the trim");
    }

    #[test]
    fn digest_within_budget_is_untouched() {
        let a = article("https://a.example/1", 100);
        let b = article("https://b.example/2", 50);
        let bodies = digest_bodies(&[&a, &b], 1000);
        assert_eq!(bodies[0].len(), 100);
        assert_eq!(bodies[1].len(), 50);
    }

    #[test]
    fn prompt_contains_snapshot_and_articles() {
        let mut inc_article = article("https://a.example/1", 80);
        inc_article.title = Some("Breach confirmed".to_string());
        let incident = IncidentRow {
            incident_id: "inc_1".to_string(),
            institution_name: "Test University".to_string(),
            victim_raw_name: None,
            institution_type: "university".to_string(),
            country: Some("US".to_string()),
            region: None,
            city: None,
            incident_date: Some("2025-01-15".to_string()),
            date_precision: "day".to_string(),
            source_published_date: None,
            ingested_at: None,
            last_updated_at: None,
            title: Some("Ransomware at Test University".to_string()),
            subtitle: None,
            primary_url: None,
            all_urls: "https://a.example/1".to_string(),
            broken_urls: String::new(),
            leak_site_url: None,
            source_detail_url: None,
            screenshot_url: None,
            attack_type_hint: Some("ransomware".to_string()),
            status: "suspected".to_string(),
            source_confidence: "medium".to_string(),
            notes: None,
            enriched: false,
            enriched_at: None,
            summary: None,
            timeline: None,
            mitre_techniques: None,
            attack_dynamics: None,
            extraction_confidence: None,
            skip_reason: None,
        };
        let prompt = build_user_prompt(&incident, &[&inc_article]);
        assert!(prompt.contains("Test University"));
        assert!(prompt.contains("https://a.example/1"));
        assert!(prompt.contains("Breach confirmed"));
        assert!(prompt.contains("ransomware"));
    }
}
