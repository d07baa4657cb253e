use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::make_incident_id;

/// Qualitative confidence a source assigns to its own reports.
/// Ordering matters: `High` outranks `Medium` outranks `Low` during merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }

    /// Parse a stored label, defaulting to `Medium` for unknown values.
    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Confidence::Low,
            "high" => Confidence::High,
            _ => Confidence::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Suspected,
    Confirmed,
}

impl IncidentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IncidentStatus::Suspected => "suspected",
            IncidentStatus::Confirmed => "confirmed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => IncidentStatus::Confirmed,
            _ => IncidentStatus::Suspected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstitutionType {
    University,
    School,
    ResearchInstitute,
    Unknown,
}

impl InstitutionType {
    pub fn as_str(self) -> &'static str {
        match self {
            InstitutionType::University => "university",
            InstitutionType::School => "school",
            InstitutionType::ResearchInstitute => "research-institute",
            InstitutionType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "university" => InstitutionType::University,
            "school" => InstitutionType::School,
            "research-institute" => InstitutionType::ResearchInstitute,
            _ => InstitutionType::Unknown,
        }
    }
}

/// How precise the reported incident date is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePrecision {
    Day,
    Month,
    Year,
    Unknown,
}

impl DatePrecision {
    pub fn as_str(self) -> &'static str {
        match self {
            DatePrecision::Day => "day",
            DatePrecision::Month => "month",
            DatePrecision::Year => "year",
            DatePrecision::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "day" => DatePrecision::Day,
            "month" => DatePrecision::Month,
            "year" => DatePrecision::Year,
            _ => DatePrecision::Unknown,
        }
    }
}

/// A deduplicated report of one attack on one education-sector institution.
///
/// `incident_id` is computed once at creation time via [`make_incident_id`]
/// and never mutated; merges always keep the surviving row's id. The
/// enrichment block lives in the store, not here — adapters and the dedup
/// engine only ever see these base attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    /// Tag of the source this record came from. After a merge this is the
    /// primary (highest-confidence) contributor; full attribution lives in
    /// the `incident_sources` table.
    pub source: String,
    pub source_event_id: Option<String>,

    /// Best normalized victim label.
    pub institution_name: String,
    /// Untouched original label from the source.
    pub victim_raw_name: Option<String>,

    pub institution_type: InstitutionType,
    /// ISO-2 country code.
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,

    /// `YYYY-MM-DD` or a partial form; see `date_precision`.
    pub incident_date: Option<String>,
    pub date_precision: DatePrecision,
    pub source_published_date: Option<String>,
    pub ingested_at: Option<String>,

    pub title: Option<String>,
    pub subtitle: Option<String>,

    /// Elected by the LLM stage; always `None` until enrichment.
    pub primary_url: Option<String>,
    /// Every enrichment-relevant URL (news articles, official statements).
    pub all_urls: Vec<String>,

    // CTI reference URLs — tracked but never fetched for enrichment.
    pub leak_site_url: Option<String>,
    pub source_detail_url: Option<String>,
    pub screenshot_url: Option<String>,

    pub attack_type_hint: Option<String>,
    pub status: IncidentStatus,
    pub source_confidence: Confidence,

    pub notes: Option<String>,
}

impl Incident {
    /// Build a fresh incident for `source` with its id derived from
    /// `unique`. All optional attributes start empty; adapters fill in what
    /// their source exposes.
    pub fn new(source: &str, institution_name: &str, unique: &str) -> Self {
        Self {
            incident_id: make_incident_id(source, unique),
            source: source.to_string(),
            source_event_id: None,
            institution_name: institution_name.to_string(),
            victim_raw_name: Some(institution_name.to_string()),
            institution_type: InstitutionType::Unknown,
            country: None,
            region: None,
            city: None,
            incident_date: None,
            date_precision: DatePrecision::Unknown,
            source_published_date: None,
            ingested_at: Some(Utc::now().to_rfc3339()),
            title: None,
            subtitle: None,
            primary_url: None,
            all_urls: Vec::new(),
            leak_site_url: None,
            source_detail_url: None,
            screenshot_url: None,
            attack_type_hint: None,
            status: IncidentStatus::Suspected,
            source_confidence: Confidence::Medium,
            notes: None,
        }
    }

    /// Per-source event key: source-native id if present, else the first
    /// URL, else the incident id itself.
    pub fn event_key(&self) -> String {
        if let Some(ref id) = self.source_event_id {
            return id.clone();
        }
        if let Some(url) = self.all_urls.first() {
            return url.clone();
        }
        self.incident_id.clone()
    }
}

/// One source's claim that an incident exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAttribution {
    pub source: String,
    pub source_event_id: Option<String>,
    pub first_seen_at: String,
    pub confidence: Confidence,
}

/// Join a URL set the way the store and CSV export serialize it.
pub fn join_urls(urls: &[String]) -> String {
    urls.join(";")
}

/// Split a `;`-joined URL set, dropping empty segments.
pub fn split_urls(joined: &str) -> Vec<String> {
    joined
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_ordering() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
    }

    #[test]
    fn confidence_parse_roundtrip() {
        for c in [Confidence::Low, Confidence::Medium, Confidence::High] {
            assert_eq!(Confidence::parse(c.as_str()), c);
        }
    }

    #[test]
    fn confidence_parse_unknown_defaults_to_medium() {
        assert_eq!(Confidence::parse("certain"), Confidence::Medium);
    }

    #[test]
    fn event_key_prefers_source_event_id() {
        let mut inc = Incident::new("s1", "Test University", "k");
        inc.source_event_id = Some("slug-1".to_string());
        inc.all_urls = vec!["https://example.com/a".to_string()];
        assert_eq!(inc.event_key(), "slug-1");
    }

    #[test]
    fn event_key_falls_back_to_first_url() {
        let mut inc = Incident::new("s1", "Test University", "k");
        inc.all_urls = vec![
            "https://example.com/a".to_string(),
            "https://example.com/b".to_string(),
        ];
        assert_eq!(inc.event_key(), "https://example.com/a");
    }

    #[test]
    fn event_key_falls_back_to_incident_id() {
        let inc = Incident::new("s1", "Test University", "k");
        assert_eq!(inc.event_key(), inc.incident_id);
    }

    #[test]
    fn url_join_split_roundtrip() {
        let urls = vec![
            "https://a.example/x".to_string(),
            "https://b.example/y".to_string(),
        ];
        assert_eq!(split_urls(&join_urls(&urls)), urls);
        assert!(split_urls("").is_empty());
        assert_eq!(split_urls(" https://a.example/x ; "), vec!["https://a.example/x"]);
    }
}
