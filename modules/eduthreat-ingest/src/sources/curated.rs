//! Curated sources: sites and APIs with dedicated education-sector
//! sections, so every item is already in scope.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use eduthreat_common::{Confidence, DatePrecision, Incident, InstitutionType};

use crate::adapter::{AdapterOptions, BatchSink, SourceAdapter};
use crate::sources::{attack_type_hint, extract_links, institution_from_title};

/// Max listing links pulled per page.
const LINKS_PER_PAGE: usize = 60;

// ---------------------------------------------------------------------------
// konbriefing — hand-maintained index of attacks on universities and schools
// ---------------------------------------------------------------------------

pub struct KonbriefingAdapter {
    http: reqwest::Client,
}

impl KonbriefingAdapter {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SourceAdapter for KonbriefingAdapter {
    fn tag(&self) -> &str {
        "konbriefing"
    }

    async fn collect(&self, _opts: &AdapterOptions, sink: &mut BatchSink<'_>) -> Result<()> {
        let url = "https://konbriefing.com/en-topics/cyber-attacks-universities.html";
        let html = self
            .http
            .get(url)
            .send()
            .await
            .context("fetching konbriefing index")?
            .error_for_status()?
            .text()
            .await?;

        let mut emitted = 0u32;
        for (link, text) in extract_links(&html, url, "konbriefing.com", LINKS_PER_PAGE) {
            if text.trim().is_empty() || link == url {
                continue;
            }
            let name = institution_from_title(&text);
            let mut incident = Incident::new("konbriefing", &name, &link);
            incident.source_confidence = Confidence::High;
            incident.institution_type = InstitutionType::University;
            incident.title = Some(text.clone());
            incident.all_urls = vec![link];
            incident.attack_type_hint = attack_type_hint(&text);
            sink.push(incident).await?;
            emitted += 1;
        }

        info!(source = "konbriefing", emitted, "Index scan complete");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ransomware.live — public API of leak-site claims, filtered to education
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RansomwareVictim {
    #[serde(default)]
    victim: String,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    attackdate: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    activity: Option<String>,
    #[serde(default)]
    claim_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    screenshot: Option<String>,
    #[serde(default)]
    discovered: Option<String>,
    #[serde(default)]
    press: Option<Vec<PressLink>>,
}

#[derive(Debug, Deserialize)]
struct PressLink {
    #[serde(default)]
    link: Option<String>,
}

pub struct RansomwareLiveAdapter {
    http: reqwest::Client,
    base_url: String,
}

impl RansomwareLiveAdapter {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: "https://api.ransomware.live/v2".to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for RansomwareLiveAdapter {
    fn tag(&self) -> &str {
        "ransomwarelive"
    }

    async fn collect(&self, _opts: &AdapterOptions, sink: &mut BatchSink<'_>) -> Result<()> {
        let url = format!("{}/recentvictims", self.base_url);
        let victims: Vec<RansomwareVictim> = self
            .http
            .get(&url)
            .send()
            .await
            .context("fetching ransomware.live victims")?
            .error_for_status()?
            .json()
            .await
            .context("parsing ransomware.live response")?;

        let mut emitted = 0u32;
        for victim in victims {
            let sector = victim.activity.as_deref().unwrap_or("").to_lowercase();
            if !sector.contains("education") {
                continue;
            }
            if victim.victim.trim().is_empty() {
                warn!(source = "ransomwarelive", "Victim without a name, skipping");
                continue;
            }

            let slug = format!(
                "{}|{}",
                victim.victim,
                victim.attackdate.as_deref().unwrap_or("")
            );
            let mut incident = Incident::new("ransomwarelive", victim.victim.trim(), &slug);
            incident.source_event_id = Some(slug);
            incident.country = victim.country.clone();
            incident.incident_date = victim.attackdate.clone();
            incident.date_precision = if victim.attackdate.is_some() {
                DatePrecision::Day
            } else {
                DatePrecision::Unknown
            };
            incident.source_published_date = victim.discovered.clone();
            incident.title = victim
                .group
                .as_deref()
                .map(|g| format!("{g} claims attack on {}", victim.victim.trim()));
            // Leak-site claims are allegations until corroborated.
            incident.attack_type_hint = Some("ransomware".to_string());
            incident.leak_site_url = victim.claim_url.clone();
            incident.source_detail_url = victim.url.clone();
            incident.screenshot_url = victim.screenshot.clone();
            incident.all_urls = victim
                .press
                .unwrap_or_default()
                .into_iter()
                .filter_map(|p| p.link)
                .collect();

            sink.push(incident).await?;
            emitted += 1;
        }

        info!(source = "ransomwarelive", emitted, "API scan complete");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// databreaches.net — paginated education-sector category listing
// ---------------------------------------------------------------------------

pub struct DatabreachAdapter {
    http: reqwest::Client,
}

impl DatabreachAdapter {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SourceAdapter for DatabreachAdapter {
    fn tag(&self) -> &str {
        "databreach"
    }

    async fn collect(&self, opts: &AdapterOptions, sink: &mut BatchSink<'_>) -> Result<()> {
        let base = "https://databreaches.net/category/breach-reports/education-sector/";
        // Unbounded runs still stop at a sane ceiling; the site has finite
        // history and a 404 ends the walk earlier.
        let max_pages = opts.max_pages.unwrap_or(50);

        let mut emitted = 0u32;
        for page in 1..=max_pages {
            let page_url = if page == 1 {
                base.to_string()
            } else {
                format!("{base}page/{page}/")
            };

            let response = self
                .http
                .get(&page_url)
                .send()
                .await
                .with_context(|| format!("fetching {page_url}"))?;
            if !response.status().is_success() {
                info!(source = "databreach", page, "Listing exhausted");
                break;
            }
            let html = response.text().await?;

            let links = extract_links(&html, &page_url, "databreaches.net/", LINKS_PER_PAGE);
            let mut page_emitted = 0u32;
            for (link, text) in links {
                // Category/navigation links have no headline text.
                if text.trim().len() < 15 || link.contains("/category/") || link.contains("/page/")
                {
                    continue;
                }
                let mut incident =
                    Incident::new("databreach", &institution_from_title(&text), &link);
                incident.title = Some(text.clone());
                incident.all_urls = vec![link];
                incident.attack_type_hint = attack_type_hint(&text);
                sink.push(incident).await?;
                page_emitted += 1;
            }

            emitted += page_emitted;
            if page_emitted == 0 {
                break;
            }
        }

        info!(source = "databreach", emitted, "Listing scan complete");
        Ok(())
    }
}
