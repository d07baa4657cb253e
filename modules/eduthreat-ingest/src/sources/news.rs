//! Keyword-search news adapters. One generic scanner covers the security
//! news sites; each instance differs only in tag and listing URL shape.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use eduthreat_common::Incident;

use crate::adapter::{AdapterOptions, BatchSink, SourceAdapter};
use crate::sources::{attack_type_hint, extract_links, institution_from_title, is_education_related};

const LINKS_PER_PAGE: usize = 40;
const DEFAULT_MAX_PAGES: u32 = 3;

pub struct NewsSearchAdapter {
    tag: &'static str,
    /// Listing URL with a `{page}` placeholder.
    listing_template: &'static str,
    /// Substring article links must contain.
    link_pattern: &'static str,
    http: reqwest::Client,
}

impl NewsSearchAdapter {
    fn new(
        tag: &'static str,
        listing_template: &'static str,
        link_pattern: &'static str,
        http: reqwest::Client,
    ) -> Self {
        Self {
            tag,
            listing_template,
            link_pattern,
            http,
        }
    }

    /// The full news roster.
    pub fn roster(http: reqwest::Client) -> Vec<Self> {
        vec![
            Self::new(
                "krebsonsecurity",
                "https://krebsonsecurity.com/page/{page}/?s=university",
                "krebsonsecurity.com/20",
                http.clone(),
            ),
            Self::new(
                "thehackernews",
                "https://thehackernews.com/search/label/data%20breach?page={page}",
                "thehackernews.com/20",
                http.clone(),
            ),
            Self::new(
                "therecord",
                "https://therecord.media/news/education?page={page}",
                "therecord.media/",
                http.clone(),
            ),
            Self::new(
                "securityweek",
                "https://www.securityweek.com/page/{page}/?s=university",
                "securityweek.com/",
                http.clone(),
            ),
            Self::new(
                "darkreading",
                "https://www.darkreading.com/search?q=university&page={page}",
                "darkreading.com/",
                http,
            ),
        ]
    }
}

#[async_trait]
impl SourceAdapter for NewsSearchAdapter {
    fn tag(&self) -> &str {
        self.tag
    }

    async fn collect(&self, opts: &AdapterOptions, sink: &mut BatchSink<'_>) -> Result<()> {
        let max_pages = opts.max_pages.unwrap_or(DEFAULT_MAX_PAGES);

        let mut emitted = 0u32;
        for page in 1..=max_pages {
            let page_url = self.listing_template.replace("{page}", &page.to_string());
            let response = self
                .http
                .get(&page_url)
                .send()
                .await
                .with_context(|| format!("fetching {page_url}"))?;
            if !response.status().is_success() {
                break;
            }
            let html = response.text().await?;

            let mut page_emitted = 0u32;
            for (link, text) in extract_links(&html, &page_url, self.link_pattern, LINKS_PER_PAGE) {
                // Search listings mix in-scope and out-of-scope stories.
                if text.trim().len() < 15 || !is_education_related(&text) {
                    continue;
                }
                let mut incident = Incident::new(self.tag, &institution_from_title(&text), &link);
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

        info!(source = self.tag, emitted, "Search scan complete");
        Ok(())
    }
}
