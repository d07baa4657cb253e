//! HTTP article retrieval. Failures are first-class values, never
//! exceptions: every URL yields an [`ArticleContent`] whose success flag
//! and error text are persisted as-is.

use std::time::Duration;

use async_trait::async_trait;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};
use tracing::{info, warn};

use eduthreat_store::NewArticle;

/// Per-request timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
/// A readable body needs at least this many non-whitespace characters.
const MIN_BODY_CHARS: usize = 50;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// What one fetch attempt produced.
#[derive(Debug, Clone)]
pub struct ArticleContent {
    pub url: String,
    pub title: Option<String>,
    pub body: String,
    pub author: Option<String>,
    pub publish_date: Option<String>,
    pub fetch_successful: bool,
    pub error_message: Option<String>,
    /// HTTP status of the final response, if one arrived.
    pub http_status: Option<u16>,
}

impl ArticleContent {
    pub fn failure(url: &str, message: String, http_status: Option<u16>) -> Self {
        Self {
            url: url.to_string(),
            title: None,
            body: String::new(),
            author: None,
            publish_date: None,
            fetch_successful: false,
            error_message: Some(message),
            http_status,
        }
    }

    pub fn was_forbidden(&self) -> bool {
        self.http_status == Some(403)
    }

    pub fn to_new_article(&self) -> NewArticle {
        NewArticle {
            url: self.url.clone(),
            title: self.title.clone(),
            body: self.body.clone(),
            author: self.author.clone(),
            publish_date: self.publish_date.clone(),
            fetch_successful: self.fetch_successful,
            fetch_error: self.error_message.clone(),
        }
    }
}

/// Seam for the enrichment producer: real HTTP in production, canned pages
/// in tests.
#[async_trait]
pub trait ArticleFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> ArticleContent;
}

pub struct ArticleFetcher {
    http: reqwest::Client,
}

impl ArticleFetcher {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

impl Default for ArticleFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArticleFetch for ArticleFetcher {
    async fn fetch(&self, url: &str) -> ArticleContent {
        info!(url, "Fetching article");

        let response = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url, error = %e, "Article request failed");
                return ArticleContent::failure(url, e.to_string(), None);
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "Article fetch returned error status");
            return ArticleContent::failure(
                url,
                format!("HTTP {}", status.as_u16()),
                Some(status.as_u16()),
            );
        }

        let html = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                warn!(url, error = %e, "Failed to read article body");
                return ArticleContent::failure(url, e.to_string(), Some(status.as_u16()));
            }
        };

        let body = readable_body(&html, url);
        if count_non_whitespace(&body) < MIN_BODY_CHARS {
            warn!(url, chars = body.len(), "Article body too short to be usable");
            return ArticleContent::failure(
                url,
                format!("readable body under {MIN_BODY_CHARS} characters"),
                Some(status.as_u16()),
            );
        }

        info!(url, bytes = body.len(), "Fetched article");
        ArticleContent {
            url: url.to_string(),
            title: extract_title(&html),
            body,
            author: extract_meta(&html, "author"),
            publish_date: extract_meta_property(&html, "article:published_time"),
            fetch_successful: true,
            error_message: None,
            http_status: Some(status.as_u16()),
        }
    }
}

/// Distill a fetched page down to the article text the enrichment prompt
/// will see. Readability main-content extraction drops navigation, ads, and
/// comment sections, so the [`MIN_BODY_CHARS`] floor below measures actual
/// reporting rather than page chrome; markdown keeps headings and lists
/// legible to the LLM. Resolving against the page URL lets relative links
/// survive into the digest.
fn readable_body(html: &str, page_url: &str) -> String {
    let page_url = url::Url::parse(page_url).ok();
    transform_content_input(
        TransformInput {
            url: page_url.as_ref(),
            content: html.as_bytes(),
            screenshot_bytes: None,
            encoding: None,
            selector_config: None,
            ignore_tags: None,
        },
        &TransformConfig {
            readability: true,
            main_content: true,
            return_format: ReturnFormat::Markdown,
            filter_images: true,
            filter_svg: true,
            clean_html: true,
        },
    )
}

fn count_non_whitespace(s: &str) -> usize {
    s.chars().filter(|c| !c.is_whitespace()).count()
}

fn extract_title(html: &str) -> Option<String> {
    let re = regex::Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex");
    re.captures(html)
        .map(|c| c[1].split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

fn extract_meta(html: &str, name: &str) -> Option<String> {
    let re = regex::Regex::new(&format!(
        r#"(?i)<meta\s[^>]*name\s*=\s*["']{name}["'][^>]*content\s*=\s*["']([^"']+)["']"#
    ))
    .ok()?;
    re.captures(html).map(|c| c[1].trim().to_string())
}

fn extract_meta_property(html: &str, property: &str) -> Option<String> {
    let re = regex::Regex::new(&format!(
        r#"(?i)<meta\s[^>]*property\s*=\s*["']{property}["'][^>]*content\s*=\s*["']([^"']+)["']"#
    ))
    .ok()?;
    re.captures(html).map(|c| c[1].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_extraction() {
        let html = "<html><head><title>  Breach at\n Test University </title></head></html>";
        assert_eq!(extract_title(html).as_deref(), Some("Breach at Test University"));
        assert_eq!(extract_title("<html></html>"), None);
    }

    #[test]
    fn meta_extraction() {
        let html = r#"<meta name="author" content="Jane Reporter">
                      <meta property="article:published_time" content="2025-01-15T08:00:00Z">"#;
        assert_eq!(extract_meta(html, "author").as_deref(), Some("Jane Reporter"));
        assert_eq!(
            extract_meta_property(html, "article:published_time").as_deref(),
            Some("2025-01-15T08:00:00Z")
        );
    }

    #[test]
    fn forbidden_detection() {
        let content = ArticleContent::failure("https://x.example", "HTTP 403".to_string(), Some(403));
        assert!(content.was_forbidden());
        let content = ArticleContent::failure("https://x.example", "HTTP 500".to_string(), Some(500));
        assert!(!content.was_forbidden());
    }

    #[test]
    fn short_body_threshold_counts_non_whitespace() {
        let padded = " a ".repeat(30);
        assert!(count_non_whitespace(&padded) < MIN_BODY_CHARS);
        let real = "x".repeat(60);
        assert!(count_non_whitespace(&real) >= MIN_BODY_CHARS);
    }
}
