//! Concrete source adapters and the helpers they share.

pub mod curated;
pub mod news;
pub mod rss;

use std::collections::HashSet;

/// Keywords that place a report in the education sector. Checked
/// case-insensitively against title + summary text.
const EDUCATION_KEYWORDS: &[&str] = &[
    "university",
    "universities",
    "college",
    "school",
    "schools",
    "campus",
    "student",
    "students",
    "education",
    "academy",
    "academic",
    "research institute",
    "faculty",
    "k-12",
    "school district",
];

/// True when the text mentions an education-sector victim.
pub(crate) fn is_education_related(text: &str) -> bool {
    let lowered = text.to_lowercase();
    EDUCATION_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

/// Best-effort attack classification from report text.
pub(crate) fn attack_type_hint(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    for (needle, label) in [
        ("ransomware", "ransomware"),
        ("phishing", "phishing"),
        ("ddos", "ddos"),
        ("denial of service", "ddos"),
        ("data breach", "data-breach"),
        ("data leak", "data-breach"),
        ("defacement", "defacement"),
    ] {
        if lowered.contains(needle) {
            return Some(label.to_string());
        }
    }
    None
}

/// Guess the victim label from a headline: the segment before the first
/// strong separator, with a leading attack phrase stripped. Headlines are
/// messy; the LLM stage refines this later.
pub(crate) fn institution_from_title(title: &str) -> String {
    let head = title
        .split([':', '|'])
        .next()
        .unwrap_or(title)
        .split(" — ")
        .next()
        .unwrap_or(title)
        .trim();

    for prefix in [
        "cyber attack on ",
        "cyberattack on ",
        "ransomware attack on ",
        "ransomware attack at ",
        "data breach at ",
        "attack on ",
    ] {
        if let Some(rest) = strip_prefix_ci(head, prefix) {
            return rest.trim().to_string();
        }
    }
    head.to_string()
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}

/// Extract `(absolute_url, anchor_text)` pairs whose URL contains `pattern`.
/// Relative hrefs resolve against `base_url`; duplicates drop; results cap
/// at `limit`.
pub(crate) fn extract_links(
    html: &str,
    base_url: &str,
    pattern: &str,
    limit: usize,
) -> Vec<(String, String)> {
    let anchor_re = regex::Regex::new(r#"(?s)<a\s[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
        .expect("valid regex");
    let tag_re = regex::Regex::new(r"<[^>]+>").expect("valid regex");
    let base = url::Url::parse(base_url).ok();

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for cap in anchor_re.captures_iter(html) {
        let raw = &cap[1];
        let resolved = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else if let Some(ref b) = base {
            match b.join(raw) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            }
        } else {
            continue;
        };

        if !resolved.contains(pattern) || !seen.insert(resolved.clone()) {
            continue;
        }

        let text = tag_re
            .replace_all(&cap[2], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        links.push((resolved, text));
        if links.len() >= limit {
            break;
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn education_filter_matches_keywords() {
        assert!(is_education_related("Ransomware hits Test University"));
        assert!(is_education_related("SCHOOL DISTRICT reports data breach"));
        assert!(!is_education_related("Hospital chain hit by ransomware"));
    }

    #[test]
    fn attack_hint_from_text() {
        assert_eq!(
            attack_type_hint("Akira ransomware claims new victim").as_deref(),
            Some("ransomware")
        );
        assert_eq!(
            attack_type_hint("Massive data breach exposes records").as_deref(),
            Some("data-breach")
        );
        assert_eq!(attack_type_hint("New CPU vulnerability found"), None);
    }

    #[test]
    fn institution_from_headline_strips_attack_prefix() {
        assert_eq!(
            institution_from_title("Cyber attack on Test University: systems offline"),
            "Test University"
        );
        assert_eq!(
            institution_from_title("Ransomware attack at Riverdale School District"),
            "Riverdale School District"
        );
    }

    #[test]
    fn institution_from_headline_takes_first_segment() {
        assert_eq!(
            institution_from_title("Test University | Major outage after breach"),
            "Test University"
        );
    }

    #[test]
    fn extract_links_resolves_and_filters() {
        let html = r#"
            <a href="/news/uni-breach">Breach at <b>Test University</b></a>
            <a href="https://other.example/story">Unrelated</a>
            <a href="/news/uni-breach">Duplicate</a>
        "#;
        let links = extract_links(html, "https://news.example.com", "/news/", 10);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].0, "https://news.example.com/news/uni-breach");
        assert_eq!(links[0].1, "Breach at Test University");
    }

    #[test]
    fn extract_links_respects_limit() {
        let html: String = (0..30)
            .map(|i| format!(r#"<a href="/news/item-{i}">Item {i}</a>"#))
            .collect();
        let links = extract_links(&html, "https://news.example.com", "/news/", 5);
        assert_eq!(links.len(), 5);
    }
}
