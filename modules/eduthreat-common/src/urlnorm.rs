//! URL canonicalization for identity comparison.
//!
//! Two reports describe the same real-world incident when they cite the
//! same article; this is the equality the dedup engine works under.

use url::Url;

/// Canonicalize a URL for equality comparison.
///
/// Rules, in order: lowercase scheme and host; strip a leading `www.`;
/// strip the trailing `/` from the path; drop the fragment; keep the query
/// string verbatim. Empty or unparseable input normalizes to the empty
/// string, which never matches anything.
///
/// ```
/// use eduthreat_common::normalize_url;
/// assert_eq!(
///     normalize_url("https://WWW.Example.com/a/"),
///     "https://example.com/a"
/// );
/// // Scheme is part of the canonical form.
/// assert_ne!(
///     normalize_url("https://example.com/a"),
///     normalize_url("http://example.com/a")
/// );
/// ```
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let parsed = match Url::parse(trimmed) {
        Ok(u) => u,
        Err(_) => return String::new(),
    };

    // `Url` already lowercases scheme and host on parse.
    let host = match parsed.host_str() {
        Some(h) => h.strip_prefix("www.").unwrap_or(h),
        None => return String::new(),
    };

    let mut out = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(parsed.path().trim_end_matches('/'));
    if let Some(query) = parsed.query() {
        out.push('?');
        out.push_str(query);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host() {
        assert_eq!(
            normalize_url("HTTPS://News.Example.COM/breach"),
            "https://news.example.com/breach"
        );
    }

    #[test]
    fn strips_www_prefix() {
        assert_eq!(
            normalize_url("https://www.example.com/breach"),
            "https://example.com/breach"
        );
    }

    #[test]
    fn strips_trailing_slash() {
        assert_eq!(
            normalize_url("https://example.com/a/"),
            "https://example.com/a"
        );
        assert_eq!(normalize_url("https://example.com/"), "https://example.com");
    }

    #[test]
    fn drops_fragment_keeps_query() {
        assert_eq!(
            normalize_url("https://example.com/a?id=7#section"),
            "https://example.com/a?id=7"
        );
    }

    #[test]
    fn different_schemes_do_not_match() {
        assert_ne!(
            normalize_url("https://www.example.com/a/"),
            normalize_url("http://example.com/a")
        );
    }

    #[test]
    fn empty_and_garbage_normalize_to_empty() {
        assert_eq!(normalize_url(""), "");
        assert_eq!(normalize_url("   "), "");
        assert_eq!(normalize_url("not a url"), "");
    }

    #[test]
    fn empty_never_matches_empty() {
        // Both normalize to "" but "" is defined to match nothing; the
        // dedup engine filters empties before comparing.
        assert_eq!(normalize_url("::::"), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            "https://WWW.Example.com/a/",
            "http://example.com/a?x=1&y=2#frag",
            "https://example.com:8443/path/",
            "https://news.example.com",
        ];
        for input in inputs {
            let once = normalize_url(input);
            assert_eq!(normalize_url(&once), once, "not idempotent for {input}");
        }
    }

    #[test]
    fn keeps_port() {
        assert_eq!(
            normalize_url("https://example.com:8443/a/"),
            "https://example.com:8443/a"
        );
    }
}
