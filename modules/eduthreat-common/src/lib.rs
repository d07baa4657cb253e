pub mod config;
pub mod types;
pub mod urlnorm;

pub use config::Config;
pub use types::*;
pub use urlnorm::normalize_url;

use sha2::{Digest, Sha256};

/// Stable incident id: source tag plus the first 16 hex chars of the
/// SHA-256 of some uniqueness context (victim name, URL, source slug…).
///
/// ```
/// let id = eduthreat_common::make_incident_id("konbriefing", "Test University|2025-01-15");
/// assert!(id.starts_with("konbriefing_"));
/// assert_eq!(id.len(), "konbriefing_".len() + 16);
/// ```
pub fn make_incident_id(source: &str, unique: &str) -> String {
    let digest = Sha256::digest(unique.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{source}_{}", &hex[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_id_is_stable() {
        let a = make_incident_id("ransomwarelive", "some-slug");
        let b = make_incident_id("ransomwarelive", "some-slug");
        assert_eq!(a, b);
    }

    #[test]
    fn incident_id_differs_by_source() {
        let a = make_incident_id("s1", "same-key");
        let b = make_incident_id("s2", "same-key");
        assert_ne!(a, b);
    }

    #[test]
    fn incident_id_shape() {
        let id = make_incident_id("databreach", "https://example.com/a");
        let (source, hash) = id.split_once('_').unwrap();
        assert_eq!(source, "databreach");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
