//! Per-domain fetch pacing: random inter-fetch delays, a sliding hourly
//! cap, temporary and permanent blocks, and 403 escalation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use tracing::{debug, warn};

/// 403s within one hour before a domain is blocked for a day.
const FORBIDDEN_THRESHOLD: usize = 3;
const FORBIDDEN_BLOCK: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_fetches_per_hour: usize,
    pub block_duration: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
            max_fetches_per_hour: 10,
            block_duration: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Default)]
struct DomainState {
    last_fetch: Option<DateTime<Utc>>,
    /// Successful fetch times within the sliding hour.
    fetches: Vec<DateTime<Utc>>,
    /// 403 times within the sliding hour.
    forbidden: Vec<DateTime<Utc>>,
    blocked_until: Option<DateTime<Utc>>,
    permanently_blocked: bool,
}

/// Process-local, non-persistent. Owned by the producer task.
pub struct DomainRateLimiter {
    config: RateLimiterConfig,
    domains: HashMap<String, DomainState>,
}

impl DomainRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            domains: HashMap::new(),
        }
    }

    /// Lowercased host of a URL, or `None` for unparseable input.
    pub fn extract_domain(url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;
        parsed.host_str().map(|h| h.to_lowercase())
    }

    pub fn can_fetch(&mut self, domain: &str) -> bool {
        self.can_fetch_at(domain, Utc::now())
    }

    fn can_fetch_at(&mut self, domain: &str, now: DateTime<Utc>) -> bool {
        if domain.is_empty() {
            return false;
        }
        let cap = self.config.max_fetches_per_hour;
        let state = self.domains.entry(domain.to_string()).or_default();

        if state.permanently_blocked {
            return false;
        }
        if let Some(until) = state.blocked_until {
            if now < until {
                return false;
            }
            state.blocked_until = None;
        }

        let hour_ago = now - TimeDelta::hours(1);
        state.fetches.retain(|t| *t > hour_ago);
        if state.fetches.len() >= cap {
            debug!(domain, fetches = state.fetches.len(), "Hourly fetch cap reached");
            return false;
        }
        true
    }

    /// Sleep until at least a uniform-random `[min_delay, max_delay]` has
    /// passed since the last fetch from this domain.
    pub async fn wait(&mut self, domain: &str) {
        let Some(last) = self.domains.get(domain).and_then(|s| s.last_fetch) else {
            return;
        };
        let delay = {
            let min = self.config.min_delay.as_secs_f64();
            let max = self.config.max_delay.as_secs_f64();
            rand::rng().random_range(min..=max)
        };
        let elapsed = (Utc::now() - last).as_seconds_f64();
        if elapsed < delay {
            let wait = Duration::from_secs_f64(delay - elapsed);
            debug!(domain, wait_secs = wait.as_secs_f64(), "Pacing fetch");
            tokio::time::sleep(wait).await;
        }
    }

    pub fn record(&mut self, domain: &str, success: bool) {
        self.record_at(domain, success, Utc::now());
    }

    fn record_at(&mut self, domain: &str, success: bool, now: DateTime<Utc>) {
        if domain.is_empty() {
            return;
        }
        let state = self.domains.entry(domain.to_string()).or_default();
        state.last_fetch = Some(now);
        if success {
            state.fetches.push(now);
        }
    }

    /// Record an HTTP 403. The third within an hour blocks the domain for
    /// 24 hours.
    pub fn record_forbidden(&mut self, domain: &str) {
        self.record_forbidden_at(domain, Utc::now());
    }

    fn record_forbidden_at(&mut self, domain: &str, now: DateTime<Utc>) {
        if domain.is_empty() {
            return;
        }
        let state = self.domains.entry(domain.to_string()).or_default();
        let hour_ago = now - TimeDelta::hours(1);
        state.forbidden.retain(|t| *t > hour_ago);
        state.forbidden.push(now);
        if state.forbidden.len() >= FORBIDDEN_THRESHOLD {
            warn!(domain, "Repeated 403s, blocking domain for 24h");
            state.blocked_until = Some(now + TimeDelta::from_std(FORBIDDEN_BLOCK).expect("fits"));
            state.forbidden.clear();
        }
    }

    /// Install a block. `None` blocks permanently.
    pub fn block(&mut self, domain: &str, duration: Option<Duration>) {
        self.block_at(domain, duration, Utc::now());
    }

    fn block_at(&mut self, domain: &str, duration: Option<Duration>, now: DateTime<Utc>) {
        let state = self.domains.entry(domain.to_string()).or_default();
        match duration {
            Some(d) => {
                let until = now + TimeDelta::from_std(d).unwrap_or(TimeDelta::hours(1));
                warn!(domain, until = %until, "Domain temporarily blocked");
                state.blocked_until = Some(until);
            }
            None => {
                warn!(domain, "Domain permanently blocked");
                state.permanently_blocked = true;
            }
        }
    }

    /// Block using the configured default window.
    pub fn block_default(&mut self, domain: &str) {
        self.block(domain, Some(self.config.block_duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> DomainRateLimiter {
        DomainRateLimiter::new(RateLimiterConfig::default())
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z").unwrap().with_timezone(&Utc)
            + TimeDelta::minutes(minutes)
    }

    #[test]
    fn extract_domain_lowercases_host() {
        assert_eq!(
            DomainRateLimiter::extract_domain("https://News.Example.COM/a").as_deref(),
            Some("news.example.com")
        );
        assert_eq!(DomainRateLimiter::extract_domain("not a url"), None);
    }

    #[test]
    fn unknown_domain_is_fetchable() {
        assert!(limiter().can_fetch_at("example.com", at(0)));
    }

    #[test]
    fn empty_domain_is_never_fetchable() {
        assert!(!limiter().can_fetch_at("", at(0)));
    }

    #[test]
    fn hourly_cap_applies_on_sliding_window() {
        let mut l = limiter();
        for i in 0..10 {
            assert!(l.can_fetch_at("example.com", at(i)));
            l.record_at("example.com", true, at(i));
        }
        assert!(!l.can_fetch_at("example.com", at(10)), "cap of 10 reached");
        // 61 minutes after the first fetch, one slot frees up.
        assert!(l.can_fetch_at("example.com", at(61)));
    }

    #[test]
    fn failed_fetches_do_not_consume_the_cap() {
        let mut l = limiter();
        for i in 0..20 {
            l.record_at("example.com", false, at(i % 50));
        }
        assert!(l.can_fetch_at("example.com", at(55)));
    }

    #[test]
    fn temporary_block_expires() {
        let mut l = limiter();
        l.block_at("example.com", Some(Duration::from_secs(3600)), at(0));
        assert!(!l.can_fetch_at("example.com", at(30)));
        assert!(l.can_fetch_at("example.com", at(61)));
    }

    #[test]
    fn permanent_block_never_expires() {
        let mut l = limiter();
        l.block_at("example.com", None, at(0));
        assert!(!l.can_fetch_at("example.com", at(0)));
        assert!(!l.can_fetch_at("example.com", at(60 * 24 * 365)));
    }

    #[test]
    fn third_403_within_an_hour_blocks_for_a_day() {
        let mut l = limiter();
        l.record_forbidden_at("example.com", at(0));
        l.record_forbidden_at("example.com", at(10));
        assert!(l.can_fetch_at("example.com", at(11)), "two 403s are tolerated");
        l.record_forbidden_at("example.com", at(20));
        assert!(!l.can_fetch_at("example.com", at(21)));
        assert!(!l.can_fetch_at("example.com", at(20 + 23 * 60)), "still blocked after 23h");
        assert!(l.can_fetch_at("example.com", at(20 + 25 * 60)), "unblocked after 24h");
    }

    #[test]
    fn spread_out_403s_do_not_escalate() {
        let mut l = limiter();
        l.record_forbidden_at("example.com", at(0));
        l.record_forbidden_at("example.com", at(70));
        l.record_forbidden_at("example.com", at(140));
        assert!(l.can_fetch_at("example.com", at(141)), "403s outside the window age out");
    }

    #[test]
    fn blocks_are_per_domain() {
        let mut l = limiter();
        l.block_at("blocked.example", Some(Duration::from_secs(3600)), at(0));
        assert!(!l.can_fetch_at("blocked.example", at(1)));
        assert!(l.can_fetch_at("open.example", at(1)));
    }
}
