//! HTTP cache metadata and reload timing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Minimum delay before reloading content whose expiry moved forward by less
/// than this amount. Guards against client/server clock skew.
pub const CLOCK_SKEW_RETRY_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for any reload delay.
pub const MAX_EXPIRY_TIMEOUT: Duration = Duration::from_millis((1 << 31) - 1);

/// Backoff base for content that arrives already expired.
const EXPIRED_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Cache headers reported by the worker alongside a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

/// Parsed `Cache-Control` directives this crate cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub max_age: Option<u64>,
    pub no_store: bool,
    pub no_cache: bool,
}

impl CacheControl {
    /// Parse a `Cache-Control` header value. Unknown directives are ignored.
    pub fn parse(header: &str) -> Self {
        let mut parsed = Self::default();
        for directive in header.split(',') {
            let directive = directive.trim();
            let (name, value) = match directive.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "max-age" => parsed.max_age = value.and_then(|v| v.parse().ok()),
                "no-store" => parsed.no_store = true,
                "no-cache" => parsed.no_cache = true,
                _ => {}
            }
        }
        parsed
    }
}

impl ExpiryData {
    pub fn new(cache_control: Option<String>, expires: Option<String>) -> Self {
        Self {
            cache_control,
            expires,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cache_control.is_none() && self.expires.is_none()
    }

    pub fn cache_control(&self) -> CacheControl {
        self.cache_control
            .as_deref()
            .map(CacheControl::parse)
            .unwrap_or_default()
    }

    /// Content may be kept in the tile cache.
    pub fn is_cacheable(&self) -> bool {
        !self.cache_control().no_store
    }

    /// Signed time until the content expires, measured from `now`.
    ///
    /// `max-age` takes precedence over `Expires`. Returns `None` when neither
    /// header carries usable information. A negative result means the content
    /// arrived already expired.
    pub fn time_to_live(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        if let Some(max_age) = self.cache_control().max_age {
            return Some(chrono::Duration::seconds(max_age.min(u32::MAX as u64) as i64));
        }
        let expires = self.expires.as_deref()?;
        let expires = DateTime::parse_from_rfc2822(expires.trim()).ok()?;
        Some(expires.with_timezone(&Utc) - now)
    }
}

/// Expiry bookkeeping for one tile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryState {
    expires_at: Option<Instant>,
    expired_request_count: u32,
}

impl ExpiryState {
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Consecutive loads that returned already-expired content.
    pub fn expired_request_count(&self) -> u32 {
        self.expired_request_count
    }

    /// Record the metadata of a fresh response.
    ///
    /// Returns `true` if the content is already expired. Such content is
    /// still used, but the next reload is delayed with exponential backoff
    /// instead of being issued immediately.
    pub fn apply(&mut self, data: &ExpiryData, wall_now: DateTime<Utc>, now: Instant) -> bool {
        let Some(ttl) = data.time_to_live(wall_now) else {
            return false;
        };
        let prior = self.expires_at;

        let expired = match ttl.to_std() {
            Ok(ttl) if !ttl.is_zero() => {
                self.expires_at = Some(now + ttl);
                false
            }
            _ => {
                let overdue = (-ttl).to_std().unwrap_or(Duration::ZERO);
                let candidate = now.checked_sub(overdue).unwrap_or(now);
                match prior {
                    None => {
                        self.expires_at = Some(candidate);
                        true
                    }
                    Some(prior) if candidate <= prior => {
                        self.expires_at = Some(candidate);
                        true
                    }
                    Some(prior) => {
                        // Expiry moved forward but is still in the past: the
                        // server clock is probably behind ours.
                        let delta = candidate - prior;
                        self.expires_at = Some(now + delta.max(CLOCK_SKEW_RETRY_TIMEOUT));
                        false
                    }
                }
            }
        };

        if expired {
            self.expired_request_count = self.expired_request_count.saturating_add(1);
        } else {
            self.expired_request_count = 0;
        }
        expired
    }

    /// Delay until the tile should be reloaded, or `None` if it never expires.
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        let expires_at = self.expires_at?;
        if self.expired_request_count > 0 {
            let exponent = (self.expired_request_count - 1).min(31);
            let backoff = EXPIRED_BACKOFF_BASE.saturating_mul(1u32 << exponent);
            return Some(backoff.min(MAX_EXPIRY_TIMEOUT));
        }
        Some(
            expires_at
                .saturating_duration_since(now)
                .min(MAX_EXPIRY_TIMEOUT),
        )
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(cache_control: Option<&str>, expires: Option<&str>) -> ExpiryData {
        ExpiryData::new(cache_control.map(str::to_string), expires.map(str::to_string))
    }

    #[test]
    fn test_parse_cache_control() {
        let cc = CacheControl::parse("public, max-age=3600, no-cache");
        assert_eq!(cc.max_age, Some(3600));
        assert!(cc.no_cache);
        assert!(!cc.no_store);

        let cc = CacheControl::parse("No-Store");
        assert!(cc.no_store);
        assert_eq!(cc.max_age, None);
    }

    #[test]
    fn test_max_age_wins_over_expires() {
        let now = Utc::now();
        let d = data(Some("max-age=60"), Some("Thu, 01 Jan 1970 00:00:00 GMT"));
        assert_eq!(d.time_to_live(now), Some(chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_expires_header() {
        let now = DateTime::parse_from_rfc2822("Tue, 15 Nov 1994 08:12:31 GMT")
            .unwrap()
            .with_timezone(&Utc);
        let d = data(None, Some("Tue, 15 Nov 1994 08:14:31 GMT"));
        assert_eq!(d.time_to_live(now), Some(chrono::Duration::seconds(120)));
    }

    #[test]
    fn test_unparseable_expires_ignored() {
        let d = data(None, Some("not a date"));
        assert_eq!(d.time_to_live(Utc::now()), None);
    }

    #[test]
    fn test_no_store_not_cacheable() {
        assert!(!data(Some("no-store"), None).is_cacheable());
        assert!(data(Some("max-age=5"), None).is_cacheable());
        assert!(data(None, None).is_cacheable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_content_timeout() {
        let mut state = ExpiryState::default();
        let now = Instant::now();
        assert!(!state.apply(&data(Some("max-age=10"), None), Utc::now(), now));
        assert_eq!(state.timeout(now), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(state.timeout(Instant::now()), Some(Duration::from_secs(6)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_content_backs_off() {
        let mut state = ExpiryState::default();
        let stale = data(Some("max-age=0"), None);

        let now = Instant::now();
        assert!(state.apply(&stale, Utc::now(), now));
        assert_eq!(state.expired_request_count(), 1);
        assert_eq!(state.timeout(now), Some(Duration::from_secs(1)));

        assert!(state.apply(&stale, Utc::now(), now));
        assert!(state.apply(&stale, Utc::now(), now));
        assert_eq!(state.expired_request_count(), 3);
        assert_eq!(state.timeout(now), Some(Duration::from_secs(4)));

        assert!(!state.apply(&data(Some("max-age=30"), None), Utc::now(), now));
        assert_eq!(state.expired_request_count(), 0);
        assert_eq!(state.timeout(now), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_no_metadata_never_expires() {
        let mut state = ExpiryState::default();
        let now = Instant::now();
        assert!(!state.apply(&ExpiryData::default(), Utc::now(), now));
        assert_eq!(state.timeout(now), None);
    }
}
