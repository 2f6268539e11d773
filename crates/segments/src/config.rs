//! Segment oracle configuration.
//!
//! Durations are written as plain integers: `*_ms` fields in milliseconds,
//! `*_secs` fields in seconds.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::CircuitBreakerConfig;
use crate::provider::StaticSegment;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Upper bound for one synchronous provider check.
    #[serde(rename = "check_timeout_ms", with = "millis")]
    pub check_timeout: Duration,
    /// Target false-positive rate of server-side membership filters.
    pub false_positive_rate: f64,
    /// How long a populated membership filter is trusted.
    #[serde(rename = "filter_ttl_secs", with = "secs")]
    pub filter_ttl: Duration,
    /// Build membership filters in the background on cache misses.
    pub populate_filters: bool,
    /// Lifetime of user-scoped entries in the client cache blob.
    #[serde(rename = "user_cache_ttl_secs", with = "secs")]
    pub user_cache_ttl: Duration,
    /// Lifetime of browser-scoped entries in the client cache blob.
    #[serde(rename = "browser_cache_ttl_secs", with = "secs")]
    pub browser_cache_ttl: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
    pub remote: Option<RemoteProviderConfig>,
    #[serde(rename = "static")]
    pub statics: Vec<StaticProviderConfig>,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            check_timeout: Duration::from_millis(1_000),
            false_positive_rate: 0.01,
            filter_ttl: Duration::from_secs(3_600),
            populate_filters: true,
            user_cache_ttl: Duration::from_secs(3_600),
            browser_cache_ttl: Duration::from_secs(24 * 3_600),
            circuit_breaker: CircuitBreakerConfig::default(),
            remote: None,
            statics: Vec::new(),
        }
    }
}

/// HTTP segment provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProviderConfig {
    #[serde(default = "default_remote_provider")]
    pub provider: String,
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_remote_timeout", rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

fn default_remote_provider() -> String {
    crate::remote::REMOTE_PROVIDER.to_string()
}

fn default_remote_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_true() -> bool {
    true
}

/// In-process provider with a fixed membership table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticProviderConfig {
    pub provider: String,
    #[serde(default)]
    pub segments: Vec<StaticSegment>,
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

pub(crate) mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_client_cache_lifetimes() {
        let cfg = SegmentConfig::default();
        assert_eq!(cfg.user_cache_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.browser_cache_ttl, Duration::from_secs(86_400));
        assert!(cfg.remote.is_none());
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let cfg: SegmentConfig = serde_json::from_str(
            r#"{
                "check_timeout_ms": 250,
                "remote": { "base_url": "http://segments.local/api" },
                "static": [{ "provider": "allow", "segments": [{ "code": "vip", "users": ["1"] }] }]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.check_timeout, Duration::from_millis(250));
        assert_eq!(cfg.false_positive_rate, 0.01);
        let remote = cfg.remote.unwrap();
        assert_eq!(remote.provider, "remp_segment");
        assert_eq!(remote.timeout, Duration::from_secs(2));
        assert!(cfg.statics[0].segments[0].users.contains("1"));
    }
}
