//! YAML configuration for the showtime engine.
//!
//! One document configures the segment oracle, the geolocation table and the
//! banner layout maps. Every section is optional and falls back to defaults.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//! name: "production"
//!
//! segments:
//!   check_timeout_ms: 800
//!   false_positive_rate: 0.01
//!   filter_ttl_secs: 3600
//!   populate_filters: true
//!   user_cache_ttl_secs: 3600
//!   browser_cache_ttl_secs: 86400
//!   circuit_breaker:
//!     failure_threshold: 5
//!     reset_timeout_ms: 30000
//!     success_threshold: 2
//!   remote:
//!     base_url: "https://segments.example.com/api/"
//!     token: "secret"
//!     timeout_ms: 2000
//!   static:
//!     - provider: "staff"
//!       segments:
//!         - code: "editors"
//!           users: ["1", "2"]
//!
//! geo:
//!   networks:
//!     - network: "81.2.69.0/24"
//!       country: "GB"
//!
//! layout:
//!   dimensions:
//!     landscape: { name: "Landscape (728x90)", width: "728px", height: "90px" }
//! ```
use std::fs;
use std::path::Path;

use decision::{GeoNetwork, LayoutConfig};
use segments::SegmentConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowtimeConfig {
    /// Configuration format version
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub segments: SegmentConfig,

    #[serde(default)]
    pub geo: GeoYamlConfig,

    #[serde(default)]
    pub layout: LayoutConfig,
}

/// CIDR to ISO country table used for country targeting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoYamlConfig {
    #[serde(default)]
    pub networks: Vec<GeoNetwork>,
}

impl ShowtimeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: ShowtimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => {}
            v => return Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }

        let segments = &self.segments;
        let rate = segments.false_positive_rate;
        if !(rate > 0.0 && rate < 1.0) {
            return Err(ConfigLoadError::Validation(format!(
                "segments.false_positive_rate must be in (0, 1), got {rate}"
            )));
        }
        if segments.check_timeout.is_zero() {
            return Err(ConfigLoadError::Validation(
                "segments.check_timeout_ms must be > 0".into(),
            ));
        }
        if let Some(remote) = &segments.remote {
            if remote.base_url.trim().is_empty() {
                return Err(ConfigLoadError::Validation(
                    "segments.remote.base_url must not be empty".into(),
                ));
            }
            if remote.timeout.is_zero() {
                return Err(ConfigLoadError::Validation(
                    "segments.remote.timeout_ms must be > 0".into(),
                ));
            }
        }

        for network in &self.geo.networks {
            let code = network.country.trim();
            if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ConfigLoadError::Validation(format!(
                    "geo network {} has invalid country code {:?}",
                    network.network, network.country
                )));
            }
        }
        Ok(())
    }
}

impl Default for ShowtimeConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            segments: SegmentConfig::default(),
            geo: GeoYamlConfig::default(),
            layout: LayoutConfig::default(),
        }
    }
}
