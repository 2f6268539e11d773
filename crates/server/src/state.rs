use crate::config::ServerConfig;
use crate::error::ServerResult;
use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusHandle;
use showtime::{CampaignRepository, Showtime, ShowtimeConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// Rate limit tracking: API key -> (count, window_start)
    pub rate_limiter: Arc<DashMap<String, (u32, Instant)>>,

    /// Repository, cache, segment oracle and decision engine
    pub showtime: Showtime,

    /// Prometheus exposition handle, when metrics are enabled
    pub metrics: Option<PrometheusHandle>,
}

impl ServerState {
    /// Build the showtime stack from the configured engine YAML and campaign
    /// seed file.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let engine_config = match &config.engine_config {
            Some(path) => ShowtimeConfig::from_file(path)
                .map_err(|e| crate::ServerError::Config(format!("{}: {e}", path.display())))?,
            None => ShowtimeConfig::default(),
        };
        let repository = match &config.campaigns_file {
            Some(path) => CampaignRepository::from_json_file(path)?,
            None => CampaignRepository::new(),
        };
        let showtime = Showtime::from_config(engine_config, Arc::new(repository))?;
        Self::with_showtime(config, showtime)
    }

    /// State around an already assembled stack.
    pub fn with_showtime(config: ServerConfig, showtime: Showtime) -> ServerResult<Self> {
        let metrics = if config.metrics_enabled {
            Some(crate::metrics::install()?)
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            rate_limiter: Arc::new(DashMap::new()),
            showtime,
            metrics,
        })
    }

    /// Check if API key is valid
    pub fn is_valid_api_key(&self, key: &str) -> bool {
        self.config.api_keys.contains(key)
    }

    /// Check rate limit for API key
    pub fn check_rate_limit(&self, key: &str) -> bool {
        let now = Instant::now();
        let window = Duration::from_secs(60);
        let limit = self.config.rate_limit_per_minute;

        let mut entry = self.rate_limiter.entry(key.to_string()).or_insert((0, now));
        let (count, window_start) = entry.value_mut();

        if now.duration_since(*window_start) > window {
            *count = 0;
            *window_start = now;
        }

        if *count >= limit {
            return false;
        }

        *count += 1;
        true
    }
}
