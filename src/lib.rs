//! Workspace umbrella crate for campaign showtime.
//!
//! This crate wires the campaign catalog, the segment oracle and the decision
//! engine together behind [`Showtime`], so callers configure the whole stack
//! from one [`ShowtimeConfig`] and a campaign repository.
//!
//! ```
//! use std::sync::Arc;
//! use showtime::{CampaignRepository, DecisionContext, Showtime, ShowtimeConfig};
//!
//! let showtime = Showtime::from_config(
//!     ShowtimeConfig::default(),
//!     Arc::new(CampaignRepository::new()),
//! ).unwrap();
//!
//! let ctx: DecisionContext =
//!     serde_json::from_str(r#"{"url": "https://example.com", "browserId": "b-1"}"#).unwrap();
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let result = runtime.block_on(showtime.engine().decide(&ctx)).unwrap();
//! assert!(result.decisions.is_empty());
//! ```
pub mod config;

pub use campaign::{
    Banner, BannerTemplate, Campaign, CampaignError, CampaignSegment, CountryRule, Device,
    PageviewRule, PageviewRuleKind, Schedule, ScheduleError, ScheduleStatus, Variant,
};
pub use catalog::{CampaignCache, CampaignRepository, CatalogError, Mutation};
pub use config::{ConfigLoadError, GeoYamlConfig, ShowtimeConfig};
pub use decision::{
    set_decision_metrics, Decision, DecisionContext, DecisionEngine, DecisionError,
    DecisionMetrics, DecisionResult, LayoutConfig, NetworkTableLocator, Rejection,
    RejectionCategory, RenderFragment, ValidationError,
};
pub use segments::{SegmentError, SegmentOracle, SegmentProvider, StaticSegmentProvider};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors raised while assembling or operating the showtime stack.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ShowtimeError {
    #[error(transparent)]
    Config(#[from] ConfigLoadError),

    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Fully wired showtime stack.
///
/// Cloning is cheap; clones share the repository, cache, oracle and engine.
#[derive(Clone)]
pub struct Showtime {
    config: Arc<ShowtimeConfig>,
    repository: Arc<CampaignRepository>,
    cache: Arc<CampaignCache>,
    oracle: SegmentOracle,
    engine: Arc<DecisionEngine>,
}

impl Showtime {
    /// Validate `config`, register the configured segment providers, warm
    /// the campaign cache from `repository` and build the engine.
    pub fn from_config(
        config: ShowtimeConfig,
        repository: Arc<CampaignRepository>,
    ) -> Result<Self, ShowtimeError> {
        config.validate()?;

        let oracle = SegmentOracle::from_config(config.segments.clone())?;
        let cache = Arc::new(CampaignCache::in_memory(repository.clone()));
        cache.warm()?;

        let geo = NetworkTableLocator::new(config.geo.networks.iter().cloned());
        let engine = DecisionEngine::new(cache.clone(), oracle.clone())
            .with_geo_locator(Arc::new(geo))
            .with_layout(config.layout.clone());

        info!(
            campaigns = repository.len(),
            active = cache.active_ids().len(),
            providers = ?oracle.providers(),
            "showtime stack ready"
        );

        Ok(Self {
            config: Arc::new(config),
            repository,
            cache,
            oracle,
            engine: Arc::new(engine),
        })
    }

    pub fn config(&self) -> &ShowtimeConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<CampaignCache> {
        &self.cache
    }

    pub fn repository(&self) -> &Arc<CampaignRepository> {
        &self.repository
    }

    pub fn oracle(&self) -> &SegmentOracle {
        &self.oracle
    }

    /// Report a committed admin mutation so the affected snapshot and the
    /// active id list are rebuilt.
    pub fn commit(&self, mutation: Mutation) -> Result<(), ShowtimeError> {
        self.cache.apply(mutation)?;
        Ok(())
    }

    /// Start every `ready` schedule whose start time has passed and refresh
    /// the affected campaigns. Returns their ids.
    pub fn promote_due_schedules(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let promoted = self.repository.promote_due_schedules(now);
        for &id in &promoted {
            if let Err(err) = self.cache.apply(Mutation::Schedule { campaign_id: id }) {
                warn!(campaign_id = %id, error = %err, "cache refresh after schedule promotion failed");
            }
        }
        if !promoted.is_empty() {
            info!(campaigns = promoted.len(), "due schedules started");
        }
        promoted
    }
}

impl std::fmt::Debug for Showtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Showtime")
            .field("campaigns", &self.repository.len())
            .field("active", &self.cache.active_ids().len())
            .field("providers", &self.oracle.providers())
            .finish()
    }
}
