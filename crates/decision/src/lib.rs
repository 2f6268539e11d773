//! # Showtime decision engine (`decision`)
//!
//! ## Purpose
//!
//! Given a visitor's request context, decide which active campaigns to show
//! and which variant of each. The pipeline for one campaign is:
//!
//! 1. fetch the cached snapshot (missing snapshot: [`Rejection::CacheMiss`]);
//! 2. schedule gate: at least one schedule must be running;
//! 3. the campaign must have variants;
//! 4. pick the variant: sticky reuse of the client's prior choice, otherwise
//!    a weighted draw over the variant proportions;
//! 5. targeting rules in fixed order: once per session, signed-in state,
//!    device, country, segments (all must match), pageview rules.
//!
//! The first failing step skips the campaign with a [`Rejection`]; other
//! campaigns are unaffected. Only a request missing `url`, or missing both
//! `userId` and `browserId`, fails as a whole.
//!
//! ## Core Types
//!
//! - [`DecisionContext`]: the decoded `data` payload of a showtime request.
//! - [`DecisionEngine`]: shared, stateless orchestrator.
//! - [`DecisionResult`]: accepted [`Decision`]s in active-id order, the
//!   updated client segment cache and the per-campaign rejections.
//! - [`LayoutConfig`] / [`RenderFragment`]: banner layout resolution.
//!
//! ## Example Usage
//!
//! ```
//! use std::sync::Arc;
//! use catalog::{CampaignCache, CampaignRepository};
//! use decision::{DecisionContext, DecisionEngine};
//! use segments::{SegmentConfig, SegmentOracle};
//!
//! let repository = Arc::new(CampaignRepository::new());
//! let cache = Arc::new(CampaignCache::in_memory(repository));
//! let engine = DecisionEngine::new(cache, SegmentOracle::new(SegmentConfig::default()));
//!
//! let ctx: DecisionContext = serde_json::from_str(
//!     r#"{"url": "https://example.com", "browserId": "b-1"}"#,
//! ).unwrap();
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let result = runtime.block_on(engine.decide(&ctx)).unwrap();
//! assert!(result.decisions.is_empty());
//! ```
mod device;
mod engine;
mod geo;
mod metrics;
mod render;
mod rules;
mod types;
mod variant;

pub use crate::device::{DeviceClass, DeviceDetector, UserAgentDetector};
pub use crate::engine::DecisionEngine;
pub use crate::geo::{GeoError, GeoLocator, GeoNetwork, NetworkTableLocator};
pub use crate::metrics::{set_decision_metrics, DecisionMetrics};
pub use crate::render::{Dimensions, LayoutConfig, Placement, RenderFragment};
pub use crate::rules::{
    check_country, check_device, check_has_variants, check_once_per_session,
    check_pageview_rules, check_signed_in, Rejection, RejectionCategory,
};
pub use crate::types::{
    Decision, DecisionContext, DecisionError, DecisionResult, PriorSelection, RejectedCampaign,
    SeenCampaign, ValidationError,
};
pub use crate::variant::{
    select_variant, weighted_pick, FixedDraw, RandomDraw, Selection, SelectionSource, VariantDraw,
};
