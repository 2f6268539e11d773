use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use campaign::Campaign;
use catalog::{CachedCampaign, CampaignCache};
use chrono::{DateTime, Utc};
use segments::{SegmentError, SegmentOracle, SegmentSession};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::device::{DeviceClass, DeviceDetector, UserAgentDetector};
use crate::geo::{GeoError, GeoLocator, NetworkTableLocator};
use crate::metrics::metrics_recorder;
use crate::render::LayoutConfig;
use crate::rules::{self, Rejection, RejectionCategory};
use crate::types::{Decision, DecisionContext, DecisionError, DecisionResult, RejectedCampaign};
use crate::variant::{select_variant, RandomDraw, VariantDraw};


/// Orchestrates one showtime decision per request.
///
/// The engine holds no per-request state; a single instance is shared by all
/// concurrent requests.
pub struct DecisionEngine {
    cache: Arc<CampaignCache>,
    oracle: SegmentOracle,
    devices: Arc<dyn DeviceDetector>,
    geo: Arc<dyn GeoLocator>,
    draw: Arc<dyn VariantDraw>,
    layout: Arc<LayoutConfig>,
}

/// Per-request lookups that are computed at most once, and only when a
/// campaign actually needs them.
#[derive(Default)]
struct Lazy {
    device: Option<DeviceClass>,
    country: Option<Result<String, GeoError>>,
}

struct Request<'a> {
    ctx: &'a DecisionContext,
    seen: HashSet<Uuid>,
    lazy: Lazy,
    session: SegmentSession,
}

impl DecisionEngine {
    /// Engine with user-agent device detection, an empty geo table, random
    /// variant draws and the default banner layout.
    pub fn new(cache: Arc<CampaignCache>, oracle: SegmentOracle) -> Self {
        Self {
            cache,
            oracle,
            devices: Arc::new(UserAgentDetector),
            geo: Arc::new(NetworkTableLocator::default()),
            draw: Arc::new(RandomDraw),
            layout: Arc::new(LayoutConfig::default()),
        }
    }

    pub fn with_device_detector(mut self, devices: Arc<dyn DeviceDetector>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_geo_locator(mut self, geo: Arc<dyn GeoLocator>) -> Self {
        self.geo = geo;
        self
    }

    /// Replace the random source used for weighted variant selection.
    pub fn with_draw(mut self, draw: Arc<dyn VariantDraw>) -> Self {
        self.draw = draw;
        self
    }

    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = Arc::new(layout);
        self
    }

    pub fn cache(&self) -> &Arc<CampaignCache> {
        &self.cache
    }

    pub fn oracle(&self) -> &SegmentOracle {
        &self.oracle
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    pub async fn decide(&self, ctx: &DecisionContext) -> Result<DecisionResult, DecisionError> {
        self.decide_at(ctx, Utc::now()).await
    }

    /// Evaluate every active campaign against `ctx` as of `now`.
    ///
    /// Only request validation fails the call. Campaign-level problems are
    /// collected in [`DecisionResult::rejected`] and never affect the other
    /// campaigns.
    pub async fn decide_at(
        &self,
        ctx: &DecisionContext,
        now: DateTime<Utc>,
    ) -> Result<DecisionResult, DecisionError> {
        let started = Instant::now();
        let recorder = metrics_recorder();

        if let Err(err) = ctx.validate() {
            debug!(error = %err, "showtime request rejected");
            if let Some(recorder) = &recorder {
                recorder.record_rejection(RejectionCategory::ValidationError);
            }
            return Err(err.into());
        }

        let mut request = Request {
            ctx,
            seen: ctx.campaigns_seen.iter().map(|s| s.campaign_id).collect(),
            lazy: Lazy::default(),
            session: self.oracle.session(ctx.cache.as_ref(), now),
        };

        let active = self.cache.active_ids();
        let mut decisions = Vec::new();
        let mut rejected = Vec::new();

        for &campaign_id in active.iter() {
            match self.evaluate(campaign_id, &mut request, now).await {
                Ok(decision) => decisions.push(decision),
                Err(reason) => {
                    log_rejection(campaign_id, &reason);
                    if let Some(recorder) = &recorder {
                        recorder.record_rejection(reason.category());
                    }
                    rejected.push(RejectedCampaign {
                        campaign_id,
                        reason,
                    });
                }
            }
        }

        let latency = started.elapsed();
        if let Some(recorder) = &recorder {
            recorder.record_decision(latency, active.len(), decisions.len());
        }
        info!(
            evaluated = active.len(),
            displayed = decisions.len(),
            elapsed_micros = latency.as_micros() as u64,
            "showtime decided"
        );

        Ok(DecisionResult {
            decisions,
            provider_data: request.session.into_provider_data(),
            rejected,
        })
    }

    async fn evaluate(
        &self,
        campaign_id: Uuid,
        request: &mut Request<'_>,
        now: DateTime<Utc>,
    ) -> Result<Decision, Rejection> {
        let cached = self.cache.get(campaign_id).ok_or(Rejection::CacheMiss)?;
        let campaign = &cached.campaign;

        if !campaign.is_running(now) {
            return Err(Rejection::NotRunning);
        }
        rules::check_has_variants(campaign)?;

        let prior = request.ctx.campaigns_banners.get(&campaign_id);
        let selection = select_variant(campaign, prior, self.draw.as_ref())?;

        rules::check_once_per_session(campaign, &request.seen)?;
        rules::check_signed_in(campaign, request.ctx.is_signed_in())?;
        rules::check_device(campaign, self.device_class(request))?;
        self.check_country(&cached, request)?;
        self.check_segments(campaign, request).await?;
        rules::check_pageview_rules(&campaign.pageview_rules, request.ctx.pageview_count)?;

        let variant = selection.variant;
        debug!(
            campaign_id = %campaign_id,
            variant_id = %variant.id,
            source = ?selection.source,
            control_group = variant.control_group,
            "campaign selected"
        );
        Ok(Decision {
            campaign_id,
            variant_id: variant.id,
            banner_id: variant.banner.as_ref().map(|b| b.id),
            control_group: variant.control_group,
            banner: variant
                .banner
                .as_ref()
                .filter(|_| !variant.control_group)
                .map(|banner| self.layout.render(banner)),
        })
    }

    fn device_class(&self, request: &mut Request<'_>) -> DeviceClass {
        let ctx = request.ctx;
        *request.lazy.device.get_or_insert_with(|| {
            ctx.user_agent
                .as_deref()
                .map(|ua| self.devices.classify(ua))
                .unwrap_or_default()
        })
    }

    fn check_country(&self, cached: &CachedCampaign, request: &mut Request<'_>) -> Result<(), Rejection> {
        if cached.country_rules.is_empty() {
            return Ok(());
        }
        let ip = request.ctx.ip;
        let resolved = request.lazy.country.get_or_insert_with(|| match ip {
            Some(ip) => self.geo.country(ip),
            None => Err(GeoError::NoAddress),
        });
        match resolved {
            Ok(country) => rules::check_country(&cached.country_rules, country),
            Err(err) => Err(Rejection::CountryUnresolved(err.to_string())),
        }
    }

    /// Every segment must match (AND). Signed-in visitors are checked by user
    /// id, anonymous ones by browser id.
    async fn check_segments(&self, campaign: &Campaign, request: &mut Request<'_>) -> Result<(), Rejection> {
        let ctx = request.ctx;
        for segment in &campaign.segments {
            let member = match (ctx.user_id.as_deref(), ctx.browser_id.as_deref()) {
                (Some(user_id), _) => request.session.check_user(segment, user_id).await,
                (None, Some(browser_id)) => request.session.check_browser(segment, browser_id).await,
                (None, None) => Ok(false),
            };
            match member {
                Ok(true) => {}
                Ok(false) => {
                    return Err(Rejection::SegmentMismatch {
                        provider: segment.provider.clone(),
                        code: segment.code.clone(),
                    })
                }
                Err(err) => return Err(segment_rejection(&segment.provider, &segment.code, err)),
            }
        }
        Ok(())
    }
}

fn segment_rejection(provider: &str, code: &str, err: SegmentError) -> Rejection {
    let (provider, code, message) = (provider.to_string(), code.to_string(), err.to_string());
    if err.is_configuration() {
        Rejection::SegmentMisconfigured {
            provider,
            code,
            message,
        }
    } else {
        Rejection::SegmentUnavailable {
            provider,
            code,
            message,
        }
    }
}

fn log_rejection(campaign_id: Uuid, reason: &Rejection) {
    let category = reason.category().as_str();
    match reason.category() {
        RejectionCategory::ConfigurationError => {
            error!(campaign_id = %campaign_id, category, reason = reason.reason(), detail = ?reason, "campaign misconfigured")
        }
        RejectionCategory::ProviderUnavailable | RejectionCategory::CacheMiss => {
            warn!(campaign_id = %campaign_id, category, reason = reason.reason(), detail = ?reason, "campaign skipped")
        }
        RejectionCategory::Targeting | RejectionCategory::ValidationError => {
            debug!(campaign_id = %campaign_id, reason = reason.reason(), "campaign not targeted")
        }
    }
}
