use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::render::RenderFragment;
use crate::rules::{Rejection, RejectionCategory};

/// Variant previously shown to the visitor, as reported by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorSelection {
    #[serde(default, deserialize_with = "lenient_uuid")]
    pub banner_id: Option<Uuid>,
    #[serde(default, deserialize_with = "lenient_uuid")]
    pub variant_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenCampaign {
    pub campaign_id: Uuid,
}

/// Everything a showtime decision looks at, decoded from the `data` query
/// parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionContext {
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub browser_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_agent: Option<String>,
    /// Client address. The HTTP layer fills it from the connection.
    #[serde(default)]
    pub ip: Option<IpAddr>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub pageview_count: u64,
    #[serde(default, deserialize_with = "lenient_banners")]
    pub campaigns_banners: HashMap<Uuid, PriorSelection>,
    #[serde(default, deserialize_with = "lenient_seen")]
    pub campaigns_seen: Vec<SeenCampaign>,
    /// Opaque per-provider segment cache round-tripped by the client.
    #[serde(default)]
    pub cache: Option<Value>,
}

impl DecisionContext {
    pub fn is_signed_in(&self) -> bool {
        self.user_id.is_some()
    }

    /// Request-level validation. Missing `url` is checked first.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.is_none() {
            return Err(ValidationError::MissingUrl);
        }
        if self.user_id.is_none() && self.browser_id.is_none() {
            return Err(ValidationError::MissingBrowserId);
        }
        Ok(())
    }
}

/// Strings that are empty or whitespace-only count as absent; numbers are
/// accepted and stringified.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_uuid<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Uuid::parse_str(s.trim()).ok(),
        _ => None,
    })
}

/// Entries keyed by anything but a campaign UUID are dropped; `null` or a
/// non-object decodes to an empty map.
fn lenient_banners<'de, D>(deserializer: D) -> Result<HashMap<Uuid, PriorSelection>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(Value::Object(map)) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(HashMap::new());
    };
    Ok(map
        .into_iter()
        .filter_map(|(key, value)| {
            let id = Uuid::parse_str(key.trim()).ok()?;
            let prior = serde_json::from_value::<PriorSelection>(value).ok()?;
            Some((id, prior))
        })
        .collect())
}

fn lenient_seen<'de, D>(deserializer: D) -> Result<Vec<SeenCampaign>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(Value::Array(items)) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .iter()
        .filter_map(|item| item.get("campaignId")?.as_str())
        .filter_map(|raw| Uuid::parse_str(raw.trim()).ok())
        .map(|campaign_id| SeenCampaign { campaign_id })
        .collect())
}

/// One campaign chosen for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub campaign_id: Uuid,
    pub variant_id: Uuid,
    pub banner_id: Option<Uuid>,
    pub control_group: bool,
    /// Renderable banner; `None` for control-group variants.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<RenderFragment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedCampaign {
    pub campaign_id: Uuid,
    pub reason: Rejection,
}

/// Outcome of one showtime decision.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecisionResult {
    /// Accepted campaigns in active-id order.
    pub decisions: Vec<Decision>,
    /// Updated client segment cache.
    pub provider_data: Value,
    /// Why each skipped campaign was skipped.
    pub rejected: Vec<RejectedCampaign>,
}

impl DecisionResult {
    pub fn campaign_ids(&self) -> Vec<Uuid> {
        self.decisions.iter().map(|d| d.campaign_id).collect()
    }
}

/// Request-level validation failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("url is required and missing")]
    MissingUrl,
    #[error("browserId is required and missing")]
    MissingBrowserId,
}

impl ValidationError {
    /// Status used when answering over HTTP. A missing `url` keeps the
    /// historical 200 with `success: false`.
    pub fn http_status(&self) -> u16 {
        match self {
            ValidationError::MissingUrl => 200,
            ValidationError::MissingBrowserId => 400,
        }
    }
}

/// Errors that abort a whole decision. Per-campaign problems are
/// [`Rejection`]s instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecisionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl DecisionError {
    pub fn category(&self) -> RejectionCategory {
        match self {
            DecisionError::Validation(_) => RejectionCategory::ValidationError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_decodes_client_payload() {
        let campaign = Uuid::new_v4();
        let variant = Uuid::new_v4();
        let ctx: DecisionContext = serde_json::from_value(json!({
            "url": "https://example.com/article",
            "userId": 42,
            "browserId": "",
            "userAgent": "Mozilla/5.0",
            "pageviewCount": "7",
            "campaignsBanners": { campaign.to_string(): { "variantId": variant, "bannerId": "garbage" } },
            "campaignsSeen": [{ "campaignId": campaign }],
            "cache": { "remp_segment": {} }
        }))
        .unwrap();

        assert_eq!(ctx.user_id.as_deref(), Some("42"));
        assert_eq!(ctx.browser_id, None);
        assert_eq!(ctx.pageview_count, 7);
        let prior = &ctx.campaigns_banners[&campaign];
        assert_eq!(prior.variant_id, Some(variant));
        assert_eq!(prior.banner_id, None);
        assert_eq!(ctx.campaigns_seen[0].campaign_id, campaign);
        assert!(ctx.is_signed_in());
    }

    #[test]
    fn malformed_sticky_and_seen_entries_are_dropped() {
        let ctx: DecisionContext =
            serde_json::from_str(r#"{"url":"u","browserId":"b","campaignsSeen":null}"#).unwrap();
        assert!(ctx.campaigns_seen.is_empty());
        assert!(ctx.campaigns_banners.is_empty());

        let kept = Uuid::new_v4();
        let variant = Uuid::new_v4();
        let broken = Uuid::new_v4().to_string();
        let ctx: DecisionContext = serde_json::from_value(json!({
            "url": "u",
            "browserId": "b",
            "campaignsBanners": {
                "42": { "variantId": "x" },
                kept.to_string(): { "variantId": variant },
                broken: "not an object"
            },
            "campaignsSeen": [
                { "campaignId": "42" },
                { "campaignId": null },
                "loose",
                { "campaignId": kept }
            ]
        }))
        .unwrap();
        assert_eq!(ctx.campaigns_banners.len(), 1);
        assert_eq!(ctx.campaigns_banners[&kept].variant_id, Some(variant));
        assert_eq!(ctx.campaigns_seen, vec![SeenCampaign { campaign_id: kept }]);

        let ctx: DecisionContext =
            serde_json::from_value(json!({ "campaignsBanners": [1, 2], "campaignsSeen": {} }))
                .unwrap();
        assert!(ctx.campaigns_banners.is_empty());
        assert!(ctx.campaigns_seen.is_empty());
    }

    #[test]
    fn validation_checks_url_before_browser_id() {
        let empty = DecisionContext::default();
        assert_eq!(empty.validate(), Err(ValidationError::MissingUrl));

        let anonymous = DecisionContext {
            url: Some("https://example.com".into()),
            ..DecisionContext::default()
        };
        let err = anonymous.validate().unwrap_err();
        assert_eq!(err, ValidationError::MissingBrowserId);
        assert_eq!(err.http_status(), 400);
        assert_eq!(ValidationError::MissingUrl.http_status(), 200);

        let signed_in = DecisionContext {
            user_id: Some("1".into()),
            ..anonymous
        };
        assert_eq!(signed_in.validate(), Ok(()));
    }

    #[test]
    fn control_group_decisions_serialize_without_banner() {
        let decision = Decision {
            campaign_id: Uuid::nil(),
            variant_id: Uuid::nil(),
            banner_id: None,
            control_group: true,
            banner: None,
        };
        let value = serde_json::to_value(&decision).unwrap();
        assert_eq!(value["controlGroup"], true);
        assert!(value.get("banner").is_none());
    }
}
