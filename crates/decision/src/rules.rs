//! Targeting rule set.
//!
//! Each rule is a pure function returning `Ok(())` to admit the campaign or
//! the [`Rejection`] explaining why it is skipped. The engine runs them in a
//! fixed order and stops at the first rejection.
use std::collections::HashSet;

use campaign::{Campaign, CountryRules, Device, PageviewRule, PageviewRuleKind};
use serde::Serialize;
use uuid::Uuid;

use crate::device::DeviceClass;

/// Error taxonomy shared by request-level errors and campaign rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    /// Missing required request field. Aborts the request.
    ValidationError,
    /// A segment or geolocation lookup failed.
    ProviderUnavailable,
    /// The campaign or its segments are misconfigured.
    ConfigurationError,
    /// An active id has no cached snapshot.
    CacheMiss,
    /// An ordinary targeting rule did not match.
    Targeting,
}

impl RejectionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCategory::ValidationError => "validation_error",
            RejectionCategory::ProviderUnavailable => "provider_unavailable",
            RejectionCategory::ConfigurationError => "configuration_error",
            RejectionCategory::CacheMiss => "cache_miss",
            RejectionCategory::Targeting => "targeting",
        }
    }
}

/// Why a campaign was skipped for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    CacheMiss,
    NotRunning,
    NoVariants,
    /// The weighted draw found no variant with a positive proportion.
    UnresolvableVariant,
    SeenThisSession,
    SignedInMismatch { required: bool },
    DeviceExcluded(Device),
    CountryUnresolved(String),
    CountryExcluded(String),
    SegmentMismatch { provider: String, code: String },
    SegmentUnavailable { provider: String, code: String, message: String },
    SegmentMisconfigured { provider: String, code: String, message: String },
    Pageview { rule: PageviewRuleKind, num: u64, count: u64 },
}

impl Rejection {
    pub fn category(&self) -> RejectionCategory {
        match self {
            Rejection::CacheMiss => RejectionCategory::CacheMiss,
            Rejection::NoVariants
            | Rejection::UnresolvableVariant
            | Rejection::SegmentMisconfigured { .. } => RejectionCategory::ConfigurationError,
            Rejection::CountryUnresolved(_) | Rejection::SegmentUnavailable { .. } => {
                RejectionCategory::ProviderUnavailable
            }
            Rejection::NotRunning
            | Rejection::SeenThisSession
            | Rejection::SignedInMismatch { .. }
            | Rejection::DeviceExcluded(_)
            | Rejection::CountryExcluded(_)
            | Rejection::SegmentMismatch { .. }
            | Rejection::Pageview { .. } => RejectionCategory::Targeting,
        }
    }

    /// Short machine-readable reason for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::CacheMiss => "cache_miss",
            Rejection::NotRunning => "not_running",
            Rejection::NoVariants => "no_variants",
            Rejection::UnresolvableVariant => "unresolvable_variant",
            Rejection::SeenThisSession => "seen_this_session",
            Rejection::SignedInMismatch { .. } => "signed_in_mismatch",
            Rejection::DeviceExcluded(_) => "device_excluded",
            Rejection::CountryUnresolved(_) => "country_unresolved",
            Rejection::CountryExcluded(_) => "country_excluded",
            Rejection::SegmentMismatch { .. } => "segment_mismatch",
            Rejection::SegmentUnavailable { .. } => "segment_unavailable",
            Rejection::SegmentMisconfigured { .. } => "segment_misconfigured",
            Rejection::Pageview { .. } => "pageview_rule",
        }
    }
}

pub fn check_has_variants(campaign: &Campaign) -> Result<(), Rejection> {
    if campaign.variants.is_empty() {
        return Err(Rejection::NoVariants);
    }
    Ok(())
}

pub fn check_once_per_session(campaign: &Campaign, seen: &HashSet<Uuid>) -> Result<(), Rejection> {
    if campaign.once_per_session && seen.contains(&campaign.id) {
        return Err(Rejection::SeenThisSession);
    }
    Ok(())
}

pub fn check_signed_in(campaign: &Campaign, signed_in: bool) -> Result<(), Rejection> {
    match campaign.signed_in {
        Some(required) if required != signed_in => Err(Rejection::SignedInMismatch { required }),
        _ => Ok(()),
    }
}

/// A visitor that is neither mobile nor desktop (bots, unknown agents) is
/// never excluded by device rules.
pub fn check_device(campaign: &Campaign, class: DeviceClass) -> Result<(), Rejection> {
    if class.mobile && !campaign.allows_device(Device::Mobile) {
        return Err(Rejection::DeviceExcluded(Device::Mobile));
    }
    if class.desktop && !campaign.allows_device(Device::Desktop) {
        return Err(Rejection::DeviceExcluded(Device::Desktop));
    }
    Ok(())
}

/// `country` is an upper-case ISO code. Only called when the campaign has
/// country rules.
pub fn check_country(rules: &CountryRules, country: &str) -> Result<(), Rejection> {
    if !rules.blacklist.is_empty() && rules.blacklist.iter().any(|c| c == country) {
        return Err(Rejection::CountryExcluded(country.to_string()));
    }
    if !rules.whitelist.is_empty() && !rules.whitelist.iter().any(|c| c == country) {
        return Err(Rejection::CountryExcluded(country.to_string()));
    }
    Ok(())
}

/// Rules missing either field, or with `num == 0`, are ignored. The first
/// failing rule rejects.
pub fn check_pageview_rules(rules: &[PageviewRule], count: u64) -> Result<(), Rejection> {
    for (rule, num) in rules.iter().filter_map(PageviewRule::active) {
        let admitted = match rule {
            PageviewRuleKind::Every => count % num == 0,
            PageviewRuleKind::Since => count >= num,
            PageviewRuleKind::Before => count < num,
        };
        if !admitted {
            return Err(Rejection::Pageview { rule, num, count });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign::CountryRule;

    fn campaign() -> Campaign {
        Campaign::new("rules")
    }

    #[test]
    fn once_per_session_only_applies_when_flagged() {
        let mut c = campaign();
        let seen: HashSet<Uuid> = [c.id].into_iter().collect();
        assert_eq!(check_once_per_session(&c, &seen), Ok(()));
        c.once_per_session = true;
        assert_eq!(check_once_per_session(&c, &seen), Err(Rejection::SeenThisSession));
        assert_eq!(check_once_per_session(&c, &HashSet::new()), Ok(()));
    }

    #[test]
    fn signed_in_is_tri_state() {
        let mut c = campaign();
        assert_eq!(check_signed_in(&c, true), Ok(()));
        assert_eq!(check_signed_in(&c, false), Ok(()));
        c.signed_in = Some(true);
        assert_eq!(check_signed_in(&c, true), Ok(()));
        assert_eq!(
            check_signed_in(&c, false),
            Err(Rejection::SignedInMismatch { required: true })
        );
        c.signed_in = Some(false);
        assert!(check_signed_in(&c, true).is_err());
    }

    #[test]
    fn device_rules_exclude_only_detected_classes() {
        let mut c = campaign();
        c.devices = vec![Device::Desktop];
        let mobile = DeviceClass { mobile: true, desktop: false };
        let desktop = DeviceClass { mobile: false, desktop: true };
        let unknown = DeviceClass::default();

        assert_eq!(check_device(&c, mobile), Err(Rejection::DeviceExcluded(Device::Mobile)));
        assert_eq!(check_device(&c, desktop), Ok(()));
        assert_eq!(check_device(&c, unknown), Ok(()));

        c.devices.clear();
        assert!(check_device(&c, desktop).is_err());
        assert_eq!(check_device(&c, unknown), Ok(()));
    }

    fn rules(codes: &[&str], blacklisted: bool) -> CountryRules {
        let mut c = campaign();
        c.countries = codes
            .iter()
            .map(|code| CountryRule {
                iso_code: code.to_string(),
                blacklisted,
            })
            .collect();
        c.country_rules()
    }

    #[test]
    fn blacklist_excludes_exactly_its_codes() {
        let blacklist = rules(&["cz", "HU"], true);
        assert!(check_country(&blacklist, "CZ").is_err());
        assert!(check_country(&blacklist, "HU").is_err());
        assert_eq!(check_country(&blacklist, "SK"), Ok(()));
        assert_eq!(check_country(&blacklist, "US"), Ok(()));
    }

    #[test]
    fn whitelist_admits_exactly_its_codes() {
        let whitelist = rules(&["SK"], false);
        assert_eq!(check_country(&whitelist, "SK"), Ok(()));
        assert_eq!(
            check_country(&whitelist, "CZ"),
            Err(Rejection::CountryExcluded("CZ".into()))
        );
    }

    #[test]
    fn every_three_admits_multiples_of_three() {
        let every = [PageviewRule::new(PageviewRuleKind::Every, 3)];
        let admitted: Vec<u64> = (0..10)
            .filter(|&n| check_pageview_rules(&every, n).is_ok())
            .collect();
        assert_eq!(admitted, vec![0, 3, 6, 9]);
    }

    #[test]
    fn since_and_before_bound_the_count() {
        let window = [
            PageviewRule::new(PageviewRuleKind::Since, 2),
            PageviewRule::new(PageviewRuleKind::Before, 5),
        ];
        let admitted: Vec<u64> = (0..8)
            .filter(|&n| check_pageview_rules(&window, n).is_ok())
            .collect();
        assert_eq!(admitted, vec![2, 3, 4]);

        assert_eq!(
            check_pageview_rules(&window, 1),
            Err(Rejection::Pageview {
                rule: PageviewRuleKind::Since,
                num: 2,
                count: 1
            }),
            "first failing rule wins"
        );
    }

    #[test]
    fn incomplete_pageview_rules_are_ignored() {
        let rules = [
            PageviewRule { rule: None, num: Some(3) },
            PageviewRule { rule: Some(PageviewRuleKind::Every), num: None },
            PageviewRule::new(PageviewRuleKind::Every, 0),
        ];
        assert_eq!(check_pageview_rules(&rules, 1), Ok(()));
    }

    #[test]
    fn categories_follow_the_taxonomy() {
        assert_eq!(Rejection::NoVariants.category(), RejectionCategory::ConfigurationError);
        assert_eq!(Rejection::CacheMiss.category(), RejectionCategory::CacheMiss);
        assert_eq!(
            Rejection::CountryUnresolved("no address".into()).category(),
            RejectionCategory::ProviderUnavailable
        );
        assert_eq!(Rejection::SeenThisSession.category(), RejectionCategory::Targeting);
        assert_eq!(RejectionCategory::CacheMiss.as_str(), "cache_miss");
    }
}
