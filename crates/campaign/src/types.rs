use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CampaignError, ScheduleError};
use crate::schedule::{any_running, Schedule};

/// Device classes a campaign can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Desktop,
    Mobile,
}

fn default_devices() -> Vec<Device> {
    vec![Device::Desktop, Device::Mobile]
}

/// Kind of pageview rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageviewRuleKind {
    /// Show on every n-th pageview (`count % n == 0`).
    Every,
    /// Show once at least n pageviews happened.
    Since,
    /// Show only before the n-th pageview.
    Before,
}

impl PageviewRuleKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "every" => Some(Self::Every),
            "since" => Some(Self::Since),
            "before" => Some(Self::Before),
            _ => None,
        }
    }
}

/// One pageview rule as stored on the campaign.
///
/// Admin forms submit half-filled rows, so both fields are optional and
/// deserialization is lenient: empty strings, unknown kinds and non-numeric
/// counts all load as `None` and the row is ignored during evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageviewRule {
    #[serde(default, deserialize_with = "lenient_kind")]
    pub rule: Option<PageviewRuleKind>,
    #[serde(default, deserialize_with = "lenient_num")]
    pub num: Option<u64>,
}

impl PageviewRule {
    pub fn new(rule: PageviewRuleKind, num: u64) -> Self {
        Self {
            rule: Some(rule),
            num: Some(num),
        }
    }

    /// The rule if both fields are populated and `num` is non-zero.
    pub fn active(&self) -> Option<(PageviewRuleKind, u64)> {
        match (self.rule, self.num) {
            (Some(kind), Some(num)) if num > 0 => Some((kind, num)),
            _ => None,
        }
    }
}

fn lenient_kind<'de, D>(deserializer: D) -> Result<Option<PageviewRuleKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) => PageviewRuleKind::parse(&s),
        _ => None,
    })
}

fn lenient_num<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Banner templates known to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BannerTemplate {
    Html,
    MediumRectangle,
    Bar,
    ShortMessage,
}

/// Creative content referenced by a variant.
///
/// `content` is the template-specific payload (text, colours, markup) and is
/// forwarded untouched; layout keys are resolved against the configured
/// layout maps when a render fragment is assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Banner {
    pub id: Uuid,
    pub name: String,
    pub template: BannerTemplate,
    #[serde(default)]
    pub dimensions: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub alignment: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub display_delay_ms: u64,
    #[serde(default)]
    pub closeable: bool,
    #[serde(default)]
    pub content: Value,
}

/// One arm of a campaign (a "campaign banner").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub campaign_id: Uuid,
    #[serde(default)]
    pub banner: Option<Banner>,
    pub proportion: u8,
    #[serde(default)]
    pub control_group: bool,
    #[serde(default)]
    pub weight: u32,
}

/// Audience membership criterion resolved by a segment provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignSegment {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub provider: String,
    pub code: String,
}

/// A country attached to a campaign, either admitted or excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryRule {
    pub iso_code: String,
    #[serde(default)]
    pub blacklisted: bool,
}

/// Country rows split into whitelist and blacklist, codes upper-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryRules {
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
}

impl CountryRules {
    pub fn is_empty(&self) -> bool {
        self.whitelist.is_empty() && self.blacklist.is_empty()
    }
}

/// A configured promotional unit: targeting rules plus its variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    /// `None` targets everybody, otherwise only signed-in (`true`) or
    /// anonymous (`false`) visitors.
    #[serde(default)]
    pub signed_in: Option<bool>,
    #[serde(default)]
    pub once_per_session: bool,
    #[serde(default)]
    pub pageview_rules: Vec<PageviewRule>,
    #[serde(default = "default_devices")]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub segments: Vec<CampaignSegment>,
    #[serde(default)]
    pub countries: Vec<CountryRule>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

impl Campaign {
    /// Empty, inactive campaign targeting every device.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            active: false,
            signed_in: None,
            once_per_session: false,
            pageview_rules: Vec::new(),
            devices: default_devices(),
            variants: Vec::new(),
            segments: Vec::new(),
            countries: Vec::new(),
            schedules: Vec::new(),
        }
    }

    /// Check the structural invariants of the campaign graph.
    pub fn validate(&self) -> Result<(), CampaignError> {
        if self.variants.is_empty() {
            return Err(CampaignError::NoVariants(self.id));
        }

        let mut regular_total: u32 = 0;
        for variant in &self.variants {
            self.check_owner("variant", variant.id, variant.campaign_id)?;
            if variant.proportion > 100 {
                return Err(CampaignError::ProportionOutOfRange {
                    variant: variant.id,
                    proportion: variant.proportion,
                });
            }
            match (variant.control_group, variant.banner.is_some()) {
                (true, true) => return Err(CampaignError::ControlGroupWithBanner(variant.id)),
                (false, false) => return Err(CampaignError::MissingBanner(variant.id)),
                (false, true) => regular_total += u32::from(variant.proportion),
                (true, false) => {}
            }
        }
        if regular_total > 100 {
            return Err(CampaignError::ProportionOverflow(regular_total));
        }

        for segment in &self.segments {
            self.check_owner("segment", segment.id, segment.campaign_id)?;
            if segment.provider.trim().is_empty() || segment.code.trim().is_empty() {
                return Err(CampaignError::IncompleteSegment(segment.id));
            }
        }

        for schedule in &self.schedules {
            self.check_owner("schedule", schedule.id, schedule.campaign_id)?;
            if schedule.end_time.is_some_and(|end| end < schedule.start_time) {
                return Err(CampaignError::InvertedSchedule(schedule.id));
            }
        }

        for country in &self.countries {
            let code = country.iso_code.trim();
            if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(CampaignError::InvalidCountryCode(country.iso_code.clone()));
            }
        }
        let rules = self.country_rules();
        if !rules.whitelist.is_empty() && !rules.blacklist.is_empty() {
            return Err(CampaignError::MixedCountryRules(self.id));
        }

        Ok(())
    }

    fn check_owner(&self, kind: &'static str, id: Uuid, owner: Uuid) -> Result<(), CampaignError> {
        if owner != self.id {
            return Err(CampaignError::ForeignChild {
                kind,
                id,
                owner,
                campaign: self.id,
            });
        }
        Ok(())
    }

    /// True iff at least one schedule is running at `now`.
    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        any_running(&self.schedules, now)
    }

    /// Mark the campaign active, starting a new open-ended schedule when none
    /// is running. Returns the id of the schedule created, if any.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Option<Uuid> {
        self.active = true;
        if self.is_running(now) {
            return None;
        }
        let schedule = Schedule::started_now(self.id, now);
        let id = schedule.id;
        self.schedules.push(schedule);
        Some(id)
    }

    /// Mark the campaign inactive and stop every running or planned schedule.
    /// Returns how many schedules were stopped.
    pub fn deactivate(&mut self, now: DateTime<Utc>) -> usize {
        self.active = false;
        let mut stopped = 0;
        for schedule in self.schedules.iter_mut().filter(|s| s.is_runnable(now)) {
            if schedule.stop(now).is_ok() {
                stopped += 1;
            }
        }
        stopped
    }

    /// Promote due `ready` schedules. Returns whether anything changed.
    pub fn promote_due_schedules(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for schedule in &mut self.schedules {
            changed |= schedule.promote_due(now);
        }
        changed
    }

    pub fn schedule_mut(&mut self, id: Uuid) -> Result<&mut Schedule, ScheduleError> {
        self.schedules
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(ScheduleError::NotFound(id))
    }

    pub fn variant(&self, id: Uuid) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }

    /// First variant showing the given banner.
    pub fn variant_for_banner(&self, banner_id: Uuid) -> Option<&Variant> {
        self.variants
            .iter()
            .find(|v| v.banner.as_ref().is_some_and(|b| b.id == banner_id))
    }

    /// `(variant id, proportion)` pairs in stored order.
    pub fn proportion_mapping(&self) -> Vec<(Uuid, u8)> {
        self.variants.iter().map(|v| (v.id, v.proportion)).collect()
    }

    /// Split the country rows into whitelist and blacklist. Codes are
    /// upper-cased and de-duplicated, keeping first occurrence order.
    pub fn country_rules(&self) -> CountryRules {
        let mut rules = CountryRules::default();
        let mut seen = HashSet::new();
        for country in &self.countries {
            let code = country.iso_code.trim().to_ascii_uppercase();
            if !seen.insert((code.clone(), country.blacklisted)) {
                continue;
            }
            if country.blacklisted {
                rules.blacklist.push(code);
            } else {
                rules.whitelist.push(code);
            }
        }
        rules
    }

    pub fn allows_device(&self, device: Device) -> bool {
        self.devices.contains(&device)
    }
}
