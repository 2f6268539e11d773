//! # Campaign model
//!
//! Data model shared by every showtime component: campaigns, their variants
//! (campaign banners), audience segments, country rules and schedules.
//!
//! The crate is pure: no I/O, no clocks. Time-dependent checks take `now`
//! explicitly so callers (and tests) decide which instant is evaluated.
//!
//! ```
//! use campaign::{Campaign, Schedule};
//! use chrono::Utc;
//!
//! let now = Utc::now();
//! let mut campaign = Campaign::new("newsletter signup");
//! assert!(!campaign.is_running(now));
//!
//! campaign.activate(now);
//! assert!(campaign.is_running(now));
//! assert!(matches!(campaign.schedules.as_slice(), [s] if s.is_running(now)));
//! # let _ = Schedule::planned(campaign.id, now, None);
//! ```
mod error;
mod schedule;
mod types;

pub use crate::error::{CampaignError, ScheduleError};
pub use crate::schedule::{any_running, Schedule, ScheduleStatus};
pub use crate::types::{
    Banner, BannerTemplate, Campaign, CampaignSegment, CountryRule, CountryRules, Device,
    PageviewRule, PageviewRuleKind, Variant,
};
