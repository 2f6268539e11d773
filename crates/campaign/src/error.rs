//! Error types produced by the campaign model.
//!
//! Two families live here:
//!
//! | Error | Raised by | Meaning |
//! |-------|-----------|---------|
//! | [`CampaignError`] | [`Campaign::validate`](crate::Campaign::validate) | The campaign graph breaks a structural invariant |
//! | [`ScheduleError`] | schedule transitions | The requested lifecycle transition is not allowed from the current state |
//!
//! Both are cheap to clone and comparable so callers (and tests) can match on
//! the exact variant.
use thiserror::Error;
use uuid::Uuid;

use crate::schedule::ScheduleStatus;

/// Structural invariant violations detected on a campaign graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CampaignError {
    /// The campaign has no variants at all.
    #[error("campaign {0} has no variants")]
    NoVariants(Uuid),

    /// A control-group variant still references banner content.
    #[error("control group variant {0} must not reference a banner")]
    ControlGroupWithBanner(Uuid),

    /// A regular variant has no banner to display.
    #[error("variant {0} has no banner and is not a control group")]
    MissingBanner(Uuid),

    /// A single variant proportion is above 100.
    #[error("variant {variant} proportion {proportion} exceeds 100")]
    ProportionOutOfRange { variant: Uuid, proportion: u8 },

    /// Proportions of all variants add up to more than 100.
    #[error("variant proportions sum to {0}, which exceeds 100")]
    ProportionOverflow(u32),

    /// A variant, segment or schedule claims a different owning campaign.
    #[error("{kind} {id} belongs to campaign {owner}, not {campaign}")]
    ForeignChild {
        kind: &'static str,
        id: Uuid,
        owner: Uuid,
        campaign: Uuid,
    },

    /// Both whitelist and blacklist country rows are attached.
    #[error("campaign {0} mixes whitelisted and blacklisted countries")]
    MixedCountryRules(Uuid),

    /// A country rule does not carry a two letter ISO code.
    #[error("invalid country code {0:?}")]
    InvalidCountryCode(String),

    /// A segment is missing its provider key or code.
    #[error("segment {0} must name both provider and code")]
    IncompleteSegment(Uuid),

    /// A schedule ends before it starts.
    #[error("schedule {0} ends before it starts")]
    InvertedSchedule(Uuid),
}

/// Rejected schedule lifecycle transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScheduleError {
    /// `start`/`stop` on a schedule that is neither ready nor executed, or already ended.
    #[error("cannot {action} schedule {id}: not runnable (status {status:?})")]
    NotRunnable {
        id: Uuid,
        action: &'static str,
        status: ScheduleStatus,
    },

    /// `pause` on a schedule that is not currently running.
    #[error("cannot pause schedule {0}: not running")]
    NotRunning(Uuid),

    /// `resume` on a schedule that is not paused.
    #[error("cannot resume schedule {0}: not paused")]
    NotPaused(Uuid),

    /// Lookup of a schedule that the campaign does not own.
    #[error("schedule {0} not found")]
    NotFound(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_entity() {
        let id = Uuid::nil();
        assert!(CampaignError::NoVariants(id).to_string().contains("no variants"));
        assert!(CampaignError::ProportionOverflow(130)
            .to_string()
            .contains("130"));
        assert_eq!(
            ScheduleError::NotRunning(id).to_string(),
            format!("cannot pause schedule {id}: not running")
        );
    }

    #[test]
    fn not_runnable_mentions_action_and_status() {
        let err = ScheduleError::NotRunnable {
            id: Uuid::nil(),
            action: "start",
            status: ScheduleStatus::Stopped,
        };
        let msg = err.to_string();
        assert!(msg.contains("cannot start"));
        assert!(msg.contains("Stopped"));
    }
}
