//! Schedule evaluation and lifecycle transitions.
//!
//! A campaign only takes part in a showtime decision while at least one of
//! its schedules is *running*:
//!
//! ```text
//! running  := status == executed && start_time <= now && (end_time is None || now < end_time)
//! runnable := status in {ready, executed} && (end_time is None || now < end_time)
//! ```
//!
//! Lifecycle:
//!
//! ```text
//!   ready ──start──▶ executed ──pause──▶ paused
//!     │                 │  ▲               │
//!     │                 │  └────resume─────┘
//!     └──────stop───────┴──────stop────────┴──▶ stopped (terminal)
//! ```
//!
//! A `ready` schedule whose start time has passed is promoted to `executed`
//! by [`Schedule::promote_due`], which the server runs periodically.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ScheduleError;

/// Lifecycle status of a [`Schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Planned, waiting for its start time.
    Ready,
    /// Started; running while inside its time window.
    Executed,
    /// Temporarily halted by an operator.
    Paused,
    /// Terminal.
    Stopped,
}

/// A time window plus lifecycle status controlling campaign eligibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub status: ScheduleStatus,
}

impl Schedule {
    /// New `ready` schedule for the given window.
    pub fn planned(
        campaign_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            start_time,
            end_time,
            status: ScheduleStatus::Ready,
        }
    }

    /// New open-ended schedule that is already executing from `now`.
    pub fn started_now(campaign_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            start_time: now,
            end_time: None,
            status: ScheduleStatus::Executed,
        }
    }

    fn not_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_time.map_or(true, |end| now < end)
    }

    /// True iff the schedule is executing and `now` falls inside its window.
    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Executed && now >= self.start_time && self.not_ended(now)
    }

    /// True iff the schedule can still run: ready or executed, and not ended.
    pub fn is_runnable(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            ScheduleStatus::Ready | ScheduleStatus::Executed
        ) && self.not_ended(now)
    }

    /// Runnable but not yet started (status ready).
    pub fn is_planned(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Ready && self.not_ended(now)
    }

    /// Manually start the schedule.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        if !self.is_runnable(now) {
            return Err(ScheduleError::NotRunnable {
                id: self.id,
                action: "start",
                status: self.status,
            });
        }
        self.status = ScheduleStatus::Executed;
        Ok(())
    }

    /// Pause a running schedule.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        if !self.is_running(now) {
            return Err(ScheduleError::NotRunning(self.id));
        }
        self.status = ScheduleStatus::Paused;
        Ok(())
    }

    /// Resume a paused schedule whose window has not ended yet.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        if self.status != ScheduleStatus::Paused || !self.not_ended(now) {
            return Err(ScheduleError::NotPaused(self.id));
        }
        self.status = ScheduleStatus::Executed;
        Ok(())
    }

    /// Stop the schedule for good. The window is closed at `now` unless it
    /// already ended earlier.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let stoppable = self.is_runnable(now) || self.status == ScheduleStatus::Paused;
        if !stoppable {
            return Err(ScheduleError::NotRunnable {
                id: self.id,
                action: "stop",
                status: self.status,
            });
        }
        self.status = ScheduleStatus::Stopped;
        if self.not_ended(now) {
            self.end_time = Some(now);
        }
        Ok(())
    }

    /// Promote a `ready` schedule to `executed` once its start time is due.
    /// Returns whether the status changed.
    pub fn promote_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_planned(now) && self.start_time <= now {
            self.status = ScheduleStatus::Executed;
            return true;
        }
        false
    }
}

/// True iff at least one of the schedules is running at `now`.
pub fn any_running<'a, I>(schedules: I, now: DateTime<Utc>) -> bool
where
    I: IntoIterator<Item = &'a Schedule>,
{
    schedules.into_iter().any(|s| s.is_running(now))
}
