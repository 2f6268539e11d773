//! Campaign administration.
//!
//! Every handler that changes the repository reports the change to the
//! campaign cache before answering, so the next showtime request already
//! sees it.
use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use campaign::{Campaign, Schedule};
use catalog::{CatalogError, Mutation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Campaign list response
#[derive(Debug, Serialize)]
pub struct CampaignList {
    pub campaigns: Vec<Campaign>,
    pub total: usize,
    pub active: usize,
}

/// Body of `POST /api/v1/campaigns/{id}/schedules`
#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

/// Manual schedule transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleAction {
    Start,
    Pause,
    Resume,
    Stop,
}

impl std::str::FromStr for ScheduleAction {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ScheduleAction::Start),
            "pause" => Ok(ScheduleAction::Pause),
            "resume" => Ok(ScheduleAction::Resume),
            "stop" => Ok(ScheduleAction::Stop),
            other => Err(ServerError::BadRequest(format!(
                "unknown schedule action '{other}', expected start, pause, resume or stop"
            ))),
        }
    }
}

impl ScheduleAction {
    fn apply(self, schedule: &mut Schedule, now: DateTime<Utc>) -> Result<(), CatalogError> {
        match self {
            ScheduleAction::Start => schedule.start(now)?,
            ScheduleAction::Pause => schedule.pause(now)?,
            ScheduleAction::Resume => schedule.resume(now)?,
            ScheduleAction::Stop => schedule.stop(now)?,
        }
        Ok(())
    }
}

fn find(state: &ServerState, id: Uuid) -> ServerResult<Campaign> {
    state
        .showtime
        .repository()
        .get(id)
        .ok_or(ServerError::Catalog(CatalogError::NotFound(id)))
}

/// Kick off filter population for the campaign's cacheable segments.
fn populate_segments(state: &ServerState, campaign: &Campaign) {
    let oracle = state.showtime.oracle();
    if !oracle.config().populate_filters {
        return;
    }
    for segment in &campaign.segments {
        match oracle.cache_enabled(segment) {
            Ok(true) => {
                oracle.schedule_population(segment);
            }
            Ok(false) => {}
            Err(err) => tracing::warn!(
                campaign_id = %campaign.id,
                provider = %segment.provider,
                segment = %segment.code,
                error = %err,
                "campaign references an unusable segment"
            ),
        }
    }
}

/// List all campaigns in creation order
pub async fn list_campaigns(
    State(state): State<Arc<ServerState>>,
) -> ServerResult<impl IntoResponse> {
    let showtime = &state.showtime;
    let campaigns = showtime.repository().list();
    Ok(Json(CampaignList {
        total: campaigns.len(),
        active: showtime.cache().active_ids().len(),
        campaigns,
    }))
}

pub async fn get_campaign(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> ServerResult<impl IntoResponse> {
    Ok(Json(find(&state, id)?))
}

/// Create or replace a campaign. Answers 201 when the campaign is new.
pub async fn create_campaign(
    State(state): State<Arc<ServerState>>,
    Json(campaign): Json<Campaign>,
) -> ServerResult<impl IntoResponse> {
    store_campaign(&state, campaign)
}

pub async fn replace_campaign(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
    Json(campaign): Json<Campaign>,
) -> ServerResult<impl IntoResponse> {
    if campaign.id != id {
        return Err(ServerError::BadRequest(format!(
            "campaign id {} does not match path id {id}",
            campaign.id
        )));
    }
    store_campaign(&state, campaign)
}

fn store_campaign(state: &ServerState, campaign: Campaign) -> ServerResult<(StatusCode, Json<Campaign>)> {
    let showtime = &state.showtime;
    let created = showtime.repository().upsert(campaign.clone())?;
    showtime.commit(Mutation::Campaign(campaign.id))?;
    populate_segments(state, &campaign);

    tracing::info!(campaign_id = %campaign.id, created, "campaign stored");
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(campaign)))
}

pub async fn delete_campaign(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> ServerResult<impl IntoResponse> {
    let showtime = &state.showtime;
    showtime.repository().remove(id)?;
    showtime.commit(Mutation::Deleted(id))?;
    tracing::info!(campaign_id = %id, "campaign deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Activate a campaign, starting it now when no schedule is running.
pub async fn activate_campaign(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> ServerResult<impl IntoResponse> {
    let showtime = &state.showtime;
    let now = Utc::now();
    let campaign = showtime.repository().update(id, |campaign| {
        campaign.activate(now);
        Ok(campaign.clone())
    })?;
    showtime.commit(Mutation::Schedule { campaign_id: id })?;
    tracing::info!(campaign_id = %id, "campaign activated");
    Ok(Json(campaign))
}

/// Deactivate a campaign and stop its running or planned schedules.
pub async fn deactivate_campaign(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> ServerResult<impl IntoResponse> {
    let showtime = &state.showtime;
    let now = Utc::now();
    let (campaign, stopped) = showtime.repository().update(id, |campaign| {
        let stopped = campaign.deactivate(now);
        Ok((campaign.clone(), stopped))
    })?;
    showtime.commit(Mutation::Schedule { campaign_id: id })?;
    tracing::info!(campaign_id = %id, stopped, "campaign deactivated");
    Ok(Json(campaign))
}

pub async fn list_schedules(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> ServerResult<impl IntoResponse> {
    Ok(Json(find(&state, id)?.schedules))
}

/// Plan a new `ready` schedule for the campaign.
pub async fn create_schedule(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ScheduleRequest>,
) -> ServerResult<impl IntoResponse> {
    let showtime = &state.showtime;
    let schedule = showtime.repository().update(id, |campaign| {
        let schedule = Schedule::planned(campaign.id, request.start_time, request.end_time);
        campaign.schedules.push(schedule.clone());
        Ok(schedule)
    })?;
    showtime.commit(Mutation::Schedule { campaign_id: id })?;
    tracing::info!(campaign_id = %id, schedule_id = %schedule.id, "schedule planned");
    Ok((StatusCode::CREATED, Json(schedule)))
}

pub async fn transition_schedule(
    State(state): State<Arc<ServerState>>,
    Path((id, schedule_id, action)): Path<(Uuid, Uuid, String)>,
) -> ServerResult<impl IntoResponse> {
    let action: ScheduleAction = action.parse()?;
    let showtime = &state.showtime;
    let now = Utc::now();
    let schedule = showtime.repository().update(id, |campaign| {
        let schedule = campaign.schedule_mut(schedule_id)?;
        action.apply(schedule, now)?;
        Ok(schedule.clone())
    })?;
    showtime.commit(Mutation::Schedule { campaign_id: id })?;
    tracing::info!(
        campaign_id = %id,
        schedule_id = %schedule_id,
        action = ?action,
        status = ?schedule.status,
        "schedule transitioned"
    );
    Ok(Json(schedule))
}

pub async fn delete_schedule(
    State(state): State<Arc<ServerState>>,
    Path((id, schedule_id)): Path<(Uuid, Uuid)>,
) -> ServerResult<impl IntoResponse> {
    let showtime = &state.showtime;
    showtime.repository().update(id, |campaign| {
        campaign.schedule_mut(schedule_id)?;
        campaign.schedules.retain(|s| s.id != schedule_id);
        Ok(())
    })?;
    showtime.commit(Mutation::Schedule { campaign_id: id })?;
    tracing::info!(campaign_id = %id, schedule_id = %schedule_id, "schedule deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_actions_parse_from_path_segment() {
        assert_eq!("start".parse::<ScheduleAction>().unwrap(), ScheduleAction::Start);
        assert_eq!("resume".parse::<ScheduleAction>().unwrap(), ScheduleAction::Resume);
        let err = "restart".parse::<ScheduleAction>().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn stop_ends_a_running_schedule() {
        let now = Utc::now();
        let mut schedule = Schedule::started_now(Uuid::new_v4(), now);
        ScheduleAction::Stop.apply(&mut schedule, now).unwrap();
        assert!(!schedule.is_running(now));
        assert!(ScheduleAction::Pause.apply(&mut schedule, now).is_err());
    }
}
