use campaign::{CampaignError, ScheduleError};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the campaign repository and cache.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("campaign {0} not found")]
    NotFound(Uuid),
    #[error("invalid campaign: {0}")]
    Invalid(#[from] CampaignError),
    #[error("schedule transition rejected: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("failed to read campaign seed {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse campaign seed {path}: {message}")]
    Parse { path: String, message: String },
    #[error("campaign source unavailable: {0}")]
    Source(String),
}

impl CatalogError {
    pub fn source_unavailable<E: std::fmt::Display>(err: E) -> Self {
        CatalogError::Source(err.to_string())
    }
}
