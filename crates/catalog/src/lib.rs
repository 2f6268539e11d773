//! # Campaign catalog
//!
//! Campaign storage on both sides of the decision path:
//!
//! - [`CampaignRepository`] is the authoritative, insertion-ordered set of
//!   campaign definitions edited by the admin surface.
//! - [`CampaignCache`] turns those definitions into read-mostly
//!   [`CachedCampaign`] snapshots held by a [`CampaignStore`], together with
//!   the list of active campaign ids consumed by every showtime request.
//!
//! ```
//! use std::sync::Arc;
//! use catalog::{CampaignCache, CampaignRepository, Mutation};
//!
//! let repository = Arc::new(CampaignRepository::new());
//! let cache = CampaignCache::in_memory(repository.clone());
//! cache.warm().unwrap();
//! assert!(cache.active_ids().is_empty());
//! # let _ = Mutation::Deleted(uuid::Uuid::nil());
//! ```
mod cache;
mod error;
mod repository;
mod store;

pub use crate::cache::{CampaignCache, Mutation};
pub use crate::error::CatalogError;
pub use crate::repository::{CampaignRepository, CampaignSource};
pub use crate::store::{CachedCampaign, CampaignStore, InMemoryCampaignStore};
