//! Campaign persistence collaborator.
//!
//! The decision path never touches this module directly: the admin surface
//! mutates the repository and then asks the [`CampaignCache`](crate::CampaignCache)
//! to rebuild the affected snapshot.
use std::path::Path;
use std::sync::RwLock;

use campaign::Campaign;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::CatalogError;

/// Read access to the authoritative campaign definitions.
pub trait CampaignSource: Send + Sync {
    fn load(&self, id: Uuid) -> Result<Option<Campaign>, CatalogError>;
    /// Every campaign in storage (creation) order.
    fn load_all(&self) -> Result<Vec<Campaign>, CatalogError>;
}

/// In-memory, insertion-ordered campaign repository.
#[derive(Default)]
pub struct CampaignRepository {
    campaigns: RwLock<Vec<Campaign>>,
}

impl CampaignRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a repository from a JSON array of campaigns.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let source_path = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: source_path.clone(),
            source,
        })?;
        let campaigns: Vec<Campaign> =
            serde_json::from_str(&raw).map_err(|e| CatalogError::Parse {
                path: source_path.clone(),
                message: e.to_string(),
            })?;

        let repository = Self::new();
        for campaign in campaigns {
            repository.upsert(campaign)?;
        }
        info!(path = %source_path, campaigns = repository.len(), "campaign repository seeded");
        Ok(repository)
    }

    /// Insert or replace a campaign after validating it. Returns `true` when
    /// the campaign is new; replacements keep their original position.
    pub fn upsert(&self, campaign: Campaign) -> Result<bool, CatalogError> {
        campaign.validate()?;
        let mut campaigns = self.write();
        match campaigns.iter_mut().find(|c| c.id == campaign.id) {
            Some(existing) => {
                *existing = campaign;
                Ok(false)
            }
            None => {
                campaigns.push(campaign);
                Ok(true)
            }
        }
    }

    pub fn remove(&self, id: Uuid) -> Result<Campaign, CatalogError> {
        let mut campaigns = self.write();
        let position = campaigns
            .iter()
            .position(|c| c.id == id)
            .ok_or(CatalogError::NotFound(id))?;
        Ok(campaigns.remove(position))
    }

    pub fn get(&self, id: Uuid) -> Option<Campaign> {
        self.read().iter().find(|c| c.id == id).cloned()
    }

    pub fn list(&self) -> Vec<Campaign> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Apply `f` to a copy of the campaign and store it back only if `f`
    /// succeeds and the result still validates.
    pub fn update<T, F>(&self, id: Uuid, f: F) -> Result<T, CatalogError>
    where
        F: FnOnce(&mut Campaign) -> Result<T, CatalogError>,
    {
        let mut campaigns = self.write();
        let slot = campaigns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(CatalogError::NotFound(id))?;
        let mut draft = slot.clone();
        let out = f(&mut draft)?;
        draft.validate()?;
        *slot = draft;
        Ok(out)
    }

    /// Promote every due `ready` schedule. Returns the ids of the campaigns
    /// that changed so their snapshots can be rebuilt.
    pub fn promote_due_schedules(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut campaigns = self.write();
        campaigns
            .iter_mut()
            .filter_map(|c| c.promote_due_schedules(now).then_some(c.id))
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Campaign>> {
        self.campaigns.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Campaign>> {
        self.campaigns
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CampaignSource for CampaignRepository {
    fn load(&self, id: Uuid) -> Result<Option<Campaign>, CatalogError> {
        Ok(self.get(id))
    }

    fn load_all(&self) -> Result<Vec<Campaign>, CatalogError> {
        Ok(self.list())
    }
}
