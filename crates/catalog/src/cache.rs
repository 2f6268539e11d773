//! Campaign cache: rebuilds snapshots from the [`CampaignSource`] and keeps
//! the active id list current.
//!
//! Entries never expire. Whoever mutates a campaign, one of its segments or
//! one of its schedules must report it through [`CampaignCache::apply`] so
//! the snapshot is rebuilt and the active id list recomputed.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CatalogError;
use crate::repository::CampaignSource;
use crate::store::{CachedCampaign, CampaignStore, InMemoryCampaignStore};

/// A committed admin mutation that affects cached snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Campaign(Uuid),
    Segment { campaign_id: Uuid },
    Schedule { campaign_id: Uuid },
    Deleted(Uuid),
}

pub struct CampaignCache {
    source: Arc<dyn CampaignSource>,
    store: Arc<dyn CampaignStore>,
}

impl CampaignCache {
    pub fn new(source: Arc<dyn CampaignSource>, store: Arc<dyn CampaignStore>) -> Self {
        Self { source, store }
    }

    /// Cache backed by an [`InMemoryCampaignStore`].
    pub fn in_memory(source: Arc<dyn CampaignSource>) -> Self {
        Self::new(source, Arc::new(InMemoryCampaignStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn CampaignStore> {
        &self.store
    }

    /// Rebuild the snapshot of one campaign and recompute the active id list.
    /// Returns whether the campaign still exists in the source.
    pub fn refresh(&self, id: Uuid) -> Result<bool, CatalogError> {
        let started = Instant::now();
        let exists = match self.source.load(id)? {
            Some(campaign) => {
                if let Err(err) = campaign.validate() {
                    warn!(campaign_id = %id, error = %err, "caching campaign that fails validation");
                }
                self.store.put(CachedCampaign::new(campaign, Utc::now()));
                true
            }
            None => {
                self.store.invalidate(id);
                false
            }
        };
        let active = self.recompute_active_ids()?;
        info!(
            campaign_id = %id,
            exists,
            active = active,
            elapsed_micros = started.elapsed().as_micros() as u64,
            "campaign snapshot rebuilt"
        );
        Ok(exists)
    }

    /// Drop a single snapshot without touching the active id list.
    pub fn invalidate(&self, id: Uuid) -> bool {
        self.store.invalidate(id)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<CachedCampaign>> {
        self.store.get(id)
    }

    pub fn active_ids(&self) -> Arc<Vec<Uuid>> {
        self.store.active_ids()
    }

    /// Rebuild every snapshot from the source. Entries for campaigns that no
    /// longer exist are dropped after the new ones are in place.
    pub fn warm(&self) -> Result<usize, CatalogError> {
        let started = Instant::now();
        let campaigns = self.source.load_all()?;
        let now = Utc::now();

        let mut keep = HashSet::with_capacity(campaigns.len());
        let mut active = Vec::new();
        for campaign in campaigns {
            keep.insert(campaign.id);
            if campaign.active {
                active.push(campaign.id);
            }
            self.store.put(CachedCampaign::new(campaign, now));
        }
        self.store.set_active_ids(active);

        let stale: Vec<Uuid> = self
            .store
            .ids()
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();
        for id in stale {
            self.store.invalidate(id);
        }

        let warmed = keep.len();
        info!(
            campaigns = warmed,
            active = self.store.active_ids().len(),
            elapsed_micros = started.elapsed().as_micros() as u64,
            "campaign cache warmed"
        );
        Ok(warmed)
    }

    /// Forget every snapshot and the active id list.
    pub fn clear(&self) {
        self.store.clear();
        info!("campaign cache cleared");
    }

    /// Admin mutation hook.
    pub fn apply(&self, mutation: Mutation) -> Result<(), CatalogError> {
        match mutation {
            Mutation::Campaign(id)
            | Mutation::Segment { campaign_id: id }
            | Mutation::Schedule { campaign_id: id } => {
                self.refresh(id)?;
            }
            Mutation::Deleted(id) => {
                self.store.invalidate(id);
                self.recompute_active_ids()?;
                info!(campaign_id = %id, "campaign snapshot evicted");
            }
        }
        Ok(())
    }

    fn recompute_active_ids(&self) -> Result<usize, CatalogError> {
        let active: Vec<Uuid> = self
            .source
            .load_all()?
            .into_iter()
            .filter(|c| c.active)
            .map(|c| c.id)
            .collect();
        let count = active.len();
        self.store.set_active_ids(active);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::CampaignRepository;
    use crate::test_support::valid_campaign;

    fn setup() -> (Arc<CampaignRepository>, CampaignCache) {
        let repo = Arc::new(CampaignRepository::new());
        let cache = CampaignCache::in_memory(repo.clone());
        (repo, cache)
    }

    #[test]
    fn refresh_tracks_active_flag_in_repository_order() {
        let (repo, cache) = setup();
        let mut a = valid_campaign("a");
        let mut b = valid_campaign("b");
        let c = valid_campaign("c");
        a.active = true;
        b.active = true;
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        for campaign in [a, b, c] {
            repo.upsert(campaign).unwrap();
        }

        for id in [b_id, a_id, c_id] {
            assert!(cache.refresh(id).unwrap());
        }
        assert_eq!(*cache.active_ids(), vec![a_id, b_id]);
        assert!(cache.get(c_id).is_some(), "inactive campaigns are still cached");

        repo.update(a_id, |draft| {
            draft.active = false;
            Ok(())
        })
        .unwrap();
        cache.apply(Mutation::Campaign(a_id)).unwrap();
        assert_eq!(*cache.active_ids(), vec![b_id]);
    }

    #[test]
    fn deleted_campaign_is_evicted() {
        let (repo, cache) = setup();
        let mut a = valid_campaign("a");
        a.active = true;
        let id = a.id;
        repo.upsert(a).unwrap();
        cache.apply(Mutation::Campaign(id)).unwrap();

        repo.remove(id).unwrap();
        cache.apply(Mutation::Deleted(id)).unwrap();
        assert!(cache.get(id).is_none());
        assert!(cache.active_ids().is_empty());
    }

    #[test]
    fn invalidate_leaves_stale_active_list() {
        let (repo, cache) = setup();
        let mut a = valid_campaign("a");
        a.active = true;
        let id = a.id;
        repo.upsert(a).unwrap();
        cache.refresh(id).unwrap();

        assert!(cache.invalidate(id));
        assert_eq!(*cache.active_ids(), vec![id]);
        assert!(cache.get(id).is_none());
    }

    #[test]
    fn warm_rebuilds_everything_and_clear_forgets_it() {
        let (repo, cache) = setup();
        let mut a = valid_campaign("a");
        a.active = true;
        let b = valid_campaign("b");
        let (a_id, b_id) = (a.id, b.id);
        repo.upsert(a).unwrap();
        repo.upsert(b).unwrap();

        assert_eq!(cache.warm().unwrap(), 2);
        assert_eq!(*cache.active_ids(), vec![a_id]);
        assert!(cache.get(b_id).is_some());

        cache.clear();
        assert!(cache.active_ids().is_empty());
        assert!(cache.store().is_empty());
    }

    #[test]
    fn refresh_of_unknown_campaign_reports_absence() {
        let (_repo, cache) = setup();
        assert!(!cache.refresh(Uuid::new_v4()).unwrap());
        assert!(cache.active_ids().is_empty());
    }
}
