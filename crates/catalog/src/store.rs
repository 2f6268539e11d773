//! Process-wide campaign snapshot store.
//!
//! Reads vastly outnumber writes: every showtime request reads the active id
//! list plus one entry per candidate, while writes only happen when an admin
//! mutation commits. Entries live in a sharded [`DashMap`] and the active id
//! list is an [`ArcSwap`] snapshot, so readers never block on a rebuild and
//! always observe the last consistent value.
use std::sync::Arc;

use arc_swap::ArcSwap;
use campaign::{Campaign, CountryRules};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// A fully hydrated campaign as served to the decision engine.
#[derive(Debug, Clone)]
pub struct CachedCampaign {
    /// Campaign graph with variants ordered by display weight.
    pub campaign: Campaign,
    /// Country rows pre-split into whitelist/blacklist.
    pub country_rules: CountryRules,
    pub cached_at: DateTime<Utc>,
}

impl CachedCampaign {
    pub fn new(mut campaign: Campaign, cached_at: DateTime<Utc>) -> Self {
        // Stable: equal weights keep declaration order.
        campaign.variants.sort_by_key(|v| v.weight);
        let country_rules = campaign.country_rules();
        Self {
            campaign,
            country_rules,
            cached_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.campaign.id
    }
}

/// Key-value storage for campaign snapshots plus the active id list.
pub trait CampaignStore: Send + Sync {
    fn get(&self, id: Uuid) -> Option<Arc<CachedCampaign>>;
    fn put(&self, snapshot: CachedCampaign);
    /// Remove one entry. Returns whether it was present.
    fn invalidate(&self, id: Uuid) -> bool;
    /// Current active id snapshot; empty when nothing was ever stored.
    fn active_ids(&self) -> Arc<Vec<Uuid>>;
    fn set_active_ids(&self, ids: Vec<Uuid>);
    /// Forget every entry and the active id list.
    fn clear(&self);
    /// Ids of every stored snapshot, in no particular order.
    fn ids(&self) -> Vec<Uuid>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`CampaignStore`] with no expiry.
pub struct InMemoryCampaignStore {
    entries: DashMap<Uuid, Arc<CachedCampaign>>,
    active: ArcSwap<Vec<Uuid>>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            active: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl Default for InMemoryCampaignStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CampaignStore for InMemoryCampaignStore {
    fn get(&self, id: Uuid) -> Option<Arc<CachedCampaign>> {
        self.entries.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn put(&self, snapshot: CachedCampaign) {
        self.entries.insert(snapshot.id(), Arc::new(snapshot));
    }

    fn invalidate(&self, id: Uuid) -> bool {
        self.entries.remove(&id).is_some()
    }

    fn active_ids(&self) -> Arc<Vec<Uuid>> {
        self.active.load_full()
    }

    fn set_active_ids(&self, ids: Vec<Uuid>) {
        self.active.store(Arc::new(ids));
    }

    fn clear(&self) {
        self.active.store(Arc::new(Vec::new()));
        self.entries.clear();
    }

    fn ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign::Variant;

    fn campaign_with_weights(weights: &[u32]) -> Campaign {
        let mut c = Campaign::new("weights");
        let id = c.id;
        c.variants = weights
            .iter()
            .map(|&weight| Variant {
                id: Uuid::new_v4(),
                campaign_id: id,
                banner: None,
                proportion: 10,
                control_group: true,
                weight,
            })
            .collect();
        c
    }

    #[test]
    fn snapshot_orders_variants_by_weight_stably() {
        let c = campaign_with_weights(&[2, 1, 2, 0]);
        let original: Vec<_> = c.variants.iter().map(|v| v.id).collect();
        let snapshot = CachedCampaign::new(c, Utc::now());
        let ordered: Vec<_> = snapshot.campaign.variants.iter().map(|v| v.id).collect();
        assert_eq!(
            ordered,
            vec![original[3], original[1], original[0], original[2]]
        );
    }

    #[test]
    fn store_round_trip_and_clear() {
        let store = InMemoryCampaignStore::new();
        assert!(store.active_ids().is_empty());
        assert!(store.is_empty());

        let c = campaign_with_weights(&[0]);
        let id = c.id;
        store.put(CachedCampaign::new(c, Utc::now()));
        store.set_active_ids(vec![id]);

        assert_eq!(store.get(id).map(|s| s.id()), Some(id));
        assert_eq!(*store.active_ids(), vec![id]);

        assert!(store.invalidate(id));
        assert!(!store.invalidate(id));
        assert!(store.get(id).is_none());

        store.put(CachedCampaign::new(campaign_with_weights(&[0]), Utc::now()));
        store.clear();
        assert!(store.is_empty());
        assert!(store.active_ids().is_empty());
    }

    #[test]
    fn readers_keep_their_snapshot_across_writes() {
        let store = InMemoryCampaignStore::new();
        let a = Uuid::new_v4();
        store.set_active_ids(vec![a]);
        let before = store.active_ids();
        store.set_active_ids(vec![]);
        assert_eq!(*before, vec![a]);
        assert!(store.active_ids().is_empty());
    }
}
