//! Per-request segment membership, backed by the client cache blob.
//!
//! Browsers round-trip an opaque `cache` object on every showtime request.
//! It holds one entry per provider:
//!
//! ```json
//! { "remp_segment": {
//!     "synced_at": "2024-05-01T10:00:00Z",
//!     "scope": "user",
//!     "identity": "9f2c0e51a7d3b410",
//!     "members": "QkYBBw...",
//!     "non_members": ["churned"] } }
//! ```
//!
//! `members` is a serialized [`BloomFilter`] of segment codes the identity
//! belongs to, `non_members` lists codes it was checked against and is not in.
//! Entries expire after the configured user or browser lifetime, and an entry
//! is ignored when it was built for a different identity.
use std::collections::{BTreeMap, BTreeSet};

use campaign::CampaignSegment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::bloom::BloomFilter;
use crate::error::SegmentError;
use crate::oracle::SegmentOracle;

/// Expected number of segment codes per provider entry.
const CODES_PER_ENTRY: usize = 64;

/// Which identity a client cache entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    User,
    Browser,
}

/// Serialized form of one provider's client cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCacheEntry {
    pub synced_at: DateTime<Utc>,
    pub scope: Scope,
    pub identity: String,
    pub members: String,
    #[serde(default)]
    pub non_members: Vec<String>,
}

struct Entry {
    synced_at: DateTime<Utc>,
    scope: Scope,
    identity: String,
    members: BloomFilter,
    non_members: BTreeSet<String>,
}

fn identity_digest(scope: Scope, id: &str) -> String {
    let tag = match scope {
        Scope::User => "u",
        Scope::Browser => "b",
    };
    format!("{:016x}", fxhash::hash64(format!("{tag}:{id}").as_bytes()))
}

pub struct SegmentSession {
    oracle: SegmentOracle,
    now: DateTime<Utc>,
    entries: BTreeMap<String, Entry>,
}

impl SegmentSession {
    pub(crate) fn restore(oracle: SegmentOracle, cache: Option<&Value>, now: DateTime<Utc>) -> Self {
        let mut entries = BTreeMap::new();
        if let Some(Value::Object(map)) = cache {
            let registered = oracle.providers();
            for (provider, raw) in map {
                if !registered.contains(provider) {
                    debug!(provider = %provider, "dropping client cache of unregistered provider");
                    continue;
                }
                match Self::decode(&oracle, raw, now) {
                    Ok(Some(entry)) => {
                        entries.insert(provider.clone(), entry);
                    }
                    Ok(None) => debug!(provider = %provider, "client segment cache expired"),
                    Err(err) => warn!(provider = %provider, error = %err, "discarding client segment cache"),
                }
            }
        }
        Self {
            oracle,
            now,
            entries,
        }
    }

    fn decode(oracle: &SegmentOracle, raw: &Value, now: DateTime<Utc>) -> Result<Option<Entry>, SegmentError> {
        let wire: ClientCacheEntry = serde_json::from_value(raw.clone())
            .map_err(|e| SegmentError::InvalidFilter(e.to_string()))?;
        let ttl = match wire.scope {
            Scope::User => oracle.config().user_cache_ttl,
            Scope::Browser => oracle.config().browser_cache_ttl,
        };
        // A sync time in the future yields a negative age and counts as expired.
        let age = now.signed_duration_since(wire.synced_at);
        if !age.to_std().is_ok_and(|age| age <= ttl) {
            return Ok(None);
        }
        Ok(Some(Entry {
            synced_at: wire.synced_at,
            scope: wire.scope,
            identity: wire.identity,
            members: BloomFilter::deserialize(&wire.members)?,
            non_members: wire.non_members.into_iter().collect(),
        }))
    }

    pub async fn check_user(
        &mut self,
        segment: &CampaignSegment,
        user_id: &str,
    ) -> Result<bool, SegmentError> {
        self.check(segment, Scope::User, user_id).await
    }

    pub async fn check_browser(
        &mut self,
        segment: &CampaignSegment,
        browser_id: &str,
    ) -> Result<bool, SegmentError> {
        self.check(segment, Scope::Browser, browser_id).await
    }

    async fn check(
        &mut self,
        segment: &CampaignSegment,
        scope: Scope,
        id: &str,
    ) -> Result<bool, SegmentError> {
        let identity = identity_digest(scope, id);
        if let Some(hit) = self.lookup(segment, scope, &identity) {
            return Ok(hit);
        }

        let member = match scope {
            Scope::User => self.oracle.check_user(segment, id).await?,
            Scope::Browser => self.oracle.check_browser(segment, id).await?,
        };
        if self.oracle.cache_enabled(segment)? {
            self.record(segment, scope, identity, member);
        }
        Ok(member)
    }

    fn lookup(&self, segment: &CampaignSegment, scope: Scope, identity: &str) -> Option<bool> {
        let entry = self.entries.get(&segment.provider)?;
        if entry.scope != scope || entry.identity != identity {
            return None;
        }
        if entry.non_members.contains(&segment.code) {
            return Some(false);
        }
        entry.members.has(&segment.code).then_some(true)
    }

    fn record(&mut self, segment: &CampaignSegment, scope: Scope, identity: String, member: bool) {
        let rate = self.oracle.config().false_positive_rate;
        let now = self.now;
        let entry = self
            .entries
            .entry(segment.provider.clone())
            .or_insert_with(|| Entry {
                synced_at: now,
                scope,
                identity: identity.clone(),
                members: BloomFilter::with_rate(CODES_PER_ENTRY, rate),
                non_members: BTreeSet::new(),
            });
        if entry.scope != scope || entry.identity != identity {
            *entry = Entry {
                synced_at: now,
                scope,
                identity,
                members: BloomFilter::with_rate(CODES_PER_ENTRY, rate),
                non_members: BTreeSet::new(),
            };
        }
        if member {
            entry.members.insert(&segment.code);
        } else {
            entry.non_members.insert(segment.code.clone());
        }
    }

    /// Serialize the session back into the opaque `providerData` blob.
    pub fn into_provider_data(self) -> Value {
        let map = self
            .entries
            .into_iter()
            .filter_map(|(provider, entry)| {
                let wire = ClientCacheEntry {
                    synced_at: entry.synced_at,
                    scope: entry.scope,
                    identity: entry.identity,
                    members: entry.members.serialize(),
                    non_members: entry.non_members.into_iter().collect(),
                };
                serde_json::to_value(wire).ok().map(|v| (provider, v))
            })
            .collect();
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentConfig;
    use crate::provider::StaticSegmentProvider;
    use chrono::Duration;
    use std::sync::Arc;
    use uuid::Uuid;

    fn segment(code: &str) -> CampaignSegment {
        CampaignSegment {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            provider: "allow".into(),
            code: code.into(),
        }
    }

    fn oracle_with(provider: StaticSegmentProvider) -> SegmentOracle {
        let oracle = SegmentOracle::new(SegmentConfig {
            populate_filters: false,
            ..SegmentConfig::default()
        });
        oracle.register(Arc::new(provider)).unwrap();
        oracle
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[tokio::test]
    async fn answers_are_round_tripped_through_the_blob() {
        let oracle = oracle_with(
            StaticSegmentProvider::new("allow").with_browsers("readers", ["b1"]),
        );

        let mut session = oracle.session(None, now());
        assert!(session.check_browser(&segment("readers"), "b1").await.unwrap());
        assert!(!session.check_browser(&segment("payers"), "b1").await.unwrap());
        let blob = session.into_provider_data();
        assert_eq!(blob["allow"]["scope"], "browser");
        assert_eq!(blob["allow"]["non_members"], serde_json::json!(["payers"]));

        // A provider that now knows nothing still yields the cached answers.
        let empty = oracle_with(StaticSegmentProvider::new("allow"));
        let mut replay = empty.session(Some(&blob), now() + Duration::hours(2));
        assert!(replay.check_browser(&segment("readers"), "b1").await.unwrap());
        assert!(!replay.check_browser(&segment("payers"), "b1").await.unwrap());
    }

    #[tokio::test]
    async fn user_entries_expire_after_an_hour() {
        let oracle = oracle_with(StaticSegmentProvider::new("allow").with_users("vip", ["7"]));
        let mut session = oracle.session(None, now());
        assert!(session.check_user(&segment("vip"), "7").await.unwrap());
        let blob = session.into_provider_data();

        let empty = oracle_with(StaticSegmentProvider::new("allow"));
        let mut fresh = empty.session(Some(&blob), now() + Duration::minutes(30));
        assert!(fresh.check_user(&segment("vip"), "7").await.unwrap());

        let mut stale = empty.session(Some(&blob), now() + Duration::minutes(61));
        assert!(!stale.check_user(&segment("vip"), "7").await.unwrap());
    }

    #[tokio::test]
    async fn entries_synced_in_the_future_are_expired() {
        let oracle = oracle_with(StaticSegmentProvider::new("allow").with_users("vip", ["7"]));
        let mut session = oracle.session(None, now() + Duration::hours(1));
        assert!(session.check_user(&segment("vip"), "7").await.unwrap());
        let blob = session.into_provider_data();

        let empty = oracle_with(StaticSegmentProvider::new("allow"));
        let mut replay = empty.session(Some(&blob), now());
        assert!(!replay.check_user(&segment("vip"), "7").await.unwrap());
    }

    #[tokio::test]
    async fn entries_for_another_identity_are_ignored() {
        let oracle = oracle_with(StaticSegmentProvider::new("allow").with_users("vip", ["7"]));
        let mut session = oracle.session(None, now());
        session.check_user(&segment("vip"), "7").await.unwrap();
        let blob = session.into_provider_data();

        let mut other = oracle.session(Some(&blob), now());
        assert!(!other.check_user(&segment("vip"), "8").await.unwrap());
        let rebuilt = other.into_provider_data();
        assert_ne!(rebuilt["allow"]["identity"], blob["allow"]["identity"]);
    }

    #[tokio::test]
    async fn garbage_and_unknown_providers_are_dropped() {
        let oracle = oracle_with(StaticSegmentProvider::new("allow"));
        let blob = serde_json::json!({
            "allow": { "members": "%%%" },
            "gone": { "anything": true }
        });
        let session = oracle.session(Some(&blob), now());
        assert_eq!(session.into_provider_data(), serde_json::json!({}));
    }

    #[tokio::test]
    async fn uncacheable_segments_are_not_recorded() {
        let oracle = oracle_with(
            StaticSegmentProvider::new("allow")
                .with_users("vip", ["7"])
                .with_cache_enabled(false),
        );
        let mut session = oracle.session(None, now());
        assert!(session.check_user(&segment("vip"), "7").await.unwrap());
        assert_eq!(session.into_provider_data(), serde_json::json!({}));
    }
}
