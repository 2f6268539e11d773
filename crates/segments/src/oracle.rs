//! Multi-provider segment oracle.
//!
//! Dispatch is by the provider key stored on each campaign segment. Membership
//! of a user in a cacheable segment is answered from a server-side
//! [`BloomFilter`] of the segment's users when one is populated; on a miss the
//! provider is queried directly (exact answer) and a background population
//! task is started so the next request hits the filter.
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use campaign::CampaignSegment;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bloom::BloomFilter;
use crate::breaker::{CircuitBreakerRegistry, CircuitState};
use crate::config::SegmentConfig;
use crate::error::SegmentError;
use crate::provider::{SegmentInfo, SegmentProvider, StaticSegmentProvider};
use crate::remote::RemoteSegmentProvider;
use crate::session::SegmentSession;

struct CachedFilter {
    filter: BloomFilter,
    built_at: Instant,
}

struct OracleInner {
    config: SegmentConfig,
    providers: DashMap<String, Arc<dyn SegmentProvider>>,
    filters: DashMap<String, Arc<CachedFilter>>,
    in_flight: DashMap<String, ()>,
    breakers: CircuitBreakerRegistry,
}

/// Cheap to clone; clones share providers, filters and breakers.
#[derive(Clone)]
pub struct SegmentOracle {
    inner: Arc<OracleInner>,
}

/// Removes the in-flight marker when population finishes or is dropped.
struct InFlightGuard {
    inner: Arc<OracleInner>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.key);
    }
}

fn filter_key(segment: &CampaignSegment) -> String {
    format!("{}:{}", segment.provider, segment.code)
}

impl SegmentOracle {
    /// Oracle with no providers registered.
    pub fn new(config: SegmentConfig) -> Self {
        let breakers = CircuitBreakerRegistry::new(config.circuit_breaker);
        Self {
            inner: Arc::new(OracleInner {
                config,
                providers: DashMap::new(),
                filters: DashMap::new(),
                in_flight: DashMap::new(),
                breakers,
            }),
        }
    }

    /// Oracle with the remote and static providers named in `config`.
    pub fn from_config(config: SegmentConfig) -> Result<Self, SegmentError> {
        let oracle = Self::new(config);
        let config = &oracle.inner.config;

        if let Some(remote) = &config.remote {
            oracle.register(Arc::new(RemoteSegmentProvider::new(remote)?))?;
        }
        for statics in &config.statics {
            let provider = statics
                .segments
                .iter()
                .cloned()
                .fold(StaticSegmentProvider::new(&statics.provider), |p, s| {
                    p.with_segment(s)
                });
            oracle.register(Arc::new(provider))?;
        }
        Ok(oracle)
    }

    pub fn register(&self, provider: Arc<dyn SegmentProvider>) -> Result<(), SegmentError> {
        let key = provider.provider().to_string();
        match self.inner.providers.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SegmentError::DuplicateProvider(key)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(provider);
                info!(provider = %key, "segment provider registered");
                Ok(())
            }
        }
    }

    /// Registered provider keys, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.providers.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.inner.config
    }

    fn provider(&self, key: &str) -> Result<Arc<dyn SegmentProvider>, SegmentError> {
        self.inner
            .providers
            .get(key)
            .map(|p| Arc::clone(p.value()))
            .ok_or_else(|| SegmentError::UnknownProvider(key.to_string()))
    }

    /// Segments of every provider, merged in provider key order.
    pub async fn list(&self) -> Result<Vec<SegmentInfo>, SegmentError> {
        let mut merged = Vec::new();
        for key in self.providers() {
            let provider = self.provider(&key)?;
            let listed = self.guarded(&key, provider.list()).await?;
            merged.extend(listed);
        }
        Ok(merged)
    }

    pub fn cache_enabled(&self, segment: &CampaignSegment) -> Result<bool, SegmentError> {
        Ok(self.provider(&segment.provider)?.cache_enabled(segment))
    }

    pub async fn check_user(
        &self,
        segment: &CampaignSegment,
        user_id: &str,
    ) -> Result<bool, SegmentError> {
        let provider = self.provider(&segment.provider)?;
        let cacheable = provider.cache_enabled(segment);

        if cacheable {
            if let Some(cached) = self.fresh_filter(segment) {
                return Ok(cached.filter.has(user_id));
            }
            if self.inner.config.populate_filters {
                self.schedule_population(segment);
            }
        }

        self.guarded(&segment.provider, provider.check_user(segment, user_id))
            .await
    }

    pub async fn check_browser(
        &self,
        segment: &CampaignSegment,
        browser_id: &str,
    ) -> Result<bool, SegmentError> {
        let provider = self.provider(&segment.provider)?;
        self.guarded(&segment.provider, provider.check_browser(segment, browser_id))
            .await
    }

    /// Fetch the segment's users and store a fresh membership filter.
    /// Returns `Ok(None)` when a population of this segment is already
    /// running.
    pub async fn populate(&self, segment: &CampaignSegment) -> Result<Option<usize>, SegmentError> {
        let Some(guard) = self.claim(segment) else {
            return Ok(None);
        };
        self.populate_claimed(segment, guard).await.map(Some)
    }

    /// Start a background population of the segment's filter. Returns `false`
    /// when one is already in flight or no runtime is available.
    pub fn schedule_population(&self, segment: &CampaignSegment) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(segment = %segment.code, "no runtime, skipping filter population");
            return false;
        };
        let Some(guard) = self.claim(segment) else {
            return false;
        };
        let oracle = self.clone();
        let segment = segment.clone();
        handle.spawn(async move {
            if let Err(err) = oracle.populate_claimed(&segment, guard).await {
                warn!(
                    provider = %segment.provider,
                    segment = %segment.code,
                    error = %err,
                    "segment filter population failed"
                );
            }
        });
        true
    }

    /// Drop every populated filter.
    pub fn clear_filters(&self) {
        self.inner.filters.clear();
    }

    /// Whether a populated, unexpired filter exists for the segment.
    pub fn has_filter(&self, segment: &CampaignSegment) -> bool {
        self.fresh_filter(segment).is_some()
    }

    pub fn breaker_states(&self) -> Vec<(String, CircuitState, u32)> {
        self.inner.breakers.snapshot()
    }

    /// Per-request view over the client-supplied cache blob.
    pub fn session(&self, cache: Option<&Value>, now: DateTime<Utc>) -> SegmentSession {
        SegmentSession::restore(self.clone(), cache, now)
    }

    fn fresh_filter(&self, segment: &CampaignSegment) -> Option<Arc<CachedFilter>> {
        let key = filter_key(segment);
        let cached = self.inner.filters.get(&key).map(|f| Arc::clone(f.value()))?;
        if cached.built_at.elapsed() < self.inner.config.filter_ttl {
            return Some(cached);
        }
        self.inner.filters.remove(&key);
        None
    }

    fn claim(&self, segment: &CampaignSegment) -> Option<InFlightGuard> {
        let key = filter_key(segment);
        if self.inner.in_flight.insert(key.clone(), ()).is_some() {
            return None;
        }
        Some(InFlightGuard {
            inner: Arc::clone(&self.inner),
            key,
        })
    }

    async fn populate_claimed(
        &self,
        segment: &CampaignSegment,
        guard: InFlightGuard,
    ) -> Result<usize, SegmentError> {
        let started = Instant::now();
        let provider = self.provider(&segment.provider)?;
        let users = provider.users(segment).await?;

        let mut filter = BloomFilter::with_rate(users.len(), self.inner.config.false_positive_rate);
        for user in &users {
            filter.insert(user);
        }
        self.inner.filters.insert(
            guard.key.clone(),
            Arc::new(CachedFilter {
                filter,
                built_at: Instant::now(),
            }),
        );
        info!(
            provider = %segment.provider,
            segment = %segment.code,
            users = users.len(),
            elapsed_micros = started.elapsed().as_micros() as u64,
            "segment filter populated"
        );
        drop(guard);
        Ok(users.len())
    }

    /// Run a provider call behind its circuit breaker and the check timeout.
    async fn guarded<T, F>(&self, provider: &str, call: F) -> Result<T, SegmentError>
    where
        F: Future<Output = Result<T, SegmentError>>,
    {
        let breaker = self.inner.breakers.get_or_create(provider);
        if !breaker.allow_request() {
            return Err(SegmentError::CircuitOpen(provider.to_string()));
        }

        let timeout = self.inner.config.check_timeout;
        let outcome = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SegmentError::Timeout {
                provider: provider.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match &outcome {
            Ok(_) => breaker.record_success(),
            Err(err) if !err.is_configuration() => breaker.record_failure(),
            Err(_) => {}
        }
        outcome
    }
}

impl std::fmt::Debug for SegmentOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentOracle")
            .field("providers", &self.providers())
            .field("filters", &self.inner.filters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreakerConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    /// Provider that counts direct checks and can be made slow or failing.
    struct ProbeProvider {
        members: Vec<String>,
        checks: AtomicUsize,
        delay: Duration,
        fail: bool,
        cacheable: bool,
    }

    impl ProbeProvider {
        fn new(members: &[&str]) -> Self {
            Self {
                members: members.iter().map(|m| m.to_string()).collect(),
                checks: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail: false,
                cacheable: true,
            }
        }
    }

    #[async_trait]
    impl SegmentProvider for ProbeProvider {
        fn provider(&self) -> &str {
            "probe"
        }

        async fn list(&self) -> Result<Vec<SegmentInfo>, SegmentError> {
            Ok(vec![SegmentInfo {
                provider: "probe".into(),
                code: "buyers".into(),
                name: "Buyers".into(),
                group: None,
            }])
        }

        async fn check_user(
            &self,
            _segment: &CampaignSegment,
            user_id: &str,
        ) -> Result<bool, SegmentError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(SegmentError::unavailable("probe", "boom"));
            }
            Ok(self.members.iter().any(|m| m == user_id))
        }

        async fn check_browser(
            &self,
            segment: &CampaignSegment,
            browser_id: &str,
        ) -> Result<bool, SegmentError> {
            self.check_user(segment, browser_id).await
        }

        async fn users(&self, _segment: &CampaignSegment) -> Result<Vec<String>, SegmentError> {
            Ok(self.members.clone())
        }

        fn cache_enabled(&self, _segment: &CampaignSegment) -> bool {
            self.cacheable
        }
    }

    fn segment(provider: &str) -> CampaignSegment {
        CampaignSegment {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            provider: provider.into(),
            code: "buyers".into(),
        }
    }

    fn manual_config() -> SegmentConfig {
        SegmentConfig {
            populate_filters: false,
            ..SegmentConfig::default()
        }
    }

    #[tokio::test]
    async fn unknown_provider_is_an_error_not_false() {
        let oracle = SegmentOracle::new(manual_config());
        let err = oracle.check_user(&segment("nope"), "u1").await.unwrap_err();
        assert_eq!(err, SegmentError::UnknownProvider("nope".into()));
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let oracle = SegmentOracle::new(manual_config());
        oracle.register(Arc::new(ProbeProvider::new(&[]))).unwrap();
        assert_eq!(
            oracle.register(Arc::new(ProbeProvider::new(&[]))),
            Err(SegmentError::DuplicateProvider("probe".into()))
        );
        assert_eq!(oracle.providers(), vec!["probe"]);
    }

    #[tokio::test]
    async fn populated_filter_replaces_direct_checks() {
        let probe = Arc::new(ProbeProvider::new(&["u1", "u2"]));
        let oracle = SegmentOracle::new(manual_config());
        oracle.register(probe.clone()).unwrap();
        let seg = segment("probe");

        assert!(oracle.check_user(&seg, "u1").await.unwrap());
        assert_eq!(probe.checks.load(Ordering::SeqCst), 1);

        assert_eq!(oracle.populate(&seg).await.unwrap(), Some(2));
        assert!(oracle.has_filter(&seg));

        assert!(oracle.check_user(&seg, "u2").await.unwrap());
        assert!(!oracle.check_user(&seg, "stranger").await.unwrap());
        assert_eq!(probe.checks.load(Ordering::SeqCst), 1, "answered from filter");

        oracle.clear_filters();
        assert!(!oracle.has_filter(&seg));
    }

    #[tokio::test]
    async fn cache_disabled_segments_always_query_the_provider() {
        let mut probe = ProbeProvider::new(&["u1"]);
        probe.cacheable = false;
        let probe = Arc::new(probe);
        let oracle = SegmentOracle::new(SegmentConfig::default());
        oracle.register(probe.clone()).unwrap();
        let seg = segment("probe");

        oracle.check_user(&seg, "u1").await.unwrap();
        oracle.check_user(&seg, "u1").await.unwrap();
        assert_eq!(probe.checks.load(Ordering::SeqCst), 2);
        assert!(!oracle.has_filter(&seg));
    }

    #[tokio::test]
    async fn cache_miss_schedules_one_background_population() {
        let oracle = SegmentOracle::new(SegmentConfig::default());
        oracle.register(Arc::new(ProbeProvider::new(&["u1"]))).unwrap();
        let seg = segment("probe");

        let guard = oracle.claim(&seg).expect("first claim wins");
        assert!(!oracle.schedule_population(&seg), "already in flight");
        assert_eq!(oracle.populate(&seg).await.unwrap(), None);
        drop(guard);

        assert!(oracle.check_user(&seg, "u1").await.unwrap());
        for _ in 0..50 {
            if oracle.has_filter(&seg) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(oracle.has_filter(&seg));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let mut probe = ProbeProvider::new(&["u1"]);
        probe.delay = Duration::from_millis(500);
        let oracle = SegmentOracle::new(SegmentConfig {
            check_timeout: Duration::from_millis(20),
            ..manual_config()
        });
        oracle.register(Arc::new(probe)).unwrap();

        let err = oracle.check_browser(&segment("probe"), "b1").await.unwrap_err();
        assert!(matches!(err, SegmentError::Timeout { timeout_ms: 20, .. }));
    }

    #[tokio::test]
    async fn repeated_failures_open_the_circuit() {
        let mut probe = ProbeProvider::new(&[]);
        probe.fail = true;
        let probe = Arc::new(probe);
        let oracle = SegmentOracle::new(SegmentConfig {
            circuit_breaker: CircuitBreakerConfig::default().with_failure_threshold(2),
            ..manual_config()
        });
        oracle.register(probe.clone()).unwrap();
        let seg = segment("probe");

        for _ in 0..2 {
            assert!(matches!(
                oracle.check_browser(&seg, "b").await,
                Err(SegmentError::ProviderUnavailable { .. })
            ));
        }
        assert_eq!(
            oracle.check_browser(&seg, "b").await,
            Err(SegmentError::CircuitOpen("probe".into()))
        );
        assert_eq!(probe.checks.load(Ordering::SeqCst), 2);
        assert_eq!(oracle.breaker_states()[0].1, CircuitState::Open);
    }

    #[tokio::test]
    async fn list_merges_every_provider() {
        let oracle = SegmentOracle::new(manual_config());
        oracle.register(Arc::new(ProbeProvider::new(&[]))).unwrap();
        oracle
            .register(Arc::new(
                StaticSegmentProvider::new("allow").with_users("vip", ["1"]),
            ))
            .unwrap();

        let listed: Vec<_> = oracle
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| format!("{}:{}", s.provider, s.code))
            .collect();
        assert_eq!(listed, vec!["allow:vip", "probe:buyers"]);
    }

    #[test]
    fn from_config_registers_static_providers() {
        let mut config = manual_config();
        config.statics.push(crate::config::StaticProviderConfig {
            provider: "allow".into(),
            segments: vec![],
        });
        let oracle = SegmentOracle::from_config(config).unwrap();
        assert_eq!(oracle.providers(), vec!["allow"]);
    }
}
