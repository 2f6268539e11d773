use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use campaign::CampaignSegment;
use serde::{Deserialize, Serialize};

use crate::error::SegmentError;

/// A segment as advertised by its provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub provider: String,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
}

/// A source of audience membership answers.
///
/// Implementations are registered on the
/// [`SegmentOracle`](crate::SegmentOracle) under the key returned by
/// [`provider`](SegmentProvider::provider); campaign segments name that key
/// to select the provider that resolves them.
#[async_trait]
pub trait SegmentProvider: Send + Sync {
    /// Registry key, e.g. `remp_segment`.
    fn provider(&self) -> &str;

    async fn list(&self) -> Result<Vec<SegmentInfo>, SegmentError>;

    async fn check_user(
        &self,
        segment: &CampaignSegment,
        user_id: &str,
    ) -> Result<bool, SegmentError>;

    async fn check_browser(
        &self,
        segment: &CampaignSegment,
        browser_id: &str,
    ) -> Result<bool, SegmentError>;

    /// Every user id in the segment. Feeds membership filter population.
    async fn users(&self, segment: &CampaignSegment) -> Result<Vec<String>, SegmentError>;

    /// Whether answers for this segment may be cached at all.
    fn cache_enabled(&self, _segment: &CampaignSegment) -> bool {
        true
    }
}

/// Segment definition held by a [`StaticSegmentProvider`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSegment {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub users: HashSet<String>,
    #[serde(default)]
    pub browsers: HashSet<String>,
}

/// Provider answering from a fixed, in-process membership table.
///
/// Used for operator-maintained allow lists and in tests.
#[derive(Debug, Clone)]
pub struct StaticSegmentProvider {
    name: String,
    segments: HashMap<String, StaticSegment>,
    cache_enabled: bool,
}

impl StaticSegmentProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            segments: HashMap::new(),
            cache_enabled: true,
        }
    }

    pub fn with_segment(mut self, segment: StaticSegment) -> Self {
        self.segments.insert(segment.code.clone(), segment);
        self
    }

    pub fn with_users<I, S>(self, code: &str, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut segment = self.segment_or_default(code);
        segment.users.extend(users.into_iter().map(Into::into));
        self.with_segment(segment)
    }

    pub fn with_browsers<I, S>(self, code: &str, browsers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut segment = self.segment_or_default(code);
        segment.browsers.extend(browsers.into_iter().map(Into::into));
        self.with_segment(segment)
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    fn segment_or_default(&self, code: &str) -> StaticSegment {
        self.segments.get(code).cloned().unwrap_or_else(|| StaticSegment {
            code: code.to_string(),
            name: code.to_string(),
            ..StaticSegment::default()
        })
    }
}

#[async_trait]
impl SegmentProvider for StaticSegmentProvider {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Result<Vec<SegmentInfo>, SegmentError> {
        let mut list: Vec<SegmentInfo> = self
            .segments
            .values()
            .map(|s| SegmentInfo {
                provider: self.name.clone(),
                code: s.code.clone(),
                name: s.name.clone(),
                group: None,
            })
            .collect();
        list.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(list)
    }

    async fn check_user(
        &self,
        segment: &CampaignSegment,
        user_id: &str,
    ) -> Result<bool, SegmentError> {
        Ok(self
            .segments
            .get(&segment.code)
            .is_some_and(|s| s.users.contains(user_id)))
    }

    async fn check_browser(
        &self,
        segment: &CampaignSegment,
        browser_id: &str,
    ) -> Result<bool, SegmentError> {
        Ok(self
            .segments
            .get(&segment.code)
            .is_some_and(|s| s.browsers.contains(browser_id)))
    }

    async fn users(&self, segment: &CampaignSegment) -> Result<Vec<String>, SegmentError> {
        Ok(self
            .segments
            .get(&segment.code)
            .map(|s| s.users.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn cache_enabled(&self, _segment: &CampaignSegment) -> bool {
        self.cache_enabled
    }
}
