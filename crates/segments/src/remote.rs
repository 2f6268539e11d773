//! HTTP segment provider.
//!
//! Talks to a segments API exposing:
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET | `segments` | `[{ "code", "name", "group": { "name" } }]` |
//! | GET | `segments/{code}/users/check/{user_id}` | `{ "check": bool }` |
//! | GET | `segments/{code}/browsers/check/{browser_id}` | `{ "check": bool }` |
//! | GET | `segments/{code}/users` | `["user id", ...]` |
use async_trait::async_trait;
use campaign::CampaignSegment;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::RemoteProviderConfig;
use crate::error::SegmentError;
use crate::provider::{SegmentInfo, SegmentProvider};

/// Default registry key of the HTTP provider.
pub const REMOTE_PROVIDER: &str = "remp_segment";

#[derive(Debug, Deserialize)]
struct CheckResponse {
    check: bool,
}

#[derive(Debug, Deserialize)]
struct ListedGroup {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ListedSegment {
    code: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    group: Option<ListedGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserId {
    Text(String),
    Number(u64),
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        match id {
            UserId::Text(s) => s,
            UserId::Number(n) => n.to_string(),
        }
    }
}

pub struct RemoteSegmentProvider {
    name: String,
    base_url: Url,
    token: Option<String>,
    cache_enabled: bool,
    client: reqwest::Client,
}

impl RemoteSegmentProvider {
    pub fn new(config: &RemoteProviderConfig) -> Result<Self, SegmentError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| SegmentError::unavailable(&config.provider, e))?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SegmentError::unavailable(&config.provider, e))?;
        if base_url.cannot_be_a_base() {
            return Err(SegmentError::unavailable(
                &config.provider,
                format!("{base_url} cannot be a base URL"),
            ));
        }
        Ok(Self {
            name: config.provider.clone(),
            base_url,
            token: config.token.clone(),
            cache_enabled: config.cache_enabled,
            client,
        })
    }

    /// Append percent-encoded path segments to the base URL.
    fn url(&self, segments: &[&str]) -> Result<Url, SegmentError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SegmentError::unavailable(&self.name, "base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, SegmentError> {
        let mut request = self.client.get(self.url(segments)?);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SegmentError::unavailable(&self.name, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SegmentError::unavailable(
                &self.name,
                format!("HTTP {status}: {body}"),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SegmentError::InvalidResponse {
                provider: self.name.clone(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl SegmentProvider for RemoteSegmentProvider {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Result<Vec<SegmentInfo>, SegmentError> {
        let listed: Vec<ListedSegment> = self.get_json(&["segments"]).await?;
        Ok(listed
            .into_iter()
            .map(|s| SegmentInfo {
                provider: self.name.clone(),
                code: s.code,
                name: s.name,
                group: s.group.map(|g| g.name),
            })
            .collect())
    }

    async fn check_user(
        &self,
        segment: &CampaignSegment,
        user_id: &str,
    ) -> Result<bool, SegmentError> {
        let path = ["segments", segment.code.as_str(), "users", "check", user_id];
        Ok(self.get_json::<CheckResponse>(&path).await?.check)
    }

    async fn check_browser(
        &self,
        segment: &CampaignSegment,
        browser_id: &str,
    ) -> Result<bool, SegmentError> {
        let path = ["segments", segment.code.as_str(), "browsers", "check", browser_id];
        Ok(self.get_json::<CheckResponse>(&path).await?.check)
    }

    async fn users(&self, segment: &CampaignSegment) -> Result<Vec<String>, SegmentError> {
        let path = ["segments", segment.code.as_str(), "users"];
        let ids: Vec<UserId> = self.get_json(&path).await?;
        Ok(ids.into_iter().map(String::from).collect())
    }

    fn cache_enabled(&self, _segment: &CampaignSegment) -> bool {
        self.cache_enabled
    }
}
