//! YouTube Data API v3 provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::StreamDataProvider;
use super::wire::{
    ChannelListResponse, ErrorResponse, PlaylistItemListResponse, SearchListResponse,
    VideoListResponse,
};
use crate::config::ProviderSettings;
use crate::domain::{RetryPolicy, VideoRecord};
use crate::utils::http_client::{self, retry_with_policy};
use crate::{Error, Result};

/// Reasons Google reports when the daily or per-user quota is exhausted.
const QUOTA_REASONS: &[&str] = &[
    "quotaExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "dailyLimitExceeded",
];

/// Reasons Google reports for a bad API key.
const CREDENTIAL_REASONS: &[&str] = &["keyInvalid", "keyExpired", "badRequest.keyInvalid"];

/// Provider backed by the YouTube Data API.
pub struct YouTubeProvider {
    client: Client,
    base_url: Url,
    api_key: String,
    timeout: Duration,
    retry: RetryPolicy,
    max_results: u32,
}

impl YouTubeProvider {
    pub fn new(settings: &ProviderSettings, api_key: impl Into<String>) -> Result<Self> {
        Self::with_client(http_client::build_client(), settings, api_key)
    }

    pub fn with_client(
        client: Client,
        settings: &ProviderSettings,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::InvalidCredential("no API key configured".to_string()));
        }

        // `Url::join` replaces the last path segment unless the base ends in '/'.
        let mut base = settings.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| Error::config(format!("invalid provider base URL {base:?}: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.trim().to_string(),
            timeout: settings.timeout(),
            retry: settings.retry_policy(),
            max_results: settings.max_results,
        })
    }

    /// GET `endpoint` with `query`, decoding the JSON body as `T`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| Error::config(format!("invalid endpoint {endpoint}: {e}")))?;

        let client = &self.client;
        let api_key = self.api_key.as_str();
        let timeout = self.timeout;
        let url = &url;

        retry_with_policy(&self.retry, self.timeout, endpoint, move || async move {
            let response = client
                .get(url.clone())
                .query(query)
                .query(&[("key", api_key)])
                .send()
                .await
                .map_err(|e| classify_transport(e, timeout))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| classify_transport(e, timeout))?;

            if !status.is_success() {
                return Err(classify_status(status, &body));
            }

            serde_json::from_str::<T>(&body)
                .map_err(|e| Error::malformed(format!("{endpoint}: {e}")))
        })
        .await
    }

    /// Resolve the channel's uploads playlist.
    async fn uploads_playlist(&self, channel_id: &str) -> Result<String> {
        let response: ChannelListResponse = self
            .get_json(
                "channels",
                &[
                    ("part", "contentDetails".to_string()),
                    ("id", channel_id.to_string()),
                ],
            )
            .await?;

        let Some(channel) = response.items.into_iter().next() else {
            return Err(Error::channel_not_found(channel_id));
        };

        channel
            .content_details
            .and_then(|d| d.related_playlists)
            .and_then(|p| p.uploads)
            .ok_or_else(|| Error::malformed(format!("channel {channel_id} has no uploads playlist")))
    }

    /// Ids of the most recent uploads of the channel.
    async fn recent_upload_ids(&self, channel_id: &str) -> Result<Vec<String>> {
        let playlist_id = self.uploads_playlist(channel_id).await?;

        let response: PlaylistItemListResponse = self
            .get_json(
                "playlistItems",
                &[
                    ("part", "contentDetails".to_string()),
                    ("playlistId", playlist_id),
                    ("maxResults", self.max_results.to_string()),
                ],
            )
            .await?;

        Ok(response
            .items
            .into_iter()
            .filter_map(|item| item.content_details.and_then(|d| d.video_id))
            .collect())
    }

    /// Full records, including live-streaming details, for `ids`.
    async fn videos(&self, ids: &[String]) -> Result<Vec<VideoRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let response: VideoListResponse = self
            .get_json(
                "videos",
                &[
                    ("part", "snippet,liveStreamingDetails".to_string()),
                    ("id", ids.join(",")),
                ],
            )
            .await?;

        Ok(response
            .items
            .into_iter()
            .filter(|video| video.is_live_stream())
            .filter_map(|video| video.into_record())
            .collect())
    }

    async fn recent_broadcasts(&self, channel_id: &str) -> Result<Vec<VideoRecord>> {
        let ids = self.recent_upload_ids(channel_id).await?;
        self.videos(&ids).await
    }
}

#[async_trait]
impl StreamDataProvider for YouTubeProvider {
    #[instrument(skip(self))]
    async fn fetch_upcoming(&self, channel_id: &str) -> Result<Vec<VideoRecord>> {
        let records: Vec<_> = self
            .recent_broadcasts(channel_id)
            .await?
            .into_iter()
            .filter(|v| v.scheduled_start_time.is_some() && v.actual_end_time.is_none())
            .collect();

        debug!(count = records.len(), "Fetched upcoming streams");
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn fetch_live(&self, channel_id: &str) -> Result<Vec<VideoRecord>> {
        let response: SearchListResponse = self
            .get_json(
                "search",
                &[
                    ("part", "id".to_string()),
                    ("channelId", channel_id.to_string()),
                    ("eventType", "live".to_string()),
                    ("type", "video".to_string()),
                    ("maxResults", self.max_results.to_string()),
                ],
            )
            .await?;

        let ids: Vec<String> = response
            .items
            .into_iter()
            .filter_map(|r| r.id.and_then(|id| id.video_id))
            .collect();

        let records = self.videos(&ids).await?;
        debug!(count = records.len(), "Fetched live streams");
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn fetch_completed(&self, channel_id: &str) -> Result<Vec<VideoRecord>> {
        let records: Vec<_> = self
            .recent_broadcasts(channel_id)
            .await?
            .into_iter()
            .filter(|v| v.actual_end_time.is_some() && v.has_valid_completion())
            .collect();

        debug!(count = records.len(), "Fetched completed streams");
        Ok(records)
    }
}

fn classify_transport(err: reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::from(err)
    }
}

/// Map a non-2xx API response onto the error taxonomy.
fn classify_status(status: StatusCode, body: &str) -> Error {
    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();
    let message = parsed
        .as_ref()
        .map(|r| r.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
    let has_reason = |candidates: &[&str]| {
        parsed.as_ref().is_some_and(|r| {
            r.error
                .errors
                .iter()
                .any(|e| candidates.contains(&e.reason.as_str()))
        })
    };

    if status == StatusCode::TOO_MANY_REQUESTS || has_reason(QUOTA_REASONS) {
        return Error::QuotaExceeded(message);
    }

    if has_reason(CREDENTIAL_REASONS)
        || (status == StatusCode::BAD_REQUEST && message.contains("API key"))
    {
        return Error::InvalidCredential(message);
    }

    Error::UnexpectedStatus {
        status: status.as_u16(),
        message,
    }
}
