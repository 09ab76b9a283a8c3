//! YouTube Data API v3 response shapes.
//!
//! Only the fields the tracker reads are modelled; everything is optional or
//! defaulted so that partial payloads degrade instead of failing to decode.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::VideoRecord;

#[derive(Debug, Deserialize)]
pub struct ChannelListResponse {
    #[serde(default)]
    pub items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelItem {
    pub content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelContentDetails {
    pub related_playlists: Option<RelatedPlaylists>,
}

#[derive(Debug, Deserialize)]
pub struct RelatedPlaylists {
    pub uploads: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistItemListResponse {
    #[serde(default)]
    pub items: Vec<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    pub content_details: Option<PlaylistItemContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemContentDetails {
    pub video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchListResponse {
    #[serde(default)]
    pub items: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResult {
    pub id: Option<SearchResultId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultId {
    pub video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VideoListResponse {
    #[serde(default)]
    pub items: Vec<Video>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub snippet: Option<Snippet>,
    pub live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snippet {
    pub title: String,
    pub description: String,
    pub channel_id: String,
    pub channel_title: String,
    pub thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Thumbnails {
    pub high: Option<Thumbnail>,
    pub medium: Option<Thumbnail>,
    pub default: Option<Thumbnail>,
}

impl Thumbnails {
    /// Best available thumbnail URL.
    pub fn best_url(&self) -> Option<String> {
        self.high
            .as_ref()
            .or(self.medium.as_ref())
            .or(self.default.as_ref())
            .map(|t| t.url.clone())
    }
}

#[derive(Debug, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveStreamingDetails {
    pub scheduled_start_time: Option<DateTime<Utc>>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
}

impl Video {
    /// Convert to a [`VideoRecord`]. Videos without a snippet carry no usable
    /// metadata and are dropped.
    pub fn into_record(self) -> Option<VideoRecord> {
        let snippet = self.snippet?;
        let details = self.live_streaming_details.unwrap_or_default();

        Some(VideoRecord {
            id: self.id,
            title: snippet.title,
            description: snippet.description,
            channel_title: snippet.channel_title,
            channel_id: snippet.channel_id,
            thumbnail_url: snippet.thumbnails.and_then(|t| t.best_url()),
            scheduled_start_time: details.scheduled_start_time,
            actual_start_time: details.actual_start_time,
            actual_end_time: details.actual_end_time,
        })
    }

    pub fn is_live_stream(&self) -> bool {
        self.live_streaming_details.is_some()
    }
}

/// Error body returned by Google APIs.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: ApiError,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_into_record() {
        let video: Video = serde_json::from_value(serde_json::json!({
            "id": "vid1",
            "snippet": {
                "title": "Karaoke",
                "description": "Singing",
                "channelId": "UC1",
                "channelTitle": "Singer",
                "thumbnails": {
                    "default": { "url": "https://i.ytimg.com/d.jpg" },
                    "high": { "url": "https://i.ytimg.com/h.jpg" }
                }
            },
            "liveStreamingDetails": {
                "scheduledStartTime": "2024-05-01T10:00:00Z",
                "actualStartTime": "2024-05-01T10:02:00Z"
            }
        }))
        .unwrap();

        assert!(video.is_live_stream());
        let record = video.into_record().unwrap();
        assert_eq!(record.id, "vid1");
        assert_eq!(record.channel_title, "Singer");
        assert_eq!(
            record.thumbnail_url.as_deref(),
            Some("https://i.ytimg.com/h.jpg")
        );
        assert!(record.actual_start_time.is_some());
        assert!(record.actual_end_time.is_none());
    }

    #[test]
    fn test_video_without_snippet_is_dropped() {
        let video: Video = serde_json::from_value(serde_json::json!({ "id": "x" })).unwrap();
        assert!(video.into_record().is_none());
    }

    #[test]
    fn test_error_body_parses() {
        let body: ErrorResponse = serde_json::from_str(
            r#"{"error":{"code":403,"message":"quota","errors":[{"reason":"quotaExceeded"}]}}"#,
        )
        .unwrap();
        assert_eq!(body.error.code, 403);
        assert_eq!(body.error.errors[0].reason, "quotaExceeded");
    }
}
