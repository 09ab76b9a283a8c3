//! Stream data provider.
//!
//! A provider turns a channel identifier into classified [`VideoRecord`]s for
//! the three query shapes the tracker needs. The shipped implementation talks
//! to the YouTube Data API v3; tests substitute scripted providers.

mod wire;
mod youtube;

pub use youtube::YouTubeProvider;

use async_trait::async_trait;

use crate::Result;
use crate::domain::VideoRecord;

/// Source of video records for a channel.
#[async_trait]
pub trait StreamDataProvider: Send + Sync {
    /// Recent uploads that are scheduled and have neither started nor ended.
    async fn fetch_upcoming(&self, channel_id: &str) -> Result<Vec<VideoRecord>>;

    /// Streams the provider currently reports as live.
    async fn fetch_live(&self, channel_id: &str) -> Result<Vec<VideoRecord>>;

    /// Recent uploads that have ended with a positive duration.
    async fn fetch_completed(&self, channel_id: &str) -> Result<Vec<VideoRecord>>;
}
