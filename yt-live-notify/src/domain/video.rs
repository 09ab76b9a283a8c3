//! Video records and lifecycle classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base URL for watching a video.
pub const WATCH_URL_BASE: &str = "https://www.youtube.com/watch?v=";

/// Base URL for a channel page.
pub const CHANNEL_URL_BASE: &str = "https://www.youtube.com/channel/";

/// Lifecycle state of a video, derived from its timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Upcoming,
    Live,
    Completed,
}

impl Lifecycle {
    pub const ALL: [Lifecycle; 3] = [Lifecycle::Upcoming, Lifecycle::Live, Lifecycle::Completed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Live => "live",
            Self::Completed => "completed",
        }
    }

    /// Parse the lowercase name used in persisted keys.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upcoming" => Some(Self::Upcoming),
            "live" => Some(Self::Live),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single video or stream candidate returned by the data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    /// Stable video id; primary key for every dedup operation.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub channel_title: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub scheduled_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_end_time: Option<DateTime<Utc>>,
}

impl VideoRecord {
    /// Create a record with only identity and display fields populated.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            channel_title: String::new(),
            channel_id: String::new(),
            thumbnail_url: None,
            scheduled_start_time: None,
            actual_start_time: None,
            actual_end_time: None,
        }
    }

    /// Lifecycle inferred from timestamp fields.
    ///
    /// Live cannot be inferred reliably from timestamps alone (the provider's
    /// live search is authoritative), so a started-but-not-ended record is
    /// reported as live here only as a best guess.
    pub fn lifecycle(&self) -> Option<Lifecycle> {
        match (
            self.scheduled_start_time,
            self.actual_start_time,
            self.actual_end_time,
        ) {
            (_, _, Some(_)) => Some(Lifecycle::Completed),
            (_, Some(_), None) => Some(Lifecycle::Live),
            (Some(_), None, None) => Some(Lifecycle::Upcoming),
            (None, None, None) => None,
        }
    }

    /// Whether the record qualifies as a finished stream with a positive duration.
    pub fn has_valid_completion(&self) -> bool {
        match (self.actual_start_time, self.actual_end_time) {
            (Some(start), Some(end)) => end > start,
            (None, Some(_)) => true,
            _ => false,
        }
    }

    /// Stream duration, when both start and end are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.actual_start_time, self.actual_end_time) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }

    pub fn watch_url(&self) -> String {
        format!("{WATCH_URL_BASE}{}", self.id)
    }

    pub fn channel_url(&self) -> String {
        format!("{CHANNEL_URL_BASE}{}", self.channel_id)
    }

    /// Sort key for retention: the bucket's primary timestamp, then fallbacks.
    pub fn retention_timestamp(&self, bucket: Lifecycle) -> Option<DateTime<Utc>> {
        let (first, second, third) = match bucket {
            Lifecycle::Upcoming => (
                self.scheduled_start_time,
                self.actual_start_time,
                self.actual_end_time,
            ),
            Lifecycle::Live => (
                self.actual_start_time,
                self.scheduled_start_time,
                self.actual_end_time,
            ),
            Lifecycle::Completed => (
                self.actual_end_time,
                self.actual_start_time,
                self.scheduled_start_time,
            ),
        };
        first.or(second).or(third)
    }
}
