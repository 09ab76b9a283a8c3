//! Notification identities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::Lifecycle;

/// Where a notification is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Desktop,
    Webhook,
}

impl DeliveryChannel {
    pub const ALL: [DeliveryChannel; 2] = [DeliveryChannel::Desktop, DeliveryChannel::Webhook];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dedup key: one notification opportunity per video, event and channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotificationKey {
    pub video_id: String,
    pub event: Lifecycle,
    pub channel: DeliveryChannel,
}

impl NotificationKey {
    pub fn new(video_id: impl Into<String>, event: Lifecycle, channel: DeliveryChannel) -> Self {
        Self {
            video_id: video_id.into(),
            event,
            channel,
        }
    }
}

impl fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.video_id, self.event, self.channel)
    }
}
