//! Notification channels.
//!
//! - Desktop notifications through a platform [`DesktopNotifier`]
//! - Discord webhooks

mod desktop;
mod discord;

pub use desktop::{
    DesktopChannel, DesktopNotification, DesktopNotifier, NativeNotifier, NotificationPermission,
    SystemOpener, ThumbnailCache, UrlOpener, YOUTUBE_ICON_URL, build_native, handle_action,
};
pub use discord::DiscordChannel;

use async_trait::async_trait;

use super::events::DeliveryChannel;
use crate::Result;
use crate::domain::{Lifecycle, VideoRecord};

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// The dedup namespace this channel records deliveries under.
    fn delivery_channel(&self) -> DeliveryChannel;

    /// Whether this channel should deliver `event` notifications at all.
    fn is_enabled(&self, event: Lifecycle) -> bool;

    /// Deliver a notification for `record`.
    async fn send(&self, record: &VideoRecord, event: Lifecycle) -> Result<()>;
}
