//! Notification delivery with per-channel dedup.
//!
//! - [`ledger`]: durable notification records and the completed seen-set
//! - [`channels`]: desktop and Discord delivery
//! - [`service`]: the dedup engine tying both together

pub mod channels;
pub mod events;
pub mod ledger;
pub mod service;

pub use channels::{
    DesktopChannel, DesktopNotification, DesktopNotifier, DiscordChannel, NotificationChannel,
    NativeNotifier, NotificationPermission, ThumbnailCache, UrlOpener,
};
pub use events::{DeliveryChannel, NotificationKey};
pub use ledger::{NotificationLedger, SweepReport};
pub use service::{DeliveryFailure, DeliveryReport, NotificationService};
