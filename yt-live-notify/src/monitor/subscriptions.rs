//! Persisted channel subscriptions.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::domain::ChannelSubscription;
use crate::storage::{KeyValueStore, keys, read_versioned, write_versioned};
use crate::{Error, Result};

/// Ordered set of subscribed channels, unique by channel id.
///
/// Insertion order is the polling order.
pub struct SubscriptionRegistry {
    store: Arc<dyn KeyValueStore>,
    channels: RwLock<Vec<ChannelSubscription>>,
}

impl SubscriptionRegistry {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        // The unversioned format was the same array.
        let channels: Vec<ChannelSubscription> =
            read_versioned(store.as_ref(), keys::SUBSCRIPTIONS, |legacy| {
                serde_json::from_value(legacy).ok()
            })
            .unwrap_or_default();

        let mut unique: Vec<ChannelSubscription> = Vec::with_capacity(channels.len());
        for channel in channels {
            if !channel.channel_id.is_empty()
                && !unique.iter().any(|c| c.channel_id == channel.channel_id)
            {
                unique.push(channel);
            }
        }

        Self {
            store,
            channels: RwLock::new(unique),
        }
    }

    /// Subscribe to a channel. Returns `false` when it is already subscribed.
    pub fn add(&self, channel_id: &str, keywords: Option<String>) -> Result<bool> {
        let subscription = ChannelSubscription::new(channel_id, keywords);
        if subscription.channel_id.is_empty() {
            return Err(Error::config("channel id must not be empty"));
        }

        let mut channels = self.channels.write();
        if channels
            .iter()
            .any(|c| c.channel_id == subscription.channel_id)
        {
            return Ok(false);
        }

        info!(channel_id = %subscription.channel_id, keywords = ?subscription.keywords, "Subscribed to channel");
        channels.push(subscription);
        write_versioned(self.store.as_ref(), keys::SUBSCRIPTIONS, &*channels)?;
        Ok(true)
    }

    /// Unsubscribe from a channel. Returns `false` when it was not subscribed.
    pub fn remove(&self, channel_id: &str) -> Result<bool> {
        let channel_id = channel_id.trim();
        let mut channels = self.channels.write();
        let before = channels.len();
        channels.retain(|c| c.channel_id != channel_id);
        if channels.len() == before {
            return Ok(false);
        }

        info!(channel_id, "Unsubscribed from channel");
        write_versioned(self.store.as_ref(), keys::SUBSCRIPTIONS, &*channels)?;
        Ok(true)
    }

    pub fn get(&self, channel_id: &str) -> Option<ChannelSubscription> {
        self.channels
            .read()
            .iter()
            .find(|c| c.channel_id == channel_id.trim())
            .cloned()
    }

    pub fn list(&self) -> Vec<ChannelSubscription> {
        self.channels.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}
