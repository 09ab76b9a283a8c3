//! Channel subscriptions.

use serde::{Deserialize, Serialize};

use super::filter::KeywordFilter;

/// A user-configured channel to poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSubscription {
    /// External channel identifier; unique within the subscription set.
    pub channel_id: String,
    /// Optional comma-separated keyword filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
}

impl ChannelSubscription {
    pub fn new(channel_id: impl Into<String>, keywords: Option<String>) -> Self {
        let keywords = keywords
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        Self {
            channel_id: channel_id.into().trim().to_string(),
            keywords,
        }
    }

    pub fn filter(&self) -> KeywordFilter {
        KeywordFilter::parse(self.keywords.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_keywords_become_none() {
        let sub = ChannelSubscription::new(" UC1 ", Some("   ".to_string()));
        assert_eq!(sub.channel_id, "UC1");
        assert!(sub.keywords.is_none());
        assert!(sub.filter().is_empty());
    }

    #[test]
    fn test_serializes_camel_case() {
        let sub = ChannelSubscription::new("UC1", Some("live".to_string()));
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["channelId"], "UC1");
        assert_eq!(json["keywords"], "live");
    }
}
