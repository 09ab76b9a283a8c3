//! Discord webhook notification channel.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::{debug, warn};

use super::NotificationChannel;
use super::desktop::YOUTUBE_ICON_URL;
use crate::config::{DiscordSettings, NotificationSettings};
use crate::domain::{Lifecycle, RetryPolicy, VideoRecord};
use crate::notification::events::DeliveryChannel;
use crate::utils::http_client::{self, retry_with_policy};
use crate::{Error, Result};

/// Maximum description length in the embed.
const DESCRIPTION_LIMIT: usize = 300;

const FOOTER_TEXT: &str = "YouTube Live Notifier";

/// Discord notification channel.
pub struct DiscordChannel {
    settings: DiscordSettings,
    toggles: NotificationSettings,
    client: Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl DiscordChannel {
    pub fn new(settings: DiscordSettings, toggles: NotificationSettings) -> Self {
        Self::with_client(http_client::build_client(), settings, toggles)
    }

    pub fn with_client(
        client: Client,
        settings: DiscordSettings,
        toggles: NotificationSettings,
    ) -> Self {
        Self {
            timeout: settings.timeout(),
            retry: settings.retry_policy(),
            settings,
            toggles,
            client,
        }
    }

    /// Get the embed color for an event.
    fn get_color(event: Lifecycle) -> u32 {
        match event {
            Lifecycle::Live => 0xFF0000,      // Red
            Lifecycle::Upcoming => 0x3498DB,  // Blue
            Lifecycle::Completed => 0x708090, // Slate gray
        }
    }

    fn title(record: &VideoRecord, event: Lifecycle) -> String {
        match event {
            Lifecycle::Live => format!("🔴 Live now: {}", record.title),
            Lifecycle::Upcoming => format!("🕒 Scheduled: {}", record.title),
            Lifecycle::Completed => format!("✓ Stream ended: {}", record.title),
        }
    }

    /// Time field contents for an event, if the record carries the timestamp.
    fn time_field(record: &VideoRecord, event: Lifecycle) -> Option<serde_json::Value> {
        let (name, value) = match event {
            Lifecycle::Upcoming => (
                "Scheduled start",
                discord_timestamp(record.scheduled_start_time?),
            ),
            Lifecycle::Live => ("Started", discord_timestamp(record.actual_start_time?)),
            Lifecycle::Completed => {
                let end = record.actual_end_time?;
                let value = match record.duration() {
                    Some(duration) => format!(
                        "{} (duration: {})",
                        discord_timestamp(end),
                        format_duration(duration)
                    ),
                    None => discord_timestamp(end),
                };
                ("Ended", value)
            }
        };

        Some(json!({ "name": name, "value": value, "inline": true }))
    }

    /// Build the webhook payload for a record.
    fn build_payload(
        &self,
        record: &VideoRecord,
        event: Lifecycle,
        now: DateTime<Utc>,
    ) -> serde_json::Value {
        let mut fields = Vec::with_capacity(2);
        if let Some(field) = Self::time_field(record, event) {
            fields.push(field);
        }
        fields.push(json!({
            "name": "Channel",
            "value": format!("[{}]({})", record.channel_title, record.channel_url()),
            "inline": true
        }));

        let mut embed = json!({
            "title": Self::title(record, event),
            "url": record.watch_url(),
            "color": Self::get_color(event),
            "author": {
                "name": record.channel_title,
                "url": record.channel_url(),
                "icon_url": YOUTUBE_ICON_URL
            },
            "description": truncate_description(&record.description),
            "fields": fields,
            "footer": {
                "text": FOOTER_TEXT,
                "icon_url": YOUTUBE_ICON_URL
            },
            "timestamp": now.to_rfc3339()
        });
        if let Some(thumbnail) = &record.thumbnail_url {
            embed["thumbnail"] = json!({ "url": thumbnail });
        }

        json!({
            "username": self.settings.username,
            "embeds": [embed]
        })
    }

    fn validate_url(&self) -> Result<&str> {
        let url = self.settings.webhook_url.trim();
        if url.is_empty() || !url.starts_with(&self.settings.url_prefix) {
            return Err(Error::InvalidWebhookUrl(url.to_string()));
        }
        Ok(url)
    }

    async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<()> {
        let client = &self.client;
        let timeout = self.timeout;

        retry_with_policy(&self.retry, self.timeout, "discord_webhook", move || async move {
            let response = client
                .post(url)
                .json(payload)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        Error::Timeout(timeout)
                    } else {
                        Error::from(e)
                    }
                })?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after_secs = parse_retry_after(response).await;
                return Err(Error::RateLimited { retry_after_secs });
            }

            let body = response.text().await.unwrap_or_default();
            Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                message: body,
            })
        })
        .await
    }
}

/// Parse the retry delay from a 429 response, header first, then JSON body.
async fn parse_retry_after(response: reqwest::Response) -> Option<f64> {
    let from_header = response
        .headers()
        .get("Retry-After")
        .or_else(|| response.headers().get("X-RateLimit-Reset-After"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok());
    if from_header.is_some() {
        return from_header;
    }

    let body: serde_json::Value = response.json().await.ok()?;
    body.get("retry_after").and_then(|v| v.as_f64())
}

fn discord_timestamp(at: DateTime<Utc>) -> String {
    format!("<t:{}:F>", at.timestamp())
}

fn format_duration(duration: chrono::Duration) -> String {
    let hours = duration.num_hours();
    let minutes = duration.num_minutes() % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn truncate_description(description: &str) -> String {
    match description.char_indices().nth(DESCRIPTION_LIMIT) {
        Some((cut, _)) => format!("{}...", &description[..cut]),
        None => description.to_string(),
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn channel_type(&self) -> &'static str {
        "discord"
    }

    fn delivery_channel(&self) -> DeliveryChannel {
        DeliveryChannel::Webhook
    }

    fn is_enabled(&self, event: Lifecycle) -> bool {
        self.settings.enable_discord
            && !self.settings.webhook_url.trim().is_empty()
            && self.toggles.allows(event)
    }

    async fn send(&self, record: &VideoRecord, event: Lifecycle) -> Result<()> {
        let url = self.validate_url()?;
        let payload = self.build_payload(record, event, Utc::now());

        match self.post(url, &payload).await {
            Ok(()) => {
                debug!(video_id = %record.id, %event, "Discord notification sent");
                Ok(())
            }
            Err(e) => {
                warn!(video_id = %record.id, %event, error = %e, "Discord notification failed");
                Err(e)
            }
        }
    }
}
