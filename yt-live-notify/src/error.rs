//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// Network-facing components (the data provider and the webhook sender)
/// classify raw transport and HTTP failures into these variants. Everything
/// downstream decides retry and user-facing wording from the variant alone.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Channel not found: {channel_id}")]
    ChannelNotFound { channel_id: String },

    #[error("YouTube API quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected HTTP status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("Invalid API credential: {0}")]
    InvalidCredential(String),

    #[error("Invalid webhook URL: {0}")]
    InvalidWebhookUrl(String),

    #[error("Webhook rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<f64> },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Desktop notification failed: {0}")]
    Desktop(String),

    #[error("A polling cycle is already in progress")]
    CycleInProgress,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn channel_not_found(channel_id: impl Into<String>) -> Self {
        Self::ChannelNotFound {
            channel_id: channel_id.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Whether the failure is plausibly transient and worth another attempt.
    ///
    /// Quota and rate-limit responses are deliberately excluded: they must
    /// surface immediately so polling can back off as a whole.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Network(_) | Self::UnexpectedStatus { .. }
        )
    }

    /// Whether this error means the API quota is exhausted.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }

    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChannelNotFound { .. } => "channel_not_found",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network_error",
            Self::UnexpectedStatus { .. } => "unexpected_status",
            Self::InvalidCredential(_) => "invalid_credential",
            Self::InvalidWebhookUrl(_) => "invalid_webhook_url",
            Self::RateLimited { .. } => "rate_limited",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Desktop(_) => "desktop",
            Self::CycleInProgress => "cycle_in_progress",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Configuration(_) => "configuration",
            Self::Io(_) => "io",
        }
    }

    /// Human-readable wording for the user, keyed by error kind.
    pub fn user_message(&self) -> String {
        match self {
            Self::ChannelNotFound { channel_id } => format!(
                "Channel not found: {channel_id}. Check that the channel ID is correct."
            ),
            Self::QuotaExceeded(_) => "The YouTube API quota has been exceeded. \
                 Wait a while before checking again."
                .to_string(),
            Self::Timeout(_) => {
                "The request timed out. Check your network connection.".to_string()
            }
            Self::Network(_) | Self::UnexpectedStatus { .. } => {
                "A network error occurred. Check your internet connection.".to_string()
            }
            Self::InvalidCredential(_) => {
                "The YouTube API key is invalid. Check the key and configure it again.".to_string()
            }
            Self::InvalidWebhookUrl(_) => {
                "The Discord webhook URL is invalid. Check the notification settings.".to_string()
            }
            Self::RateLimited { .. } => {
                "Discord rate limit reached. Wait a while before trying again.".to_string()
            }
            Self::MalformedResponse(_) => {
                "YouTube returned an unexpected response. Try again later.".to_string()
            }
            other => format!("An error occurred: {other}"),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(
            Error::UnexpectedStatus {
                status: 500,
                message: "boom".into()
            }
            .is_retryable()
        );

        assert!(!Error::QuotaExceeded("quota".into()).is_retryable());
        assert!(
            !Error::RateLimited {
                retry_after_secs: Some(1.0)
            }
            .is_retryable()
        );
        assert!(!Error::channel_not_found("UC123").is_retryable());
        assert!(!Error::InvalidCredential("bad key".into()).is_retryable());
        assert!(!Error::malformed("no items").is_retryable());
    }

    #[test]
    fn test_user_message_mentions_channel() {
        let msg = Error::channel_not_found("UCabc").user_message();
        assert!(msg.contains("UCabc"));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Error::QuotaExceeded(String::new()).kind(), "quota_exceeded");
        assert_eq!(Error::CycleInProgress.kind(), "cycle_in_progress");
    }
}
