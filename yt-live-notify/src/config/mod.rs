//! Application configuration.
//!
//! Configuration is read once at startup from a TOML file, overlaid with
//! environment variables (optionally from a `.env` file) and validated. The
//! rest of the crate reads the typed structs and never re-checks defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Lifecycle, RetryPolicy};
use crate::{Error, Result};

/// Application directory name under the platform config/data dirs.
pub const APP_DIR_NAME: &str = "yt-live-notify";

/// Minimum allowed polling interval, protecting the API quota.
pub const MIN_CHECK_INTERVAL_MINUTES: u64 = 5;

/// Longest accepted poll interval (one week).
pub const MAX_CHECK_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Upper bound for retention windows (one year).
pub const MAX_RETENTION_HOURS: i64 = 365 * 24;

/// Prefix every Discord webhook URL must start with.
pub const DISCORD_WEBHOOK_PREFIX: &str = "https://discord.com/api/webhooks/";

const ENV_API_KEY: &str = "YOUTUBE_API_KEY";
const ENV_DATA_DIR: &str = "YT_LIVE_NOTIFY_DATA_DIR";
const ENV_WEBHOOK_URL: &str = "YT_LIVE_NOTIFY_DISCORD_WEBHOOK";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// YouTube Data API key.
    pub api_key: Option<String>,
    /// Directory holding persisted state.
    pub data_dir: PathBuf,
    pub general: GeneralSettings,
    pub notification: NotificationSettings,
    pub discord: DiscordSettings,
    pub provider: ProviderSettings,
    pub retention: RetentionSettings,
    pub logging: LoggingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            data_dir: default_data_dir(),
            general: GeneralSettings::default(),
            notification: NotificationSettings::default(),
            discord: DiscordSettings::default(),
            provider: ProviderSettings::default(),
            retention: RetentionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Polling behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Minutes between polling cycles; clamped to at least 5.
    pub check_interval_minutes: u64,
    /// Run one cycle at startup when an API key is configured.
    pub auto_check: bool,
    /// Skip the remaining channels of a cycle after a quota error.
    pub stop_cycle_on_quota: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            check_interval_minutes: 30,
            auto_check: true,
            stop_cycle_on_quota: true,
        }
    }
}

/// Desktop notification toggles. The per-event toggles also gate the webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enable_notifications: bool,
    pub notify_upcoming: bool,
    pub notify_live: bool,
    pub notify_completed: bool,
    pub enable_sound: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enable_notifications: true,
            notify_upcoming: true,
            notify_live: true,
            notify_completed: false,
            enable_sound: true,
        }
    }
}

impl NotificationSettings {
    /// Per-event toggle shared by every delivery channel.
    pub fn allows(&self, event: Lifecycle) -> bool {
        match event {
            Lifecycle::Upcoming => self.notify_upcoming,
            Lifecycle::Live => self.notify_live,
            Lifecycle::Completed => self.notify_completed,
        }
    }
}

/// Discord webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordSettings {
    pub enable_discord: bool,
    pub webhook_url: String,
    /// Username shown on webhook messages.
    pub username: String,
    /// Required URL prefix for `webhook_url`.
    pub url_prefix: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for DiscordSettings {
    fn default() -> Self {
        Self {
            enable_discord: false,
            webhook_url: String::new(),
            username: "YouTube Live Notifier".to_string(),
            url_prefix: DISCORD_WEBHOOK_PREFIX.to_string(),
            timeout_secs: 10,
            max_attempts: 2,
            retry_delay_ms: 1000,
        }
    }
}

impl DiscordSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

/// YouTube Data API client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Page size for the recent-uploads query.
    pub max_results: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.googleapis.com/youtube/v3/".to_string(),
            timeout_secs: 10,
            max_attempts: 3,
            retry_delay_ms: 1000,
            max_results: 50,
        }
    }
}

impl ProviderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Bounds on retained state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    pub max_upcoming: usize,
    pub max_live: usize,
    pub max_completed: usize,
    /// Age after which notification records are swept.
    pub notification_ttl_hours: i64,
    pub sweep_interval_minutes: u64,
    /// Seen-set size that triggers truncation.
    pub seen_set_cap: usize,
    /// Entries kept when the seen-set is truncated.
    pub seen_set_keep: usize,
    /// How recently a stream must have ended to count as "just ended".
    pub completion_window_hours: i64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            max_upcoming: 50,
            max_live: 30,
            max_completed: 100,
            notification_ttl_hours: 24,
            sweep_interval_minutes: 60,
            seen_set_cap: 500,
            seen_set_keep: 300,
            completion_window_hours: 24,
        }
    }
}

impl RetentionSettings {
    pub fn notification_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.notification_ttl_hours)
    }

    pub fn completion_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.completion_window_hours)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes * 60)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
    /// Also write daily-rotated log files.
    pub file_enabled: bool,
    /// Log directory; defaults to `<data_dir>/logs`.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: crate::logging::DEFAULT_LOG_FILTER.to_string(),
            file_enabled: false,
            directory: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR_NAME))
}

/// Clamp a polling interval to the allowed minimum.
pub fn clamp_interval_minutes(minutes: u64) -> u64 {
    minutes.clamp(MIN_CHECK_INTERVAL_MINUTES, MAX_CHECK_INTERVAL_MINUTES)
}

impl AppConfig {
    /// Default config file location (`<config_dir>/yt-live-notify/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"))
    }

    /// Load configuration from `path` (or the default location), apply the
    /// environment and validate.
    ///
    /// A missing file at the default location is not an error; a missing file
    /// at an explicit path is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without applying the environment.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::config(format!("invalid config: {e}")))
    }

    /// Overlay values from environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var(ENV_WEBHOOK_URL) {
            self.discord.webhook_url = url;
        }
    }

    /// Normalize and check values once, at load time.
    pub fn validate(&mut self) -> Result<()> {
        self.api_key = self
            .api_key
            .take()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self.discord.webhook_url = self.discord.webhook_url.trim().to_string();

        let clamped = clamp_interval_minutes(self.general.check_interval_minutes);
        if clamped != self.general.check_interval_minutes {
            warn!(
                requested = self.general.check_interval_minutes,
                effective = clamped,
                "Check interval out of range, clamping"
            );
            self.general.check_interval_minutes = clamped;
        }

        let r = &self.retention;
        if r.max_upcoming == 0 || r.max_live == 0 || r.max_completed == 0 {
            return Err(Error::config("retention bucket sizes must be positive"));
        }
        if r.seen_set_keep > r.seen_set_cap {
            return Err(Error::config(
                "retention.seen_set_keep must not exceed retention.seen_set_cap",
            ));
        }
        for (name, hours) in [
            ("notification_ttl_hours", r.notification_ttl_hours),
            ("completion_window_hours", r.completion_window_hours),
        ] {
            if !(1..=MAX_RETENTION_HOURS).contains(&hours) {
                return Err(Error::config(format!(
                    "retention.{name} must be between 1 and {MAX_RETENTION_HOURS}"
                )));
            }
        }
        if !(1..=MAX_CHECK_INTERVAL_MINUTES).contains(&r.sweep_interval_minutes) {
            return Err(Error::config(format!(
                "retention.sweep_interval_minutes must be between 1 and {MAX_CHECK_INTERVAL_MINUTES}"
            )));
        }
        if self.provider.timeout_secs == 0 || self.discord.timeout_secs == 0 {
            return Err(Error::config("timeouts must be positive"));
        }
        url::Url::parse(&self.provider.base_url)
            .map_err(|e| Error::config(format!("invalid provider.base_url: {e}")))?;

        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.general.check_interval_minutes * 60)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.logging
            .directory
            .clone()
            .unwrap_or_else(|| self.data_dir.join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.general.check_interval_minutes, 30);
        assert!(config.general.auto_check);
        assert!(config.notification.notify_live);
        assert!(!config.notification.notify_completed);
        assert!(!config.discord.enable_discord);
        assert_eq!(config.discord.max_attempts, 2);
        assert_eq!(config.provider.max_attempts, 3);
        assert_eq!(config.retention.max_completed, 100);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            api_key = "abc"

            [general]
            check_interval_minutes = 15

            [discord]
            enable_discord = true
            webhook_url = "https://discord.com/api/webhooks/1/x"
            "#,
        )
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("abc"));
        assert_eq!(config.general.check_interval_minutes, 15);
        assert!(config.general.auto_check);
        assert_eq!(config.discord.username, "YouTube Live Notifier");
    }

    #[test]
    fn test_validate_clamps_interval() {
        let mut config = AppConfig::default();
        config.general.check_interval_minutes = 1;
        config.validate().unwrap();
        assert_eq!(config.general.check_interval_minutes, 5);
        assert_eq!(config.check_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_validate_rejects_bad_retention() {
        let mut config = AppConfig::default();
        config.retention.seen_set_keep = 600;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = AppConfig::default();
        config.retention.max_live = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_windows() {
        let mut config = AppConfig::default();
        config.retention.notification_ttl_hours = i64::MAX;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = AppConfig::default();
        config.retention.completion_window_hours = MAX_RETENTION_HOURS + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retention.completion_window_hours = MAX_RETENTION_HOURS;
        config.retention.sweep_interval_minutes = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.general.check_interval_minutes = u64::MAX;
        config.validate().unwrap();
        assert_eq!(config.general.check_interval_minutes, MAX_CHECK_INTERVAL_MINUTES);
    }

    #[test]
    fn test_validate_drops_blank_api_key() {
        let mut config = AppConfig::default();
        config.api_key = Some("   ".to_string());
        config.validate().unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_event_toggles() {
        let settings = NotificationSettings::default();
        assert!(settings.allows(Lifecycle::Upcoming));
        assert!(settings.allows(Lifecycle::Live));
        assert!(!settings.allows(Lifecycle::Completed));
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = AppConfig::from_toml_str("general = 3").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
