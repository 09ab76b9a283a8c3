//! Application container.
//!
//! Builds the long-lived services from an [`AppConfig`] and a storage backend
//! so the CLI and tests wire things up the same way.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::AppConfig;
use crate::monitor::{StreamStateStore, SubscriptionRegistry};
use crate::notification::{
    DesktopChannel, DesktopNotifier, DiscordChannel, NotificationLedger, NotificationPermission,
    NativeNotifier, NotificationService, ThumbnailCache,
};
use crate::provider::{StreamDataProvider, YouTubeProvider};
use crate::scheduler::{OrchestratorConfig, PollOrchestrator};
use crate::storage::{FileStore, KeyValueStore};
use crate::{Error, Result};

const THUMBNAIL_DIR: &str = "thumbnails";
const THUMBNAIL_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct App {
    pub config: AppConfig,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub state: Arc<StreamStateStore>,
    pub notifications: Arc<NotificationService>,
    desktop: Arc<DesktopChannel>,
}

impl App {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn DesktopNotifier>,
    ) -> Self {
        let subscriptions = Arc::new(SubscriptionRegistry::load(store.clone()));
        let state = Arc::new(StreamStateStore::load(store.clone()));
        let ledger = Arc::new(NotificationLedger::load(store, &config.retention));

        let desktop = Arc::new(DesktopChannel::new(notifier, config.notification.clone()));
        let discord = Arc::new(DiscordChannel::new(
            config.discord.clone(),
            config.notification.clone(),
        ));
        let notifications = Arc::new(
            NotificationService::new(ledger)
                .with_channel(desktop.clone())
                .with_channel(discord),
        );

        Self {
            config,
            subscriptions,
            state,
            notifications,
            desktop,
        }
    }

    /// Open the file store under the configured data directory and render
    /// desktop notifications through the platform notification service.
    pub fn open(config: AppConfig) -> Result<Self> {
        let store = FileStore::open(&config.data_dir)?;
        info!(data_dir = %store.dir().display(), "Opened data directory");
        let thumbnails = ThumbnailCache::new(config.data_dir.join(THUMBNAIL_DIR));
        thumbnails.prune(THUMBNAIL_MAX_AGE);
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(NativeNotifier::new(Some(thumbnails))),
        ))
    }

    pub async fn ensure_desktop_permission(&self) -> NotificationPermission {
        self.desktop.ensure_permission().await
    }

    /// The YouTube provider. Fails when no API key is configured.
    pub fn provider(&self) -> Result<Arc<dyn StreamDataProvider>> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            Error::InvalidCredential(
                "no API key configured; set YOUTUBE_API_KEY or api_key in the config file"
                    .to_string(),
            )
        })?;
        Ok(Arc::new(YouTubeProvider::new(&self.config.provider, api_key)?))
    }

    pub fn orchestrator(&self, provider: Arc<dyn StreamDataProvider>) -> PollOrchestrator {
        PollOrchestrator::new(
            provider,
            self.subscriptions.clone(),
            self.state.clone(),
            self.notifications.clone(),
            OrchestratorConfig::from(&self.config),
        )
    }
}
