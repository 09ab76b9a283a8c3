//! Desktop notification channel.
//!
//! Notifications are rendered through the platform notification service.
//! Thumbnails are downloaded once into a local cache so the service can
//! attach them, and clicking a notification opens the stream in the browser.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::{OnceCell, oneshot};
use tracing::{debug, info, warn};

use super::NotificationChannel;
use crate::config::NotificationSettings;
use crate::domain::{Lifecycle, VideoRecord};
use crate::notification::events::DeliveryChannel;
use crate::utils::fs;
use crate::utils::http_client::{self, with_timeout};
use crate::{Error, Result};

pub const YOUTUBE_ICON_URL: &str =
    "https://www.youtube.com/s/desktop/e4d15d2c/img/favicon_144x144.png";

const APP_NAME: &str = "YouTube Live Notifier";

/// Action invoked when the notification body is clicked.
const DEFAULT_ACTION: &str = "default";
const OPEN_ACTION: &str = "open";

const ICON_CACHE_KEY: &str = "youtube-icon";
const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(10);

/// Platform notification permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPermission {
    Granted,
    Denied,
    /// Not decided yet.
    Default,
}

/// A rendered desktop notification.
#[derive(Debug, Clone, PartialEq)]
pub struct DesktopNotification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub image: Option<String>,
    /// Replaces an earlier notification with the same tag.
    pub tag: String,
    /// Opened when the notification is clicked.
    pub url: String,
    pub silent: bool,
}

impl DesktopNotification {
    pub fn for_record(record: &VideoRecord, event: Lifecycle, silent: bool) -> Self {
        let title = match event {
            Lifecycle::Live => format!("{} is live now", record.channel_title),
            Lifecycle::Upcoming => format!("{} scheduled a stream", record.channel_title),
            Lifecycle::Completed => format!("{}'s stream has ended", record.channel_title),
        };

        Self {
            title,
            body: record.title.clone(),
            icon: YOUTUBE_ICON_URL.to_string(),
            image: record.thumbnail_url.clone(),
            tag: record.id.clone(),
            url: record.watch_url(),
            silent,
        }
    }
}

/// Platform seam for rendering desktop notifications.
#[async_trait]
pub trait DesktopNotifier: Send + Sync {
    /// Current permission without prompting.
    fn permission(&self) -> NotificationPermission;

    /// Ask for permission. Only the first call may prompt.
    async fn request_permission(&self) -> NotificationPermission;

    async fn show(&self, notification: &DesktopNotification) -> Result<()>;
}

/// Opens a URL in the user's browser.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Opens URLs with the platform's default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl UrlOpener for SystemOpener {
    fn open(&self, url: &str) -> Result<()> {
        open::that(url).map_err(|e| Error::Desktop(format!("failed to open {url}: {e}")))
    }
}

/// React to an action invoked on a shown notification.
///
/// Returns whether `url` was opened. Closing or dismissing the notification
/// reports other action ids, which are ignored.
pub fn handle_action(action: &str, url: &str, opener: &dyn UrlOpener) -> bool {
    if action != DEFAULT_ACTION && action != OPEN_ACTION {
        return false;
    }
    match opener.open(url) {
        Ok(()) => {
            debug!(url, "Opened stream from notification");
            true
        }
        Err(e) => {
            warn!(error = %e, "Failed to open stream from notification");
            false
        }
    }
}

/// Local cache of downloaded notification images.
#[derive(Debug, Clone)]
pub struct ThumbnailCache {
    dir: PathBuf,
    client: reqwest::Client,
}

impl ThumbnailCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_client(http_client::build_client(), dir)
    }

    pub fn with_client(client: reqwest::Client, dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            client,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local path of the image for `key`, downloading it from `url` on first
    /// use.
    pub async fn fetch(&self, key: &str, url: &str) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.img", file_stem(key)));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }

        let bytes = with_timeout(THUMBNAIL_TIMEOUT, async {
            let response = self.client.get(url).send().await?.error_for_status()?;
            Ok::<_, Error>(response.bytes().await?)
        })
        .await?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| fs::io_error("creating thumbnail directory", &self.dir, e))?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| fs::io_error("writing thumbnail", &path, e))?;
        debug!(key, bytes = bytes.len(), "Cached notification image");
        Ok(path)
    }

    /// Delete cached images not modified within `max_age`.
    pub fn prune(&self, max_age: Duration) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        let now = SystemTime::now();

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > max_age);
            if stale && path.is_file() {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete cached image"),
                }
            }
        }
        if removed > 0 {
            debug!(count = removed, "Pruned cached notification images");
        }
        removed
    }
}

fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Notifier backed by the platform notification service.
///
/// On freedesktop systems permission is granted when a notification server
/// answers on the session bus. Elsewhere the service is assumed available.
pub struct NativeNotifier {
    permission: OnceCell<NotificationPermission>,
    opener: Arc<dyn UrlOpener>,
    thumbnails: Option<ThumbnailCache>,
}

impl NativeNotifier {
    pub fn new(thumbnails: Option<ThumbnailCache>) -> Self {
        Self::with_opener(Arc::new(SystemOpener), thumbnails)
    }

    pub fn with_opener(opener: Arc<dyn UrlOpener>, thumbnails: Option<ThumbnailCache>) -> Self {
        Self {
            permission: OnceCell::new(),
            opener,
            thumbnails,
        }
    }

    async fn probe() -> NotificationPermission {
        match tokio::task::spawn_blocking(server_available).await {
            Ok(Ok(())) => NotificationPermission::Granted,
            Ok(Err(e)) => {
                warn!(error = %e, "No notification server; desktop notifications disabled");
                NotificationPermission::Denied
            }
            Err(e) => {
                warn!(error = %e, "Notification server probe failed");
                NotificationPermission::Denied
            }
        }
    }

    async fn cached_image(&self, key: &str, url: Option<&str>) -> Option<PathBuf> {
        let cache = self.thumbnails.as_ref()?;
        match cache.fetch(key, url?).await {
            Ok(path) => Some(path),
            Err(e) => {
                debug!(key, error = %e, "Showing notification without image");
                None
            }
        }
    }
}

#[async_trait]
impl DesktopNotifier for NativeNotifier {
    fn permission(&self) -> NotificationPermission {
        self.permission
            .get()
            .copied()
            .unwrap_or(NotificationPermission::Default)
    }

    async fn request_permission(&self) -> NotificationPermission {
        *self.permission.get_or_init(Self::probe).await
    }

    async fn show(&self, notification: &DesktopNotification) -> Result<()> {
        let icon = self
            .cached_image(ICON_CACHE_KEY, Some(notification.icon.as_str()))
            .await;
        let image = self
            .cached_image(&notification.tag, notification.image.as_deref())
            .await;
        let native = build_native(notification, icon.as_deref(), image.as_deref());

        let (shown_tx, shown_rx) = oneshot::channel();
        let opener = Arc::clone(&self.opener);
        let url = notification.url.clone();
        tokio::task::spawn_blocking(move || display(native, url, opener, shown_tx));

        shown_rx
            .await
            .map_err(|_| Error::Desktop("notification task ended before showing".to_string()))?
    }
}

/// Translate a rendered notification into the platform representation.
pub fn build_native(
    notification: &DesktopNotification,
    icon: Option<&Path>,
    image: Option<&Path>,
) -> notify_rust::Notification {
    let mut native = notify_rust::Notification::new();
    native
        .appname(APP_NAME)
        .summary(&notification.title)
        .body(&notification.body);
    if let Some(icon) = icon {
        native.icon(&icon.to_string_lossy());
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        use notify_rust::Hint;

        native
            .action(DEFAULT_ACTION, "Open")
            .action(OPEN_ACTION, "Watch on YouTube")
            .hint(Hint::Custom(
                "x-canonical-private-synchronous".to_string(),
                notification.tag.clone(),
            ));
        if notification.silent {
            native.hint(Hint::SuppressSound(true));
        }
        if let Some(image) = image {
            native.hint(Hint::ImagePath(image.to_string_lossy().into_owned()));
        }
    }
    #[cfg(not(all(unix, not(target_os = "macos"))))]
    let _ = image;

    native
}

#[cfg(all(unix, not(target_os = "macos")))]
fn server_available() -> std::result::Result<(), String> {
    notify_rust::get_server_information()
        .map(|info| debug!(server = %info.name, "Notification server found"))
        .map_err(|e| e.to_string())
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn server_available() -> std::result::Result<(), String> {
    Ok(())
}

/// Show `native`, report the outcome, then block until the user acts on it.
#[cfg(all(unix, not(target_os = "macos")))]
fn display(
    native: notify_rust::Notification,
    url: String,
    opener: Arc<dyn UrlOpener>,
    shown: oneshot::Sender<Result<()>>,
) {
    match native.show() {
        Ok(handle) => {
            let _ = shown.send(Ok(()));
            handle.wait_for_action(|action| {
                handle_action(action, &url, opener.as_ref());
            });
        }
        Err(e) => {
            let _ = shown.send(Err(Error::Desktop(e.to_string())));
        }
    }
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn display(
    native: notify_rust::Notification,
    _url: String,
    _opener: Arc<dyn UrlOpener>,
    shown: oneshot::Sender<Result<()>>,
) {
    let result = native
        .show()
        .map(|_| ())
        .map_err(|e| Error::Desktop(e.to_string()));
    let _ = shown.send(result);
}

/// Desktop delivery channel.
pub struct DesktopChannel {
    notifier: Arc<dyn DesktopNotifier>,
    settings: NotificationSettings,
}

impl DesktopChannel {
    pub fn new(notifier: Arc<dyn DesktopNotifier>, settings: NotificationSettings) -> Self {
        Self { notifier, settings }
    }

    /// Request permission if it has not been decided yet.
    pub async fn ensure_permission(&self) -> NotificationPermission {
        match self.notifier.permission() {
            NotificationPermission::Default if self.settings.enable_notifications => {
                let permission = self.notifier.request_permission().await;
                info!(?permission, "Desktop notification permission");
                permission
            }
            permission => permission,
        }
    }
}

#[async_trait]
impl NotificationChannel for DesktopChannel {
    fn channel_type(&self) -> &'static str {
        "desktop"
    }

    fn delivery_channel(&self) -> DeliveryChannel {
        DeliveryChannel::Desktop
    }

    fn is_enabled(&self, event: Lifecycle) -> bool {
        self.settings.enable_notifications
            && self.settings.allows(event)
            && self.notifier.permission() == NotificationPermission::Granted
    }

    async fn send(&self, record: &VideoRecord, event: Lifecycle) -> Result<()> {
        let notification =
            DesktopNotification::for_record(record, event, !self.settings.enable_sound);
        self.notifier.show(&notification).await?;
        debug!(video_id = %record.id, %event, "Desktop notification shown");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn test_client() -> reqwest::Client {
        crate::utils::http_client::install_rustls_provider();
        reqwest::Client::new()
    }

    struct FixedNotifier {
        permission: NotificationPermission,
        shown: Mutex<Vec<DesktopNotification>>,
    }

    #[async_trait]
    impl DesktopNotifier for FixedNotifier {
        fn permission(&self) -> NotificationPermission {
            self.permission
        }

        async fn request_permission(&self) -> NotificationPermission {
            self.permission
        }

        async fn show(&self, notification: &DesktopNotification) -> Result<()> {
            self.shown.lock().push(notification.clone());
            Ok(())
        }
    }

    fn channel(permission: NotificationPermission) -> (DesktopChannel, Arc<FixedNotifier>) {
        let notifier = Arc::new(FixedNotifier {
            permission,
            shown: Mutex::new(Vec::new()),
        });
        (
            DesktopChannel::new(notifier.clone(), NotificationSettings::default()),
            notifier,
        )
    }

    #[test]
    fn test_rendered_fields() {
        let mut record = VideoRecord::new("vid", "Karaoke night");
        record.channel_title = "Singer".to_string();
        record.thumbnail_url = Some("https://i.ytimg.com/h.jpg".to_string());

        let n = DesktopNotification::for_record(&record, Lifecycle::Live, true);
        assert_eq!(n.title, "Singer is live now");
        assert_eq!(n.body, "Karaoke night");
        assert_eq!(n.tag, "vid");
        assert_eq!(n.url, "https://www.youtube.com/watch?v=vid");
        assert_eq!(n.image.as_deref(), Some("https://i.ytimg.com/h.jpg"));
        assert!(n.silent);
    }

    #[test]
    fn test_gating() {
        let (granted, _) = channel(NotificationPermission::Granted);
        assert!(granted.is_enabled(Lifecycle::Live));
        assert!(granted.is_enabled(Lifecycle::Upcoming));
        // Completed notifications are off by default.
        assert!(!granted.is_enabled(Lifecycle::Completed));

        let (denied, _) = channel(NotificationPermission::Denied);
        assert!(!denied.is_enabled(Lifecycle::Live));
    }

    #[derive(Default)]
    struct RecordingOpener {
        opened: Mutex<Vec<String>>,
    }

    impl UrlOpener for RecordingOpener {
        fn open(&self, url: &str) -> Result<()> {
            self.opened.lock().push(url.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_click_opens_stream_url() {
        let opener = RecordingOpener::default();
        let url = "https://www.youtube.com/watch?v=vid";

        assert!(handle_action("default", url, &opener));
        assert!(handle_action("open", url, &opener));
        assert_eq!(*opener.opened.lock(), vec![url.to_string(), url.to_string()]);
    }

    #[test]
    fn test_dismiss_does_not_open() {
        let opener = RecordingOpener::default();

        assert!(!handle_action("__closed", "https://example.com", &opener));
        assert!(opener.opened.lock().is_empty());
    }

    #[test]
    fn test_native_notification_fields() {
        let mut record = VideoRecord::new("vid", "Karaoke night");
        record.channel_title = "Singer".to_string();
        let rendered = DesktopNotification::for_record(&record, Lifecycle::Live, false);

        let native = build_native(&rendered, None, Some(Path::new("/tmp/vid.img")));
        assert_eq!(native.summary, "Singer is live now");
        assert_eq!(native.body, "Karaoke night");
        assert_eq!(native.appname, APP_NAME);
        #[cfg(all(unix, not(target_os = "macos")))]
        assert!(native.actions.iter().any(|a| a == DEFAULT_ACTION));
    }

    #[tokio::test]
    async fn test_thumbnail_downloaded_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/vi/vid/hqdefault.jpg")
            .with_status(200)
            .with_body("jpeg-bytes")
            .expect(1)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::with_client(test_client(), dir.path());
        let url = format!("{}/vi/vid/hqdefault.jpg", server.url());

        let first = cache.fetch("vid", &url).await.unwrap();
        let second = cache.fetch("vid", &url).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "jpeg-bytes");
        mock.assert_async().await;

        assert_eq!(cache.prune(Duration::from_secs(3600)), 0);
        assert!(first.exists());
    }

    #[tokio::test]
    async fn test_thumbnail_failure_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing.jpg")
            .with_status(404)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::with_client(test_client(), dir.path());

        let url = format!("{}/missing.jpg", server.url());
        assert!(cache.fetch("vid", &url).await.is_err());
        assert!(!dir.path().join("vid.img").exists());
    }

    #[test]
    fn test_file_stem_strips_path_characters() {
        assert_eq!(file_stem("../a b"), "___a_b");
        assert_eq!(file_stem("dQw4w9WgXcQ"), "dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn test_send_renders_through_notifier() {
        let (channel, notifier) = channel(NotificationPermission::Granted);
        let record = VideoRecord::new("vid", "Title");

        channel.send(&record, Lifecycle::Upcoming).await.unwrap();
        let shown = notifier.shown.lock();
        assert_eq!(shown.len(), 1);
        assert!(!shown[0].silent);
    }
}
