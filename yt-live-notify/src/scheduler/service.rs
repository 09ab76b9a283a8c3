//! Poll orchestrator.
//!
//! A cycle walks the subscribed channels strictly in order. For each channel
//! it fetches live, upcoming and completed records, applies the channel's
//! keyword filter, detects ended streams against that channel's previous
//! poll, merges into the state store and hands new events to the
//! notification service. Eviction runs once after every channel has merged.
//!
//! Only one cycle runs at a time; a second trigger while a cycle is in flight
//! fails with [`Error::CycleInProgress`].

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{AppConfig, clamp_interval_minutes};
use crate::domain::{ChannelSubscription, Lifecycle};
use crate::monitor::{StreamCollections, StreamStateStore, SubscriptionRegistry, TransitionDetector};
use crate::notification::{DeliveryReport, NotificationService};
use crate::provider::StreamDataProvider;
use crate::{Error, Result};

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub check_interval: Duration,
    /// Run a cycle as soon as [`PollOrchestrator::run`] starts.
    pub auto_check: bool,
    /// Skip the remaining channels of a cycle once the quota is exhausted.
    pub stop_cycle_on_quota: bool,
    pub max_upcoming: usize,
    pub max_live: usize,
    pub max_completed: usize,
    pub completion_window: chrono::Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            check_interval: config.check_interval(),
            auto_check: config.general.auto_check,
            stop_cycle_on_quota: config.general.stop_cycle_on_quota,
            max_upcoming: config.retention.max_upcoming,
            max_live: config.retention.max_live,
            max_completed: config.retention.max_completed,
            completion_window: config.retention.completion_window(),
        }
    }
}

/// Counts from one successful channel poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSummary {
    pub upcoming: usize,
    pub live: usize,
    pub completed: usize,
    /// Confirmed live to completed transitions.
    pub ended: usize,
}

#[derive(Debug)]
pub enum ChannelOutcome {
    Checked(ChannelSummary),
    Failed(Error),
    /// Not polled because the quota ran out earlier in the cycle.
    Skipped,
}

#[derive(Debug)]
pub struct ChannelReport {
    pub channel_id: String,
    pub outcome: ChannelOutcome,
}

/// Result of a full cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub channels: Vec<ChannelReport>,
    pub delivery: DeliveryReport,
    pub evicted: usize,
    pub quota_exceeded: bool,
}

impl CycleReport {
    pub fn failed_channels(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.channels.iter().filter_map(|c| match &c.outcome {
            ChannelOutcome::Failed(e) => Some((c.channel_id.as_str(), e)),
            _ => None,
        })
    }
}

/// Resets the in-progress flag when a cycle ends, including on panic.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PollOrchestrator {
    provider: Arc<dyn StreamDataProvider>,
    subscriptions: Arc<SubscriptionRegistry>,
    state: Arc<StreamStateStore>,
    notifications: Arc<NotificationService>,
    detector: TransitionDetector,
    config: OrchestratorConfig,
    in_progress: AtomicBool,
    interval_tx: watch::Sender<Duration>,
}

impl PollOrchestrator {
    pub fn new(
        provider: Arc<dyn StreamDataProvider>,
        subscriptions: Arc<SubscriptionRegistry>,
        state: Arc<StreamStateStore>,
        notifications: Arc<NotificationService>,
        config: OrchestratorConfig,
    ) -> Self {
        let (interval_tx, _) = watch::channel(config.check_interval);
        Self {
            provider,
            subscriptions,
            state,
            notifications,
            detector: TransitionDetector::new(config.completion_window),
            config,
            in_progress: AtomicBool::new(false),
            interval_tx,
        }
    }

    fn try_begin(&self) -> Result<CycleGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::CycleInProgress)?;
        Ok(CycleGuard(&self.in_progress))
    }

    pub fn is_cycle_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Poll every subscribed channel once.
    pub async fn check_all(&self) -> Result<CycleReport> {
        let _guard = self.try_begin()?;
        let channels = self.subscriptions.list();
        info!(channels = channels.len(), "Starting poll cycle");

        self.state.reset();
        let mut report = CycleReport::default();

        for subscription in &channels {
            if report.quota_exceeded && self.config.stop_cycle_on_quota {
                report.channels.push(ChannelReport {
                    channel_id: subscription.channel_id.clone(),
                    outcome: ChannelOutcome::Skipped,
                });
                continue;
            }

            let outcome = match self.poll_channel(subscription, &mut report.delivery).await {
                Ok(summary) => ChannelOutcome::Checked(summary),
                Err(e) => {
                    warn!(
                        channel_id = %subscription.channel_id,
                        kind = e.kind(),
                        error = %e,
                        "{}",
                        e.user_message()
                    );
                    if e.is_quota_exceeded() {
                        report.quota_exceeded = true;
                    }
                    ChannelOutcome::Failed(e)
                }
            };
            report.channels.push(ChannelReport {
                channel_id: subscription.channel_id.clone(),
                outcome,
            });
        }

        report.evicted = self.evict();

        info!(
            channels = report.channels.len(),
            failed = report.failed_channels().count(),
            sent = report.delivery.sent,
            evicted = report.evicted,
            "Poll cycle finished"
        );
        Ok(report)
    }

    /// Poll a single channel on demand.
    ///
    /// Channels that are not subscribed are polled without a keyword filter.
    pub async fn check_channel(&self, channel_id: &str) -> Result<(ChannelSummary, DeliveryReport)> {
        let _guard = self.try_begin()?;
        let subscription = self
            .subscriptions
            .get(channel_id)
            .unwrap_or_else(|| ChannelSubscription::new(channel_id, None));

        let mut delivery = DeliveryReport::default();
        let summary = self.poll_channel(&subscription, &mut delivery).await?;
        self.evict();
        Ok((summary, delivery))
    }

    #[instrument(skip_all, fields(channel_id = %subscription.channel_id))]
    async fn poll_channel(
        &self,
        subscription: &ChannelSubscription,
        delivery: &mut DeliveryReport,
    ) -> Result<ChannelSummary> {
        let channel_id = subscription.channel_id.as_str();
        let filter = subscription.filter();

        let live = filter.apply(self.provider.fetch_live(channel_id).await?);
        let upcoming = filter.apply(self.provider.fetch_upcoming(channel_id).await?);
        let completed = filter.apply(self.provider.fetch_completed(channel_id).await?);

        let previous_live = self.state.previous_live(channel_id);
        let current_live: HashSet<String> = live.iter().map(|r| r.id.clone()).collect();
        let unconfirmed = self.state.unconfirmed_ended(channel_id);
        let detection = self.detector.detect(
            &previous_live,
            &unconfirmed,
            &current_live,
            &completed,
            Utc::now(),
        );
        let ended = detection.confirmed;

        let summary = ChannelSummary {
            upcoming: upcoming.len(),
            live: live.len(),
            completed: completed.len(),
            ended: ended.len(),
        };
        debug!(?summary, "Fetched channel");

        self.state.drop_stale_live(channel_id, &current_live);
        self.state.merge_in(Lifecycle::Live, live.clone());
        self.state.merge_in(Lifecycle::Upcoming, upcoming.clone());
        self.state.merge_in(Lifecycle::Completed, completed);
        self.state.record_live(channel_id, current_live);
        self.state
            .record_unconfirmed_ended(channel_id, detection.unconfirmed);

        delivery.merge(self.notifications.notify_new_streams(&live, Lifecycle::Live).await);
        delivery.merge(
            self.notifications
                .notify_new_streams(&upcoming, Lifecycle::Upcoming)
                .await,
        );
        if !ended.is_empty() {
            delivery.merge(self.notifications.notify_completed_transitions(&ended).await);
        }

        Ok(summary)
    }

    fn evict(&self) -> usize {
        [
            (Lifecycle::Upcoming, self.config.max_upcoming),
            (Lifecycle::Live, self.config.max_live),
            (Lifecycle::Completed, self.config.max_completed),
        ]
        .into_iter()
        .map(|(bucket, max)| self.state.evict_to_capacity(bucket, max))
        .sum()
    }

    /// Change the poll period. The value is clamped to the accepted range
    /// and takes effect on the running loop immediately.
    pub fn update_poll_interval(&self, minutes: u64) -> Duration {
        let interval = Duration::from_secs(clamp_interval_minutes(minutes) * 60);
        self.interval_tx.send_replace(interval);
        info!(?interval, "Poll interval updated");
        interval
    }

    pub fn poll_interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    /// Read access to the current collections.
    pub fn snapshot(&self) -> StreamCollections {
        self.state.snapshot()
    }

    /// Drive cycles on the configured period until `cancel` fires.
    ///
    /// A cycle in progress always runs to completion before cancellation is
    /// observed.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval_rx = self.interval_tx.subscribe();
        let mut period = *interval_rx.borrow_and_update();
        let first = if self.config.auto_check {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = tokio::time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(?period, auto_check = self.config.auto_check, "Poll loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Poll loop stopped");
                    return;
                }
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    period = *interval_rx.borrow_and_update();
                    ticker = tokio::time::interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    debug!(?period, "Poll loop retimed");
                }
                _ = ticker.tick() => {
                    match self.check_all().await {
                        Ok(_) => {}
                        Err(Error::CycleInProgress) => {
                            debug!("Skipping scheduled cycle; another cycle is in progress");
                        }
                        Err(e) => warn!(error = %e, "Poll cycle failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionSettings;
    use crate::domain::VideoRecord;
    use crate::notification::NotificationLedger;
    use crate::storage::{KeyValueStore, MemoryStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// Provider that returns canned records per channel.
    #[derive(Default)]
    struct ScriptedProvider {
        live: Mutex<HashMap<String, Vec<VideoRecord>>>,
        upcoming: Mutex<HashMap<String, Vec<VideoRecord>>>,
        failures: Mutex<HashMap<String, fn() -> Error>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn fail_with(&self, channel: &str, make: fn() -> Error) {
            self.failures.lock().insert(channel.to_string(), make);
        }

        fn check(&self, channel_id: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.failures.lock().get(channel_id) {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl StreamDataProvider for ScriptedProvider {
        async fn fetch_upcoming(&self, channel_id: &str) -> Result<Vec<VideoRecord>> {
            self.check(channel_id)?;
            Ok(self.upcoming.lock().get(channel_id).cloned().unwrap_or_default())
        }

        async fn fetch_live(&self, channel_id: &str) -> Result<Vec<VideoRecord>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.check(channel_id)?;
            Ok(self.live.lock().get(channel_id).cloned().unwrap_or_default())
        }

        async fn fetch_completed(&self, channel_id: &str) -> Result<Vec<VideoRecord>> {
            self.check(channel_id)?;
            Ok(Vec::new())
        }
    }

    fn record(id: &str, channel: &str) -> VideoRecord {
        let mut record = VideoRecord::new(id, format!("Stream {id}"));
        record.channel_id = channel.to_string();
        record.scheduled_start_time = Some(Utc::now());
        record
    }

    fn orchestrator(provider: Arc<ScriptedProvider>, channels: &[&str]) -> PollOrchestrator {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let subscriptions = Arc::new(SubscriptionRegistry::load(store.clone()));
        for channel in channels {
            subscriptions.add(channel, None).unwrap();
        }
        let ledger = Arc::new(NotificationLedger::load(
            store.clone(),
            &RetentionSettings::default(),
        ));
        PollOrchestrator::new(
            provider,
            subscriptions,
            Arc::new(StreamStateStore::load(store)),
            Arc::new(NotificationService::new(ledger)),
            OrchestratorConfig {
                max_upcoming: 2,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_one_channel_failure_does_not_abort_cycle() {
        let provider = Arc::new(ScriptedProvider::default());
        provider
            .upcoming
            .lock()
            .insert("UC2".into(), vec![record("u1", "UC2")]);
        provider.fail_with("UC1", || Error::channel_not_found("UC1"));

        let orchestrator = orchestrator(provider, &["UC1", "UC2"]);
        let report = orchestrator.check_all().await.unwrap();

        assert_eq!(report.channels.len(), 2);
        assert!(matches!(
            report.channels[0].outcome,
            ChannelOutcome::Failed(Error::ChannelNotFound { .. })
        ));
        assert!(matches!(report.channels[1].outcome, ChannelOutcome::Checked(_)));
        assert!(orchestrator.snapshot().contains(Lifecycle::Upcoming, "u1"));
    }

    #[tokio::test]
    async fn test_quota_skips_rest_of_cycle() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.fail_with("UC1", || Error::QuotaExceeded("quota".into()));

        let orchestrator = orchestrator(provider.clone(), &["UC1", "UC2", "UC3"]);
        let report = orchestrator.check_all().await.unwrap();

        assert!(report.quota_exceeded);
        assert!(matches!(report.channels[1].outcome, ChannelOutcome::Skipped));
        assert!(matches!(report.channels[2].outcome, ChannelOutcome::Skipped));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eviction_runs_after_all_channels() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.upcoming.lock().insert(
            "UC1".into(),
            vec![record("a", "UC1"), record("b", "UC1")],
        );
        provider
            .upcoming
            .lock()
            .insert("UC2".into(), vec![record("c", "UC2")]);

        let orchestrator = orchestrator(provider, &["UC1", "UC2"]);
        let report = orchestrator.check_all().await.unwrap();

        assert_eq!(report.evicted, 1);
        assert_eq!(orchestrator.snapshot().upcoming.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_cycle_is_rejected() {
        let provider = Arc::new(ScriptedProvider {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let orchestrator = Arc::new(orchestrator(provider, &["UC1"]));

        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.check_all().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(orchestrator.is_cycle_in_progress());
        assert!(matches!(
            orchestrator.check_channel("UC1").await,
            Err(Error::CycleInProgress)
        ));

        running.await.unwrap().unwrap();
        assert!(!orchestrator.is_cycle_in_progress());
    }

    #[tokio::test]
    async fn test_check_channel_keeps_other_channels() {
        let provider = Arc::new(ScriptedProvider::default());
        provider
            .live
            .lock()
            .insert("UC1".into(), vec![record("l1", "UC1")]);
        provider
            .live
            .lock()
            .insert("UC2".into(), vec![record("l2", "UC2")]);

        let orchestrator = orchestrator(provider.clone(), &["UC1", "UC2"]);
        orchestrator.check_all().await.unwrap();

        provider.live.lock().insert("UC1".into(), Vec::new());
        let (summary, _) = orchestrator.check_channel("UC1").await.unwrap();
        assert_eq!(summary.live, 0);

        let snapshot = orchestrator.snapshot();
        assert!(!snapshot.contains(Lifecycle::Live, "l1"));
        assert!(snapshot.contains(Lifecycle::Live, "l2"));
    }

    #[tokio::test]
    async fn test_update_poll_interval_clamps() {
        let orchestrator = orchestrator(Arc::new(ScriptedProvider::default()), &[]);
        assert_eq!(orchestrator.update_poll_interval(1), Duration::from_secs(5 * 60));
        assert_eq!(orchestrator.update_poll_interval(15), Duration::from_secs(15 * 60));
        assert_eq!(
            orchestrator.update_poll_interval(u64::MAX),
            Duration::from_secs(crate::config::MAX_CHECK_INTERVAL_MINUTES * 60)
        );
        orchestrator.update_poll_interval(15);
        assert_eq!(orchestrator.poll_interval(), Duration::from_secs(15 * 60));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let provider = Arc::new(ScriptedProvider::default());
        let orchestrator = Arc::new(orchestrator(provider.clone(), &["UC1"]));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(orchestrator.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop")
            .unwrap();

        // auto_check defaults to on, so the first cycle ran immediately.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }
}
