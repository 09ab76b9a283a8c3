//! Notification dedup engine.
//!
//! Fans a classified record out to every configured channel. Each channel is
//! deduplicated independently on `(video id, event, delivery channel)`; a key
//! is recorded only after its channel reports a successful delivery.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::channels::NotificationChannel;
use super::events::{DeliveryChannel, NotificationKey};
use super::ledger::{NotificationLedger, SweepReport};
use crate::Error;
use crate::domain::{Lifecycle, VideoRecord};

/// A delivery that failed for one channel.
#[derive(Debug)]
pub struct DeliveryFailure {
    pub video_id: String,
    pub event: Lifecycle,
    pub channel: DeliveryChannel,
    pub error: Error,
}

/// Outcome of one or more notify calls.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Deliveries made and recorded.
    pub sent: usize,
    /// Deliveries skipped because the key was already recorded or in flight.
    pub duplicates: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    pub fn merge(&mut self, other: DeliveryReport) {
        self.sent += other.sent;
        self.duplicates += other.duplicates;
        self.failures.extend(other.failures);
    }
}

pub struct NotificationService {
    ledger: Arc<NotificationLedger>,
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationService {
    pub fn new(ledger: Arc<NotificationLedger>) -> Self {
        Self {
            ledger,
            channels: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn ledger(&self) -> &Arc<NotificationLedger> {
        &self.ledger
    }

    /// Deliver `record` as `event` through every enabled channel that has not
    /// delivered it yet.
    pub async fn notify(&self, record: &VideoRecord, event: Lifecycle) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for channel in &self.channels {
            if !channel.is_enabled(event) {
                trace!(channel = channel.channel_type(), %event, "Channel disabled for event");
                continue;
            }

            let key = NotificationKey::new(&record.id, event, channel.delivery_channel());
            if !self.ledger.try_reserve(&key) {
                debug!(%key, title = %record.title, "Already notified, skipping");
                report.duplicates += 1;
                continue;
            }

            match channel.send(record, event).await {
                Ok(()) => {
                    self.ledger.commit(key, Utc::now());
                    report.sent += 1;
                }
                Err(error) => {
                    self.ledger.release(&key);
                    warn!(
                        %key,
                        channel = channel.channel_type(),
                        error = %error,
                        "Notification delivery failed"
                    );
                    report.failures.push(DeliveryFailure {
                        video_id: record.id.clone(),
                        event,
                        channel: key.channel,
                        error,
                    });
                }
            }
        }

        report
    }

    /// Notify each record in turn. A failure for one record does not stop the
    /// rest of the batch.
    pub async fn notify_new_streams(&self, records: &[VideoRecord], event: Lifecycle) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for record in records {
            report.merge(self.notify(record, event).await);
        }
        report
    }

    /// Notify confirmed live to completed transitions.
    ///
    /// Each id enters the completed seen-set before any delivery is attempted,
    /// so an id already in the set is never reported again.
    pub async fn notify_completed_transitions(&self, records: &[VideoRecord]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for record in records {
            if !self.ledger.mark_completed_seen(&record.id) {
                debug!(video_id = %record.id, "Completion already reported, skipping");
                report.duplicates += 1;
                continue;
            }
            info!(video_id = %record.id, title = %record.title, "Stream ended");
            report.merge(self.notify(record, Lifecycle::Completed).await);
        }
        report
    }

    /// Send `record` through every enabled channel without touching the
    /// ledger. Used to verify channel configuration.
    pub async fn send_test(&self, record: &VideoRecord, event: Lifecycle) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for channel in &self.channels {
            if !channel.is_enabled(event) {
                continue;
            }
            match channel.send(record, event).await {
                Ok(()) => report.sent += 1,
                Err(error) => report.failures.push(DeliveryFailure {
                    video_id: record.id.clone(),
                    event,
                    channel: channel.delivery_channel(),
                    error,
                }),
            }
        }
        report
    }

    pub fn sweep(&self) -> SweepReport {
        self.ledger.sweep(Utc::now())
    }

    /// Sweep now and then every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Ledger sweeper stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        service.sweep();
                    }
                }
            }
        })
    }
}
