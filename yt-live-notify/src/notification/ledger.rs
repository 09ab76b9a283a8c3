//! Durable record of sent notifications.
//!
//! The ledger holds two structures:
//! - notification records keyed by [`NotificationKey`], each with the time it
//!   was sent, expired after a TTL by [`NotificationLedger::sweep`];
//! - the completed seen-set, ids already reported as ended, capped and
//!   trimmed oldest-first by insertion order.
//!
//! Keys being delivered right now are tracked as in-flight so overlapping
//! calls cannot send the same notification twice.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::events::{DeliveryChannel, NotificationKey};
use crate::config::RetentionSettings;
use crate::domain::Lifecycle;
use crate::storage::{KeyValueStore, keys, read_versioned, write_versioned};

/// Persisted notification record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LedgerEntry {
    #[serde(flatten)]
    key: NotificationKey,
    sent_at: DateTime<Utc>,
}

/// Result of a sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_records: usize,
    pub trimmed_seen: usize,
}

#[derive(Debug, Default)]
struct LedgerInner {
    records: HashMap<NotificationKey, DateTime<Utc>>,
    in_flight: HashSet<NotificationKey>,
    seen_order: VecDeque<String>,
    seen: HashSet<String>,
}

pub struct NotificationLedger {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    seen_cap: usize,
    seen_keep: usize,
    inner: Mutex<LedgerInner>,
}

impl NotificationLedger {
    pub fn load(store: Arc<dyn KeyValueStore>, retention: &RetentionSettings) -> Self {
        let entries: Vec<LedgerEntry> = read_versioned(
            store.as_ref(),
            keys::NOTIFICATION_RECORDS,
            migrate_legacy_records,
        )
        .unwrap_or_default();
        let seen_ids: Vec<String> = read_versioned(
            store.as_ref(),
            keys::COMPLETED_STREAM_IDS,
            |legacy| serde_json::from_value(legacy).ok(),
        )
        .unwrap_or_default();

        let mut inner = LedgerInner::default();
        for entry in entries {
            inner.records.insert(entry.key, entry.sent_at);
        }
        for id in seen_ids {
            if inner.seen.insert(id.clone()) {
                inner.seen_order.push_back(id);
            }
        }

        debug!(
            records = inner.records.len(),
            completed = inner.seen.len(),
            "Loaded notification ledger"
        );

        Self {
            store,
            ttl: retention.notification_ttl(),
            seen_cap: retention.seen_set_cap,
            seen_keep: retention.seen_set_keep,
            inner: Mutex::new(inner),
        }
    }

    /// Whether a notification for `key` was already sent.
    pub fn contains(&self, key: &NotificationKey) -> bool {
        self.inner.lock().records.contains_key(key)
    }

    /// Claim `key` for delivery.
    ///
    /// Returns `false` when it was already sent or another caller is
    /// delivering it right now. A successful reservation must be followed by
    /// [`commit`](Self::commit) or [`release`](Self::release).
    pub fn try_reserve(&self, key: &NotificationKey) -> bool {
        let mut inner = self.inner.lock();
        if inner.records.contains_key(key) {
            return false;
        }
        inner.in_flight.insert(key.clone())
    }

    /// Record a successful delivery and persist it.
    pub fn commit(&self, key: NotificationKey, sent_at: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        inner.in_flight.remove(&key);
        inner.records.insert(key, sent_at);
        self.save_records(&inner);
    }

    /// Give up a reservation after a failed delivery.
    pub fn release(&self, key: &NotificationKey) {
        self.inner.lock().in_flight.remove(key);
    }

    /// Add `video_id` to the completed seen-set.
    ///
    /// Returns `false` when it was already present.
    pub fn mark_completed_seen(&self, video_id: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.seen.insert(video_id.to_string()) {
            return false;
        }
        inner.seen_order.push_back(video_id.to_string());
        self.save_seen(&inner);
        true
    }

    pub fn is_completed_seen(&self, video_id: &str) -> bool {
        self.inner.lock().seen.contains(video_id)
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn completed_seen_count(&self) -> usize {
        self.inner.lock().seen.len()
    }

    /// Drop records older than the TTL and trim an oversized seen-set.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut inner = self.inner.lock();
        let mut report = SweepReport::default();

        let before = inner.records.len();
        let ttl = self.ttl;
        inner.records.retain(|_, sent_at| now - *sent_at < ttl);
        report.expired_records = before - inner.records.len();

        if inner.seen_order.len() > self.seen_cap {
            let excess = inner.seen_order.len() - self.seen_keep;
            let dropped: Vec<String> = inner.seen_order.drain(..excess).collect();
            for id in &dropped {
                inner.seen.remove(id);
            }
            report.trimmed_seen = dropped.len();
        }

        if report.expired_records > 0 {
            self.save_records(&inner);
        }
        if report.trimmed_seen > 0 {
            self.save_seen(&inner);
        }
        if report != SweepReport::default() {
            info!(
                expired = report.expired_records,
                trimmed = report.trimmed_seen,
                "Swept notification ledger"
            );
        }
        report
    }

    fn save_records(&self, inner: &LedgerInner) {
        let mut entries: Vec<LedgerEntry> = inner
            .records
            .iter()
            .map(|(key, sent_at)| LedgerEntry {
                key: key.clone(),
                sent_at: *sent_at,
            })
            .collect();
        entries.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.key.cmp(&b.key)));

        if let Err(e) = write_versioned(self.store.as_ref(), keys::NOTIFICATION_RECORDS, &entries) {
            warn!(error = %e, "Failed to persist notification records");
        }
    }

    fn save_seen(&self, inner: &LedgerInner) {
        if let Err(e) = write_versioned(self.store.as_ref(), keys::COMPLETED_STREAM_IDS, &inner.seen_order)
        {
            warn!(error = %e, "Failed to persist completed stream ids");
        }
    }
}

/// Convert the unversioned `{"<id>_<type>": millis, "<id>_discord_<type>": millis}`
/// object into ledger entries. Unparseable keys are skipped.
fn migrate_legacy_records(value: Value) -> Option<Vec<LedgerEntry>> {
    let object = value.as_object()?;
    let mut entries = Vec::with_capacity(object.len());

    for (raw_key, raw_ts) in object {
        let Some((prefix, event)) = raw_key.rsplit_once('_') else {
            continue;
        };
        let Some(event) = Lifecycle::parse(event) else {
            continue;
        };
        let (video_id, channel) = match prefix.strip_suffix("_discord") {
            Some(id) => (id, DeliveryChannel::Webhook),
            None => (prefix, DeliveryChannel::Desktop),
        };
        let Some(sent_at) = raw_ts
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        else {
            continue;
        };
        if video_id.is_empty() {
            continue;
        }

        entries.push(LedgerEntry {
            key: NotificationKey::new(video_id, event, channel),
            sent_at,
        });
    }

    info!(count = entries.len(), "Migrated legacy notification records");
    Some(entries)
}
