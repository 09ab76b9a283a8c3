//! Accumulated stream collections.
//!
//! The store owns the upcoming, live and completed buckets plus the per-channel
//! live ids seen on the previous poll and the ended ids still waiting for a
//! completed record. All mutation goes through
//! [`StreamStateStore::merge_in`], [`StreamStateStore::evict_to_capacity`] and
//! [`StreamStateStore::reset`]; readers get cloned snapshots.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Lifecycle, VideoRecord};
use crate::storage::{KeyValueStore, keys, read_versioned, write_versioned};

/// The three lifecycle buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamCollections {
    #[serde(default)]
    pub upcoming: Vec<VideoRecord>,
    #[serde(default)]
    pub live: Vec<VideoRecord>,
    #[serde(default)]
    pub completed: Vec<VideoRecord>,
}

impl StreamCollections {
    pub fn bucket(&self, bucket: Lifecycle) -> &[VideoRecord] {
        match bucket {
            Lifecycle::Upcoming => &self.upcoming,
            Lifecycle::Live => &self.live,
            Lifecycle::Completed => &self.completed,
        }
    }

    fn bucket_mut(&mut self, bucket: Lifecycle) -> &mut Vec<VideoRecord> {
        match bucket {
            Lifecycle::Upcoming => &mut self.upcoming,
            Lifecycle::Live => &mut self.live,
            Lifecycle::Completed => &mut self.completed,
        }
    }

    pub fn len(&self) -> usize {
        self.upcoming.len() + self.live.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, bucket: Lifecycle, id: &str) -> bool {
        self.bucket(bucket).iter().any(|r| r.id == id)
    }
}

/// On-disk shape of the store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(flatten)]
    collections: StreamCollections,
    #[serde(default)]
    previous_live: BTreeMap<String, BTreeSet<String>>,
    /// Ended ids not yet confirmed, with the poll that first saw them end.
    #[serde(default)]
    unconfirmed_ended: BTreeMap<String, BTreeMap<String, DateTime<Utc>>>,
}

#[derive(Debug, Default)]
struct StateInner {
    collections: StreamCollections,
    previous_live: HashMap<String, HashSet<String>>,
    unconfirmed_ended: HashMap<String, HashMap<String, DateTime<Utc>>>,
}

impl StateInner {
    fn to_persisted(&self) -> PersistedState {
        PersistedState {
            collections: self.collections.clone(),
            previous_live: self
                .previous_live
                .iter()
                .map(|(channel, ids)| (channel.clone(), ids.iter().cloned().collect()))
                .collect(),
            unconfirmed_ended: self
                .unconfirmed_ended
                .iter()
                .filter(|(_, ids)| !ids.is_empty())
                .map(|(channel, ids)| {
                    let ids = ids.iter().map(|(id, since)| (id.clone(), *since)).collect();
                    (channel.clone(), ids)
                })
                .collect(),
        }
    }
}

/// Owner of the accumulated stream collections.
pub struct StreamStateStore {
    store: Arc<dyn KeyValueStore>,
    inner: RwLock<StateInner>,
}

impl StreamStateStore {
    /// Load persisted state, starting empty when none is usable.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let persisted: PersistedState =
            read_versioned(store.as_ref(), keys::STREAM_STATE, |_| None).unwrap_or_default();

        let inner = StateInner {
            collections: persisted.collections,
            previous_live: persisted
                .previous_live
                .into_iter()
                .map(|(channel, ids)| (channel, ids.into_iter().collect()))
                .collect(),
            unconfirmed_ended: persisted
                .unconfirmed_ended
                .into_iter()
                .map(|(channel, ids)| (channel, ids.into_iter().collect()))
                .collect(),
        };
        debug!(
            records = inner.collections.len(),
            channels = inner.previous_live.len(),
            "Loaded stream state"
        );

        Self {
            store,
            inner: RwLock::new(inner),
        }
    }

    /// Merge `records` into `bucket`.
    ///
    /// Exactly one record per id survives. A record whose id is already
    /// present replaces the stored one in place (last fetch wins), new ids are
    /// appended in batch order. Merging the same batch twice is a no-op the
    /// second time. Returns the number of ids that were not present before.
    pub fn merge_in(&self, bucket: Lifecycle, records: Vec<VideoRecord>) -> usize {
        let mut inner = self.inner.write();
        let added = merge_records(inner.collections.bucket_mut(bucket), records);
        self.save(&inner);
        added
    }

    /// Drop the oldest records of `bucket` until at most `max_size` remain.
    ///
    /// Records are ordered by the bucket's retention timestamp; records with
    /// no timestamp at all are considered oldest. Returns the number evicted.
    pub fn evict_to_capacity(&self, bucket: Lifecycle, max_size: usize) -> usize {
        let mut inner = self.inner.write();
        let records = inner.collections.bucket_mut(bucket);
        if records.len() <= max_size {
            return 0;
        }

        records.sort_by_key(|r| r.retention_timestamp(bucket));
        let evicted = records.len() - max_size;
        records.drain(..evicted);

        debug!(bucket = %bucket, evicted, kept = max_size, "Evicted old records");
        self.save(&inner);
        evicted
    }

    /// Clear all three buckets. Per-channel previous-live ids are kept so
    /// transition detection still works across the reset.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.collections = StreamCollections::default();
        self.save(&inner);
    }

    /// Remove live records of `channel_id` that are not in `current_ids`.
    pub fn drop_stale_live(&self, channel_id: &str, current_ids: &HashSet<String>) -> usize {
        let mut inner = self.inner.write();
        let live = &mut inner.collections.live;
        let before = live.len();
        live.retain(|r| r.channel_id != channel_id || current_ids.contains(&r.id));
        let removed = before - live.len();
        if removed > 0 {
            self.save(&inner);
        }
        removed
    }

    /// Live ids observed for `channel_id` on its previous poll.
    pub fn previous_live(&self, channel_id: &str) -> HashSet<String> {
        self.inner
            .read()
            .previous_live
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Remember the live ids of this poll for the next comparison.
    pub fn record_live(&self, channel_id: &str, ids: HashSet<String>) {
        let mut inner = self.inner.write();
        inner.previous_live.insert(channel_id.to_string(), ids);
        self.save(&inner);
    }

    /// Ended ids of `channel_id` still waiting for confirmation, keyed to the
    /// time they were first seen ended.
    pub fn unconfirmed_ended(&self, channel_id: &str) -> HashMap<String, DateTime<Utc>> {
        self.inner
            .read()
            .unconfirmed_ended
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace the unconfirmed ended ids of `channel_id`.
    pub fn record_unconfirmed_ended(&self, channel_id: &str, ids: HashMap<String, DateTime<Utc>>) {
        let mut inner = self.inner.write();
        if ids.is_empty() {
            if inner.unconfirmed_ended.remove(channel_id).is_none() {
                return;
            }
        } else {
            inner.unconfirmed_ended.insert(channel_id.to_string(), ids);
        }
        self.save(&inner);
    }

    /// Forget everything tracked for an unsubscribed channel.
    pub fn forget_channel(&self, channel_id: &str) {
        let mut inner = self.inner.write();
        inner.previous_live.remove(channel_id);
        inner.unconfirmed_ended.remove(channel_id);
        for bucket in Lifecycle::ALL {
            inner
                .collections
                .bucket_mut(bucket)
                .retain(|r| r.channel_id != channel_id);
        }
        self.save(&inner);
    }

    pub fn snapshot(&self) -> StreamCollections {
        self.inner.read().collections.clone()
    }

    fn save(&self, inner: &StateInner) {
        if let Err(e) = write_versioned(self.store.as_ref(), keys::STREAM_STATE, &inner.to_persisted())
        {
            warn!(error = %e, "Failed to persist stream state");
        }
    }
}

fn merge_records(existing: &mut Vec<VideoRecord>, incoming: Vec<VideoRecord>) -> usize {
    let mut index: HashMap<String, usize> = existing
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();

    let mut added = 0;
    for record in incoming {
        match index.get(&record.id) {
            Some(&i) => existing[i] = record,
            None => {
                index.insert(record.id.clone(), existing.len());
                existing.push(record);
                added += 1;
            }
        }
    }
    added
}
