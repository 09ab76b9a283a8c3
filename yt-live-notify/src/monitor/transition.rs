//! Live to completed transition detection.
//!
//! The provider never announces that a stream ended. A stream is considered
//! to have just ended when it was live on the channel's previous poll, is no
//! longer live now, and shows up in this poll's completed batch with a start,
//! an end, and an end time inside the confirmation window.
//!
//! An ended id whose completed record has not arrived yet is carried over to
//! later polls until it is confirmed or the window runs out.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};

use crate::domain::VideoRecord;

/// Default confirmation window for completions.
pub const DEFAULT_COMPLETION_WINDOW_HOURS: i64 = 24;

/// Result of comparing one poll against the previous one.
#[derive(Debug, Default)]
pub struct Detection {
    /// Records confirming a live to completed transition.
    pub confirmed: Vec<VideoRecord>,
    /// Ended ids to reconsider on the next poll, with the time they were
    /// first seen ended.
    pub unconfirmed: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TransitionDetector {
    window: Duration,
}

impl Default for TransitionDetector {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_COMPLETION_WINDOW_HOURS))
    }
}

impl TransitionDetector {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Compare this poll's live ids and completed records against the
    /// previous poll.
    ///
    /// `unconfirmed` holds ended ids carried over from earlier polls. An ended
    /// id without a usable completed record stays unconfirmed while it is
    /// inside the window; a completed record that ended outside the window
    /// drops it.
    pub fn detect(
        &self,
        previous_live: &HashSet<String>,
        unconfirmed: &HashMap<String, DateTime<Utc>>,
        current_live: &HashSet<String>,
        completed: &[VideoRecord],
        now: DateTime<Utc>,
    ) -> Detection {
        let ended: HashSet<&String> = previous_live
            .iter()
            .chain(unconfirmed.keys())
            .filter(|id| !current_live.contains(*id))
            .collect();
        if ended.is_empty() {
            return Detection::default();
        }
        debug!(count = ended.len(), "Streams no longer live");

        let by_id: HashMap<&str, &VideoRecord> =
            completed.iter().map(|r| (r.id.as_str(), r)).collect();

        let mut detection = Detection::default();
        for id in ended {
            let record = by_id.get(id.as_str()).copied();
            if let Some(record) = record.filter(|r| self.is_confirmed(r, now)) {
                detection.confirmed.push(record.clone());
                continue;
            }

            let ended_too_long_ago = record
                .and_then(|r| r.actual_end_time)
                .is_some_and(|end| now - end >= self.window);
            let since = unconfirmed.get(id).copied().unwrap_or(now);
            if ended_too_long_ago || now - since >= self.window {
                trace!(video_id = %id, "Dropping unconfirmed ended stream");
                continue;
            }
            detection.unconfirmed.insert(id.clone(), since);
        }

        if !detection.unconfirmed.is_empty() {
            trace!(
                confirmed = detection.confirmed.len(),
                pending = detection.unconfirmed.len(),
                "Some ended streams are not confirmed yet"
            );
        }
        detection
    }

    fn is_confirmed(&self, record: &VideoRecord, now: DateTime<Utc>) -> bool {
        match (record.actual_start_time, record.actual_end_time) {
            (Some(_), Some(end)) => now - end < self.window,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn detect(
        detector: &TransitionDetector,
        previous: &[&str],
        current: &[&str],
        completed: &[VideoRecord],
        now: DateTime<Utc>,
    ) -> Vec<VideoRecord> {
        detector
            .detect(&ids(previous), &HashMap::new(), &ids(current), completed, now)
            .confirmed
    }

    fn ended(id: &str, end: DateTime<Utc>) -> VideoRecord {
        let mut record = VideoRecord::new(id, "ended");
        record.actual_start_time = Some(end - Duration::hours(1));
        record.actual_end_time = Some(end);
        record
    }

    #[test]
    fn test_recent_end_is_confirmed() {
        let now = Utc::now();
        let detector = TransitionDetector::default();

        let confirmed = detect(
            &detector,
            &["A", "B"],
            &["B"],
            &[ended("A", now - Duration::minutes(5))],
            now,
        );
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].id, "A");
    }

    #[test]
    fn test_stale_end_is_rejected() {
        let now = Utc::now();
        let detector = TransitionDetector::default();

        let confirmed = detect(
            &detector,
            &["A", "B"],
            &["B"],
            &[ended("A", now - Duration::hours(48))],
            now,
        );
        assert!(confirmed.is_empty());
    }

    #[test]
    fn test_missing_from_completed_is_kept_for_later() {
        let now = Utc::now();
        let detector = TransitionDetector::default();

        let detection = detector.detect(&ids(&["A"]), &HashMap::new(), &ids(&[]), &[], now);
        assert!(detection.confirmed.is_empty());
        assert_eq!(detection.unconfirmed.get("A"), Some(&now));
    }

    #[test]
    fn test_requires_start_time() {
        let now = Utc::now();
        let detector = TransitionDetector::default();
        let mut record = ended("A", now - Duration::minutes(5));
        record.actual_start_time = None;

        assert!(detect(&detector, &["A"], &[], &[record], now).is_empty());
    }

    #[test]
    fn test_still_live_is_not_a_transition() {
        let now = Utc::now();
        let detector = TransitionDetector::default();

        let confirmed = detect(
            &detector,
            &["A"],
            &["A"],
            &[ended("A", now - Duration::minutes(5))],
            now,
        );
        assert!(confirmed.is_empty());
    }

    #[test]
    fn test_completed_never_seen_live_is_ignored() {
        let now = Utc::now();
        let detector = TransitionDetector::default();

        let confirmed = detect(
            &detector,
            &[],
            &[],
            &[ended("old", now - Duration::minutes(5))],
            now,
        );
        assert!(confirmed.is_empty());
    }

    #[test]
    fn test_unconfirmed_end_is_confirmed_on_a_later_poll() {
        let now = Utc::now();
        let detector = TransitionDetector::default();

        let first = detector.detect(&ids(&["A"]), &HashMap::new(), &ids(&[]), &[], now);
        assert!(first.confirmed.is_empty());

        let later = now + Duration::minutes(5);
        let second = detector.detect(
            &ids(&[]),
            &first.unconfirmed,
            &ids(&[]),
            &[ended("A", now)],
            later,
        );
        assert_eq!(second.confirmed.len(), 1);
        assert_eq!(second.confirmed[0].id, "A");
        assert!(second.unconfirmed.is_empty());
    }

    #[test]
    fn test_unconfirmed_expires_after_window() {
        let now = Utc::now();
        let detector = TransitionDetector::default();
        let since = now - Duration::hours(25);

        let detection = detector.detect(
            &ids(&[]),
            &HashMap::from([("A".to_string(), since)]),
            &ids(&[]),
            &[],
            now,
        );
        assert!(detection.unconfirmed.is_empty());
    }

    #[test]
    fn test_unconfirmed_keeps_first_seen_time() {
        let now = Utc::now();
        let detector = TransitionDetector::default();
        let since = now - Duration::hours(2);

        let detection = detector.detect(
            &ids(&[]),
            &HashMap::from([("A".to_string(), since)]),
            &ids(&[]),
            &[],
            now,
        );
        assert_eq!(detection.unconfirmed.get("A"), Some(&since));
    }

    #[test]
    fn test_live_again_clears_unconfirmed() {
        let now = Utc::now();
        let detector = TransitionDetector::default();

        let detection = detector.detect(
            &ids(&[]),
            &HashMap::from([("A".to_string(), now)]),
            &ids(&["A"]),
            &[],
            now,
        );
        assert!(detection.confirmed.is_empty());
        assert!(detection.unconfirmed.is_empty());
    }

    #[test]
    fn test_stale_end_drops_unconfirmed() {
        let now = Utc::now();
        let detector = TransitionDetector::default();

        let detection = detector.detect(
            &ids(&["A"]),
            &HashMap::new(),
            &ids(&[]),
            &[ended("A", now - Duration::hours(48))],
            now,
        );
        assert!(detection.confirmed.is_empty());
        assert!(detection.unconfirmed.is_empty());
    }
}
