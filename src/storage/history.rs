use super::{Storage, encode, keys};
use crate::activity::ActivityResult;
use crate::error::StoreResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Entries older than this are dropped whenever a member's log is written.
pub const HISTORY_RETENTION_DAYS: i64 = 30;
const DAY_MS: i64 = 86_400_000;

pub type ActivityHistory = BTreeMap<String, Vec<ActivityHistoryEntry>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityHistoryEntry {
    pub timestamp: i64,
    #[serde(flatten)]
    pub activity: ActivityResult,
}

impl Storage {
    pub fn save_activity_history(&mut self, member_tag: &str, activity: &ActivityResult) -> StoreResult<()> {
        self.save_activity_history_at(member_tag, activity, Utc::now().timestamp_millis())
    }

    pub fn save_activity_history_at(
        &mut self,
        member_tag: &str,
        activity: &ActivityResult,
        now: i64,
    ) -> StoreResult<()> {
        let cutoff = now - HISTORY_RETENTION_DAYS * DAY_MS;
        let mut all = self.all_activity_history();

        let entries = all.entry(member_tag.to_string()).or_default();
        entries.push(ActivityHistoryEntry {
            timestamp: now,
            activity: activity.clone(),
        });
        entries.retain(|entry| entry.timestamp >= cutoff);

        let encoded = encode(keys::ACTIVITY_HISTORY, &all)?;
        self.db.put(keys::ACTIVITY_HISTORY, &encoded)
    }

    pub fn try_all_activity_history(&self) -> StoreResult<ActivityHistory> {
        Ok(self
            .read_json::<ActivityHistory>(keys::ACTIVITY_HISTORY)?
            .unwrap_or_default())
    }

    pub fn all_activity_history(&self) -> ActivityHistory {
        self.try_all_activity_history().unwrap_or_else(|error| {
            warn!(error = %error, "failed to load activity history");
            ActivityHistory::new()
        })
    }

    pub fn activity_history(&self, member_tag: &str) -> Vec<ActivityHistoryEntry> {
        self.all_activity_history()
            .remove(member_tag)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::DAY_MS;
    use crate::activity::ActivityResult;
    use crate::storage::test_storage;

    fn sample(score: i64) -> ActivityResult {
        ActivityResult {
            score,
            trophy_change: score,
            donations_change: 0,
            last_seen: Some(1),
            is_active: score != 0,
            window_days: 7,
        }
    }

    #[test]
    fn entries_older_than_thirty_days_are_dropped() {
        let mut storage = test_storage();
        let now = 100 * DAY_MS;

        storage
            .save_activity_history_at("#A", &sample(1), now - 31 * DAY_MS)
            .expect("old");
        storage
            .save_activity_history_at("#A", &sample(2), now - 2 * DAY_MS)
            .expect("recent");
        storage.save_activity_history_at("#A", &sample(3), now).expect("now");

        let scores = storage
            .activity_history("#A")
            .iter()
            .map(|entry| entry.activity.score)
            .collect::<Vec<_>>();
        assert_eq!(scores, vec![2, 3]);
    }

    #[test]
    fn members_have_separate_logs() {
        let mut storage = test_storage();
        storage.save_activity_history_at("#A", &sample(1), 10).expect("a");
        storage.save_activity_history_at("#B", &sample(0), 10).expect("b");

        assert_eq!(storage.all_activity_history().len(), 2);
        assert_eq!(storage.activity_history("#B").len(), 1);
        assert!(storage.activity_history("#C").is_empty());
    }
}
