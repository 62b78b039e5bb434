use super::{Storage, encode, keys};
use crate::error::StoreResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// Retained history per category; older snapshots are dropped first.
pub const MAX_SNAPSHOTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Clan,
    Player,
    War,
    Capital,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Clan,
        Category::Player,
        Category::War,
        Category::Capital,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Clan => "clan",
            Category::Player => "player",
            Category::War => "war",
            Category::Capital => "capital",
        }
    }

    pub fn storage_key(self) -> &'static str {
        match self {
            Category::Clan => keys::CLAN_SNAPSHOTS,
            Category::Player => keys::PLAYER_SNAPSHOTS,
            Category::War => keys::WAR_SNAPSHOTS,
            Category::Capital => keys::CAPITAL_SNAPSHOTS,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "clan" => Ok(Category::Clan),
            "player" => Ok(Category::Player),
            "war" => Ok(Category::War),
            "capital" => Ok(Category::Capital),
            other => Err(format!(
                "Unknown category: {other}. Expected one of clan|player|war|capital"
            )),
        }
    }
}

/// Timestamped copy of fetched data. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub data: Value,
}

impl Storage {
    pub fn append(&mut self, category: Category, data: Value) -> StoreResult<Snapshot> {
        self.append_at(category, data, Utc::now().timestamp_millis())
    }

    /// Appends with an explicit timestamp and records it as the settings'
    /// `lastSnapshotTime`. Both records are written in one transaction.
    pub fn append_at(
        &mut self,
        category: Category,
        data: Value,
        timestamp: i64,
    ) -> StoreResult<Snapshot> {
        let snapshot = Snapshot { timestamp, data };

        let mut snapshots = self.load_all(category);
        snapshots.push(snapshot.clone());
        if snapshots.len() > MAX_SNAPSHOTS {
            let overflow = snapshots.len() - MAX_SNAPSHOTS;
            snapshots.drain(..overflow);
        }

        let mut settings = self.get_settings();
        settings.last_snapshot_time = Some(timestamp);

        let key = category.storage_key();
        let entries = [
            (key, encode(key, &snapshots)?),
            (keys::SETTINGS, encode(keys::SETTINGS, &settings)?),
        ];
        self.db.put_all(&entries)?;

        info!(
            category = %category,
            retained = snapshots.len(),
            timestamp,
            "snapshot saved"
        );

        Ok(snapshot)
    }

    /// Retained history, oldest first. Absent history is an empty sequence.
    pub fn try_load_all(&self, category: Category) -> StoreResult<Vec<Snapshot>> {
        Ok(self
            .read_json::<Vec<Snapshot>>(category.storage_key())?
            .unwrap_or_default())
    }

    pub fn load_all(&self, category: Category) -> Vec<Snapshot> {
        self.try_load_all(category).unwrap_or_else(|error| {
            warn!(category = %category, error = %error, "failed to load snapshots");
            Vec::new()
        })
    }

    pub fn latest(&self, category: Category) -> Option<Snapshot> {
        self.load_all(category).pop()
    }

    /// Snapshots with `start <= timestamp <= end`, in stored order.
    pub fn by_time_range(&self, category: Category, start: i64, end: i64) -> Vec<Snapshot> {
        self.load_all(category)
            .into_iter()
            .filter(|snapshot| snapshot.timestamp >= start && snapshot.timestamp <= end)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, MAX_SNAPSHOTS};
    use crate::db::Database;
    use crate::error::StoreError;
    use crate::storage::{Storage, keys, test_storage};
    use serde_json::json;

    #[test]
    fn retention_keeps_the_most_recent_hundred_in_order() {
        let mut storage = test_storage();

        (0..130).for_each(|index| {
            storage
                .append_at(Category::War, json!({ "n": index }), 1_000 + index)
                .expect("append");
        });

        let history = storage.load_all(Category::War);
        assert_eq!(history.len(), MAX_SNAPSHOTS);
        assert_eq!(history.first().map(|s| s.timestamp), Some(1_030));
        assert_eq!(history.last().map(|s| s.timestamp), Some(1_129));
        assert!(history.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));
    }

    #[test]
    fn categories_are_independent() {
        let mut storage = test_storage();
        storage.append_at(Category::Clan, json!({"tag": "#A"}), 1).expect("clan");
        storage.append_at(Category::Player, json!({"tag": "#P"}), 2).expect("player");

        assert_eq!(storage.load_all(Category::Clan).len(), 1);
        assert_eq!(storage.load_all(Category::Player).len(), 1);
        assert!(storage.load_all(Category::Capital).is_empty());
        assert_eq!(storage.latest(Category::War), None);
    }

    #[test]
    fn append_records_last_snapshot_time() {
        let mut storage = test_storage();
        assert_eq!(storage.get_settings().last_snapshot_time, None);

        storage.append_at(Category::Clan, json!({}), 42).expect("append");

        assert_eq!(storage.get_settings().last_snapshot_time, Some(42));
    }

    #[test]
    fn out_of_order_and_tied_timestamps_are_kept_in_insertion_order() {
        let mut storage = test_storage();
        storage.append_at(Category::Clan, json!({"n": 1}), 50).expect("append");
        storage.append_at(Category::Clan, json!({"n": 2}), 10).expect("append");
        storage.append_at(Category::Clan, json!({"n": 3}), 10).expect("append");

        let order = storage
            .load_all(Category::Clan)
            .iter()
            .map(|snapshot| snapshot.data["n"].as_i64().unwrap_or_default())
            .collect::<Vec<_>>();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(storage.latest(Category::Clan).map(|s| s.timestamp), Some(10));
    }

    #[test]
    fn time_range_is_inclusive() {
        let mut storage = test_storage();
        [100, 200, 300, 400].into_iter().for_each(|timestamp| {
            storage
                .append_at(Category::Capital, json!({}), timestamp)
                .expect("append");
        });

        let stamps = storage
            .by_time_range(Category::Capital, 200, 300)
            .iter()
            .map(|snapshot| snapshot.timestamp)
            .collect::<Vec<_>>();
        assert_eq!(stamps, vec![200, 300]);
    }

    #[test]
    fn corrupt_history_reads_as_empty_and_is_replaced_on_append() {
        let mut storage = test_storage();
        storage.db.put(keys::CLAN_SNAPSHOTS, "[{\"timestamp\":").expect("seed");

        assert!(storage.try_load_all(Category::Clan).expect_err("corrupt").is_corrupt());
        assert!(storage.load_all(Category::Clan).is_empty());

        storage.append_at(Category::Clan, json!({}), 7).expect("append");
        assert_eq!(storage.load_all(Category::Clan).len(), 1);
    }

    #[test]
    fn quota_failure_is_reported_and_leaves_state_untouched() {
        let mut storage = Storage::new(Database::open_in_memory(256).expect("db"));
        storage.append_at(Category::Clan, json!({"n": 1}), 1).expect("fits");

        let error = storage
            .append_at(Category::Clan, json!({ "blob": "x".repeat(512) }), 2)
            .expect_err("quota");

        assert!(matches!(error, StoreError::QuotaExceeded { .. }));
        assert_eq!(storage.load_all(Category::Clan).len(), 1);
        assert_eq!(storage.get_settings().last_snapshot_time, Some(1));
    }

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("Capital".parse::<Category>(), Ok(Category::Capital));
        assert!("raid".parse::<Category>().is_err());
    }
}
