//! Persisted state: per-category snapshot logs, the settings record, the
//! current clan data, the activity history log and bundle export/import.
//!
//! Every record lives under one key of the [`Database`] as a whole JSON
//! document. Readers come in two flavours: `try_*` returns [`StoreResult`] so
//! corruption stays observable, the plain variant degrades to the documented
//! default and logs.

pub mod history;
pub mod settings;
pub mod snapshot;
pub mod transfer;

use crate::config::Config;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub use settings::{Settings, SettingsPatch};
pub use snapshot::{Category, Snapshot};

pub mod keys {
    pub const SETTINGS: &str = "coc_settings";
    pub const CLAN_DATA: &str = "coc_clan_data";
    pub const CLAN_SNAPSHOTS: &str = "coc_clan_snapshots";
    pub const PLAYER_SNAPSHOTS: &str = "coc_player_snapshots";
    pub const WAR_SNAPSHOTS: &str = "coc_war_snapshots";
    pub const CAPITAL_SNAPSHOTS: &str = "coc_capital_snapshots";
    pub const ACTIVITY_HISTORY: &str = "coc_activity_history";

    pub const ALL: [&str; 7] = [
        SETTINGS,
        CLAN_DATA,
        CLAN_SNAPSHOTS,
        PLAYER_SNAPSHOTS,
        WAR_SNAPSHOTS,
        CAPITAL_SNAPSHOTS,
        ACTIVITY_HISTORY,
    ];
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub total_bytes: u64,
    pub sizes: BTreeMap<String, u64>,
    pub limit_bytes: u64,
    pub percent_used: f64,
}

pub struct Storage {
    db: Database,
}

impl Storage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(config: &Config) -> Result<Self> {
        let db = Database::open(&config.db_path, config.storage_quota_bytes)?;
        Ok(Self::new(db))
    }

    pub fn try_clan_data(&self) -> StoreResult<Option<Value>> {
        self.read_json(keys::CLAN_DATA)
    }

    /// Current clan data, the roster source for inactivity checks.
    pub fn clan_data(&self) -> Option<Value> {
        self.try_clan_data().unwrap_or_else(|error| {
            warn!(error = %error, "failed to load clan data");
            None
        })
    }

    pub fn save_clan_data(&mut self, clan: &Value) -> StoreResult<()> {
        let encoded = encode(keys::CLAN_DATA, clan)?;
        self.db.put(keys::CLAN_DATA, &encoded)
    }

    /// Deletes every key this program owns.
    pub fn clear_all(&mut self) -> StoreResult<()> {
        self.db.remove_all(&keys::ALL)?;
        info!("all stored data cleared");
        Ok(())
    }

    pub fn usage(&self) -> StoreResult<StorageUsage> {
        let stored = self.db.value_sizes()?.into_iter().collect::<BTreeMap<_, _>>();

        let sizes = keys::ALL
            .iter()
            .map(|key| (key.to_string(), stored.get(*key).copied().unwrap_or(0)))
            .collect::<BTreeMap<_, _>>();
        let total_bytes = sizes.values().sum::<u64>();
        let limit_bytes = self.db.quota_bytes();
        let percent_used = if limit_bytes == 0 {
            0.0
        } else {
            total_bytes as f64 / limit_bytes as f64 * 100.0
        };

        Ok(StorageUsage {
            total_bytes,
            sizes,
            limit_bytes,
            percent_used,
        })
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        self.db
            .get(key)?
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|source| StoreError::Serialize {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
pub(crate) fn test_storage() -> Storage {
    Storage::new(Database::open_in_memory(crate::config::DEFAULT_STORAGE_QUOTA_BYTES).expect("db"))
}

#[cfg(test)]
mod tests {
    use super::{keys, test_storage};
    use serde_json::json;

    #[test]
    fn corrupt_clan_data_is_an_error_but_reads_as_absent() {
        let mut storage = test_storage();
        storage.db.put(keys::CLAN_DATA, "{not json").expect("seed");

        assert!(storage.try_clan_data().expect_err("corrupt").is_corrupt());
        assert_eq!(storage.clan_data(), None);
    }

    #[test]
    fn clear_all_removes_owned_keys_only() {
        let mut storage = test_storage();
        storage.save_clan_data(&json!({"tag": "#ABC"})).expect("save");
        storage.db.put("foreign", "1").expect("seed");

        storage.clear_all().expect("clear");

        assert_eq!(storage.clan_data(), None);
        assert_eq!(storage.db.get("foreign").expect("read").as_deref(), Some("1"));
    }

    #[test]
    fn usage_reports_every_owned_key() {
        let mut storage = test_storage();
        storage.save_clan_data(&json!({"tag": "#ABC"})).expect("save");

        let usage = storage.usage().expect("usage");

        assert_eq!(usage.sizes.len(), keys::ALL.len());
        assert_eq!(usage.sizes[keys::CLAN_DATA], r##"{"tag":"#ABC"}"##.len() as u64);
        assert_eq!(usage.total_bytes, usage.sizes[keys::CLAN_DATA]);
        assert!(usage.percent_used > 0.0);
    }
}
