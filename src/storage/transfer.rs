use super::history::ActivityHistory;
use super::{Category, Settings, Snapshot, Storage, encode, keys};
use crate::error::{StoreError, StoreResult};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

pub const EXPORT_VERSION: &str = "1.0";

/// Portable document holding every persisted record.
///
/// On import each present field replaces its key wholesale; absent (or null)
/// fields leave the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportBundle {
    pub settings: Option<Settings>,
    pub clan_data: Option<Value>,
    pub clan_snapshots: Option<Vec<Snapshot>>,
    pub player_snapshots: Option<Vec<Snapshot>>,
    pub war_snapshots: Option<Vec<Snapshot>>,
    pub capital_snapshots: Option<Vec<Snapshot>>,
    pub activity_history: Option<ActivityHistory>,
    pub export_date: Option<String>,
    pub version: Option<String>,
}

impl ExportBundle {
    fn snapshots(&self, category: Category) -> Option<&Vec<Snapshot>> {
        match category {
            Category::Clan => self.clan_snapshots.as_ref(),
            Category::Player => self.player_snapshots.as_ref(),
            Category::War => self.war_snapshots.as_ref(),
            Category::Capital => self.capital_snapshots.as_ref(),
        }
    }
}

impl Storage {
    pub fn export_all(&self) -> ExportBundle {
        ExportBundle {
            settings: Some(self.get_settings()),
            clan_data: self.clan_data(),
            clan_snapshots: Some(self.load_all(Category::Clan)),
            player_snapshots: Some(self.load_all(Category::Player)),
            war_snapshots: Some(self.load_all(Category::War)),
            capital_snapshots: Some(self.load_all(Category::Capital)),
            activity_history: Some(self.all_activity_history()),
            export_date: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            version: Some(EXPORT_VERSION.to_string()),
        }
    }

    pub fn export_json(&self) -> StoreResult<String> {
        serde_json::to_string_pretty(&self.export_all()).map_err(|source| StoreError::Serialize {
            key: "export bundle".to_string(),
            source,
        })
    }

    pub fn import_all(&mut self, bundle: &ExportBundle) -> StoreResult<usize> {
        let mut entries = Vec::new();

        if let Some(settings) = &bundle.settings {
            entries.push((keys::SETTINGS, encode(keys::SETTINGS, settings)?));
        }
        if let Some(clan) = &bundle.clan_data {
            entries.push((keys::CLAN_DATA, encode(keys::CLAN_DATA, clan)?));
        }
        for category in Category::ALL {
            if let Some(snapshots) = bundle.snapshots(category) {
                let key = category.storage_key();
                entries.push((key, encode(key, snapshots)?));
            }
        }
        if let Some(history) = &bundle.activity_history {
            entries.push((keys::ACTIVITY_HISTORY, encode(keys::ACTIVITY_HISTORY, history)?));
        }

        self.db.put_all(&entries)?;

        info!(
            records = entries.len(),
            version = bundle.version.as_deref().unwrap_or("unknown"),
            "bundle imported"
        );

        Ok(entries.len())
    }

    pub fn import_json(&mut self, raw: &str) -> StoreResult<usize> {
        let bundle: ExportBundle = serde_json::from_str(raw).map_err(StoreError::InvalidBundle)?;
        self.import_all(&bundle)
    }
}
