use super::{Storage, encode, keys};
use crate::error::StoreResult;
use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

pub const DEFAULT_SNAPSHOT_INTERVAL_MINUTES: u32 = 60;
pub const DEFAULT_INACTIVITY_THRESHOLD_DAYS: u32 = 5;

/// Persisted user settings.
///
/// Fields missing from a stored record take their default, so records
/// written before a field existed still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub default_clan_tag: String,
    #[serde(alias = "snapshotInterval")]
    pub snapshot_interval_minutes: u32,
    #[serde(alias = "inactivityThreshold")]
    pub inactivity_threshold_days: u32,
    pub dark_mode: bool,
    pub last_snapshot_time: Option<i64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_clan_tag: String::new(),
            snapshot_interval_minutes: DEFAULT_SNAPSHOT_INTERVAL_MINUTES,
            inactivity_threshold_days: DEFAULT_INACTIVITY_THRESHOLD_DAYS,
            dark_mode: true,
            last_snapshot_time: None,
        }
    }
}

/// Fields a client may change. `lastSnapshotTime` is owned by `append` and
/// has no slot here.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsPatch {
    pub default_clan_tag: Option<String>,
    #[serde(alias = "snapshotInterval")]
    pub snapshot_interval_minutes: Option<u32>,
    #[serde(alias = "inactivityThreshold")]
    pub inactivity_threshold_days: Option<u32>,
    pub dark_mode: Option<bool>,
}

impl Settings {
    /// Validates the whole patch before touching any field.
    pub fn apply(&mut self, patch: &SettingsPatch) -> Result<()> {
        let mut next = self.clone();

        if let Some(tag) = &patch.default_clan_tag {
            next.set_value("default_clan_tag", tag)?;
        }
        if let Some(minutes) = patch.snapshot_interval_minutes {
            next.set_value("snapshot_interval_minutes", &minutes.to_string())?;
        }
        if let Some(days) = patch.inactivity_threshold_days {
            next.inactivity_threshold_days = days;
        }
        if let Some(dark_mode) = patch.dark_mode {
            next.dark_mode = dark_mode;
        }

        *self = next;
        Ok(())
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match normalize_settings_key(key) {
            "default_clan_tag" => {
                let trimmed = value.trim();
                if !trimmed.is_empty() && !crate::coc::is_valid_tag(trimmed) {
                    bail!("Invalid clan tag: {value}");
                }
                self.default_clan_tag = if trimmed.is_empty() {
                    String::new()
                } else {
                    crate::coc::normalize_tag(trimmed)
                };
            }
            "snapshot_interval_minutes" => {
                let minutes = value
                    .parse::<u32>()
                    .map_err(|_| anyhow!("snapshot_interval_minutes must be a number"))?;
                if minutes == 0 {
                    bail!("snapshot_interval_minutes must be at least 1");
                }
                self.snapshot_interval_minutes = minutes;
            }
            "inactivity_threshold_days" => {
                self.inactivity_threshold_days = value
                    .parse::<u32>()
                    .map_err(|_| anyhow!("inactivity_threshold_days must be a number"))?;
            }
            "dark_mode" => {
                self.dark_mode = value
                    .parse::<bool>()
                    .map_err(|_| anyhow!("dark_mode must be true/false"))?;
            }
            _ => {
                bail!(
                    "Unsupported settings key: {key}. Supported keys: default_clan_tag|clan.tag, snapshot_interval_minutes|snapshot.interval, inactivity_threshold_days|inactivity.days, dark_mode|theme.dark"
                );
            }
        }

        Ok(())
    }
}

fn normalize_settings_key(key: &str) -> &str {
    match key {
        "default_clan_tag" | "clan.tag" | "defaultClanTag" => "default_clan_tag",
        "snapshot_interval_minutes" | "snapshot.interval" | "snapshotIntervalMinutes" => {
            "snapshot_interval_minutes"
        }
        "inactivity_threshold_days" | "inactivity.days" | "inactivityThresholdDays" => {
            "inactivity_threshold_days"
        }
        "dark_mode" | "theme.dark" | "darkMode" => "dark_mode",
        _ => key,
    }
}

impl Storage {
    pub fn try_get_settings(&self) -> StoreResult<Settings> {
        Ok(self.read_json::<Settings>(keys::SETTINGS)?.unwrap_or_default())
    }

    /// Stored settings merged over the defaults; unreadable records yield the defaults.
    pub fn get_settings(&self) -> Settings {
        self.try_get_settings().unwrap_or_else(|error| {
            warn!(error = %error, "failed to load settings, using defaults");
            Settings::default()
        })
    }

    pub fn save_settings(&mut self, settings: &Settings) -> StoreResult<()> {
        let encoded = encode(keys::SETTINGS, settings)?;
        self.db.put(keys::SETTINGS, &encoded).inspect_err(|cause| {
            error!(error = %cause, "failed to save settings");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Settings, SettingsPatch};
    use crate::storage::{keys, test_storage};

    #[test]
    fn first_read_yields_defaults() {
        let storage = test_storage();
        let settings = storage.get_settings();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.snapshot_interval_minutes, 60);
        assert_eq!(settings.inactivity_threshold_days, 5);
        assert!(settings.dark_mode);
    }

    #[test]
    fn older_records_are_merged_with_defaults() {
        let mut storage = test_storage();
        storage
            .db
            .put(keys::SETTINGS, r##"{"defaultClanTag":"#2PP","snapshotInterval":15}"##)
            .expect("seed");

        let settings = storage.get_settings();

        assert_eq!(settings.default_clan_tag, "#2PP");
        assert_eq!(settings.snapshot_interval_minutes, 15);
        assert_eq!(settings.inactivity_threshold_days, 5);
        assert!(settings.dark_mode);
    }

    #[test]
    fn save_then_read_back() {
        let mut storage = test_storage();
        let settings = Settings {
            dark_mode: false,
            inactivity_threshold_days: 9,
            ..Settings::default()
        };

        storage.save_settings(&settings).expect("save");

        assert_eq!(storage.get_settings(), settings);
    }

    #[test]
    fn corrupt_settings_fall_back_to_defaults() {
        let mut storage = test_storage();
        storage.db.put(keys::SETTINGS, "nope").expect("seed");

        assert!(storage.try_get_settings().is_err());
        assert_eq!(storage.get_settings(), Settings::default());
    }

    #[test]
    fn patch_only_touches_named_fields() {
        let mut settings = Settings {
            default_clan_tag: "#2PP".to_string(),
            last_snapshot_time: Some(42),
            ..Settings::default()
        };
        let patch: SettingsPatch = serde_json::from_str(
            r#"{"snapshotIntervalMinutes":30,"lastSnapshotTime":7}"#,
        )
        .expect("patch");

        settings.apply(&patch).expect("apply");

        assert_eq!(settings.snapshot_interval_minutes, 30);
        assert_eq!(settings.default_clan_tag, "#2PP");
        assert_eq!(settings.last_snapshot_time, Some(42));
        assert!(settings.dark_mode);
    }

    #[test]
    fn rejected_patch_leaves_settings_unchanged() {
        let mut settings = Settings::default();
        let patch = SettingsPatch {
            dark_mode: Some(false),
            snapshot_interval_minutes: Some(0),
            ..SettingsPatch::default()
        };

        assert!(settings.apply(&patch).is_err());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn set_value_validates_input() {
        let mut settings = Settings::default();
        settings.set_value("clan.tag", "#2pp").expect("tag");
        settings.set_value("snapshot.interval", "30").expect("interval");

        assert_eq!(settings.default_clan_tag, "#2PP");
        assert_eq!(settings.snapshot_interval_minutes, 30);
        assert!(settings.set_value("snapshot.interval", "0").is_err());
        assert!(settings.set_value("clan.tag", "#HELLO").is_err());
        assert!(settings.set_value("dark_mode", "maybe").is_err());
    }
}
