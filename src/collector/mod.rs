use crate::coc::{ComprehensiveClanData, normalize_tag};
use crate::storage::{Category, Storage};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

/// What a refresh managed to persist.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub success: bool,
    pub clan_saved: bool,
    pub war_saved: bool,
    pub capital_saved: bool,
    pub errors: Vec<String>,
}

/// Persists a comprehensive fetch. The clan becomes the current clan data, a
/// snapshot and the default clan; war is kept only while the clan is in a war;
/// capital when present.
pub fn store_clan_refresh(storage: &mut Storage, fetched: &ComprehensiveClanData) -> RefreshSummary {
    let mut summary = RefreshSummary {
        errors: fetched.errors.clone(),
        ..RefreshSummary::default()
    };

    let Some(clan) = &fetched.clan else {
        return summary;
    };

    if let Err(cause) = storage.save_clan_data(clan) {
        error!(error = %cause, "failed to save clan data");
        summary.errors.push(format!("Failed to save clan data: {cause}"));
    }
    summary.clan_saved = record(storage, Category::Clan, clan, &mut summary.errors);
    if let Some(tag) = clan.get("tag").and_then(Value::as_str).filter(|tag| !tag.is_empty()) {
        remember_default_clan(storage, tag, &mut summary.errors);
    }

    if let Some(war) = fetched.war.as_ref().filter(|war| is_in_war(war)) {
        summary.war_saved = record(storage, Category::War, war, &mut summary.errors);
    }

    if let Some(capital) = &fetched.capital {
        summary.capital_saved = record(storage, Category::Capital, capital, &mut summary.errors);
    }

    summary.success = fetched.success;
    info!(
        clan = summary.clan_saved,
        war = summary.war_saved,
        capital = summary.capital_saved,
        "clan refresh stored"
    );

    summary
}

pub fn store_player(storage: &mut Storage, player: &Value) -> bool {
    let mut errors = Vec::new();
    record(storage, Category::Player, player, &mut errors)
}

/// Timer body: snapshot the current clan data when there is a clan to snapshot.
pub fn snapshot_current_clan(storage: &mut Storage) -> bool {
    let Some(clan) = storage.clan_data() else {
        return false;
    };
    if clan.get("tag").and_then(Value::as_str).is_none_or(str::is_empty) {
        return false;
    }

    info!("auto-saving clan snapshot");
    let mut errors = Vec::new();
    record(storage, Category::Clan, &clan, &mut errors)
}

fn remember_default_clan(storage: &mut Storage, tag: &str, errors: &mut Vec<String>) {
    let mut settings = storage.get_settings();
    let tag = normalize_tag(tag);
    if settings.default_clan_tag == tag {
        return;
    }

    settings.default_clan_tag = tag;
    if let Err(cause) = storage.save_settings(&settings) {
        errors.push(format!("Failed to save default clan: {cause}"));
    }
}

fn is_in_war(war: &Value) -> bool {
    war.get("state").and_then(Value::as_str) != Some("notInWar")
}

fn record(storage: &mut Storage, category: Category, data: &Value, errors: &mut Vec<String>) -> bool {
    match storage.append(category, data.clone()) {
        Ok(_) => true,
        Err(cause) => {
            error!(category = %category, error = %cause, "failed to save snapshot");
            errors.push(format!("Failed to save {category} snapshot: {cause}"));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{snapshot_current_clan, store_clan_refresh};
    use crate::coc::{ComprehensiveClanData, normalize_tag};
    use crate::storage::{Category, test_storage};
    use serde_json::json;

    #[test]
    fn refresh_stores_clan_and_skips_idle_war() {
        let mut storage = test_storage();
        let fetched = ComprehensiveClanData {
            success: true,
            clan: Some(json!({ "tag": "#2PP", "memberList": [] })),
            war: Some(json!({ "state": "notInWar" })),
            capital: Some(json!({ "items": [] })),
            errors: Vec::new(),
        };

        let summary = store_clan_refresh(&mut storage, &fetched);

        assert!(summary.success && summary.clan_saved && summary.capital_saved);
        assert!(!summary.war_saved);
        assert_eq!(storage.clan_data(), fetched.clan);
        assert_eq!(storage.load_all(Category::Clan).len(), 1);
        assert!(storage.load_all(Category::War).is_empty());
        assert_eq!(storage.load_all(Category::Capital).len(), 1);
    }

    #[test]
    fn refreshed_clan_becomes_the_default_clan() {
        let mut storage = test_storage();
        let fetched = ComprehensiveClanData {
            success: true,
            clan: Some(json!({ "tag": "#2pp", "memberList": [] })),
            ..ComprehensiveClanData::default()
        };

        store_clan_refresh(&mut storage, &fetched);

        let settings = storage.get_settings();
        assert_eq!(settings.default_clan_tag, "#2PP");
        assert!(settings.last_snapshot_time.is_some());
    }

    #[test]
    fn failed_clan_fetch_stores_nothing() {
        let mut storage = test_storage();
        let fetched = ComprehensiveClanData {
            errors: vec!["Failed to fetch clan data".to_string()],
            capital: Some(json!({ "items": [] })),
            ..ComprehensiveClanData::default()
        };

        let summary = store_clan_refresh(&mut storage, &fetched);

        assert!(!summary.success);
        assert_eq!(summary.errors, fetched.errors);
        assert!(storage.load_all(Category::Capital).is_empty());
        assert_eq!(storage.get_settings().default_clan_tag, "");
    }

    #[test]
    fn auto_snapshot_requires_a_tagged_clan() {
        let mut storage = test_storage();
        assert!(!snapshot_current_clan(&mut storage));

        storage.save_clan_data(&json!({ "name": "untagged" })).expect("save");
        assert!(!snapshot_current_clan(&mut storage));

        storage.save_clan_data(&json!({ "tag": "#2PP" })).expect("save");
        assert!(snapshot_current_clan(&mut storage));
        assert_eq!(storage.load_all(Category::Clan).len(), 1);
    }
}
