use crate::coc::{is_valid_tag, normalize_tag};
use crate::config::Config;
use crate::storage::settings::{DEFAULT_INACTIVITY_THRESHOLD_DAYS, DEFAULT_SNAPSHOT_INTERVAL_MINUTES};
use crate::storage::{Settings, Storage};
use anyhow::{Context, Result};
use dialoguer::{Input, theme::ColorfulTheme};

pub fn run_onboarding() -> Result<(Config, Settings)> {
    println!("──────────────────────────────────────────");
    println!("  Welcome to clanwatch onboarding.");
    println!("──────────────────────────────────────────");

    let theme = ColorfulTheme::default();
    let config = Config::load().unwrap_or_default();

    println!("\n[1/3] Default clan");
    let clan_tag: String = Input::with_theme(&theme)
        .with_prompt("  Clan tag to track (e.g. #2PP)")
        .validate_with(|input: &String| -> std::result::Result<(), &str> {
            if is_valid_tag(input) {
                Ok(())
            } else {
                Err("Tags use the characters 0289PYLQGRJCUV")
            }
        })
        .interact_text()
        .context("Failed to read clan tag")?;
    let clan_tag = normalize_tag(&clan_tag);
    println!("  ✓ Tracking {clan_tag}");

    println!("\n[2/3] Snapshot interval");
    let snapshot_interval_minutes: u32 = Input::with_theme(&theme)
        .with_prompt("  Minutes between automatic snapshots")
        .default(DEFAULT_SNAPSHOT_INTERVAL_MINUTES)
        .validate_with(|input: &u32| -> std::result::Result<(), &str> {
            if *input > 0 {
                Ok(())
            } else {
                Err("Use at least 1 minute")
            }
        })
        .interact_text()
        .context("Failed to read snapshot interval")?;

    println!("\n[3/3] Inactivity threshold");
    let inactivity_threshold_days: u32 = Input::with_theme(&theme)
        .with_prompt("  Days without trophy or donation changes before a member counts as inactive")
        .default(DEFAULT_INACTIVITY_THRESHOLD_DAYS)
        .interact_text()
        .context("Failed to read inactivity threshold")?;

    config.ensure_bootstrap_files()?;
    config.save()?;

    let mut storage = Storage::open(&config)?;
    let settings = Settings {
        default_clan_tag: clan_tag,
        snapshot_interval_minutes,
        inactivity_threshold_days,
        ..storage.get_settings()
    };
    storage
        .save_settings(&settings)
        .context("Failed to save settings")?;

    println!("\n──────────────────────────────────────────");
    println!("  Onboarding complete!");
    println!("  Run `clanwatch fetch` to take the first snapshot,");
    println!("  or `clanwatch service` to keep snapshotting in the background.");
    println!("──────────────────────────────────────────");

    Ok((config, settings))
}
