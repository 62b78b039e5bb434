mod activity;
mod api;
mod cli;
mod coc;
mod collector;
mod config;
mod db;
mod error;
mod scheduler;
mod storage;

use crate::activity::DEFAULT_WINDOW_DAYS;
use crate::cli::onboard::run_onboarding;
use crate::cli::{Cli, Commands, ConfigCommands, LookupCommands, SettingsCommands};
use crate::coc::{CocClient, FetchError, metrics, normalize_tag};
use crate::config::Config;
use crate::scheduler::AutoSnapshotController;
use crate::storage::{Category, Snapshot, Storage};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use clap::Parser;
use dialoguer::{Confirm, theme::ColorfulTheme};
use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => {
            let _ = run_onboarding()?;
            Ok(())
        }
        Commands::Config { command } => handle_config_command(command),
        Commands::Settings { command } => handle_settings_command(command),
        Commands::Fetch { tag } => handle_fetch(tag).await,
        Commands::Player { tag } => handle_player(&tag).await,
        Commands::Snapshots {
            category,
            from,
            to,
            latest,
        } => handle_snapshots(category, from, to, latest),
        Commands::Activity { tag, days } => handle_activity(&tag, days),
        Commands::Inactive { days } => handle_inactive(days),
        Commands::War => handle_war(),
        Commands::Capital => handle_capital(),
        Commands::Lookup { command } => handle_lookup(command).await,
        Commands::Export { output } => handle_export(output),
        Commands::Import { path } => handle_import(&path),
        Commands::Clear { yes } => handle_clear(yes),
        Commands::Status => handle_status(),
        Commands::Service => run_service(load_or_default_config()?).await,
    }
}

fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Set { key, value } => {
            let mut config = load_or_default_config()?;
            config.set_value(&key, &value)?;
            config.ensure_bootstrap_files()?;
            config.save()?;

            let masked = if key.contains("token") {
                "***hidden***".to_string()
            } else {
                value
            };
            println!("Config saved: {key} = {masked}");
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let config = load_or_default_config()?;
            let value = config
                .get_value(&key)
                .with_context(|| format!("Unsupported config key: {key}"))?;

            println!("{value}");
            Ok(())
        }
    }
}

fn handle_settings_command(command: SettingsCommands) -> Result<()> {
    let mut storage = open_storage()?;

    match command {
        SettingsCommands::Show => print_json(&storage.get_settings()),
        SettingsCommands::Set { key, value } => {
            let mut settings = storage.get_settings();
            settings.set_value(&key, &value)?;
            storage
                .save_settings(&settings)
                .context("Failed to save settings")?;

            println!("Settings saved: {key} = {value}");
            Ok(())
        }
    }
}

async fn handle_fetch(tag: Option<String>) -> Result<()> {
    let config = load_or_default_config()?;
    let mut storage = Storage::open(&config)?;

    let tag = match tag {
        Some(value) => normalize_tag(&value),
        None => {
            let stored = storage.get_settings().default_clan_tag;
            if stored.is_empty() {
                bail!("No clan tag given. Pass --tag or run `clanwatch onboard` first.");
            }
            stored
        }
    };

    let client = CocClient::from_config(&config)?;
    info!(tag = %tag, "loading clan data");
    let fetched = client.comprehensive_clan_data(&tag).await;
    let summary = collector::store_clan_refresh(&mut storage, &fetched);

    println!("Clan refresh for {tag}");
    println!("- success: {}", summary.success);
    println!("- clan snapshot: {}", summary.clan_saved);
    println!("- war snapshot: {}", summary.war_saved);
    println!("- capital snapshot: {}", summary.capital_saved);
    summary
        .errors
        .iter()
        .for_each(|error| println!("- error: {error}"));

    if !summary.success {
        bail!("Failed to load clan data for {tag}");
    }

    Ok(())
}

async fn handle_player(tag: &str) -> Result<()> {
    let config = load_or_default_config()?;
    let mut storage = Storage::open(&config)?;
    let client = CocClient::from_config(&config)?;

    let player = client
        .get_player(tag)
        .await
        .with_context(|| format!("Failed to fetch player {}", normalize_tag(tag)))?;

    if !collector::store_player(&mut storage, &player) {
        warn!("player snapshot was not saved");
    }

    let recorded_tag = player
        .get("tag")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| normalize_tag(tag));
    let recent = activity::compute_activity(&storage, &recorded_tag, DEFAULT_WINDOW_DAYS);

    print_json(&player)?;
    println!("activity ({DEFAULT_WINDOW_DAYS}d):");
    print_json(&recent)
}

fn handle_snapshots(category: Category, from: Option<i64>, to: Option<i64>, latest: bool) -> Result<()> {
    let storage = open_storage()?;

    if latest {
        let snapshot = storage
            .latest(category)
            .with_context(|| format!("No {category} snapshots stored yet"))?;
        return print_json(&snapshot);
    }

    let snapshots = match (from, to) {
        (None, None) => storage.load_all(category),
        (from, to) => storage.by_time_range(
            category,
            from.unwrap_or(i64::MIN),
            to.unwrap_or(i64::MAX),
        ),
    };

    println!("{category} snapshots: {}", snapshots.len());
    snapshots.iter().for_each(print_snapshot_line);

    Ok(())
}

fn handle_activity(tag: &str, days: Option<u32>) -> Result<()> {
    let mut storage = open_storage()?;
    let tag = normalize_tag(tag);
    let days = days.unwrap_or(DEFAULT_WINDOW_DAYS);

    let result = activity::compute_activity(&storage, &tag, days);
    if let Err(error) = storage.save_activity_history(&tag, &result) {
        warn!(error = %error, "failed to record activity history");
    }

    print_json(&result)
}

fn handle_inactive(days: Option<u32>) -> Result<()> {
    let storage = open_storage()?;
    let days = days.unwrap_or_else(|| storage.get_settings().inactivity_threshold_days);
    let inactive = activity::find_inactive_members(&storage, days);

    if inactive.is_empty() {
        println!("All members are active over the last {days} day(s).");
        return Ok(());
    }

    println!("Inactive members over the last {days} day(s): {}", inactive.len());
    inactive.iter().for_each(|entry| {
        println!(
            "- {} {} trophies={} donations={} last_seen={}",
            entry.tag(),
            member_field(&entry.member, "name"),
            member_field(&entry.member, "trophies"),
            member_field(&entry.member, "donations"),
            entry
                .activity
                .last_seen
                .map(format_timestamp)
                .unwrap_or_else(|| "never".to_string())
        );
    });

    Ok(())
}

fn handle_war() -> Result<()> {
    let storage = open_storage()?;
    let war = storage
        .latest(Category::War)
        .context("No war snapshot stored yet")?;

    match metrics::war_metrics(&war.data) {
        Some(summary) => print_json(&summary),
        None => {
            println!("Clan is not in war.");
            Ok(())
        }
    }
}

fn handle_capital() -> Result<()> {
    let storage = open_storage()?;
    let capital = storage
        .latest(Category::Capital)
        .context("No capital raid snapshot stored yet")?;

    let summary =
        metrics::capital_metrics(&capital.data).context("Snapshot has no raid seasons")?;
    print_json(&summary)
}

async fn handle_lookup(command: LookupCommands) -> Result<()> {
    let config = load_or_default_config()?;
    let client = CocClient::from_config(&config)?;

    let result: Result<Value, FetchError> = match command {
        LookupCommands::SearchClans { name } => client.search_clans(&name).await,
        LookupCommands::Members { tag } => client.get_clan_members(&tag).await,
        LookupCommands::WarLog { tag } => client.get_war_log(&tag).await,
        LookupCommands::LeagueGroup { tag } => client.get_war_league_group(&tag).await,
        LookupCommands::Players { tags } => {
            return print_json(&client.batch_get_players(&tags).await);
        }
        LookupCommands::VerifyToken { tag, token } => {
            client.verify_player_token(&tag, &token).await
        }
        LookupCommands::Leagues { id: Some(id) } => client.get_league(&id).await,
        LookupCommands::Leagues { id: None } => client.get_leagues().await,
        LookupCommands::WarLeagues { id: Some(id) } => client.get_war_league(&id).await,
        LookupCommands::WarLeagues { id: None } => client.get_war_leagues().await,
        LookupCommands::BuilderLeagues => client.get_builder_base_leagues().await,
        LookupCommands::Locations { id: Some(id) } => client.get_location(&id).await,
        LookupCommands::Locations { id: None } => client.get_locations().await,
        LookupCommands::Rankings { location, clans } => {
            if clans {
                client.get_clan_rankings(&location).await
            } else {
                client.get_player_rankings(&location).await
            }
        }
        LookupCommands::Labels { players } => {
            if players {
                client.get_player_labels().await
            } else {
                client.get_clan_labels().await
            }
        }
        LookupCommands::GoldPass => client.get_gold_pass().await,
    };

    let value = match result {
        Ok(value) => value,
        Err(FetchError::Http { status, message }) if status == StatusCode::NOT_FOUND => {
            bail!("Not found: {message}")
        }
        Err(error) => return Err(error).context("API request failed"),
    };

    print_json(&value)
}

fn handle_export(output: Option<PathBuf>) -> Result<()> {
    let storage = open_storage()?;
    let content = storage.export_json().context("Failed to export data")?;

    let path = output.unwrap_or_else(|| {
        PathBuf::from(format!(
            "coc-dashboard-export-{}.json",
            Utc::now().timestamp_millis()
        ))
    });
    fs::write(&path, content)
        .with_context(|| format!("Failed to write export file: {}", path.display()))?;

    println!("Exported to {}", path.display());
    Ok(())
}

fn handle_import(path: &std::path::Path) -> Result<()> {
    let mut storage = open_storage()?;
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;

    let imported = storage
        .import_json(&content)
        .with_context(|| format!("Failed to import {}", path.display()))?;

    println!("Imported {imported} record(s) from {}", path.display());
    Ok(())
}

fn handle_clear(yes: bool) -> Result<()> {
    let confirmed = yes
        || Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Delete all snapshots, settings and activity history?")
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
    if !confirmed {
        println!("Nothing cleared.");
        return Ok(());
    }

    let mut storage = open_storage()?;
    storage.clear_all().context("Failed to clear data")?;
    println!("All clanwatch data cleared.");
    Ok(())
}

fn handle_status() -> Result<()> {
    let config = load_or_default_config()?;
    let storage = Storage::open(&config)?;
    let settings = storage.get_settings();
    let usage = storage.usage()?;

    println!("clanwatch status");
    println!("- db_path: {}", config.db_path.display());
    println!(
        "- default_clan_tag: {}",
        if settings.default_clan_tag.is_empty() {
            "not_set"
        } else {
            settings.default_clan_tag.as_str()
        }
    );
    println!(
        "- last_snapshot_time: {}",
        settings
            .last_snapshot_time
            .map(format_timestamp)
            .unwrap_or_else(|| "none".to_string())
    );
    println!(
        "- storage: {} / {} bytes ({:.1}%)",
        usage.total_bytes, usage.limit_bytes, usage.percent_used
    );
    usage
        .sizes
        .iter()
        .for_each(|(key, size)| println!("  - {key}: {size} bytes"));
    for category in Category::ALL {
        match storage.try_load_all(category) {
            Ok(snapshots) => println!("- {category} snapshots: {}", snapshots.len()),
            Err(error) if error.is_corrupt() => println!("- {category} snapshots: corrupt ({error})"),
            Err(error) => return Err(error.into()),
        }
    }

    Ok(())
}

async fn run_service(config: Config) -> Result<()> {
    config.ensure_bootstrap_files()?;
    let storage = Arc::new(Mutex::new(Storage::open(&config)?));

    let snapshots = Arc::new(Mutex::new(AutoSnapshotController::new()));
    snapshots
        .lock()
        .map_err(|_| anyhow::anyhow!("auto-snapshot lock poisoned"))?
        .start_from_settings(Arc::clone(&storage));

    let shared_config = Arc::new(config);

    info!("clanwatch service started");

    tokio::select! {
        api_result = api::run_server(shared_config, Arc::clone(&storage), Arc::clone(&snapshots)) => {
            api_result?;
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    if let Ok(mut controller) = snapshots.lock() {
        controller.stop();
    }

    Ok(())
}

fn print_snapshot_line(snapshot: &Snapshot) {
    let label = snapshot
        .data
        .get("name")
        .or_else(|| snapshot.data.get("state"))
        .or_else(|| snapshot.data.get("tag"))
        .and_then(Value::as_str)
        .unwrap_or("-");
    println!("- {} {label}", format_timestamp(snapshot.timestamp));
}

fn member_field(member: &Map<String, Value>, key: &str) -> String {
    match member.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|datetime| {
            datetime
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| timestamp_ms.to_string())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}

fn open_storage() -> Result<Storage> {
    let config = load_or_default_config()?;
    Storage::open(&config)
}

fn load_or_default_config() -> Result<Config> {
    Config::load().or_else(|_| {
        let config = Config::default();
        config.ensure_bootstrap_files()?;
        config.save()?;
        Ok(config)
    })
}
