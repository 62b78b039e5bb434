pub mod onboard;

use crate::storage::Category;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "clanwatch",
    about = "Clash of Clans clan snapshot history & member activity tracker"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Interactive first-run setup
    Onboard,
    /// Read or change the app config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Show or change the persisted settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Fetch clan, current war and capital raids, then store snapshots
    Fetch {
        #[arg(long)]
        tag: Option<String>,
    },
    /// Fetch a player profile and store a player snapshot
    Player { tag: String },
    /// List stored snapshots for a category
    Snapshots {
        #[arg(value_enum)]
        category: Category,
        #[arg(long)]
        from: Option<i64>,
        #[arg(long)]
        to: Option<i64>,
        #[arg(long, default_value_t = false)]
        latest: bool,
    },
    /// Activity of one member over a trailing window
    Activity {
        tag: String,
        #[arg(long)]
        days: Option<u32>,
    },
    /// Members without trophy or donation changes
    Inactive {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Metrics for the latest war snapshot
    War,
    /// Metrics for the latest capital raid snapshot
    Capital,
    /// Read-only passthroughs to the upstream API
    Lookup {
        #[command(subcommand)]
        command: LookupCommands,
    },
    /// Write every stored record to a JSON bundle
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Load a JSON bundle written by `export`
    Import { path: PathBuf },
    /// Delete all stored data
    Clear {
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Storage usage and snapshot counts
    Status,
    /// Run the local API and the auto-snapshot timer
    Service,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    Set { key: String, value: String },
    Get { key: String },
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommands {
    Show,
    Set { key: String, value: String },
}

#[derive(Debug, Subcommand)]
pub enum LookupCommands {
    SearchClans { name: String },
    Members { tag: String },
    WarLog { tag: String },
    LeagueGroup { tag: String },
    Players { tags: Vec<String> },
    VerifyToken { tag: String, token: String },
    Leagues {
        #[arg(long)]
        id: Option<String>,
    },
    WarLeagues {
        #[arg(long)]
        id: Option<String>,
    },
    BuilderLeagues,
    Locations {
        #[arg(long)]
        id: Option<String>,
    },
    Rankings {
        location: String,
        #[arg(long, default_value_t = false)]
        clans: bool,
    },
    Labels {
        #[arg(long, default_value_t = false)]
        players: bool,
    },
    GoldPass,
}
