use anyhow::{Context, Result, anyhow, bail};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use url::Url;

const APP_DIR: &str = ".clanwatch";
const CONFIG_FILE: &str = "config.json";
pub const DEFAULT_API_BASE_URL: &str = "https://coc-apis.behitek.com";
pub const DEFAULT_STORAGE_QUOTA_BYTES: u64 = 5 * 1024 * 1024;
const MIN_TIMEOUT_SECONDS: u64 = 5;
const TOKEN_ENV: &str = "CLANWATCH_API_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: PathBuf,
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub http_timeout_seconds: u64,
    pub api_port: u16,
    pub storage_quota_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_root_dir().join("db").join("store.db"),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            http_timeout_seconds: 20,
            api_port: 7891,
            storage_quota_bytes: DEFAULT_STORAGE_QUOTA_BYTES,
        }
    }
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        Ok(default_root_dir().join(CONFIG_FILE))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.http_timeout_seconds = config.http_timeout_seconds.max(MIN_TIMEOUT_SECONDS);

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
        set_mode_600(config_path)?;

        Ok(())
    }

    pub fn ensure_bootstrap_files(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        Ok(())
    }

    /// Bearer token for the upstream API; the environment wins over the file.
    pub fn resolve_api_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| {
                self.api_token
                    .clone()
                    .filter(|value| !value.trim().is_empty())
            })
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match normalize_config_key(key) {
            "db_path" => {
                self.db_path = expand_home(value);
            }
            "api_base_url" => {
                let trimmed = value.trim().trim_end_matches('/');
                Url::parse(trimmed).with_context(|| format!("Invalid API base URL: {value}"))?;
                self.api_base_url = trimmed.to_string();
            }
            "api_token" => {
                self.api_token = (!value.trim().is_empty()).then(|| value.trim().to_string());
            }
            "http_timeout_seconds" => {
                self.http_timeout_seconds = value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("http_timeout_seconds must be a number"))?
                    .max(MIN_TIMEOUT_SECONDS);
            }
            "api_port" => {
                self.api_port = value
                    .parse::<u16>()
                    .map_err(|_| anyhow!("api_port must be a number"))?;
            }
            "storage_quota_bytes" => {
                let parsed = value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("storage_quota_bytes must be a number"))?;
                if parsed == 0 {
                    bail!("storage_quota_bytes must be greater than zero");
                }
                self.storage_quota_bytes = parsed;
            }
            _ => {
                bail!(
                    "Unsupported config key: {key}. Supported keys: db_path|db.path, api_base_url|api.base_url, api_token|api.token, http_timeout_seconds|http.timeout_seconds, api_port|server.port, storage_quota_bytes|storage.quota_bytes"
                );
            }
        }

        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        match normalize_config_key(key) {
            "db_path" => Some(self.db_path.display().to_string()),
            "api_base_url" => Some(self.api_base_url.clone()),
            "api_token" => Some(
                self.api_token
                    .as_ref()
                    .map(|_| "***set***".to_string())
                    .unwrap_or_else(|| "not_set".to_string()),
            ),
            "http_timeout_seconds" => Some(self.http_timeout_seconds.to_string()),
            "api_port" => Some(self.api_port.to_string()),
            "storage_quota_bytes" => Some(self.storage_quota_bytes.to_string()),
            _ => None,
        }
    }
}

fn normalize_config_key(key: &str) -> &str {
    match key {
        "db_path" | "db.path" => "db_path",
        "api_base_url" | "api.base_url" => "api_base_url",
        "api_token" | "api.token" => "api_token",
        "http_timeout_seconds" | "http.timeout_seconds" => "http_timeout_seconds",
        "api_port" | "server.port" => "api_port",
        "storage_quota_bytes" | "storage.quota_bytes" => "storage_quota_bytes",
        _ => key,
    }
}

pub fn expand_home(raw: &str) -> PathBuf {
    raw.strip_prefix("~/")
        .and_then(|stripped| home_dir().map(|home| home.join(stripped)))
        .unwrap_or_else(|| PathBuf::from(raw))
}

fn default_root_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn set_mode_600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set file permissions: {}", path.display()))?;
    }

    Ok(())
}
