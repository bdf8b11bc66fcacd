use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Whether a directory may hold several tabs. Constrained hosts turn this off,
    /// in which case the first tab is always the active one. Default: true
    #[serde(default = "default_true")]
    pub tabs_enabled: bool,

    /// Maximum level written to the log file. Default: "info"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub terminal: TerminalConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tabs_enabled: true,
            log_level: default_log_level(),
            host: HostConfig::default(),
            terminal: TerminalConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct HostConfig {
    /// Unix socket the session host listens on. Default: ~/.termtabs/host.sock
    #[serde(default)]
    pub socket: Option<String>,
}

impl HostConfig {
    pub fn socket_path(&self) -> Result<PathBuf> {
        match self.socket {
            Some(ref socket) => Ok(expand_home(socket)),
            None => Ok(base_dir()?.join("host.sock")),
        }
    }
}

/// Geometry used for session creation before the viewport has reported its own.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TerminalConfig {
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        TerminalConfig {
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

impl Config {
    /// Parsed `log_level`, falling back to INFO for unknown names.
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

/// Returns the base termtabs directory: ~/.termtabs/
pub fn base_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home.join(".termtabs"))
}

/// Returns the path to the `SQLite` database holding tab metadata
pub fn db_path() -> Result<PathBuf> {
    Ok(base_dir()?.join("termtabs.db"))
}

/// Returns the path to the log file
pub fn log_path() -> Result<PathBuf> {
    Ok(base_dir()?.join("termtabs.log"))
}

/// Ensure all required directories exist
pub fn ensure_dirs() -> Result<()> {
    let base = base_dir()?;
    fs::create_dir_all(&base).context("failed to create ~/.termtabs/")?;
    Ok(())
}

/// Load config from ~/.termtabs/config.toml (or return defaults if it doesn't exist)
pub fn load() -> Result<Config> {
    load_from(&base_dir()?.join("config.toml"))
}

pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
