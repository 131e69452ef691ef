//! Bootstrap configuration
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments / environment variables (handled by the binary)
//! 2. TOML configuration file
//! 3. Compiled defaults
//!
//! A missing or unreadable TOML file never prevents startup: a warning is
//! logged and the compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the TOML file location
pub const CONFIG_PATH_ENV: &str = "GV_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Library root containing platform folders
    #[serde(default = "default_library_root")]
    pub library_root: PathBuf,

    /// SQLite catalog file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub scan: ScanSettings,

    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Filesystem platform directory name -> provider platform slug
    #[serde(default)]
    pub platform_bindings: HashMap<String, String>,

    #[serde(default)]
    pub exclude: ExclusionConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            library_root: default_library_root(),
            database_path: default_database_path(),
            port: default_port(),
            logging: LoggingConfig::default(),
            scan: ScanSettings::default(),
            providers: ProvidersConfig::default(),
            platform_bindings: HashMap::new(),
            exclude: ExclusionConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Scan run tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Upper bound on a single provider call
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Upper bound on a whole run (0 disables the bound)
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Bounded run queue depth
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Event broadcast buffer size
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Maximum wait on SQLite lock contention before giving up
    #[serde(default = "default_db_max_lock_wait_ms")]
    pub db_max_lock_wait_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            queue_capacity: default_queue_capacity(),
            event_capacity: default_event_capacity(),
            db_max_lock_wait_ms: default_db_max_lock_wait_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub igdb: IgdbConfig,
    #[serde(default)]
    pub mobygames: MobyGamesConfig,
    #[serde(default)]
    pub tgdb: TgdbConfig,
}

/// IGDB (Twitch) client credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IgdbConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MobyGamesConfig {
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TgdbConfig {
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Library exclusion rules
///
/// Name entries are glob patterns (`*.sav`, `_unused*`); extensions are
/// compared case-insensitively without the leading dot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExclusionConfig {
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub single_file_extensions: Vec<String>,
    #[serde(default)]
    pub single_file_names: Vec<String>,
    #[serde(default)]
    pub multi_file_names: Vec<String>,
}

fn default_library_root() -> PathBuf {
    PathBuf::from("/library")
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("gamevault.db")
}

fn default_port() -> u16 {
    5730
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_run_timeout_secs() -> u64 {
    4 * 60 * 60
}

fn default_queue_capacity() -> usize {
    8
}

fn default_event_capacity() -> usize {
    1000
}

fn default_db_max_lock_wait_ms() -> u64 {
    5000
}

/// OS-dependent data directory for the catalog database
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("gamevault"))
        .unwrap_or_else(|| PathBuf::from("./gamevault_data"))
}

/// Default TOML location (`<config_dir>/gamevault/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("gamevault").join("config.toml"))
}

/// Resolve the TOML file location: explicit argument, then `GV_CONFIG`, then
/// the OS default
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path()
}

/// Parse TOML configuration text
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Load the TOML file, degrading to defaults when it is missing
///
/// A file that exists but fails to parse is an error: silently ignoring a
/// typo in credentials or exclusions would be surprising.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        warn!("No configuration directory available, using compiled defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!(
            "Config file not found at {}, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    let config = parse_toml_config(&content)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}
