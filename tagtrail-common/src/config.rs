//! Configuration loading and root folder resolution
//!
//! Every setting resolves in the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::scoring::DEFAULT_POWER_USER_THRESHOLD;

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "tagtrail.db";

/// Default listen address for the HTTP service
pub const DEFAULT_BIND: &str = "127.0.0.1:5790";

/// Header carrying the authenticated user id from the upstream session layer
pub const DEFAULT_USER_HEADER: &str = "x-user-id";

pub const DEFAULT_CLAIM_TIMEOUT_SECS: u64 = 30;

pub const ENV_ROOT_FOLDER: &str = "TAGTRAIL_ROOT_FOLDER";
pub const ENV_BIND: &str = "TAGTRAIL_BIND";
pub const ENV_USER_HEADER: &str = "TAGTRAIL_USER_HEADER";
pub const ENV_CRON_SECRET: &str = "TAGTRAIL_CRON_SECRET";
pub const ENV_DAILY_AGGREGATION: &str = "TAGTRAIL_ENABLE_DAILY_AGGREGATION";
pub const ENV_POWER_USER_THRESHOLD: &str = "TAGTRAIL_POWER_USER_THRESHOLD";
pub const ENV_CLAIM_TIMEOUT_SECS: &str = "TAGTRAIL_CLAIM_TIMEOUT_SECS";

/// Row caps and windows bounding each claim's linking passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimLimits {
    /// Items sampled from the visitor's list to collect source tags/batches
    pub list_item_sample: i64,
    /// Events linked by list provenance per claim
    pub list_source_events: i64,
    /// Events linked by the visitor's last tag/batch per claim
    pub last_tag_events: i64,
    /// Events linked by stored IP hash + user agent per claim
    pub ip_ua_events: i64,
    /// How far back the IP/user-agent match may reach
    pub ip_ua_window_days: i64,
    /// Trailing window used for the reported linked count
    pub linked_window_secs: i64,
}

impl Default for ClaimLimits {
    fn default() -> Self {
        Self {
            list_item_sample: 20,
            list_source_events: 200,
            last_tag_events: 50,
            ip_ua_events: 100,
            ip_ua_window_days: 7,
            linked_window_secs: 60,
        }
    }
}

/// Contents of `config.toml`; every key optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub bind: Option<String>,
    pub user_header: Option<String>,
    pub cron_secret: Option<String>,
    pub daily_aggregation_enabled: Option<bool>,
    pub power_user_threshold: Option<i64>,
    pub claim_timeout_secs: Option<u64>,
    pub claim: ClaimLimits,
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub root_folder: Option<PathBuf>,
    pub bind: Option<String>,
    pub cron_secret: Option<String>,
    pub daily_aggregation_enabled: Option<bool>,
    pub power_user_threshold: Option<i64>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub root_folder: PathBuf,
    pub bind: String,
    pub user_header: String,
    /// Operator secret for the aggregation endpoint; `None` rejects every call
    pub cron_secret: Option<String>,
    pub daily_aggregation_enabled: bool,
    pub power_user_threshold: i64,
    pub claim_timeout: Duration,
    pub claim: ClaimLimits,
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve_with(&Overrides::default(), TomlConfig::default(), |_| None)
    }
}

impl Settings {
    /// Resolve from CLI overrides, the process environment and a TOML config
    pub fn resolve(overrides: &Overrides, toml: TomlConfig) -> Self {
        Self::resolve_with(overrides, toml, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup
    pub fn resolve_with<F>(overrides: &Overrides, toml: TomlConfig, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let root_folder = overrides
            .root_folder
            .clone()
            .or_else(|| var(ENV_ROOT_FOLDER).map(PathBuf::from))
            .or(toml.root_folder)
            .unwrap_or_else(default_root_folder);

        let bind = overrides
            .bind
            .clone()
            .or_else(|| var(ENV_BIND))
            .or(toml.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let user_header = var(ENV_USER_HEADER)
            .or(toml.user_header)
            .unwrap_or_else(|| DEFAULT_USER_HEADER.to_string())
            .to_ascii_lowercase();

        let cron_secret = overrides
            .cron_secret
            .clone()
            .or_else(|| var(ENV_CRON_SECRET))
            .or(toml.cron_secret)
            .filter(|s| !s.trim().is_empty());

        let daily_aggregation_enabled = overrides
            .daily_aggregation_enabled
            .or_else(|| var(ENV_DAILY_AGGREGATION).map(|v| parse_flag(&v)))
            .or(toml.daily_aggregation_enabled)
            .unwrap_or(false);

        let power_user_threshold = overrides
            .power_user_threshold
            .or_else(|| var(ENV_POWER_USER_THRESHOLD).and_then(|v| v.trim().parse().ok()))
            .or(toml.power_user_threshold)
            .unwrap_or(DEFAULT_POWER_USER_THRESHOLD);

        let claim_timeout_secs = var(ENV_CLAIM_TIMEOUT_SECS)
            .and_then(|v| v.trim().parse().ok())
            .or(toml.claim_timeout_secs)
            .unwrap_or(DEFAULT_CLAIM_TIMEOUT_SECS);

        Self {
            root_folder,
            bind,
            user_header,
            cron_secret,
            daily_aggregation_enabled,
            power_user_threshold,
            claim_timeout: Duration::from_secs(claim_timeout_secs),
            claim: toml.claim,
        }
    }

    /// Path of the SQLite database inside the root folder
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }
}

/// Interpret a boolean feature flag from text
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

/// Parse TOML text into a config
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Load the TOML config file
///
/// An explicit path must exist. Without one, the user config directory and
/// then `/etc/tagtrail/config.toml` are searched; finding neither yields an
/// empty config.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!("Config file not found: {}", path.display())));
            }
            path.to_path_buf()
        }
        None => match find_config_file() {
            Some(path) => path,
            None => {
                debug!("No config file found, using defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    debug!("Loaded config file {}", path.display());
    parse_toml_config(&content)
}

/// Locate a config file in the platform's usual places
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("tagtrail").join("config.toml"));
    let system_config = PathBuf::from("/etc/tagtrail/config.toml");

    user_config
        .into_iter()
        .chain(std::iter::once(system_config))
        .find(|path| path.exists())
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tagtrail"))
        .unwrap_or_else(|| PathBuf::from("./tagtrail_data"))
}
