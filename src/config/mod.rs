use anyhow::{anyhow, bail, Result};
use clap::{Args, Subcommand};
use std::{
    env, fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::args::BaseArgs;
use crate::kql::TimeRange;
use crate::ui::{print_command_status, CommandStatus};

mod get;
mod list;
mod set;

pub const CONFIG_DIR_ENV: &str = "AIV_CONFIG_DIR";
pub const DEFAULT_AUTO_REFRESH_SECONDS: u64 = 30;

/// Raw preference file. Values are kept as strings under namespaced keys;
/// keys this version does not know about survive a load/save cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PrefsFile {
    #[serde(rename = "aiv.activeTenantId", skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(
        rename = "aiv.activeSubscriptionId",
        skip_serializing_if = "Option::is_none"
    )]
    pub subscription: Option<String>,
    #[serde(
        rename = "aiv.activeAppInsightsResourceId",
        skip_serializing_if = "Option::is_none"
    )]
    pub app: Option<String>,
    #[serde(rename = "aiv.timeRange", skip_serializing_if = "Option::is_none")]
    pub time_range: Option<String>,
    #[serde(rename = "aiv.autoRefresh", skip_serializing_if = "Option::is_none")]
    pub auto_refresh: Option<String>,
    #[serde(
        rename = "aiv.autoRefreshSeconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_refresh_seconds: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub const KNOWN_KEYS: &[&str] = &[
    "tenant",
    "subscription",
    "app",
    "time_range",
    "auto_refresh",
    "auto_refresh_seconds",
];

impl PrefsFile {
    fn slot(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "tenant" => Some(&mut self.tenant),
            "subscription" => Some(&mut self.subscription),
            "app" => Some(&mut self.app),
            "time_range" => Some(&mut self.time_range),
            "auto_refresh" => Some(&mut self.auto_refresh),
            "auto_refresh_seconds" => Some(&mut self.auto_refresh_seconds),
            _ => None,
        }
    }

    pub fn get_field(&self, key: &str) -> Option<&str> {
        let value = match key {
            "tenant" => &self.tenant,
            "subscription" => &self.subscription,
            "app" => &self.app,
            "time_range" => &self.time_range,
            "auto_refresh" => &self.auto_refresh,
            "auto_refresh_seconds" => &self.auto_refresh_seconds,
            _ => return None,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    pub fn set_field(&mut self, key: &str, value: String) -> bool {
        match self.slot(key) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn unset_field(&mut self, key: &str) -> bool {
        match self.slot(key) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub fn non_empty_fields(&self) -> Vec<(&str, &str)> {
        KNOWN_KEYS
            .iter()
            .filter_map(|&key| self.get_field(key).map(|v| (key, v)))
            .collect()
    }

    /// Overwrites the known keys with `prefs`, leaving everything else alone.
    pub fn apply(&mut self, prefs: &Preferences) {
        self.tenant = prefs.tenant_id.clone();
        self.subscription = prefs.subscription_id.clone();
        self.app = prefs.app_resource_id.clone();
        self.time_range = Some(prefs.time_range.code().to_string());
        self.auto_refresh = Some(prefs.auto_refresh.to_string());
        self.auto_refresh_seconds = Some(prefs.auto_refresh_seconds.to_string());
    }
}

/// Typed view of the persisted portal selections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    pub tenant_id: Option<String>,
    pub subscription_id: Option<String>,
    pub app_resource_id: Option<String>,
    pub time_range: TimeRange,
    pub auto_refresh: bool,
    pub auto_refresh_seconds: u64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            tenant_id: None,
            subscription_id: None,
            app_resource_id: None,
            time_range: TimeRange::default(),
            auto_refresh: false,
            auto_refresh_seconds: DEFAULT_AUTO_REFRESH_SECONDS,
        }
    }
}

impl From<&PrefsFile> for Preferences {
    fn from(file: &PrefsFile) -> Self {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
        Self {
            tenant_id: non_empty(&file.tenant),
            subscription_id: non_empty(&file.subscription),
            app_resource_id: non_empty(&file.app),
            time_range: file
                .time_range
                .as_deref()
                .and_then(|code| code.parse().ok())
                .unwrap_or_default(),
            auto_refresh: file.auto_refresh.as_deref() == Some("true"),
            auto_refresh_seconds: file
                .auto_refresh_seconds
                .as_deref()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_AUTO_REFRESH_SECONDS),
        }
    }
}

pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(xdg).join("aiv"));
    }
    dirs::home_dir()
        .map(|path| path.join(".config").join("aiv"))
        .ok_or_else(|| anyhow!("$HOME not configured."))
}

pub fn prefs_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("prefs.json"))
}

pub fn accounts_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("accounts.json"))
}

pub fn log_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("aiv.log"))
}

pub fn load_file(path: &Path) -> PrefsFile {
    let file_contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return PrefsFile::default(),
        Err(e) => {
            print_command_status(
                CommandStatus::Error,
                &format!("Warning: could not read {}: {e}", path.display()),
            );
            return PrefsFile::default();
        }
    };

    match serde_json::from_str(&file_contents) {
        Ok(prefs) => prefs,
        Err(e) => {
            print_command_status(
                CommandStatus::Error,
                &format!("Warning: could not read {}: {e}", path.display()),
            );
            PrefsFile::default()
        }
    }
}

/// Writes through a temp file and rename so readers never see a partial file.
pub fn save_file(path: &Path, prefs: &PrefsFile) -> Result<()> {
    write_json_atomic(path, prefs)
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;

    Ok(())
}

pub fn load_preferences(path: &Path) -> Preferences {
    Preferences::from(&load_file(path))
}

// --- CLI commands ---

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommands>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommands {
    /// List saved preferences
    List {
        /// Show the file the values come from
        #[arg(long)]
        verbose: bool,
    },
    /// Get a preference
    Get {
        /// Key (tenant, subscription, app, time_range, auto_refresh, auto_refresh_seconds)
        key: String,
    },
    /// Set a preference
    Set {
        /// Key (tenant, subscription, app, time_range, auto_refresh, auto_refresh_seconds)
        key: String,
        /// Value to set
        value: String,
    },
    /// Remove a preference
    Unset {
        /// Key (tenant, subscription, app, time_range, auto_refresh, auto_refresh_seconds)
        key: String,
    },
}

fn validate_key(key: &str) -> Result<()> {
    if !KNOWN_KEYS.contains(&key) {
        bail!(
            "Unknown config key: {key}\nValid keys: {}",
            KNOWN_KEYS.join(", ")
        );
    }
    Ok(())
}

/// Rejects values the portal would silently replace with a default.
fn validate_value(key: &str, value: &str) -> Result<()> {
    match key {
        "time_range" => {
            value.parse::<TimeRange>()?;
        }
        "auto_refresh" => {
            if value != "true" && value != "false" {
                bail!("auto_refresh must be 'true' or 'false'");
            }
        }
        "auto_refresh_seconds" => match value.trim().parse::<u64>() {
            Ok(seconds) if seconds > 0 => {}
            _ => bail!("auto_refresh_seconds must be a positive whole number of seconds"),
        },
        _ => {
            if value.trim().is_empty() {
                bail!("{key} cannot be empty; use `aiv config unset {key}` instead");
            }
        }
    }
    Ok(())
}

pub fn run(base: BaseArgs, args: ConfigArgs) -> Result<()> {
    let path = prefs_path()?;
    match args.command {
        None => list::run(&base, &path, false),
        Some(ConfigCommands::List { verbose }) => list::run(&base, &path, verbose),
        Some(ConfigCommands::Get { key }) => {
            validate_key(&key)?;
            get::run(&base, &path, &key)
        }
        Some(ConfigCommands::Set { key, value }) => {
            validate_key(&key)?;
            validate_value(&key, &value)?;
            set::run(&path, &key, &value)
        }
        Some(ConfigCommands::Unset { key }) => {
            validate_key(&key)?;
            set::unset(&path, &key)
        }
    }
}
