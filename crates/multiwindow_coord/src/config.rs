use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use multiwindow_shared::paths;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config directory not found")]
    NoConfigDir,
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Coordinator configuration loaded from `<config_dir>/multiwindow/config.toml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoordinatorConfig {
    /// Enable diagnostics file output
    #[serde(default)]
    pub debug: bool,

    /// Instance limit inputs
    #[serde(default)]
    pub limits: LimitSettings,

    /// Retention of idle and closed windows
    #[serde(default)]
    pub retention: RetentionSettings,

    /// Registry storage settings
    #[serde(default)]
    pub storage: StorageSettings,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debug: false,
            limits: LimitSettings::default(),
            retention: RetentionSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

/// Inputs to the instance limit policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitSettings {
    /// Limit for full multi-instance mode
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,

    /// Whether the configurable limit is enabled at all
    #[serde(default = "default_limit_enabled")]
    pub limit_enabled: bool,

    /// Devices below this much memory get the low-memory limit
    #[serde(default = "default_low_memory_threshold_mb")]
    pub low_memory_threshold_mb: u64,

    /// Two-window legacy mode
    #[serde(default)]
    pub legacy_two_window: bool,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_instances: default_max_instances(),
            limit_enabled: default_limit_enabled(),
            low_memory_threshold_mb: default_low_memory_threshold_mb(),
            legacy_two_window: false,
        }
    }
}

fn default_max_instances() -> u32 {
    20
}

fn default_limit_enabled() -> bool {
    true
}

fn default_low_memory_threshold_mb() -> u64 {
    6000
}

/// Retention settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionSettings {
    /// Days without access before a window is closed automatically
    #[serde(default = "default_retention_days")]
    pub days: u32,

    /// Keep records of windows the user closed so they can be restored
    #[serde(default = "default_retain_closed_windows")]
    pub retain_closed_windows: bool,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            retain_closed_windows: default_retain_closed_windows(),
        }
    }
}

fn default_retention_days() -> u32 {
    180
}

fn default_retain_closed_windows() -> bool {
    true
}

impl RetentionSettings {
    pub fn horizon_millis(&self) -> i64 {
        i64::from(self.days) * 24 * 60 * 60 * 1000
    }
}

/// Registry storage settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSettings {
    /// Profile directory under the registry root
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Delay before deferred writes reach disk
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_profile() -> String {
    "default".to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

impl CoordinatorConfig {
    /// Loads the config file, falling back to defaults when it is absent.
    pub fn load() -> ConfigResult<Self> {
        let path = paths::config_path().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
