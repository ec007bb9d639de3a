//! TOML-based configuration for tally.
//!
//! Supports a config file (tally.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [storage]
//! path = "${TALLY_DB}"
//! blob_compression = true
//! table_prefix = ""
//!
//! [archiving]
//! enable_segments_cache = true
//! lower_isolation_for_segments = true
//!
//! [post_processing]
//! format_metrics = "bc"
//! pivot_column_limit = 10
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Archive and log storage.
    pub storage: StorageSettings,

    /// Archiving-time query behaviour.
    pub archiving: ArchivingSettings,

    /// Defaults for the report post-processor.
    pub post_processing: PostProcessingSettings,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database file (supports ${ENV_VAR} expansion).
    pub path: String,

    /// Whether blob columns hold binary payloads. When true, blob records
    /// are zlib-compressed; otherwise they are stored raw.
    pub blob_compression: bool,

    /// Prefix prepended to every archive, log and sequence table name.
    pub table_prefix: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: "tally.db".to_string(),
            blob_compression: true,
            table_prefix: String::new(),
        }
    }
}

impl StorageSettings {
    /// Get the database path with environment variables expanded.
    pub fn resolved_path(&self) -> Result<PathBuf, SettingsError> {
        let expanded = expand_env_vars(&self.path)?;
        if expanded.trim().is_empty() {
            return Err(SettingsError::InvalidConfig(
                "storage.path is empty".to_string(),
            ));
        }
        Ok(PathBuf::from(expanded))
    }
}

/// Archiving configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArchivingSettings {
    /// Materialize segment membership into a temporary table once per run.
    pub enable_segments_cache: bool,

    /// Try to lower the isolation level before filling segment tables with
    /// `INSERT ... SELECT`. When disabled, rows are fetched and inserted literally.
    pub lower_isolation_for_segments: bool,
}

impl Default for ArchivingSettings {
    fn default() -> Self {
        Self {
            enable_segments_cache: true,
            lower_isolation_for_segments: true,
        }
    }
}

/// Post-processing defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PostProcessingSettings {
    /// Default for the `format_metrics` request parameter: "0", "1", "bc" or "all".
    pub format_metrics: String,

    /// Default for `pivotByColumnLimit`.
    pub pivot_column_limit: usize,
}

impl Default for PostProcessingSettings {
    fn default() -> Self {
        Self {
            format_metrics: "bc".to_string(),
            pivot_column_limit: 10,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `TALLY_CONFIG`
    /// 2. `./tally.toml`
    /// 3. `~/.config/tally/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("TALLY_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("tally.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tally").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        if chars.next_if_eq(&'{').is_some() {
            let mut var_name = String::new();
            while let Some(ch) = chars.next_if(|ch| *ch != '}') {
                var_name.push(ch);
            }
            chars.next_if_eq(&'}');
            let value =
                env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
            result.push_str(&value);
        } else {
            // $VAR (ends at non-alphanumeric/underscore)
            let mut var_name = String::new();
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                var_name.push(ch);
            }
            if var_name.is_empty() {
                result.push('$');
            } else {
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            }
        }
    }

    Ok(result)
}
