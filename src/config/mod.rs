//! Configuration module for tally.
//!
//! Handles the TOML settings file and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, ArchivingSettings, PostProcessingSettings, Settings, SettingsError,
    StorageSettings,
};
