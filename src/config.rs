//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/treewatch/treewatch.toml`
//! 3. Local config: file passed with `--config`
//! 4. Environment variables: `TREEWATCH__SECTION__KEY`

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::ApplicationError;

/// Delivery loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Ceiling on collect/sort/deliver passes in one flush
    pub max_flush_passes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_flush_passes: 10_000,
        }
    }
}

/// Record allocation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecordConfig {
    /// Share one record between observers that see the same change identically
    pub share_records: bool,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            share_records: true,
        }
    }
}

/// Registry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Memoize ancestor registration lookups
    pub cache_enabled: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
        }
    }
}

/// Raw sections for intermediate parsing: `None` means "not specified, inherit".
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct RawSchedulerConfig {
    pub max_flush_passes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct RawRecordConfig {
    pub share_records: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct RawRegistryConfig {
    pub cache_enabled: Option<bool>,
}

/// Raw settings for intermediate parsing.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct RawSettings {
    pub scheduler: RawSchedulerConfig,
    pub records: RawRecordConfig,
    pub registry: RawRegistryConfig,
}

/// Unified configuration for treewatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub scheduler: SchedulerConfig,
    pub records: RecordConfig,
    pub registry: RegistryConfig,
}

/// Get the XDG config directory for treewatch.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "treewatch").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("treewatch.toml"))
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

impl Settings {
    /// Overlay wins where it specifies a value.
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            scheduler: SchedulerConfig {
                max_flush_passes: overlay
                    .scheduler
                    .max_flush_passes
                    .unwrap_or(self.scheduler.max_flush_passes),
            },
            records: RecordConfig {
                share_records: overlay
                    .records
                    .share_records
                    .unwrap_or(self.records.share_records),
            },
            registry: RegistryConfig {
                cache_enabled: overlay
                    .registry
                    .cache_enabled
                    .unwrap_or(self.registry.cache_enabled),
            },
        }
    }

    /// Load settings with layered precedence.
    ///
    /// # Arguments
    /// * `local` - Optional config file given on the command line
    pub fn load(local: Option<&Path>) -> Result<Self, ApplicationError> {
        Self::load_from(global_config_path().as_deref(), local)
    }

    /// Same as [`Settings::load`] with an explicit global config location.
    ///
    /// A missing global file is skipped; a missing local file is an error
    /// because the user asked for it.
    pub fn load_from(global: Option<&Path>, local: Option<&Path>) -> Result<Self, ApplicationError> {
        // 1. Start with defaults
        let mut current = Self::default();

        // 2. Global config
        if let Some(global_path) = global {
            if global_path.exists() {
                let raw = load_raw_settings(global_path)?;
                current = current.merge_with(&raw);
            }
        }

        // 3. Local config
        if let Some(local_path) = local {
            let raw = load_raw_settings(local_path)?;
            current = current.merge_with(&raw);
        }

        // 4. Environment variables (explicit override)
        current = Self::apply_env_overrides(current)?;

        current.validate()?;
        Ok(current)
    }

    /// Apply TREEWATCH__* environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self) -> Result<Self, ApplicationError> {
        let config = Config::builder()
            .add_source(Environment::with_prefix("TREEWATCH").separator("__"))
            .build()
            .map_err(config_err)?;

        if let Ok(val) = config.get::<usize>("scheduler.max_flush_passes") {
            settings.scheduler.max_flush_passes = val;
        }
        if let Ok(val) = config.get_bool("records.share_records") {
            settings.records.share_records = val;
        }
        if let Ok(val) = config.get_bool("registry.cache_enabled") {
            settings.registry.cache_enabled = val;
        }

        Ok(settings)
    }

    fn validate(&self) -> Result<(), ApplicationError> {
        if self.scheduler.max_flush_passes == 0 {
            return Err(ApplicationError::Config {
                message: "scheduler.max_flush_passes must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# treewatch configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/treewatch/treewatch.toml
#   Local:  file passed with --config
#   Env:    TREEWATCH__SECTION__KEY environment variables

[scheduler]
# Maximum delivery passes per flush. Work left over is kept for the next flush.
# max_flush_passes = 10000

[records]
# Share one record instance between observers that see a change identically.
# share_records = true

[registry]
# Cache registrations reachable from each node's ancestors.
# cache_enabled = true
"#
        .to_string()
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}
