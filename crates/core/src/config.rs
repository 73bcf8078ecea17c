//! TOML-based configuration for guidevcs.
//!
//! The author identity may be supplied indirectly through an `_env` field that
//! names an environment variable; it is resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::default_branch_name;

/// File name of the SQLite database inside `storage.data_dir`.
pub const DATABASE_FILE: &str = "guidevcs.db";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where history is persisted.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Tracing settings.
    #[serde(default)]
    pub log: LogConfig,

    /// Who commits are attributed to.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Defaults for newly initialised projects.
    #[serde(default)]
    pub project: ProjectConfig,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Which store backs the engine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite database under `data_dir`.
    #[default]
    Sqlite,
    /// Process-local maps; history is lost on exit.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Directory holding the database file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./.guidevcs")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// Full path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Default author for new projects.
    #[serde(default)]
    pub author: Option<String>,

    /// Environment variable holding the author; overrides `author` when set.
    #[serde(default)]
    pub author_env: Option<String>,
}

// ---------------------------------------------------------------------------
// Project defaults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Name of the branch created by `init_project`.
    #[serde(default = "default_branch_name")]
    pub default_branch: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            default_branch: default_branch_name(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolution
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Replace `identity.author` with the value of `identity.author_env` when
    /// that variable is set.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.identity.author_env {
            if let Some(author) = resolve_optional_env(env_name, "identity.author_env") {
                self.identity.author = Some(author);
            }
        }
        Ok(())
    }

    /// Check field values beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.backend == StorageBackend::Sqlite
            && self.storage.data_dir.as_os_str().is_empty()
        {
            return Err(ConfigError::InvalidValue {
                field: "storage.data_dir".into(),
                detail: "data directory must not be empty for the sqlite backend".into(),
            });
        }
        if !LOG_LEVELS.contains(&self.log.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "log.level".into(),
                detail: format!("expected one of {}", LOG_LEVELS.join(", ")),
            });
        }
        if self.project.default_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "project.default_branch".into(),
                detail: "default branch name must not be empty".into(),
            });
        }
        if self
            .identity
            .author
            .as_deref()
            .is_some_and(|a| a.trim().is_empty())
        {
            return Err(ConfigError::InvalidValue {
                field: "identity.author".into(),
                detail: "author must not be blank".into(),
            });
        }

        Ok(())
    }

    /// Load, resolve environment variables, and validate in one step.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Render this configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    if env_name.is_empty() {
        return None;
    }
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => Some(val),
        _ => {
            warn!(
                env_var = env_name,
                field, "environment variable not set or empty"
            );
            None
        }
    }
}
