//! TOML-based configuration system for gitfile.
//!
//! The provider secret is stored as a `password_env` field that references an
//! environment variable name. The actual secret is resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::resource::GitFileSpec;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Credentials shared by every repository operation.
    pub provider: ProviderConfig,

    /// Repository client tuning.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Managed files.
    #[serde(default)]
    pub files: Vec<GitFileSpec>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Provider-level credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Username for HTTP basic authentication.
    pub username: String,

    /// Environment variable holding the password or access token.
    pub password_env: String,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("username", &self.username)
            .field("password_env", &self.password_env)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Repository client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Shallow clone depth (default 1). `0` fetches full history.
    #[serde(default = "default_clone_depth")]
    pub clone_depth: u32,

    /// Push retries after a non-fast-forward rejection (default 3).
    #[serde(default = "default_max_push_retries")]
    pub max_push_retries: u32,

    /// Tool name embedded in generated commit messages (default `terraform`).
    #[serde(default = "default_commit_tool")]
    pub commit_tool: String,
}

fn default_clone_depth() -> u32 {
    1
}
fn default_max_push_retries() -> u32 {
    3
}
fn default_commit_tool() -> String {
    "terraform".into()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            clone_depth: default_clone_depth(),
            max_push_retries: default_max_push_retries(),
            commit_tool: default_commit_tool(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!(files = config.files.len(), "configuration parsed successfully");
        Ok(config)
    }

    /// Resolve `provider.password_env` from the environment.
    ///
    /// A missing variable logs a warning but does **not** fail here;
    /// [`validate`](Self::validate) rejects a config without a password.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");
        self.provider.password =
            resolve_optional_env(&self.provider.password_env, "provider.password_env");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.username.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "provider.username".into(),
                detail: "username must not be empty".into(),
            });
        }
        if self.provider.password.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "provider.password_env".into(),
                detail: format!(
                    "environment variable '{}' is not set",
                    self.provider.password_env
                ),
            });
        }
        if self.client.commit_tool.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "client.commit_tool".into(),
                detail: "commit tool name must not be empty".into(),
            });
        }

        for (idx, file) in self.files.iter().enumerate() {
            file.validate().map_err(|e| ConfigError::InvalidValue {
                field: format!("files[{}]", idx),
                detail: e.to_string(),
            })?;
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
