//! TOML Configuration File Support
//!
//! Configuration for the auto-attach client, loaded from
//! `~/.config/wayvnc-autoattach/config.toml`.
//!
//! # Configuration Priority
//!
//! Values are applied in this order (later wins):
//! 1. Default values
//! 2. TOML configuration file
//! 3. Environment variables
//! 4. CLI arguments (applied by the daemon)
//!
//! # Example Configuration
//!
//! ```toml
//! socket_path = "/tmp/wayvnc/wayvncctl.sock"
//! display_pattern = "/run/user/*/wayland-*"
//! retry_interval_ms = 1000
//! reply_timeout_ms = 5000
//! acl_user = "vnc"
//! ```
//!
//! # Environment Variables
//!
//! - `WAYVNC_CTL_SOCKET`: control socket path
//! - `AUTOATTACH_DISPLAY_PATTERN`: glob for candidate displays
//! - `AUTOATTACH_RETRY_INTERVAL_MS`: pause between failed attach passes
//! - `AUTOATTACH_REPLY_TIMEOUT_MS`: reply timeout (0 = wait forever)
//! - `AUTOATTACH_ACL_USER`: grant this user access to the display first

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::surfaces::{DEFAULT_DISPLAY_PATTERN, LOCK_SUFFIX};

/// Default control socket of a stock wayvnc
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/wayvncctl-0";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structure
// =============================================================================

/// Contents of the TOML file; every key is optional
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AutoAttachToml {
    /// Control socket path
    pub socket_path: Option<PathBuf>,

    /// Glob matching candidate displays
    pub display_pattern: Option<String>,

    /// Explicit candidate displays, tried in order instead of the pattern
    pub displays: Option<Vec<PathBuf>>,

    /// Suffix of lock files to skip
    pub lock_suffix: Option<String>,

    /// Pause between failed attach passes in milliseconds
    pub retry_interval_ms: Option<u64>,

    /// Reply timeout in milliseconds (0 = wait forever)
    pub reply_timeout_ms: Option<u64>,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// User granted access to each display before attaching
    pub acl_user: Option<String>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration
#[derive(Clone, Debug)]
pub struct AutoAttachConfig {
    /// Control socket path
    pub socket_path: PathBuf,

    /// Glob matching candidate displays
    pub display_pattern: String,

    /// Explicit candidate displays; overrides `display_pattern` when set
    pub displays: Option<Vec<PathBuf>>,

    /// Suffix of lock files to skip
    pub lock_suffix: String,

    /// Pause between failed attach passes
    pub retry_interval: Duration,

    /// How long to wait for a reply (None = forever)
    pub reply_timeout: Option<Duration>,

    /// How long to wait for the socket connection
    pub connect_timeout: Duration,

    /// User granted access to each display before attaching
    pub acl_user: Option<String>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for AutoAttachConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            display_pattern: DEFAULT_DISPLAY_PATTERN.to_string(),
            displays: None,
            lock_suffix: LOCK_SUFFIX.to_string(),
            retry_interval: Duration::from_secs(1),
            reply_timeout: None,
            connect_timeout: Duration::from_secs(5),
            acl_user: None,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl AutoAttachConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check values that would make the client unusable
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "socket_path must not be empty".to_string(),
            ));
        }
        if self.retry_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "retry_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.displays.is_none() {
            glob::Pattern::new(&self.display_pattern).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "display_pattern {:?} is not a valid glob: {e}",
                    self.display_pattern
                ))
            })?;
        }
        if self.acl_user.as_deref() == Some("") {
            return Err(ConfigError::ValidationError(
                "acl_user must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/wayvnc-autoattach/config.toml` or
/// `~/.config/wayvnc-autoattach/config.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("wayvnc-autoattach").join("config.toml"))
}

/// Load configuration from the default path
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<AutoAttachConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<AutoAttachConfig, ConfigError> {
    let mut config = AutoAttachConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: AutoAttachToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut AutoAttachConfig, toml: &AutoAttachToml) {
    if let Some(ref path) = toml.socket_path {
        config.socket_path = path.clone();
    }
    if let Some(ref pattern) = toml.display_pattern {
        config.display_pattern = pattern.clone();
    }
    if let Some(ref displays) = toml.displays {
        config.displays = Some(displays.clone());
    }
    if let Some(ref suffix) = toml.lock_suffix {
        config.lock_suffix = suffix.clone();
    }
    if let Some(ms) = toml.retry_interval_ms {
        config.retry_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.reply_timeout_ms {
        config.reply_timeout = reply_timeout_from_ms(ms);
    }
    if let Some(ms) = toml.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(ref user) = toml.acl_user {
        config.acl_user = Some(user.clone());
    }
}

/// Apply environment variable overrides
///
/// `lookup` is `std::env::var` in production; tests pass a map instead of
/// touching the process environment.
fn apply_env_config(config: &mut AutoAttachConfig, lookup: impl Fn(&str) -> Option<String>) {
    let mut applied = false;

    if let Some(path) = lookup("WAYVNC_CTL_SOCKET") {
        config.socket_path = PathBuf::from(path);
        applied = true;
    }
    if let Some(pattern) = lookup("AUTOATTACH_DISPLAY_PATTERN") {
        config.display_pattern = pattern;
        config.displays = None;
        applied = true;
    }
    if let Some(ms) = lookup("AUTOATTACH_RETRY_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        config.retry_interval = Duration::from_millis(ms);
        applied = true;
    }
    if let Some(ms) = lookup("AUTOATTACH_REPLY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.reply_timeout = reply_timeout_from_ms(ms);
        applied = true;
    }
    if let Some(user) = lookup("AUTOATTACH_ACL_USER") {
        config.acl_user = Some(user);
        applied = true;
    }

    if applied {
        config.source = ConfigSource::Env;
    }
}

fn reply_timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
