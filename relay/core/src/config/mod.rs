//! TOML Configuration File Support
//!
//! Loads relay configuration from `$XDG_CONFIG_HOME/agent-relay/relay.toml`
//! (typically `~/.config/agent-relay/relay.toml`).
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [agent]
//! command = "python3"
//! args = ["streaming_agent.py"]
//! working_dir = "/opt/agent"
//!
//! [agent.env]
//! PYTHONUNBUFFERED = "1"
//!
//! [stream]
//! timeout_secs = 300
//! idle_timeout_secs = 60
//!
//! [logging]
//! filter = "relay_core=debug"
//! ```
//!
//! # Environment Variables
//!
//! | Variable                  | Overrides                   |
//! |---------------------------|-----------------------------|
//! | `RELAY_AGENT_COMMAND`     | `agent.command`             |
//! | `RELAY_AGENT_ARGS`        | `agent.args` (whitespace)   |
//! | `RELAY_TIMEOUT_SECS`      | `stream.timeout_secs`       |
//! | `RELAY_IDLE_TIMEOUT_SECS` | `stream.idle_timeout_secs`  |
//! | `RELAY_LOG`               | `logging.filter`            |
//!
//! Timeout variables must parse as whole seconds; anything else fails loading.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::CoordinatorConfig;
use crate::producer::AgentCommand;

/// Log filter used when nothing else is configured
pub const DEFAULT_LOG_FILTER: &str = "relay=info,relay_core=info";

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
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line arguments
    Cli,
    /// Environment variables
    Env,
    /// TOML configuration file
    File,
    /// Defaults only
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
// TOML Configuration Structures
// =============================================================================

/// `[agent]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentToml {
    /// Agent executable
    pub command: Option<String>,

    /// Agent arguments
    pub args: Option<Vec<String>>,

    /// Working directory for the agent process
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables for the agent process
    pub env: BTreeMap<String, String>,
}

/// `[stream]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Total session timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Idle timeout between producer events in seconds
    pub idle_timeout_secs: Option<u64>,
}

/// `[logging]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingToml {
    /// `tracing` filter directive
    pub filter: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Agent process section
    pub agent: AgentToml,

    /// Stream watchdog section
    pub stream: StreamToml,

    /// Logging section
    pub logging: LoggingToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved relay configuration
///
/// Use [`load_config`] to load it with proper priority handling, then apply
/// [`ConfigOverrides`] from the command line.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Agent executable, if configured anywhere
    pub agent_program: Option<String>,

    /// Agent arguments
    pub agent_args: Vec<String>,

    /// Agent working directory
    pub agent_working_dir: Option<PathBuf>,

    /// Extra agent environment
    pub agent_env: BTreeMap<String, String>,

    /// Coordinator settings (watchdog)
    pub coordinator: CoordinatorConfig,

    /// `tracing` filter directive
    pub log_filter: String,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            agent_program: None,
            agent_args: Vec::new(),
            agent_working_dir: None,
            agent_env: BTreeMap::new(),
            coordinator: CoordinatorConfig::watchdog(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Agent command, if a program is configured
    #[must_use]
    pub fn agent_command(&self) -> Option<AgentCommand> {
        let program = self.agent_program.as_ref()?;
        let mut command = AgentCommand::new(program.clone()).with_args(self.agent_args.clone());
        if let Some(dir) = &self.agent_working_dir {
            command = command.with_working_dir(dir.clone());
        }
        for (key, value) in &self.agent_env {
            command = command.with_env(key.clone(), value.clone());
        }
        Some(command)
    }

    /// Check the configuration for values that cannot work
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an empty agent command or
    /// a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(program) = &self.agent_program {
            if program.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "agent command must not be empty".to_string(),
                ));
            }
        }
        if self.coordinator.total_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ValidationError(
                "stream timeout must be greater than zero".to_string(),
            ));
        }
        if self.coordinator.idle_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ValidationError(
                "stream idle timeout must be greater than zero".to_string(),
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
/// Returns `$XDG_CONFIG_HOME/agent-relay/relay.toml` or
/// `~/.config/agent-relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("agent-relay").join("relay.toml"))
}

/// Load configuration from the default file and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// result fails validation. A missing config file is not an error.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or the result fails
/// validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_with_env(path, |key| std::env::var(key).ok())
}

fn load_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<RelayConfig, ConfigError> {
    let mut config = RelayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RelayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
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

    apply_env_config(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

fn apply_toml_config(config: &mut RelayConfig, toml: RelayToml) {
    if toml.agent.command.is_some() {
        config.agent_program = toml.agent.command;
    }
    if let Some(args) = toml.agent.args {
        config.agent_args = args;
    }
    if toml.agent.working_dir.is_some() {
        config.agent_working_dir = toml.agent.working_dir;
    }
    config.agent_env.extend(toml.agent.env);

    if let Some(secs) = toml.stream.timeout_secs {
        config.coordinator.total_timeout = Some(Duration::from_secs(secs));
    }
    if let Some(secs) = toml.stream.idle_timeout_secs {
        config.coordinator.idle_timeout = Some(Duration::from_secs(secs));
    }

    if let Some(filter) = toml.logging.filter {
        config.log_filter = filter;
    }
}

fn apply_env_config(
    config: &mut RelayConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(command) = env("RELAY_AGENT_COMMAND") {
        config.agent_program = Some(command);
        config.source = ConfigSource::Env;
    }
    if let Some(args) = env("RELAY_AGENT_ARGS") {
        config.agent_args = args.split_whitespace().map(str::to_string).collect();
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = parse_secs(&env, "RELAY_TIMEOUT_SECS")? {
        config.coordinator.total_timeout = Some(Duration::from_secs(secs));
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = parse_secs(&env, "RELAY_IDLE_TIMEOUT_SECS")? {
        config.coordinator.idle_timeout = Some(Duration::from_secs(secs));
        config.source = ConfigSource::Env;
    }
    if let Some(filter) = env("RELAY_LOG") {
        config.log_filter = filter;
        config.source = ConfigSource::Env;
    }
    Ok(())
}

fn parse_secs(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = env(key) else {
        return Ok(None);
    };
    raw.trim().parse::<u64>().map(Some).map_err(|e| {
        ConfigError::ValidationError(format!("{key} must be a whole number of seconds: {e}"))
    })
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Agent executable override
    pub agent_program: Option<String>,
    /// Agent arguments override
    pub agent_args: Option<Vec<String>>,
    /// Total timeout override (seconds)
    pub timeout_secs: Option<u64>,
    /// Idle timeout override (seconds)
    pub idle_timeout_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Create an empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set agent executable override
    #[must_use]
    pub fn with_agent_program(mut self, program: impl Into<String>) -> Self {
        self.agent_program = Some(program.into());
        self
    }

    /// Set agent arguments override
    #[must_use]
    pub fn with_agent_args(mut self, args: Vec<String>) -> Self {
        self.agent_args = Some(args);
        self
    }

    /// Set total timeout override
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Set idle timeout override
    #[must_use]
    pub fn with_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = Some(secs);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agent_program.is_none()
            && self.agent_args.is_none()
            && self.timeout_secs.is_none()
            && self.idle_timeout_secs.is_none()
    }

    /// Apply overrides to a configuration and re-validate it
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the result is invalid.
    pub fn apply(&self, config: &mut RelayConfig) -> Result<(), ConfigError> {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }
        if let Some(ref program) = self.agent_program {
            config.agent_program = Some(program.clone());
        }
        if let Some(ref args) = self.agent_args {
            config.agent_args.clone_from(args);
        }
        if let Some(secs) = self.timeout_secs {
            config.coordinator.total_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.coordinator.idle_timeout = Some(Duration::from_secs(secs));
        }
        config.validate()
    }
}
