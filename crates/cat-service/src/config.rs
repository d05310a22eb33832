//! Rig configuration
//!
//! Configuration is the only durable input to the service. It is supplied
//! through a [`ConfigProvider`] (an in-memory [`AppConfig`] or a JSON file via
//! [`FileConfigProvider`]) and checked by an explicit [`ConfigValidator`]
//! before the service builds anything from it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cat_protocol::{CommandDefinition, CommandTemplate, SerialConfig, StateDefinition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Listener tick used when the configured interval is unset
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
/// Read deadline used when neither the CAT nor the serial config set one
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;
/// Send/processing queue capacity used when unset
pub const DEFAULT_QUEUE_SIZE: usize = 16;
/// Status mailbox capacity used when unset
pub const DEFAULT_STATUS_QUEUE_SIZE: usize = 1;

/// Errors loading or validating configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    /// The config file is not valid JSON for [`AppConfig`]
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// No rig with the requested id
    #[error("rig {0} not found")]
    RigNotFound(i64),

    /// Structural validation failed
    #[error("{0}")]
    Invalid(String),
}

/// Settings every deployment must provide
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequiredConfigs {
    /// Rig driven by the service; ids start at 1
    pub default_rig_id: i64,
}

/// Timing and queue settings for the pipeline (0 means "use the default")
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatConfig {
    /// Listener tick interval in milliseconds
    pub poll_interval_ms: u64,
    /// Listener read deadline in milliseconds
    pub read_timeout_ms: u64,
    /// Outbound command queue capacity
    pub send_queue_size: usize,
    /// Matched-line queue capacity between listener and processor
    pub processing_queue_size: usize,
    /// Status mailbox capacity; `Some(0)` means unbuffered
    pub status_queue_size: Option<usize>,
}

/// Everything needed to drive one rig
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Rig id referenced by [`RequiredConfigs::default_rig_id`]
    pub id: i64,
    /// Display name
    pub name: String,
    /// Serial link settings
    pub serial: SerialConfig,
    /// Pipeline timing and queue settings
    pub cat: CatConfig,
    /// Recognized response lines
    pub states: Vec<StateDefinition>,
    /// Outbound command templates
    pub commands: Vec<CommandDefinition>,
}

impl RigConfig {
    /// Fill in defaults for unset timing and queue settings
    pub fn with_defaults(mut self) -> Self {
        if self.cat.poll_interval_ms == 0 {
            self.cat.poll_interval_ms = DEFAULT_POLL_INTERVAL_MS;
        }
        if self.cat.read_timeout_ms == 0 {
            self.cat.read_timeout_ms = if self.serial.read_timeout_ms > 0 {
                self.serial.read_timeout_ms
            } else {
                DEFAULT_READ_TIMEOUT_MS
            };
        }
        if self.cat.send_queue_size == 0 {
            self.cat.send_queue_size = DEFAULT_QUEUE_SIZE;
        }
        if self.cat.processing_queue_size == 0 {
            self.cat.processing_queue_size = DEFAULT_QUEUE_SIZE;
        }
        if self.cat.status_queue_size.is_none() {
            self.cat.status_queue_size = Some(DEFAULT_STATUS_QUEUE_SIZE);
        }
        self
    }

    /// Listener tick interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.cat.poll_interval_ms.max(1))
    }

    /// Listener read deadline
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.cat.read_timeout_ms.max(1))
    }

    /// Status mailbox capacity
    pub fn status_capacity(&self) -> usize {
        self.cat
            .status_queue_size
            .unwrap_or(DEFAULT_STATUS_QUEUE_SIZE)
    }
}

/// Source of rig configuration
pub trait ConfigProvider: Send + Sync {
    /// Deployment-wide required settings
    fn required_configs(&self) -> Result<RequiredConfigs, ConfigError>;

    /// Configuration for one rig
    fn rig_config_by_id(&self, id: i64) -> Result<RigConfig, ConfigError>;
}

/// Whole-application configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Required settings
    pub required: RequiredConfigs,
    /// Configured rigs
    pub rigs: Vec<RigConfig>,
}

impl AppConfig {
    /// Parse a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

impl ConfigProvider for AppConfig {
    fn required_configs(&self) -> Result<RequiredConfigs, ConfigError> {
        Ok(self.required.clone())
    }

    fn rig_config_by_id(&self, id: i64) -> Result<RigConfig, ConfigError> {
        self.rigs
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(ConfigError::RigNotFound(id))
    }
}

/// [`ConfigProvider`] backed by a JSON file
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    path: PathBuf,
    config: AppConfig,
}

impl FileConfigProvider {
    /// Load and parse a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            config: AppConfig::from_json(&text)?,
        })
    }

    /// Default config location
    ///
    /// `$XDG_CONFIG_HOME/cat-monitor/config.json`, falling back to
    /// `~/.config/cat-monitor/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("cat-monitor").join("config.json"));
            }
        }
        dirs::home_dir().map(|h| h.join(".config").join("cat-monitor").join("config.json"))
    }

    /// Path the config was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The parsed document
    pub fn app_config(&self) -> &AppConfig {
        &self.config
    }
}

impl ConfigProvider for FileConfigProvider {
    fn required_configs(&self) -> Result<RequiredConfigs, ConfigError> {
        self.config.required_configs()
    }

    fn rig_config_by_id(&self, id: i64) -> Result<RigConfig, ConfigError> {
        self.config.rig_config_by_id(id)
    }
}

/// Structural validator for [`RigConfig`]
///
/// Construct once and hand to every component that needs it. Blank state
/// prefixes are deliberately left to the state table, which reports them
/// with their position.
#[derive(Debug, Clone)]
pub struct ConfigValidator {
    max_queue_size: usize,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigValidator {
    /// Create a validator with the default queue ceiling
    pub fn new() -> Self {
        Self {
            max_queue_size: 65_536,
        }
    }

    /// Override the largest queue capacity accepted
    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    /// Check a rig config, reporting every problem found
    pub fn validate(&self, cfg: &RigConfig) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if cfg.serial.port.trim().is_empty() {
            problems.push("serial.port is required".to_string());
        }
        if cfg.serial.baud_rate == 0 {
            problems.push("serial.baud_rate must be positive".to_string());
        }
        if !(5..=8).contains(&cfg.serial.data_bits) {
            problems.push(format!(
                "serial.data_bits must be 5-8, got {}",
                cfg.serial.data_bits
            ));
        }
        if cfg.serial.line_terminator.is_empty() {
            problems.push("serial.line_terminator is required".to_string());
        }

        for (field, size) in [
            ("cat.send_queue_size", cfg.cat.send_queue_size),
            ("cat.processing_queue_size", cfg.cat.processing_queue_size),
            ("cat.status_queue_size", cfg.cat.status_queue_size.unwrap_or(0)),
        ] {
            if size > self.max_queue_size {
                problems.push(format!("{field} exceeds {}", self.max_queue_size));
            }
        }

        for (i, state) in cfg.states.iter().enumerate() {
            for marker in &state.markers {
                if marker.tag.trim().is_empty() {
                    problems.push(format!("states[{i}] has a marker without a tag"));
                }
            }
        }

        let mut names = HashSet::new();
        for (i, command) in cfg.commands.iter().enumerate() {
            if command.name.trim().is_empty() {
                problems.push(format!("commands[{i}].name is required"));
            } else if !names.insert(command.name.as_str()) {
                problems.push(format!("duplicate command name {}", command.name));
            }
            if let Err(e) = CommandTemplate::parse(command) {
                problems.push(e.to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }
}
