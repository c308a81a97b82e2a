//! Scanner configuration loading and validation.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `PALMBEACH_*` environment variables. Command-line overrides are
//! applied by the binary on top of the loaded value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::registry::PresenceSettings;

/// Prefix for environment overrides, e.g. `PALMBEACH_TIMEOUT_IN=5`.
pub const ENV_PREFIX: &str = "PALMBEACH";

/// Longest accepted departure timeout: one day.
const MAX_TIMEOUT_OUT_SECS: u64 = 86_400;

static HCI_DEVICE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^hci[0-9]+$").expect("HCI device pattern is valid"));

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A field holds an invalid value.
    #[error("Invalid {field}: {message}")]
    ValidationError {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// More than one field is invalid.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Everything the scanner needs to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// HCI adapter to capture from.
    pub device: String,

    /// Largest signal strength (weakest signal) still accepted.
    pub sensitivity: u16,

    /// Sightings required before a beacon is reported present.
    pub timeout_in: u32,

    /// Seconds without a sighting before a beacon is reported gone.
    pub timeout_out_secs: u64,

    /// Collector endpoint. Reporting is disabled when unset.
    pub collector_url: Option<Url>,

    /// Room or location reported to the collector.
    pub room: String,

    /// Log every frame and reading.
    pub verbose: bool,

    /// Capture poll timeout in milliseconds.
    pub poll_interval_ms: u64,

    /// Collector request timeout in milliseconds.
    pub notify_timeout_ms: u64,

    /// Reference power for distance estimates.
    pub reference_power: u16,

    /// Played when a beacon appears.
    pub appear_sound: Option<PathBuf>,

    /// Played when a beacon disappears.
    pub disappear_sound: Option<PathBuf>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            device: "hci0".to_string(),
            sensitivity: 100,
            timeout_in: 10,
            timeout_out_secs: 60,
            collector_url: None,
            room: "default".to_string(),
            verbose: false,
            poll_interval_ms: 500,
            notify_timeout_ms: 1000,
            reference_power: crate::distance::DEFAULT_REFERENCE_POWER,
            appear_sound: None,
            disappear_sound: None,
        }
    }
}

impl ScannerConfig {
    /// Loads defaults, then `path` (if given and present), then environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file is malformed or a value has
    /// the wrong type.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SerializeError`] if serialization fails.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns a single [`ConfigError::ValidationError`] or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &'static str, message: String| {
            errors.push(ConfigError::ValidationError { field, message });
        };

        if !is_valid_hci_device(&self.device) {
            invalid("device", format!("'{}' is not an HCI device like hci0", self.device));
        }
        if self.sensitivity == 0 {
            invalid("sensitivity", "must be greater than zero".into());
        }
        if self.timeout_in == 0 {
            invalid("timeout_in", "must be at least one sighting".into());
        }
        if !(1..=MAX_TIMEOUT_OUT_SECS).contains(&self.timeout_out_secs) {
            invalid(
                "timeout_out_secs",
                format!("{} is outside 1..={MAX_TIMEOUT_OUT_SECS}", self.timeout_out_secs),
            );
        }
        if self.room.trim().is_empty() {
            invalid("room", "must not be empty".into());
        }
        if !(100..=1000).contains(&self.poll_interval_ms) {
            invalid(
                "poll_interval_ms",
                format!("{} is outside 100..=1000", self.poll_interval_ms),
            );
        }
        if self.notify_timeout_ms == 0 {
            invalid("notify_timeout_ms", "must be greater than zero".into());
        }
        if self.reference_power == 0 {
            invalid("reference_power", "must be greater than zero".into());
        }
        if let Some(url) = &self.collector_url {
            if !matches!(url.scheme(), "http" | "https") {
                invalid("collector_url", format!("unsupported scheme '{}'", url.scheme()));
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Debounce settings for the presence registry.
    #[must_use]
    pub fn presence_settings(&self) -> PresenceSettings {
        PresenceSettings {
            timeout_in: self.timeout_in,
            timeout_out: chrono::Duration::seconds(
                i64::try_from(self.timeout_out_secs.min(MAX_TIMEOUT_OUT_SECS)).unwrap_or(0),
            ),
        }
    }

    /// Capture poll timeout.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Collector request timeout.
    #[must_use]
    pub const fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    /// Default configuration file location.
    ///
    /// `/etc/palmbeach/scanner.toml` on Linux, the per-user config directory
    /// elsewhere.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            Some(PathBuf::from("/etc/palmbeach/scanner.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "palmbeach")
                .map(|dirs| dirs.config_dir().join("scanner.toml"))
        }
    }
}

/// Whether `device` names an HCI adapter (`hci0`, `hci1`, ...).
#[must_use]
pub fn is_valid_hci_device(device: &str) -> bool {
    HCI_DEVICE_REGEX.is_match(device)
}
