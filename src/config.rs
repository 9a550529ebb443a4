//! Drive configuration.
//!
//! Timings and queue sizing, loadable from a TOML file:
//!
//! ```toml
//! selection_delay_us = 10000
//! write_gap_us = 3600
//! control_queue_depth = 16
//! command_queue_depth = 8
//! notification_queue_depth = 8
//! control_batch = 16
//! command_batch = 2
//! ```
//!
//! Missing keys take their default value.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::protocol::{SELECTION_DELAY_US, WRITE_GAP_US};

/// Default configuration file name.
pub const CONFIG_FILE: &str = "microdrive.toml";

/// Errors produced while loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for [`DriveConfig`].
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Timing and queue sizing for one emulated drive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriveConfig {
    /// Run of 1-bits on the selector line (µs) required before selection.
    pub selection_delay_us: u64,

    /// Length (µs) of the gap the emulator generates before transmitting.
    pub write_gap_us: u64,

    /// Capacity of the control-event channel.
    ///
    /// Interrupt producers never block, so this must cover the worst burst of
    /// line, DMA and alarm events between two drain iterations.
    pub control_queue_depth: usize,

    /// Capacity of the UI → engine command channel.
    pub command_queue_depth: usize,

    /// Capacity of the engine → UI notification channel.
    pub notification_queue_depth: usize,

    /// Control events handled per drain iteration.
    pub control_batch: usize,

    /// UI commands handled per drain iteration.
    pub command_batch: usize,
}

impl Default for DriveConfig {
    fn default() -> Self {
        DriveConfig {
            selection_delay_us: SELECTION_DELAY_US,
            write_gap_us: WRITE_GAP_US,
            control_queue_depth: 16,
            command_queue_depth: 8,
            notification_queue_depth: 8,
            control_batch: 16,
            command_batch: 2,
        }
    }
}

impl DriveConfig {
    /// Parse and validate a configuration from TOML text.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use microdrive::DriveConfig;
    ///
    /// let config = DriveConfig::from_toml_str("write_gap_us = 4000").unwrap();
    /// assert_eq!(config.write_gap_us, 4000);
    /// assert_eq!(config.selection_delay_us, 10_000);
    ///
    /// assert!(DriveConfig::from_toml_str("control_batch = 0").is_err());
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: DriveConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Load `path`, falling back to defaults if it is missing or unusable.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return DriveConfig::default();
        }

        match Self::load_from_path(path) {
            Ok(config) => config,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "using default drive configuration"
                );
                DriveConfig::default()
            }
        }
    }

    /// Check that every queue and batch size is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control_queue_depth == 0 {
            return Err(ConfigError::Invalid("control_queue_depth must be non-zero"));
        }
        if self.command_queue_depth == 0 {
            return Err(ConfigError::Invalid("command_queue_depth must be non-zero"));
        }
        if self.notification_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "notification_queue_depth must be non-zero",
            ));
        }
        if self.control_batch == 0 {
            return Err(ConfigError::Invalid("control_batch must be non-zero"));
        }
        if self.command_batch == 0 {
            return Err(ConfigError::Invalid("command_batch must be non-zero"));
        }
        Ok(())
    }

    /// Selection alarm delay.
    pub fn selection_delay(&self) -> Duration {
        Duration::from_micros(self.selection_delay_us)
    }

    /// Write-gap alarm delay.
    pub fn write_gap(&self) -> Duration {
        Duration::from_micros(self.write_gap_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_timings() {
        let config = DriveConfig::default();
        assert_eq!(config.selection_delay(), Duration::from_millis(10));
        assert_eq!(config.write_gap(), Duration::from_micros(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(DriveConfig::from_toml_str("").unwrap(), DriveConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = DriveConfig::from_toml_str(
            "control_queue_depth = 64\ncommand_batch = 4\n",
        )
        .unwrap();
        assert_eq!(config.control_queue_depth, 64);
        assert_eq!(config.command_batch, 4);
        assert_eq!(config.notification_queue_depth, 8);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        for key in [
            "control_queue_depth",
            "command_queue_depth",
            "notification_queue_depth",
            "control_batch",
            "command_batch",
        ] {
            let err = DriveConfig::from_toml_str(&format!("{key} = 0")).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{key}");
        }
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = DriveConfig::from_toml_str("gap = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = DriveConfig::load_or_default("/nonexistent/microdrive.toml");
        assert_eq!(config, DriveConfig::default());
        assert!(matches!(
            DriveConfig::load_from_path("/nonexistent/microdrive.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
