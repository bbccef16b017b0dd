//! Adapter configuration, loadable from a TOML file and `OBD_*` environment
//! variables.

use crate::error::ObdError;
use crate::protocol::ObdProtocol;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment variable overrides (`OBD_SERIAL_PORT`, ...)
pub const ENV_PREFIX: &str = "OBD";

/// Line terminator appended to every command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// Carriage return only
    #[default]
    Cr,
    /// Carriage return followed by line feed
    Crlf,
}

impl LineEnding {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineEnding::Cr => b"\r",
            LineEnding::Crlf => b"\r\n",
        }
    }
}

/// Settings for an ELM327 session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Elm327Config {
    /// Serial or Bluetooth-serial device path
    pub serial_port: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Per-byte read timeout in milliseconds
    pub timeout_ms: u64,
    /// Command terminator
    pub line_ending: LineEnding,
    /// Wait before and after `AT Z`, in milliseconds
    pub reset_period_ms: u64,
    /// Wait before the first bus request, in milliseconds
    pub settle_period_ms: u64,
    /// Preferred bus protocol
    pub protocol: ObdProtocol,
    /// Directory holding the lookup tables. `None` uses the built-in tables.
    pub data_dir: Option<PathBuf>,
    /// Vehicle trouble-code file merged over the ISO/SAE table
    pub vehicle_profile: Option<PathBuf>,
    /// Raise logging to debug level
    pub debug: bool,
}

impl Default for Elm327Config {
    fn default() -> Self {
        Self {
            serial_port: "/dev/rfcomm0".to_string(),
            baud_rate: 38400,
            timeout_ms: 7000,
            line_ending: LineEnding::Cr,
            reset_period_ms: 1000,
            settle_period_ms: 5000,
            protocol: ObdProtocol::Iso9141_2,
            data_dir: None,
            vehicle_profile: None,
            debug: false,
        }
    }
}

impl Elm327Config {
    /// Load configuration from an optional TOML file, then apply `OBD_*`
    /// environment overrides. Missing keys keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ObdError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_period(&self) -> Duration {
        Duration::from_millis(self.reset_period_ms)
    }

    pub fn settle_period(&self) -> Duration {
        Duration::from_millis(self.settle_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.toml", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults_match_adapter_expectations() {
        let config = Elm327Config::default();
        assert_eq!(config.baud_rate, 38400);
        assert_eq!(config.timeout(), Duration::from_secs(7));
        assert_eq!(config.reset_period(), Duration::from_secs(1));
        assert_eq!(config.settle_period(), Duration::from_secs(5));
        assert_eq!(config.protocol, ObdProtocol::Iso9141_2);
        assert_eq!(config.line_ending.as_bytes(), b"\r");
    }

    #[test]
    fn test_load_from_file_keeps_defaults_for_missing_keys() {
        let path = write_temp_config(
            "elm327-partial",
            r#"
serial_port = "/dev/ttyUSB0"
line_ending = "crlf"
protocol = "iso15765_4_can11bit500"
"#,
        );
        let config = Elm327Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.serial_port, "/dev/ttyUSB0");
        assert_eq!(config.line_ending, LineEnding::Crlf);
        assert_eq!(config.protocol, ObdProtocol::Iso15765_4Can11bit500);
        assert_eq!(config.timeout_ms, 7000);
        assert!(config.vehicle_profile.is_none());
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let path = std::env::temp_dir().join("elm327-does-not-exist.toml");
        let err = Elm327Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ObdError::Config(_)));
    }
}
