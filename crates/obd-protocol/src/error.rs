//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur while talking to an ELM327 adapter
#[derive(Debug, Error)]
pub enum ObdError {
    /// Serial port could not be opened or the stream failed
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No prompt arrived before the read timeout elapsed
    #[error("Timeout waiting for ELM327 prompt after {0}ms")]
    Timeout(u64),

    /// The adapter closed the stream before sending a prompt
    #[error("ELM327 closed the connection before the prompt")]
    Disconnected,

    /// A request was issued while no serial port is open
    #[error("Serial port is not open")]
    NotConnected,

    /// Response payload could not be decoded as hex data
    #[error("Cannot decode response payload: {0}")]
    Decode(String),

    /// No trouble code prefix is registered for a leading nibble
    #[error("No trouble code prefix for nibble '{0}'")]
    UnknownTroubleCodePrefix(char),

    /// The key does not name any implemented PID
    #[error("PID {0} is not implemented")]
    UnknownPid(String),

    /// A lookup table file could not be read
    #[error("Failed to read table {path}: {reason}")]
    TableLoad { path: String, reason: String },

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}

impl From<hex::FromHexError> for ObdError {
    fn from(err: hex::FromHexError) -> Self {
        ObdError::Decode(err.to_string())
    }
}

impl From<config::ConfigError> for ObdError {
    fn from(err: config::ConfigError) -> Self {
        ObdError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_serial_error() {
        let err: ObdError = std::io::Error::new(std::io::ErrorKind::NotFound, "no tty").into();
        assert!(matches!(err, ObdError::SerialError(ref msg) if msg.contains("no tty")));
    }

    #[test]
    fn test_hex_error_maps_to_decode() {
        let err: ObdError = hex::decode("4G").unwrap_err().into();
        assert!(matches!(err, ObdError::Decode(_)));
    }
}
