//! Global error types for the Socket.IO client workspace.
//!
//! Configuration, I/O, serialization and runtime failures are unified into a
//! single `SioError` enum with conversions from underlying library errors.
//! Engine-level failures live in `sio-socket` and convert into `SioError`.

use thiserror::Error;

/// Convenience type alias for Results using SioError.
pub type SioResult<T> = Result<T, SioError>;

/// Unified error type for everything outside the protocol engine.
#[derive(Error, Debug)]
pub enum SioError {
    // -- Configuration errors --
    /// Failed to load or parse configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Connection errors --
    /// The Socket.IO engine reported a failure.
    #[error("socket error: {0}")]
    Socket(String),

    /// The client is not connected.
    #[error("not connected")]
    NotConnected,

    /// An operation did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Logging could not be initialized.
    #[error("logging error: {0}")]
    Logging(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for SioError {
    fn from(e: serde_json::Error) -> Self {
        SioError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for SioError {
    fn from(e: toml::de::Error) -> Self {
        SioError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sio_error_display() {
        let err = SioError::Config("bad value".to_string());
        assert_eq!(err.to_string(), "configuration error: bad value");
        assert_eq!(SioError::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn test_json_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: SioError = parse.unwrap_err().into();
        assert!(matches!(err, SioError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let parse = toml::from_str::<toml::Value>("key = ");
        let err: SioError = parse.unwrap_err().into();
        assert!(err.to_string().starts_with("configuration error"));
    }
}
