//! Error types for the gateway platform layer

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[source] io::Error),

    /// An external OS tool failed to run or exited non-zero
    #[error("Command '{cmd}' failed{}: {stderr}", .code.map(|c| format!(" with code {}", c)).unwrap_or_default())]
    CommandFailed {
        cmd: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Not found (binary, interface, address, gateway, TUN interface)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation needs elevated privileges
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Unparsable tool output or file content
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Not supported on this platform
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Service manager error (systemd, launchd, SCM)
    #[error("Service error: {0}")]
    ServiceError(String),
}

impl GatewayError {
    /// True for the advisory "nothing there" outcome of an inspection query.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

impl From<io::Error> for GatewayError {
    fn from(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::PermissionDenied {
            GatewayError::PermissionDenied(error.to_string())
        } else {
            GatewayError::Io(error)
        }
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(error: toml::de::Error) -> Self {
        GatewayError::ConfigError(format!("Failed to parse config: {}", error))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
