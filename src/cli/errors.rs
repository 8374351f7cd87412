//! CLI-specific error types
//!
//! Domain errors keep their own `RT_*` code when they surface here.

use std::fmt;
use std::io;

use crate::configuration::ConfigurationError;
use crate::quorum::QuorumError;
use crate::settings::SettingsError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration document could not be read
    ConfigError,
    /// I/O error (stdin/stdout)
    IoError,
    /// Async runtime could not be started
    RuntimeError,
    /// Error raised by a library module, with its own code
    Domain(&'static str),
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "RT_CLI_CONFIG_ERROR",
            Self::IoError => "RT_CLI_IO_ERROR",
            Self::RuntimeError => "RT_CLI_RUNTIME_ERROR",
            Self::Domain(code) => code,
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn runtime_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::RuntimeError, msg)
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<ConfigurationError> for CliError {
    fn from(e: ConfigurationError) -> Self {
        Self::new(CliErrorCode::Domain(e.code()), e.to_string())
    }
}

impl From<QuorumError> for CliError {
    fn from(e: QuorumError) -> Self {
        Self::new(CliErrorCode::Domain(e.code()), e.to_string())
    }
}

impl From<SettingsError> for CliError {
    fn from(e: SettingsError) -> Self {
        Self::new(CliErrorCode::Domain(e.code()), e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_code_survives() {
        let err: CliError = ConfigurationError::ViewNotFound("v9".into()).into();
        assert_eq!(err.code_str(), ConfigurationError::ViewNotFound("v9".into()).code());
        assert!(err.message().contains("v9"));
    }

    #[test]
    fn test_display() {
        let err = CliError::config_error("bad file");
        assert_eq!(err.to_string(), "RT_CLI_CONFIG_ERROR: bad file");
    }
}
