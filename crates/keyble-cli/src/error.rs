//! Error types for the keyble CLI.
//!
//! CliError wraps CoreError from the shared library and adds CLI-specific variants.

use keyble_core::error::CoreError;
use thiserror::Error;

pub use keyble_core::error::{ConfigError, DeviceError};

/// Exit codes for the CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
}

/// Main error type for the CLI
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registration failed: {succeeded} succeeded, {failed} failed")]
    RegistrationFailed { succeeded: usize, failed: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl CliError {
    /// Get the exit code for this error
    ///
    /// Every failure exits with the same code; the message tells them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Core(_)
            | CliError::Io(_)
            | CliError::RegistrationFailed { .. }
            | CliError::InvalidArgument(_) => exit_codes::GENERAL_ERROR,
        }
    }
}

impl From<DeviceError> for CliError {
    fn from(e: DeviceError) -> Self {
        CliError::Core(CoreError::Device(e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Core(CoreError::Config(e))
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
