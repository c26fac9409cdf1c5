//! Error types for keyble core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for shared operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Malformed key card: {0}")]
    Credential(#[from] CredentialError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Classify the error for outcome reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Credential(_) => ErrorKind::MalformedCredential,
            CoreError::Device(e) => e.kind(),
            CoreError::Protocol(_) => ErrorKind::TransportFault,
            CoreError::Config(_) => ErrorKind::InvalidConfig,
            CoreError::Io(_) => ErrorKind::InputUnavailable,
        }
    }
}

/// Outcome-level classification of a failure.
///
/// All kinds map to the same process exit code; the distinction only
/// feeds the operator-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedCredential,
    ConnectionFailed,
    PairingRejected,
    PairingTimeout,
    WriteRejected,
    TransportFault,
    InputUnavailable,
    InvalidConfig,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedCredential => "malformed credential",
            ErrorKind::ConnectionFailed => "connection failed",
            ErrorKind::PairingRejected => "pairing rejected",
            ErrorKind::PairingTimeout => "pairing timeout",
            ErrorKind::WriteRejected => "write rejected",
            ErrorKind::TransportFault => "transport fault",
            ErrorKind::InputUnavailable => "input unavailable",
            ErrorKind::InvalidConfig => "invalid config",
        }
    }
}

/// Key card decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("expected {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("'{0}' is not a key card payload (expected M<address>K<key><serial>)")]
    InvalidFormat(String),
}

/// Lock session errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Could not connect to {address}: {message}")]
    ConnectionFailed { address: String, message: String },

    #[error("Pairing rejected by {address}: {message}")]
    PairingRejected { address: String, message: String },

    #[error("No pairing answer from {address} (is the lock in pairing mode?)")]
    PairingTimeout { address: String },

    #[error("Write rejected by {address}: {message}")]
    WriteRejected { address: String, message: String },

    #[error("Transport fault on {address}: {message}")]
    TransportFault { address: String, message: String },

    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            DeviceError::PairingRejected { .. } => ErrorKind::PairingRejected,
            DeviceError::PairingTimeout { .. } => ErrorKind::PairingTimeout,
            DeviceError::WriteRejected { .. } => ErrorKind::WriteRejected,
            DeviceError::TransportFault { .. } | DeviceError::AdapterUnavailable(_) => {
                ErrorKind::TransportFault
            }
        }
    }
}

/// eQ-3 message layer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Fragment must be {expected} bytes, got {actual}")]
    InvalidFragment { expected: usize, actual: usize },

    #[error("Fragment out of order: expected {expected} remaining, got {actual}")]
    FragmentOutOfOrder { expected: u8, actual: u8 },

    #[error("Message too long for fragmenting ({0} bytes)")]
    MessageTooLong(usize),

    #[error("Message 0x{message_type:02x} truncated ({len} data bytes)")]
    Truncated { message_type: u8, len: usize },

    #[error("Empty message")]
    Empty,

    #[error("Authentication value mismatch on message 0x{0:02x}")]
    AuthenticationMismatch(u8),

    #[error("Security counter went backwards ({received} <= {last})")]
    StaleCounter { received: u16, last: u16 },

    #[error("User name is {len} bytes, the lock accepts at most {max}")]
    UserNameTooLong { len: usize, max: usize },
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("User name cannot be empty")]
    EmptyUserName,

    #[error("User name is {len} bytes, the lock accepts at most {max}")]
    UserNameTooLong { len: usize, max: usize },
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
