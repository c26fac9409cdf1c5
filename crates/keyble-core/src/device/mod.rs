//! Lock communication layer.
//!
//! The registration flow only talks to locks through [`LockConnector`] and
//! [`LockSession`]. `ble` implements them over Bluetooth LE; `simulated`
//! is an in-memory lock for exercising the flow without hardware.

use async_trait::async_trait;
use data_encoding::HEXUPPER;

use crate::error::DeviceError;

pub mod ble;
pub mod simulated;

/// Length of a user key in bytes
pub const USER_KEY_LENGTH: usize = 16;

/// Credentials produced by a successful pairing.
///
/// These are the only copy of the user key; the operator needs them for
/// every later operation on the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCredentials {
    pub user_id: u8,
    pub user_key: [u8; USER_KEY_LENGTH],
}

impl PairingCredentials {
    pub fn user_key_hex(&self) -> String {
        HEXUPPER.encode(&self.user_key)
    }
}

/// Opens sessions to locks.
#[async_trait]
pub trait LockConnector: Send + Sync {
    type Session: LockSession;

    /// Connect to the lock at `address` and prepare it for commands.
    async fn open(&self, address: &str) -> Result<Self::Session, DeviceError>;
}

/// One open connection to a single lock.
///
/// Sessions are never reused: `close` consumes the session.
#[async_trait]
pub trait LockSession: Send {
    /// Register a new user with the card key. The lock must be in pairing mode.
    async fn pairing_request(&mut self, card_key: &[u8; 16])
        -> Result<PairingCredentials, DeviceError>;

    /// Label the user created by the preceding pairing.
    async fn set_user_name(&mut self, name: &str) -> Result<(), DeviceError>;

    /// Release the connection.
    async fn close(self) -> Result<(), DeviceError>;
}
