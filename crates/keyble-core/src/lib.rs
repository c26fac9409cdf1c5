//! Core library for registering users on eQ-3 eqiva Bluetooth smart locks.
//!
//! - [`keycard`]: key card QR payload decoding
//! - [`feed`]: credential input from a single value or a line stream
//! - [`device`]: lock session contract, BLE implementation and simulated lock
//! - [`protocol`]: eQ-3 message layer (fragments, crypto, messages)
//! - [`registration`]: the registration flow

pub mod device;
pub mod error;
pub mod feed;
pub mod keycard;
pub mod protocol;
pub mod registration;

pub use error::{CoreError, ErrorKind, Result};
pub use feed::InputFeed;
pub use keycard::{KeyCard, KeyCardDecoder};
pub use registration::{
    Registrar, RegistrationEvent, RegistrationOptions, RegistrationOutcome, RunReport, RunState,
};
