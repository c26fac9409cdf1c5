//! Key card decoding.
//!
//! Every eQ-3 eqiva lock ships with a key card whose QR code carries the
//! lock's Bluetooth address, the card key used for pairing and the serial
//! number, e.g. `M001A22D29F5CK0123456789ABCDEF0123456789ABCDEFNEQ1234567`.

use std::fmt;

use data_encoding::HEXUPPER;
use regex::Regex;

use crate::error::CredentialError;

/// Key card payload: `M` + address + `K` + key + serial
const KEY_CARD_PATTERN: &str = r"^M([0-9A-F]{12})K([0-9A-F]{32})([0-9A-Z]{10})$";

/// Total payload length
pub const KEY_CARD_LENGTH: usize = 1 + 12 + 1 + 32 + 10;

/// Length of the card key in bytes
pub const CARD_KEY_LENGTH: usize = 16;

/// Decoded key card.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyCard {
    /// Lock address, `AA:BB:CC:DD:EE:FF`
    pub address: String,
    pub key: [u8; CARD_KEY_LENGTH],
    pub serial: String,
}

impl KeyCard {
    /// Card key as upper-case hex.
    pub fn key_hex(&self) -> String {
        HEXUPPER.encode(&self.key)
    }

    /// Render the canonical QR payload for this card.
    pub fn encode(&self) -> String {
        format!(
            "M{}K{}{}",
            self.address.replace(':', ""),
            self.key_hex(),
            self.serial
        )
    }
}

// The card key is a secret; keep it out of debug logs.
impl fmt::Debug for KeyCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCard")
            .field("address", &self.address)
            .field("key", &"<redacted>")
            .field("serial", &self.serial)
            .finish()
    }
}

impl fmt::Display for KeyCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Key card decoder.
pub struct KeyCardDecoder {
    pattern: Regex,
}

impl KeyCardDecoder {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(KEY_CARD_PATTERN).unwrap(),
        }
    }

    /// Decode a key card payload.
    ///
    /// Surrounding whitespace is ignored and lower-case input is accepted.
    pub fn decode(&self, data: &str) -> Result<KeyCard, CredentialError> {
        let data = data.trim().to_ascii_uppercase();

        let length = data.chars().count();
        if length != KEY_CARD_LENGTH {
            return Err(CredentialError::InvalidLength {
                expected: KEY_CARD_LENGTH,
                actual: length,
            });
        }

        let captures = self
            .pattern
            .captures(&data)
            .ok_or_else(|| CredentialError::InvalidFormat(data.clone()))?;

        let address = captures[1]
            .as_bytes()
            .chunks(2)
            .map(|octet| String::from_utf8_lossy(octet).into_owned())
            .collect::<Vec<_>>()
            .join(":");

        let mut key = [0u8; CARD_KEY_LENGTH];
        HEXUPPER
            .decode_mut(captures[2].as_bytes(), &mut key)
            .map_err(|_| CredentialError::InvalidFormat(data.clone()))?;

        Ok(KeyCard {
            address,
            key,
            serial: captures[3].to_string(),
        })
    }
}

impl Default for KeyCardDecoder {
    fn default() -> Self {
        Self::new()
    }
}
