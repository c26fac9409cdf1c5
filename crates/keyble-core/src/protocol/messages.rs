//! Message builders and parsers for the eQ-3 lock protocol.
//!
//! A message is a type byte followed by its data. Types with bit 7 set are
//! secured: their data is encrypted and authenticated with the user key.

use super::crypto::{self, AuthValue, Key, SessionNonce, AUTH_VALUE_LEN, SESSION_NONCE_LEN};
use super::fragment::FRAGMENT_PAYLOAD_LEN;
use crate::error::ProtocolError;

/// Message type identifiers
pub mod message_type {
    pub const FRAGMENT_ACK: u8 = 0x00;
    pub const ANSWER_WITHOUT_SECURITY: u8 = 0x01;
    pub const CONNECTION_REQUEST: u8 = 0x02;
    pub const CONNECTION_INFO: u8 = 0x03;
    pub const PAIRING_REQUEST: u8 = 0x04;
    pub const STATUS_CHANGED_NOTIFICATION: u8 = 0x05;
    pub const CLOSE_CONNECTION: u8 = 0x06;
    pub const ANSWER_WITH_SECURITY: u8 = 0x81;
    pub const USER_NAME_SET: u8 = 0x90;
}

/// User id to announce before the lock has assigned one
pub const UNASSIGNED_USER_ID: u8 = 0xff;

/// Capacity of the lock's user name field
pub const MAX_USER_NAME_LEN: usize = 20;

const SECURE_FLAG: u8 = 0x80;

/// Trailer of a secured message: security counter + authentication value
const SECURE_TRAILER_LEN: usize = 2 + AUTH_VALUE_LEN;

/// A decoded (or to-be-encoded) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: u8,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(message_type: u8, data: Vec<u8>) -> Self {
        Self { message_type, data }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (&message_type, data) = bytes.split_first().ok_or(ProtocolError::Empty)?;
        Ok(Self {
            message_type,
            data: data.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.data.len());
        bytes.push(self.message_type);
        bytes.extend_from_slice(&self.data);
        bytes
    }

    pub fn is_secure(&self) -> bool {
        self.message_type & SECURE_FLAG != 0
    }

    /// Whether an answer message reports success.
    ///
    /// Bit 7 of the first data byte flags a failure.
    pub fn is_positive_answer(&self) -> bool {
        self.data.first().is_some_and(|status| status & 0x80 == 0)
    }
}

/// Connection parameters announced by the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub user_id: u8,
    pub remote_session_nonce: SessionNonce,
    pub bootloader_version: u8,
    pub application_version: u8,
}

impl ConnectionInfo {
    pub fn parse(message: &Message) -> Result<Self, ProtocolError> {
        let data = &message.data;
        if data.len() < 1 + SESSION_NONCE_LEN {
            return Err(ProtocolError::Truncated {
                message_type: message.message_type,
                len: data.len(),
            });
        }

        let mut remote_session_nonce = [0u8; SESSION_NONCE_LEN];
        remote_session_nonce.copy_from_slice(&data[1..1 + SESSION_NONCE_LEN]);

        Ok(Self {
            user_id: data[0],
            remote_session_nonce,
            bootloader_version: data.get(10).copied().unwrap_or_default(),
            application_version: data.get(11).copied().unwrap_or_default(),
        })
    }
}

/// Message builders for the lock protocol
pub struct Messages;

impl Messages {
    /// Acknowledge a received non-final fragment
    pub fn fragment_ack(fragment_status: u8) -> Message {
        Message::new(message_type::FRAGMENT_ACK, vec![fragment_status])
    }

    /// Open a protocol session, announcing our session nonce
    pub fn connection_request(user_id: u8, local_session_nonce: &SessionNonce) -> Message {
        let mut data = Vec::with_capacity(1 + SESSION_NONCE_LEN);
        data.push(user_id);
        data.extend_from_slice(local_session_nonce);
        Message::new(message_type::CONNECTION_REQUEST, data)
    }

    /// Register `user_key` for `user_id`, authenticated with the card key
    pub fn pairing_request(
        user_id: u8,
        encrypted_user_key: &[u8],
        security_counter: u16,
        authentication_value: &AuthValue,
    ) -> Message {
        let mut data = Vec::with_capacity(1 + encrypted_user_key.len() + SECURE_TRAILER_LEN);
        data.push(user_id);
        data.extend_from_slice(encrypted_user_key);
        data.extend_from_slice(&security_counter.to_be_bytes());
        data.extend_from_slice(authentication_value);
        Message::new(message_type::PAIRING_REQUEST, data)
    }

    /// Label `user_id` with `name` (plaintext; seal before sending)
    pub fn user_name_set(user_id: u8, name: &str) -> Result<Message, ProtocolError> {
        let name = name.as_bytes();
        if name.len() > MAX_USER_NAME_LEN {
            return Err(ProtocolError::UserNameTooLong {
                len: name.len(),
                max: MAX_USER_NAME_LEN,
            });
        }

        let mut data = vec![0u8; 1 + MAX_USER_NAME_LEN];
        data[0] = user_id;
        data[1..1 + name.len()].copy_from_slice(name);
        Ok(Message::new(message_type::USER_NAME_SET, data))
    }

    pub fn close_connection() -> Message {
        Message::new(message_type::CLOSE_CONNECTION, Vec::new())
    }
}

/// Encrypt the card-key-protected payload of a pairing request.
///
/// Returns the encrypted user key and the authentication value.
pub fn encrypt_pairing_key(
    user_id: u8,
    user_key: &Key,
    remote_session_nonce: &SessionNonce,
    security_counter: u16,
    card_key: &Key,
) -> (Vec<u8>, AuthValue) {
    let encrypted = crypto::crypt_data(
        user_key,
        message_type::PAIRING_REQUEST,
        remote_session_nonce,
        security_counter,
        card_key,
    );

    // user id + user key, zero-padded to the 23 bytes of a pairing request
    let mut authenticated = vec![0u8; 1 + user_key.len() + SECURE_TRAILER_LEN];
    authenticated[0] = user_id;
    authenticated[1..1 + user_key.len()].copy_from_slice(user_key);

    let auth = crypto::authentication_value(
        &authenticated,
        message_type::PAIRING_REQUEST,
        remote_session_nonce,
        security_counter,
        card_key,
    );

    (encrypted, auth)
}

/// Length `data` is padded to so that the whole message fills whole fragments.
fn padded_len(len: usize) -> usize {
    (len + 1).div_ceil(FRAGMENT_PAYLOAD_LEN) * FRAGMENT_PAYLOAD_LEN - 1
}

/// Encrypt and authenticate a secured message for sending.
pub fn seal(
    message: &Message,
    remote_session_nonce: &SessionNonce,
    security_counter: u16,
    user_key: &Key,
) -> Message {
    let mut padded = message.data.clone();
    padded.resize(padded_len(padded.len()), 0);

    let mut data = crypto::crypt_data(
        &padded,
        message.message_type,
        remote_session_nonce,
        security_counter,
        user_key,
    );
    data.extend_from_slice(&security_counter.to_be_bytes());
    data.extend_from_slice(&crypto::authentication_value(
        &padded,
        message.message_type,
        remote_session_nonce,
        security_counter,
        user_key,
    ));

    Message::new(message.message_type, data)
}

/// Decrypt and verify a received secured message.
///
/// Returns the plaintext message and the sender's security counter.
pub fn open(
    message: &Message,
    local_session_nonce: &SessionNonce,
    user_key: &Key,
) -> Result<(Message, u16), ProtocolError> {
    let data = &message.data;
    if data.len() < SECURE_TRAILER_LEN {
        return Err(ProtocolError::Truncated {
            message_type: message.message_type,
            len: data.len(),
        });
    }

    let (ciphertext, trailer) = data.split_at(data.len() - SECURE_TRAILER_LEN);
    let security_counter = u16::from_be_bytes([trailer[0], trailer[1]]);

    let plaintext = crypto::crypt_data(
        ciphertext,
        message.message_type,
        local_session_nonce,
        security_counter,
        user_key,
    );
    let expected = crypto::authentication_value(
        &plaintext,
        message.message_type,
        local_session_nonce,
        security_counter,
        user_key,
    );

    if expected[..] != trailer[2..] {
        return Err(ProtocolError::AuthenticationMismatch(message.message_type));
    }

    Ok((Message::new(message.message_type, plaintext), security_counter))
}
