//! Message encryption and authentication.
//!
//! eQ-3 locks use AES-128 in a CCM-like construction: a counter-mode
//! keystream for confidentiality and a truncated CBC-MAC for integrity.
//! Both are keyed per message by a nonce made of the message type, the
//! receiving side's session nonce and the sender's security counter.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

const BLOCK_LEN: usize = 16;

/// Length of the per-message nonce
pub const NONCE_LEN: usize = 13;

/// Length of a session nonce
pub const SESSION_NONCE_LEN: usize = 8;

/// Length of the truncated authentication value
pub const AUTH_VALUE_LEN: usize = 4;

pub type Key = [u8; 16];
pub type SessionNonce = [u8; SESSION_NONCE_LEN];
pub type AuthValue = [u8; AUTH_VALUE_LEN];

/// Build the per-message nonce.
pub fn message_nonce(
    message_type: u8,
    session_nonce: &SessionNonce,
    security_counter: u16,
) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[0] = message_type;
    nonce[1..9].copy_from_slice(session_nonce);
    nonce[11..13].copy_from_slice(&security_counter.to_be_bytes());
    nonce
}

fn nonce_block(flags: u8, nonce: &[u8; NONCE_LEN], tail: u16) -> [u8; BLOCK_LEN] {
    let mut block = [0u8; BLOCK_LEN];
    block[0] = flags;
    block[1..14].copy_from_slice(nonce);
    block[14..16].copy_from_slice(&tail.to_be_bytes());
    block
}

fn encrypt_block(cipher: &Aes128, block: [u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
    let mut buf = GenericArray::from(block);
    cipher.encrypt_block(&mut buf);
    let mut out = [0u8; BLOCK_LEN];
    out.copy_from_slice(&buf);
    out
}

/// Encrypt or decrypt `data` (the keystream XOR is its own inverse).
pub fn crypt_data(
    data: &[u8],
    message_type: u8,
    session_nonce: &SessionNonce,
    security_counter: u16,
    key: &Key,
) -> Vec<u8> {
    let cipher = Aes128::new(&GenericArray::from(*key));
    let nonce = message_nonce(message_type, session_nonce, security_counter);

    data.chunks(BLOCK_LEN)
        .zip(1u16..)
        .flat_map(|(chunk, index)| {
            let keystream = encrypt_block(&cipher, nonce_block(0x01, &nonce, index));
            chunk
                .iter()
                .zip(keystream)
                .map(|(byte, k)| byte ^ k)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Compute the 4-byte authentication value over the plaintext `data`.
pub fn authentication_value(
    data: &[u8],
    message_type: u8,
    session_nonce: &SessionNonce,
    security_counter: u16,
    key: &Key,
) -> AuthValue {
    let cipher = Aes128::new(&GenericArray::from(*key));
    let nonce = message_nonce(message_type, session_nonce, security_counter);

    let mut mac = encrypt_block(&cipher, nonce_block(0x09, &nonce, data.len() as u16));
    for chunk in data.chunks(BLOCK_LEN) {
        for (m, byte) in mac.iter_mut().zip(chunk) {
            *m ^= byte;
        }
        mac = encrypt_block(&cipher, mac);
    }

    let s0 = encrypt_block(&cipher, nonce_block(0x01, &nonce, 0));
    let mut auth = [0u8; AUTH_VALUE_LEN];
    for (i, a) in auth.iter_mut().enumerate() {
        *a = mac[i] ^ s0[i];
    }
    auth
}
