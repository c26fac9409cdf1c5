//! Protocol layer for eQ-3 eqiva lock communication.
//!
//! This module handles fragmenting, encrypting, building and parsing the
//! messages exchanged over the lock's GATT characteristics.

use uuid::Uuid;

pub mod crypto;
pub mod fragment;
pub mod messages;

/// eQ-3 lock GATT service
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x58e06900_15d8_11e6_b737_0002a5d5c51b);

/// Characteristic the client writes fragments to
pub const SEND_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x3141dd40_15db_11e6_a24b_0002a5d5c51b);

/// Characteristic the lock notifies fragments on
pub const RECEIVE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x359d48c0_15db_11e6_ab52_0002a5d5c51b);
