//! Bluetooth LE session to an eQ-3 eqiva lock.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{LockConnector, LockSession, PairingCredentials};
use crate::error::{DeviceError, ProtocolError};
use crate::protocol::crypto::{Key, SessionNonce};
use crate::protocol::fragment::{self, Fragment, Reassembler};
use crate::protocol::messages::{
    self, encrypt_pairing_key, message_type, ConnectionInfo, Message, Messages,
    UNASSIGNED_USER_ID,
};
use crate::protocol::{RECEIVE_CHARACTERISTIC_UUID, SEND_CHARACTERISTIC_UUID, SERVICE_UUID};

/// How often the peripheral list is checked while scanning
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Timing options for BLE sessions.
#[derive(Debug, Clone)]
pub struct BleOptions {
    /// How long to scan for the lock before giving up
    pub scan_timeout: Duration,
    /// How long to wait for each answer from the lock
    pub command_timeout: Duration,
}

impl Default for BleOptions {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
        }
    }
}

/// Failures below the session operations, before they are classified.
#[derive(Debug, Error)]
enum LinkError {
    #[error("timed out waiting for the lock")]
    Timeout,

    #[error("notification stream ended")]
    StreamClosed,

    #[error("secured message 0x{0:02x} received before pairing")]
    NotPaired(u8),

    #[error(transparent)]
    Bluetooth(#[from] btleplug::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

fn connection_failed(address: &str, message: impl ToString) -> DeviceError {
    DeviceError::ConnectionFailed {
        address: address.to_string(),
        message: message.to_string(),
    }
}

fn matches_address(peripheral_address: &str, address: &str) -> bool {
    peripheral_address.eq_ignore_ascii_case(address)
}

/// Opens BLE sessions through the first local Bluetooth adapter.
pub struct BleConnector {
    adapter: Adapter,
    options: BleOptions,
}

impl BleConnector {
    pub async fn new(options: BleOptions) -> Result<Self, DeviceError> {
        let manager = Manager::new()
            .await
            .map_err(|e| DeviceError::AdapterUnavailable(e.to_string()))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| DeviceError::AdapterUnavailable(e.to_string()))?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| DeviceError::AdapterUnavailable("No Bluetooth adapter found".into()))?;

        Ok(Self { adapter, options })
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, DeviceError> {
        debug!(address, timeout = ?self.options.scan_timeout, "Scanning for lock");

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| connection_failed(address, e))?;

        let found = self.poll_peripherals(address).await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!(error = %e, "Failed to stop BLE scan");
        }

        found?.ok_or_else(|| {
            connection_failed(
                address,
                format!("not found within {:?}", self.options.scan_timeout),
            )
        })
    }

    async fn poll_peripherals(&self, address: &str) -> Result<Option<Peripheral>, DeviceError> {
        let deadline = Instant::now() + self.options.scan_timeout;

        loop {
            let peripherals = self
                .adapter
                .peripherals()
                .await
                .map_err(|e| connection_failed(address, e))?;

            if let Some(peripheral) = peripherals
                .into_iter()
                .find(|p| matches_address(&p.address().to_string(), address))
            {
                return Ok(Some(peripheral));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(SCAN_POLL_INTERVAL).await;
        }
    }

    async fn establish(
        &self,
        address: &str,
        peripheral: Peripheral,
    ) -> Result<BleSession, DeviceError> {
        peripheral
            .discover_services()
            .await
            .map_err(|e| connection_failed(address, e))?;

        if !peripheral.services().iter().any(|s| s.uuid == SERVICE_UUID) {
            return Err(connection_failed(address, "not an eQ-3 lock (service missing)"));
        }

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|c: &&Characteristic| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| connection_failed(address, format!("characteristic {} not found", uuid)))
        };
        let send_characteristic = find(SEND_CHARACTERISTIC_UUID)?;
        let receive_characteristic = find(RECEIVE_CHARACTERISTIC_UUID)?;

        peripheral
            .subscribe(&receive_characteristic)
            .await
            .map_err(|e| connection_failed(address, e))?;
        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| connection_failed(address, e))?;

        let mut session = BleSession {
            address: address.to_string(),
            peripheral,
            send_characteristic,
            notifications,
            reassembler: Reassembler::new(),
            command_timeout: self.options.command_timeout,
            user_id: UNASSIGNED_USER_ID,
            local_session_nonce: rand::random(),
            remote_session_nonce: [0u8; 8],
            local_security_counter: 1,
            remote_security_counter: 0,
            user_key: None,
        };

        let info = session
            .handshake()
            .await
            .map_err(|e| connection_failed(address, e))?;
        debug!(
            address,
            user_id = info.user_id,
            bootloader = info.bootloader_version,
            application = info.application_version,
            "Lock session established"
        );

        Ok(session)
    }
}

#[async_trait]
impl LockConnector for BleConnector {
    type Session = BleSession;

    async fn open(&self, address: &str) -> Result<BleSession, DeviceError> {
        let peripheral = self.find_peripheral(address).await?;

        info!(address, "Connecting to lock");
        peripheral
            .connect()
            .await
            .map_err(|e| connection_failed(address, e))?;

        match self.establish(address, peripheral.clone()).await {
            Ok(session) => Ok(session),
            Err(e) => {
                // No session exists yet, so nobody else will disconnect
                if let Err(disconnect_error) = peripheral.disconnect().await {
                    warn!(address, error = %disconnect_error, "Failed to drop half-open link");
                }
                Err(e)
            }
        }
    }
}

/// Open BLE connection to one lock.
pub struct BleSession {
    address: String,
    peripheral: Peripheral,
    send_characteristic: Characteristic,
    notifications: NotificationStream,
    reassembler: Reassembler,
    command_timeout: Duration,
    user_id: u8,
    local_session_nonce: SessionNonce,
    remote_session_nonce: SessionNonce,
    local_security_counter: u16,
    remote_security_counter: u16,
    user_key: Option<Key>,
}

impl BleSession {
    async fn handshake(&mut self) -> Result<ConnectionInfo, LinkError> {
        let request = Messages::connection_request(self.user_id, &self.local_session_nonce);
        self.send(&request).await?;

        let message = self.receive_matching(|t| t == message_type::CONNECTION_INFO).await?;
        let info = ConnectionInfo::parse(&message)?;

        self.user_id = info.user_id;
        self.remote_session_nonce = info.remote_session_nonce;
        Ok(info)
    }

    fn next_security_counter(&mut self) -> u16 {
        let counter = self.local_security_counter;
        self.local_security_counter = self.local_security_counter.wrapping_add(1);
        counter
    }

    /// Write `fragments` without waiting for acknowledgements.
    async fn write_fragments(&mut self, fragments: &[Fragment]) -> Result<(), LinkError> {
        for fragment in fragments {
            trace!(address = %self.address, fragment = ?fragment.as_bytes(), "Writing fragment");
            self.peripheral
                .write(
                    &self.send_characteristic,
                    fragment.as_bytes(),
                    WriteType::WithResponse,
                )
                .await?;
        }
        Ok(())
    }

    /// Send a message, waiting for the lock to acknowledge each non-final fragment.
    async fn send(&mut self, message: &Message) -> Result<(), LinkError> {
        let fragments = fragment::split(&message.to_bytes())?;
        debug!(
            address = %self.address,
            message_type = message.message_type,
            fragments = fragments.len(),
            "Sending message"
        );

        for fragment in &fragments {
            self.write_fragments(std::slice::from_ref(fragment)).await?;
            if !fragment.is_last() {
                self.receive_matching(|t| t == message_type::FRAGMENT_ACK)
                    .await?;
            }
        }
        Ok(())
    }

    /// Wait for the next message whose type satisfies `wanted`, skipping others.
    async fn receive_matching(
        &mut self,
        wanted: impl Fn(u8) -> bool,
    ) -> Result<Message, LinkError> {
        let wait = self.command_timeout;
        timeout(wait, async {
            loop {
                let message = self.next_message().await?;
                if wanted(message.message_type) {
                    return Ok::<_, LinkError>(message);
                }
                debug!(
                    address = %self.address,
                    message_type = message.message_type,
                    "Skipping unexpected message"
                );
            }
        })
        .await
        .map_err(|_| LinkError::Timeout)?
    }

    async fn receive_answer(&mut self) -> Result<Message, LinkError> {
        self.receive_matching(|t| {
            t == message_type::ANSWER_WITHOUT_SECURITY || t == message_type::ANSWER_WITH_SECURITY
        })
        .await
    }

    async fn next_message(&mut self) -> Result<Message, LinkError> {
        loop {
            let notification = self
                .notifications
                .next()
                .await
                .ok_or(LinkError::StreamClosed)?;
            if notification.uuid != RECEIVE_CHARACTERISTIC_UUID {
                continue;
            }

            let fragment = Fragment::from_bytes(&notification.value)?;
            match self.reassembler.push(&fragment)? {
                Some(bytes) => return self.unseal(Message::from_bytes(&bytes)?),
                None => {
                    let ack = ack_fragments(&fragment)?;
                    self.write_fragments(&ack).await?;
                }
            }
        }
    }

    fn unseal(&mut self, message: Message) -> Result<Message, LinkError> {
        if !message.is_secure() {
            return Ok(message);
        }

        let key = self
            .user_key
            .ok_or(LinkError::NotPaired(message.message_type))?;
        let (plain, counter) = messages::open(&message, &self.local_session_nonce, &key)?;

        self.remote_security_counter = check_counter(counter, self.remote_security_counter)?;
        Ok(plain)
    }

    fn pairing_error(&self, error: LinkError) -> DeviceError {
        pairing_error(&self.address, error)
    }

    fn write_error(&self, error: LinkError) -> DeviceError {
        write_error(&self.address, error)
    }
}

/// Fragments acknowledging a received non-final fragment.
fn ack_fragments(received: &Fragment) -> Result<Vec<Fragment>, ProtocolError> {
    fragment::split(&Messages::fragment_ack(received.status()).to_bytes())
}

/// Accept `received` only if it is newer than `last`; returns the new last counter.
fn check_counter(received: u16, last: u16) -> Result<u16, ProtocolError> {
    if received <= last {
        return Err(ProtocolError::StaleCounter { received, last });
    }
    Ok(received)
}

fn pairing_error(address: &str, error: LinkError) -> DeviceError {
    match error {
        LinkError::Timeout => DeviceError::PairingTimeout {
            address: address.to_string(),
        },
        other => transport_fault(address, other),
    }
}

fn write_error(address: &str, error: LinkError) -> DeviceError {
    match error {
        LinkError::Timeout => DeviceError::WriteRejected {
            address: address.to_string(),
            message: "no answer from lock".to_string(),
        },
        other => transport_fault(address, other),
    }
}

fn transport_fault(address: &str, error: LinkError) -> DeviceError {
    DeviceError::TransportFault {
        address: address.to_string(),
        message: error.to_string(),
    }
}

#[async_trait]
impl LockSession for BleSession {
    async fn pairing_request(
        &mut self,
        card_key: &[u8; 16],
    ) -> Result<PairingCredentials, DeviceError> {
        let user_key: Key = rand::random();
        let counter = self.next_security_counter();
        let (encrypted_key, auth) = encrypt_pairing_key(
            self.user_id,
            &user_key,
            &self.remote_session_nonce,
            counter,
            card_key,
        );

        debug!(address = %self.address, user_id = self.user_id, "Sending pairing request");
        let request = Messages::pairing_request(self.user_id, &encrypted_key, counter, &auth);
        self.send(&request)
            .await
            .map_err(|e| self.pairing_error(e))?;

        self.user_key = Some(user_key);
        let answer = self
            .receive_answer()
            .await
            .map_err(|e| self.pairing_error(e))?;

        if !answer.is_positive_answer() {
            self.user_key = None;
            return Err(DeviceError::PairingRejected {
                address: self.address.clone(),
                message: format!("lock answered {:02x?}", answer.data.first()),
            });
        }

        Ok(PairingCredentials {
            user_id: self.user_id,
            user_key,
        })
    }

    async fn set_user_name(&mut self, name: &str) -> Result<(), DeviceError> {
        let key = self.user_key.ok_or_else(|| DeviceError::WriteRejected {
            address: self.address.clone(),
            message: "session is not paired".to_string(),
        })?;
        let plain = Messages::user_name_set(self.user_id, name).map_err(|e| {
            DeviceError::WriteRejected {
                address: self.address.clone(),
                message: e.to_string(),
            }
        })?;

        let counter = self.next_security_counter();
        let sealed = messages::seal(&plain, &self.remote_session_nonce, counter, &key);
        self.send(&sealed).await.map_err(|e| self.write_error(e))?;

        let answer = self
            .receive_answer()
            .await
            .map_err(|e| self.write_error(e))?;
        if !answer.is_positive_answer() {
            return Err(DeviceError::WriteRejected {
                address: self.address.clone(),
                message: format!("lock answered {:02x?}", answer.data.first()),
            });
        }

        Ok(())
    }

    async fn close(mut self) -> Result<(), DeviceError> {
        let close = Messages::close_connection().to_bytes();
        let sent = match fragment::split(&close) {
            Ok(fragments) => self.write_fragments(&fragments).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            debug!(address = %self.address, error = %e, "Close message not delivered");
        }

        self.reassembler.reset();
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| transport_fault(&self.address, e.into()))
    }
}
