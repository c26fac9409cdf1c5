//! In-memory lock.
//!
//! Behaves like a lock held in pairing mode: every pairing creates a new
//! user with a fresh random key. Failures can be injected per address and
//! every call is recorded, which makes the registration flow observable
//! without Bluetooth hardware.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::{LockConnector, LockSession, PairingCredentials};
use crate::error::DeviceError;

/// A call received by the simulated lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockCall {
    Open(String),
    PairingRequest(String),
    SetUserName(String, String),
    Close(String),
}

/// Failure to inject for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Open,
    PairingRejected,
    PairingTimeout,
    SetUserName,
    Close,
}

/// A user registered on the simulated lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedUser {
    pub address: String,
    pub credentials: PairingCredentials,
    pub name: Option<String>,
}

#[derive(Debug)]
struct LockState {
    journal: Vec<LockCall>,
    failures: HashMap<String, Vec<InjectedFailure>>,
    users: Vec<SimulatedUser>,
    next_user_id: u8,
    open_sessions: usize,
}

/// Connector for the in-memory lock. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedLock {
    state: Arc<Mutex<LockState>>,
}

impl SimulatedLock {
    pub fn new() -> Self {
        Self::with_first_user_id(1)
    }

    /// Start assigning user ids at `user_id`.
    pub fn with_first_user_id(user_id: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(LockState {
                journal: Vec::new(),
                failures: HashMap::new(),
                users: Vec::new(),
                next_user_id: user_id,
                open_sessions: 0,
            })),
        }
    }

    /// Make the given operation fail for `address`.
    pub fn inject_failure(&self, address: &str, failure: InjectedFailure) {
        self.state()
            .failures
            .entry(address.to_string())
            .or_default()
            .push(failure);
    }

    /// Every call received so far, in order.
    pub fn journal(&self) -> Vec<LockCall> {
        self.state().journal.clone()
    }

    /// Users created so far, in order.
    pub fn users(&self) -> Vec<SimulatedUser> {
        self.state().users.clone()
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        lock(&self.state)
    }
}

impl Default for SimulatedLock {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(state: &Mutex<LockState>) -> MutexGuard<'_, LockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LockState {
    fn should_fail(&self, address: &str, failure: InjectedFailure) -> bool {
        self.failures
            .get(address)
            .is_some_and(|failures| failures.contains(&failure))
    }
}

#[async_trait]
impl LockConnector for SimulatedLock {
    type Session = SimulatedSession;

    async fn open(&self, address: &str) -> Result<SimulatedSession, DeviceError> {
        let mut state = self.state();
        state.journal.push(LockCall::Open(address.to_string()));

        if state.should_fail(address, InjectedFailure::Open) {
            return Err(DeviceError::ConnectionFailed {
                address: address.to_string(),
                message: "device not found".to_string(),
            });
        }

        state.open_sessions += 1;
        debug!(address, "Simulated session opened");

        Ok(SimulatedSession {
            address: address.to_string(),
            state: Arc::clone(&self.state),
            user_index: None,
        })
    }
}

/// Session on the simulated lock.
#[derive(Debug)]
pub struct SimulatedSession {
    address: String,
    state: Arc<Mutex<LockState>>,
    user_index: Option<usize>,
}

#[async_trait]
impl LockSession for SimulatedSession {
    async fn pairing_request(
        &mut self,
        _card_key: &[u8; 16],
    ) -> Result<PairingCredentials, DeviceError> {
        let mut state = lock(&self.state);
        state
            .journal
            .push(LockCall::PairingRequest(self.address.clone()));

        if state.should_fail(&self.address, InjectedFailure::PairingRejected) {
            return Err(DeviceError::PairingRejected {
                address: self.address.clone(),
                message: "card key does not match".to_string(),
            });
        }
        if state.should_fail(&self.address, InjectedFailure::PairingTimeout) {
            return Err(DeviceError::PairingTimeout {
                address: self.address.clone(),
            });
        }

        let credentials = PairingCredentials {
            user_id: state.next_user_id,
            user_key: rand::random(),
        };
        state.next_user_id = state.next_user_id.wrapping_add(1);
        state.users.push(SimulatedUser {
            address: self.address.clone(),
            credentials: credentials.clone(),
            name: None,
        });
        self.user_index = Some(state.users.len() - 1);

        Ok(credentials)
    }

    async fn set_user_name(&mut self, name: &str) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        state
            .journal
            .push(LockCall::SetUserName(self.address.clone(), name.to_string()));

        let index = match self.user_index {
            Some(index) if !state.should_fail(&self.address, InjectedFailure::SetUserName) => {
                index
            }
            _ => {
                return Err(DeviceError::WriteRejected {
                    address: self.address.clone(),
                    message: "session is not paired".to_string(),
                })
            }
        };

        state.users[index].name = Some(name.to_string());
        Ok(())
    }

    async fn close(self) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        state.journal.push(LockCall::Close(self.address.clone()));
        state.open_sessions -= 1;

        if state.should_fail(&self.address, InjectedFailure::Close) {
            return Err(DeviceError::TransportFault {
                address: self.address,
                message: "disconnect failed".to_string(),
            });
        }

        debug!(address = %self.address, "Simulated session closed");
        Ok(())
    }
}
