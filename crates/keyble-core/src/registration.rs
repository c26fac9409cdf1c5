//! User registration flow.
//!
//! Reads key card payloads from an [`InputFeed`] and registers one user per
//! card: open a session to the lock, pair with the card key, label the new
//! user and close the session. The run stops at the first failure.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncBufRead;
use tracing::{debug, error, info, warn};

use crate::device::{LockConnector, LockSession, PairingCredentials};
use crate::error::{ConfigError, CoreError, ErrorKind};
use crate::feed::InputFeed;
use crate::keycard::{KeyCard, KeyCardDecoder};
use crate::protocol::messages::MAX_USER_NAME_LEN;

/// User name applied when none is configured
pub const DEFAULT_USER_NAME: &str = "keyble";

/// Time the operator gets to put the lock into pairing mode when the key
/// card was supplied up front
pub const OPERATOR_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Shown once before any key card is processed
pub const PAIRING_MODE_INSTRUCTION: &str =
    "Press and hold \"Unlock\" button until the yellow light flashes in order to enter pairing mode";

/// Settings shared by every registration in a run.
#[derive(Debug, Clone)]
pub struct RegistrationOptions {
    user_name: String,
    grace_period: Duration,
}

impl RegistrationOptions {
    pub fn new(user_name: impl Into<String>) -> Result<Self, ConfigError> {
        let user_name = user_name.into();
        if user_name.is_empty() {
            return Err(ConfigError::EmptyUserName);
        }
        if user_name.len() > MAX_USER_NAME_LEN {
            return Err(ConfigError::UserNameTooLong {
                len: user_name.len(),
                max: MAX_USER_NAME_LEN,
            });
        }

        Ok(Self {
            user_name,
            grace_period: OPERATOR_GRACE_PERIOD,
        })
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    AwaitingOperatorReady,
    ProcessingItem,
    Succeeded,
    Failed,
    Terminated,
}

/// Progress reported while a run is in flight.
#[derive(Debug, Clone)]
pub enum RegistrationEvent {
    /// Put the lock into pairing mode
    PairingModeInstruction(&'static str),
    /// Waiting for the operator before the first registration
    AwaitingOperator { grace: Duration },
    Registering { address: String, serial: String },
    /// Pairing succeeded. The credentials are not recoverable later.
    Paired {
        address: String,
        credentials: PairingCredentials,
    },
    UserNameSet { address: String, user_name: String },
    Finished(RegistrationOutcome),
}

/// Failure detail of an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of one registration attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
    pub finished_at: DateTime<Utc>,
}

impl RegistrationOutcome {
    fn new(card: Option<&KeyCard>, credentials: Option<&PairingCredentials>) -> Self {
        Self {
            success: true,
            address: card.map(|c| c.address.clone()),
            serial: card.map(|c| c.serial.clone()),
            user_id: credentials.map(|c| c.user_id),
            user_key: credentials.map(|c| c.user_key_hex()),
            error: None,
            finished_at: Utc::now(),
        }
    }

    fn failed(mut self, error: &CoreError) -> Self {
        self.success = false;
        self.error = Some(OutcomeError {
            kind: error.kind(),
            message: error.to_string(),
        });
        self
    }
}

/// All outcomes of a run, in feed order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<RegistrationOutcome>,
    pub final_state: RunState,
}

impl RunReport {
    /// True when the feed was read to the end and every registration succeeded.
    pub fn is_success(&self) -> bool {
        self.final_state == RunState::Idle && self.outcomes.iter().all(|o| o.success)
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Registers users on locks reached through `C`.
pub struct Registrar<C> {
    connector: C,
    options: RegistrationOptions,
    decoder: KeyCardDecoder,
}

impl<C: LockConnector> Registrar<C> {
    pub fn new(connector: C, options: RegistrationOptions) -> Self {
        Self {
            connector,
            options,
            decoder: KeyCardDecoder::new(),
        }
    }

    pub fn options(&self) -> &RegistrationOptions {
        &self.options
    }

    /// Process `feed` until it is exhausted or a registration fails.
    ///
    /// Items after a failure are never read from the feed.
    pub async fn run<R, F>(&self, feed: &mut InputFeed<R>, mut on_event: F) -> RunReport
    where
        R: AsyncBufRead + Unpin,
        F: FnMut(RegistrationEvent),
    {
        let mut state = RunState::Idle;
        let mut outcomes = Vec::new();

        info!("{}", PAIRING_MODE_INSTRUCTION);
        on_event(RegistrationEvent::PairingModeInstruction(
            PAIRING_MODE_INSTRUCTION,
        ));

        if feed.is_single() {
            transition(&mut state, RunState::AwaitingOperatorReady);
            let grace = self.options.grace_period;
            info!(?grace, "Waiting for the operator to press unlock");
            on_event(RegistrationEvent::AwaitingOperator { grace });
            tokio::time::sleep(grace).await;
            transition(&mut state, RunState::Idle);
        }

        loop {
            let data = match feed.next().await {
                Ok(Some(data)) => data,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Could not read key card input");
                    let outcome = RegistrationOutcome::new(None, None).failed(&e.into());
                    on_event(RegistrationEvent::Finished(outcome.clone()));
                    outcomes.push(outcome);
                    transition(&mut state, RunState::Terminated);
                    break;
                }
            };

            transition(&mut state, RunState::ProcessingItem);
            let outcome = self.register(&data, &mut on_event).await;
            let success = outcome.success;
            on_event(RegistrationEvent::Finished(outcome.clone()));
            outcomes.push(outcome);

            if success {
                transition(&mut state, RunState::Succeeded);
                transition(&mut state, RunState::Idle);
            } else {
                transition(&mut state, RunState::Failed);
                transition(&mut state, RunState::Terminated);
                break;
            }
        }

        RunReport {
            outcomes,
            final_state: state,
        }
    }

    async fn register<F>(&self, data: &str, on_event: &mut F) -> RegistrationOutcome
    where
        F: FnMut(RegistrationEvent),
    {
        debug!(data, "Decoding key card");
        let card = match self.decoder.decode(data) {
            Ok(card) => card,
            Err(e) => {
                let error = CoreError::from(e);
                error!(error = %error, "Rejected key card");
                return RegistrationOutcome::new(None, None).failed(&error);
            }
        };

        info!(
            address = %card.address,
            serial = %card.serial,
            "Registering user on Smart Lock"
        );
        on_event(RegistrationEvent::Registering {
            address: card.address.clone(),
            serial: card.serial.clone(),
        });

        let mut session = match self.connector.open(&card.address).await {
            Ok(session) => session,
            Err(e) => {
                let error = CoreError::from(e);
                error!(address = %card.address, error = %error, "Could not open session");
                return RegistrationOutcome::new(Some(&card), None).failed(&error);
            }
        };

        let mut credentials = None;
        let result = self
            .pair_and_label(&mut session, &card, &mut credentials, on_event)
            .await;

        if let Err(e) = session.close().await {
            warn!(address = %card.address, error = %e, "Failed to close session");
        }

        let outcome = RegistrationOutcome::new(Some(&card), credentials.as_ref());
        match result {
            Ok(()) => {
                info!(address = %card.address, "Finished registering user");
                outcome
            }
            Err(e) => {
                let error = CoreError::from(e);
                error!(address = %card.address, error = %error, "Registration failed");
                outcome.failed(&error)
            }
        }
    }

    async fn pair_and_label<F>(
        &self,
        session: &mut C::Session,
        card: &KeyCard,
        credentials: &mut Option<PairingCredentials>,
        on_event: &mut F,
    ) -> Result<(), crate::error::DeviceError>
    where
        F: FnMut(RegistrationEvent),
    {
        debug!(address = %card.address, "Sending pairing request");
        let paired = session.pairing_request(&card.key).await?;
        info!(
            address = %card.address,
            user_id = paired.user_id,
            "User registered"
        );
        on_event(RegistrationEvent::Paired {
            address: card.address.clone(),
            credentials: paired.clone(),
        });
        *credentials = Some(paired);

        let user_name = self.options.user_name();
        info!(address = %card.address, user_name, "Setting user name");
        session.set_user_name(user_name).await?;
        on_event(RegistrationEvent::UserNameSet {
            address: card.address.clone(),
            user_name: user_name.to_string(),
        });

        Ok(())
    }
}

fn transition(state: &mut RunState, next: RunState) {
    debug!(from = ?*state, to = ?next, "Run state");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::simulated::SimulatedLock;
    use tokio::time::Instant;

    const CARD: &str = "M001A22D29F5CK0123456789ABCDEF0123456789ABCDEFNEQ1234567";

    #[test]
    fn test_options_validation() {
        assert_eq!(
            RegistrationOptions::new("").unwrap_err(),
            ConfigError::EmptyUserName
        );
        assert_eq!(
            RegistrationOptions::new("a".repeat(21)).unwrap_err(),
            ConfigError::UserNameTooLong { len: 21, max: 20 }
        );

        let options = RegistrationOptions::new(DEFAULT_USER_NAME).unwrap();
        assert_eq!(options.user_name(), "keyble");
        assert_eq!(options.grace_period(), OPERATOR_GRACE_PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_value_waits_for_operator() {
        let registrar = Registrar::new(
            SimulatedLock::new(),
            RegistrationOptions::new("keyble").unwrap(),
        );
        let mut feed: InputFeed<&[u8]> = InputFeed::single(CARD);

        let start = Instant::now();
        let report = registrar.run(&mut feed, |_| {}).await;

        assert!(report.is_success());
        assert!(start.elapsed() >= OPERATOR_GRACE_PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_does_not_wait() {
        let registrar = Registrar::new(
            SimulatedLock::new(),
            RegistrationOptions::new("keyble").unwrap(),
        );
        let input = format!("{}\n", CARD);
        let mut feed = InputFeed::from_reader(input.as_bytes());

        let start = Instant::now();
        let report = registrar.run(&mut feed, |_| {}).await;

        assert!(report.is_success());
        assert!(start.elapsed() < OPERATOR_GRACE_PERIOD);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = RegistrationOutcome::new(None, None)
            .failed(&CoreError::from(ConfigError::EmptyUserName));
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "invalid_config");
        assert!(json.get("address").is_none());
    }
}
