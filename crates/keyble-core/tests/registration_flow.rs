//! Registration flow against the simulated lock.

use std::time::Duration;

use keyble_core::device::simulated::{InjectedFailure, LockCall, SimulatedLock};
use keyble_core::error::ErrorKind;
use keyble_core::registration::{
    RegistrationEvent, RegistrationOptions, RunState, DEFAULT_USER_NAME,
};
use keyble_core::{InputFeed, Registrar};
use tokio::time::Instant;

const KEY: &str = "00112233445566778899AABBCCDDEEFF";

fn card(address: &str, serial: &str) -> String {
    format!("M{}K{}{}", address.replace(':', ""), KEY, serial)
}

fn registrar(lock: &SimulatedLock) -> Registrar<SimulatedLock> {
    Registrar::new(
        lock.clone(),
        RegistrationOptions::new(DEFAULT_USER_NAME)
            .unwrap()
            .with_grace_period(Duration::ZERO),
    )
}

fn stream(lines: &[String]) -> InputFeed<&'static [u8]> {
    let text: &'static str = Box::leak(lines.join("\n").into_boxed_str());
    InputFeed::from_reader(text.as_bytes())
}

fn opens(journal: &[LockCall]) -> usize {
    journal
        .iter()
        .filter(|c| matches!(c, LockCall::Open(_)))
        .count()
}

fn closes(journal: &[LockCall]) -> usize {
    journal
        .iter()
        .filter(|c| matches!(c, LockCall::Close(_)))
        .count()
}

const A: &str = "AA:AA:AA:AA:AA:01";
const B: &str = "AA:AA:AA:AA:AA:02";
const C: &str = "AA:AA:AA:AA:AA:03";

#[tokio::test]
async fn test_registers_user_from_single_value() {
    let lock = SimulatedLock::with_first_user_id(3);
    let mut feed = InputFeed::<&[u8]>::single(card("AA:BB:CC:DD:EE:FF", "SN12345678"));

    let mut paired = Vec::new();
    let report = registrar(&lock)
        .run(&mut feed, |event| {
            if let RegistrationEvent::Paired {
                address,
                credentials,
            } = event
            {
                paired.push((address, credentials));
            }
        })
        .await;

    assert!(report.is_success());
    assert_eq!(report.final_state, RunState::Idle);
    assert_eq!(report.outcomes.len(), 1);

    let outcome = &report.outcomes[0];
    assert!(outcome.success);
    assert_eq!(outcome.address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    assert_eq!(outcome.serial.as_deref(), Some("SN12345678"));
    assert_eq!(outcome.user_id, Some(3));

    let users = lock.users();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name.as_deref(), Some("keyble"));
    assert_eq!(
        outcome.user_key.as_deref(),
        Some(users[0].credentials.user_key_hex().as_str())
    );

    assert_eq!(paired.len(), 1);
    assert_eq!(paired[0].0, "AA:BB:CC:DD:EE:FF");
    assert_eq!(paired[0].1.user_id, 3);

    assert_eq!(lock.open_sessions(), 0);
}

#[tokio::test]
async fn test_all_cards_succeed_in_order() {
    let lock = SimulatedLock::new();
    let mut feed = stream(&[card(A, "SERIAL0001"), card(B, "SERIAL0002")]);

    let report = registrar(&lock).run(&mut feed, |_| {}).await;

    assert!(report.is_success());
    assert_eq!(report.succeeded(), 2);
    let addresses: Vec<_> = report
        .outcomes
        .iter()
        .map(|o| o.address.as_deref().unwrap())
        .collect();
    assert_eq!(addresses, vec![A, B]);
    assert_eq!(report.outcomes[0].user_id, Some(1));
    assert_eq!(report.outcomes[1].user_id, Some(2));

    let users = lock.users();
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u.name.as_deref() == Some("keyble")));
}

#[tokio::test]
async fn test_stops_at_first_failure() {
    let lock = SimulatedLock::new();
    lock.inject_failure(B, InjectedFailure::PairingRejected);
    let mut feed = stream(&[
        card(A, "SERIAL0001"),
        card(B, "SERIAL0002"),
        card(C, "SERIAL0003"),
    ]);

    let report = registrar(&lock).run(&mut feed, |_| {}).await;

    assert!(!report.is_success());
    assert_eq!(report.final_state, RunState::Terminated);
    assert_eq!(report.outcomes.len(), 2);
    assert!(report.outcomes[0].success);
    assert!(!report.outcomes[1].success);
    assert_eq!(
        report.outcomes[1].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::PairingRejected)
    );

    let journal = lock.journal();
    assert!(!journal.contains(&LockCall::Open(C.to_string())));

    // The third line is still unread
    assert_eq!(
        feed.next().await.unwrap(),
        Some(card(C, "SERIAL0003"))
    );
}

#[tokio::test]
async fn test_session_closed_once_when_open_fails() {
    let lock = SimulatedLock::new();
    lock.inject_failure(A, InjectedFailure::Open);
    let mut feed = stream(&[card(A, "SERIAL0001")]);

    let report = registrar(&lock).run(&mut feed, |_| {}).await;

    assert!(!report.is_success());
    assert_eq!(
        report.outcomes[0].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::ConnectionFailed)
    );
    let journal = lock.journal();
    assert_eq!(opens(&journal), 1);
    assert_eq!(closes(&journal), 0);
}

#[tokio::test]
async fn test_session_closed_once_when_pairing_fails() {
    let lock = SimulatedLock::new();
    lock.inject_failure(A, InjectedFailure::PairingTimeout);
    let mut feed = stream(&[card(A, "SERIAL0001")]);

    let report = registrar(&lock).run(&mut feed, |_| {}).await;

    assert_eq!(
        report.outcomes[0].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::PairingTimeout)
    );
    assert_eq!(report.outcomes[0].user_id, None);
    assert_eq!(closes(&lock.journal()), 1);
    assert_eq!(lock.open_sessions(), 0);
}

#[tokio::test]
async fn test_session_closed_once_when_user_name_fails() {
    let lock = SimulatedLock::new();
    lock.inject_failure(A, InjectedFailure::SetUserName);
    let mut feed = stream(&[card(A, "SERIAL0001")]);

    let report = registrar(&lock).run(&mut feed, |_| {}).await;

    let outcome = &report.outcomes[0];
    assert!(!outcome.success);
    assert_eq!(
        outcome.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::WriteRejected)
    );
    // Pairing already happened, so the credentials are still reported
    assert_eq!(outcome.user_id, Some(1));
    assert_eq!(
        lock.journal(),
        vec![
            LockCall::Open(A.to_string()),
            LockCall::PairingRequest(A.to_string()),
            LockCall::SetUserName(A.to_string(), "keyble".to_string()),
            LockCall::Close(A.to_string()),
        ]
    );
}

#[tokio::test]
async fn test_close_failure_does_not_mask_success() {
    let lock = SimulatedLock::new();
    lock.inject_failure(A, InjectedFailure::Close);
    let mut feed = stream(&[card(A, "SERIAL0001")]);

    let report = registrar(&lock).run(&mut feed, |_| {}).await;

    assert!(report.is_success());
    assert_eq!(closes(&lock.journal()), 1);
}

#[tokio::test]
async fn test_malformed_card_never_opens_session() {
    let lock = SimulatedLock::new();
    let mut feed = stream(&["not a key card".to_string(), card(A, "SERIAL0001")]);

    let report = registrar(&lock).run(&mut feed, |_| {}).await;

    assert!(!report.is_success());
    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(
        outcome.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::MalformedCredential)
    );
    assert!(outcome.address.is_none());
    assert!(lock.journal().is_empty());
}

#[tokio::test]
async fn test_unreadable_input_terminates_run() {
    let lock = SimulatedLock::new();
    let input: &[u8] = b"\xff\xfe\n";
    let mut feed = InputFeed::from_reader(input);

    let report = registrar(&lock).run(&mut feed, |_| {}).await;

    assert!(!report.is_success());
    assert_eq!(report.final_state, RunState::Terminated);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(
        report.outcomes[0].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::InputUnavailable)
    );
    assert!(report.outcomes[0].address.is_none());
    assert!(lock.journal().is_empty());
}

#[tokio::test]
async fn test_empty_feed_succeeds() {
    let lock = SimulatedLock::new();
    let mut feed = stream(&[]);

    let mut events = Vec::new();
    let report = registrar(&lock).run(&mut feed, |e| events.push(e)).await;

    assert!(report.is_success());
    assert!(report.outcomes.is_empty());
    assert!(lock.journal().is_empty());
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        RegistrationEvent::PairingModeInstruction(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_single_value_grace_period() {
    let lock = SimulatedLock::new();
    let registrar = Registrar::new(lock.clone(), RegistrationOptions::new("keyble").unwrap());
    let mut feed = InputFeed::<&[u8]>::single(card(A, "SERIAL0001"));

    let mut events = Vec::new();
    let start = Instant::now();
    let report = registrar.run(&mut feed, |e| events.push(e)).await;

    assert!(report.is_success());
    assert!(start.elapsed() >= Duration::from_secs(2));

    let instructions = events
        .iter()
        .filter(|e| matches!(e, RegistrationEvent::PairingModeInstruction(_)))
        .count();
    let waits = events
        .iter()
        .filter(|e| matches!(e, RegistrationEvent::AwaitingOperator { .. }))
        .count();
    assert_eq!(instructions, 1);
    assert_eq!(waits, 1);
    assert!(matches!(
        events[0],
        RegistrationEvent::PairingModeInstruction(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stream_has_no_grace_period() {
    let lock = SimulatedLock::new();
    let registrar = Registrar::new(lock.clone(), RegistrationOptions::new("keyble").unwrap());
    let mut feed = stream(&[card(A, "SERIAL0001"), card(B, "SERIAL0002")]);

    let mut events = Vec::new();
    let start = Instant::now();
    let report = registrar.run(&mut feed, |e| events.push(e)).await;

    assert!(report.is_success());
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(!events
        .iter()
        .any(|e| matches!(e, RegistrationEvent::AwaitingOperator { .. })));
}
