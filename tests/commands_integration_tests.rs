use pdmcore::commands::Pdm;
use pdmcore::message::{Message, MessageType};
use pdmcore::nonce::SequentialNonceGen;
use pdmcore::radio::ScriptedRadioLink;
use pdmcore::store::AtomicFileStore;
use pdmcore::transport::Clock;
use pdmcore::{BolusState, OmnipyError, PodProgress};
use rust_decimal_macros::dec;
use std::time::Duration;

#[derive(Default, Clone, Copy)]
struct NullClock;

impl Clock for NullClock {
    fn now(&self) -> u64 {
        10_000
    }
    fn sleep(&self, _duration: Duration) {}
}

fn status_body() -> Vec<u8> {
    let mut b = vec![6, 0, 0, 0, 0]; // Running, not faulted, no alerts, not running, not running
    b.extend_from_slice(&[0, 0]); // active minutes
    b.extend_from_slice(&[0, 0, 0x03, 0xE8]); // 100.0 U reservoir
    b
}

/// Same as [`status_body`] but with the bolus byte confirming an immediate
/// bolus is running, for tests that exercise a successful bolus exchange.
fn bolus_confirmed_status_body() -> Vec<u8> {
    let mut b = status_body();
    b[3] = 2; // Immediate
    b
}

fn pdm_with_response(
    response: Message,
) -> Pdm<ScriptedRadioLink, SequentialNonceGen, AtomicFileStore, NullClock> {
    let mut radio = ScriptedRadioLink::new();
    radio.push_response(response);
    // Leaked on purpose: keeping a `TempDir` alive would tie its lifetime to
    // this helper, but the returned `Pdm` needs the directory to outlive it.
    let dir = tempfile::tempdir().unwrap().keep();
    let store = AtomicFileStore::new(dir.join("pod.json"));
    let nonce = SequentialNonceGen::new(1, 2, Some(5), 0);
    let mut pdm = Pdm::new(radio, nonce, NullClock, store, 1, 2).unwrap();
    pdm.pod_mut().radio_address = Some(0x6600_0001);
    pdm.pod_mut().state_progress = PodProgress::Running;
    pdm
}

#[test]
fn update_pod_status_applies_response_and_persists() {
    let mut response = Message::new(MessageType::Pod, 0x6600_0001, 0);
    response.add_command(0x1d, status_body());
    let mut pdm = pdm_with_response(response);

    pdm.update_pod_status(0).unwrap();
    assert_eq!(pdm.pod().state_progress, PodProgress::Running);
    assert_eq!(pdm.pod().state_last_updated, Some(10_000));
}

#[test]
fn bolus_rejects_when_already_running() {
    let mut response = Message::new(MessageType::Pod, 0x6600_0001, 0);
    response.add_command(0x1d, status_body());
    let mut pdm = pdm_with_response(response);
    pdm.pod_mut().state_bolus = BolusState::Immediate;
    pdm.pod_mut().state_last_updated = Some(1);
    // Liveness must be decidable from timing alone here, or the guard would
    // fall back to a status refresh and never see "already running".
    pdm.pod_mut().last_enacted_bolus_amount = Some(dec!(1.0));
    pdm.pod_mut().last_enacted_bolus_start = Some(10_000);

    let err = pdm.bolus(dec!(1.0), None, 0).unwrap_err();
    assert!(matches!(err, OmnipyError::Pdm(_)));
}

#[test]
fn bolus_over_maximum_is_rejected_before_any_radio_traffic() {
    let mut pdm = pdm_with_response(Message::new(MessageType::Pod, 0x6600_0001, 0));
    pdm.pod_mut().state_last_updated = Some(1);
    pdm.pod_mut().var_maximum_bolus = Some(dec!(5));

    let err = pdm.bolus(dec!(10), None, 0).unwrap_err();
    assert!(matches!(err, OmnipyError::Pdm(_)));
    assert!(pdm.radio().sent.is_empty());
}

#[test]
fn bolus_success_updates_shadow_and_persists() {
    let mut response = Message::new(MessageType::Pod, 0x6600_0001, 0);
    response.add_command(0x1d, bolus_confirmed_status_body());
    let mut pdm = pdm_with_response(response);
    pdm.pod_mut().state_last_updated = Some(1);
    pdm.pod_mut().insulin_reservoir = dec!(50);

    pdm.bolus(dec!(1.0), None, 0).unwrap();
    assert_eq!(pdm.pod().last_enacted_bolus_amount, Some(dec!(1.0)));
    assert_eq!(pdm.pod().last_enacted_bolus_start, Some(10_000));
}

#[test]
fn deactivate_requires_paired_pod() {
    let mut pdm = pdm_with_response(Message::new(MessageType::Pod, 0x6600_0001, 0));
    pdm.pod_mut().state_progress = PodProgress::Initial;
    let err = pdm.deactivate_pod().unwrap_err();
    assert!(matches!(err, OmnipyError::Pdm(_)));
}

#[test]
fn is_busy_reflects_lock_state() {
    let mut pdm = pdm_with_response(Message::new(MessageType::Pod, 0x6600_0001, 0));
    assert!(!pdm.is_busy().unwrap());
}

#[test]
fn cancel_bolus_rejects_when_pod_is_faulted() {
    let mut pdm = pdm_with_response(Message::new(MessageType::Pod, 0x6600_0001, 0));
    pdm.pod_mut().state_bolus = BolusState::Immediate;
    pdm.pod_mut().state_faulted = true;

    let err = pdm.cancel_bolus(false).unwrap_err();
    assert!(matches!(err, OmnipyError::Pdm(_)));
}
