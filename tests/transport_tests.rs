use pdmcore::message::{Message, MessageType};
use pdmcore::nonce::NonceGen;
use pdmcore::pod::Pod;
use pdmcore::radio::ScriptedRadioLink;
use pdmcore::transport::{apply_response, Clock, Transport};
use pdmcore::OmnipyError;
use std::time::Duration;

#[derive(Default)]
struct NullClock;

impl Clock for NullClock {
    fn now(&self) -> u64 {
        1_000
    }
    fn sleep(&self, _duration: Duration) {}
}

struct FixedNonceGen {
    synced: Option<(u16, u8)>,
}

impl NonceGen for FixedNonceGen {
    fn get_next(&mut self) -> u32 {
        0xABCD
    }
    fn sync(&mut self, sync_word: u16, message_sequence: u8) {
        self.synced = Some((sync_word, message_sequence));
    }
}

#[test]
fn bad_nonce_challenge_reseeds_and_retries_until_success() {
    let mut radio = ScriptedRadioLink::new();
    let mut challenge = Message::new(MessageType::Pod, 0x123, 0);
    challenge.add_command(0x06, vec![0x14, 0x12, 0x34]);
    radio.push_response(challenge);
    let mut ok = Message::new(MessageType::Pod, 0x123, 0);
    ok.add_command(0x1d, vec![0; 10]);
    radio.push_response(ok);

    let mut transport = Transport::new(radio, FixedNonceGen { synced: None }, NullClock);
    let resp = transport
        .send(
            0x123,
            &mut 0,
            &[(0x0e, vec![0])],
            true,
            false,
            false,
            false,
            None,
        )
        .expect("eventually succeeds");
    assert_eq!(resp.contents()[0].0, 0x1d);
    assert_eq!(transport.nonce.synced, Some((0x1234, 0)));
}

#[test]
fn exhausting_retries_raises_renegotiation_failed() {
    let mut radio = ScriptedRadioLink::new();
    for _ in 0..5 {
        let mut challenge = Message::new(MessageType::Pod, 0x123, 0);
        challenge.add_command(0x06, vec![0x14, 0x00, 0x01]);
        radio.push_response(challenge);
    }

    let mut transport = Transport::new(radio, FixedNonceGen { synced: None }, NullClock);
    let err = transport
        .send(
            0x123,
            &mut 0,
            &[(0x0e, vec![0])],
            true,
            false,
            false,
            false,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, OmnipyError::Pdm(_)));
}

#[test]
fn out_of_sync_recovers_once_then_succeeds() {
    let mut radio = ScriptedRadioLink::new();
    radio.push_out_of_sync();
    radio.push_response(Message::new(MessageType::Pod, 0x123, 0)); // resync probe
    let mut ok = Message::new(MessageType::Pod, 0x123, 0);
    ok.add_command(0x1d, vec![0; 10]);
    radio.push_response(ok);

    let mut transport = Transport::new(radio, FixedNonceGen { synced: None }, NullClock);
    let resp = transport
        .send(
            0x123,
            &mut 0,
            &[(0x0e, vec![0])],
            true,
            false,
            false,
            false,
            None,
        )
        .expect("resync then success");
    assert_eq!(resp.contents()[0].0, 0x1d);
}

#[test]
fn version_and_status_both_apply_from_one_response() {
    let mut pod = Pod::new(1, 2);
    let mut response = Message::new(MessageType::Pod, 0x123, 0);
    response.add_command(0x01, vec![]);
    let mut status_body = vec![6, 0, 0, 0, 0];
    status_body.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    response.add_command(0x1d, status_body);

    apply_response(&mut pod, &response, 1_000);
    assert_eq!(pod.state_progress, pdmcore::PodProgress::Running);
    assert_eq!(pod.state_last_updated, Some(1_000));
}
