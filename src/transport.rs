//! Transport owns one physical exchange: nonce injection, bad-nonce
//! renegotiation, out-of-sync recovery, and dispatching a response's
//! commands back into the pod shadow. Everything above this layer
//! (`commands.rs`) only ever calls [`Transport::send`].

use crate::error::{OmnipyError, PdmError, TransmissionOutOfSyncError};
use crate::message::{Message, MessageType};
use crate::nonce::{NonceGen, FAKE_NONCE};
use crate::pod::Pod;
use crate::radio::RadioLink;
use std::time::Duration;

/// Time is an external collaborator purely so tests don't block on real
/// sleeps; [`SystemClock`] is what every non-test caller uses.
pub trait Clock {
    fn now(&self) -> u64;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A bad-nonce challenge is retried up to this many times before the
/// exchange is abandoned.
const MAX_NONCE_RETRIES: u8 = 4;
const INTERIM_RESYNC_INITIAL_DELAY: Duration = Duration::from_secs(15);
const INTERIM_RESYNC_FOLLOWUP_DELAY: Duration = Duration::from_secs(5);

pub struct Transport<R, N, C = SystemClock> {
    pub radio: R,
    pub nonce: N,
    pub clock: C,
}

impl<R: RadioLink, N: NonceGen, C: Clock> Transport<R, N, C> {
    pub fn new(radio: R, nonce: N, clock: C) -> Self {
        Self {
            radio,
            nonce,
            clock,
        }
    }

    /// Sends `commands` as one message and returns the pod's response,
    /// reseeding the nonce generator and retrying up to
    /// [`MAX_NONCE_RETRIES`] times if the pod answers with a bad-nonce
    /// challenge, and attempting exactly one out-of-sync recovery if the
    /// radio link itself reports its counters disagree. `message_sequence`
    /// is read for every attempt this call makes and advanced (mod 16) by
    /// the number of physical exchanges it actually ran, win or lose.
    #[allow(clippy::too_many_arguments)]
    pub fn send(
        &mut self,
        address: u32,
        message_sequence: &mut u8,
        commands: &[(u8, Vec<u8>)],
        use_nonce: bool,
        mut stay_connected: bool,
        low_tx: bool,
        high_tx: bool,
        address2: Option<u32>,
    ) -> Result<Message, OmnipyError> {
        let sequence = *message_sequence;
        let mut n_exchanges: u8 = 0;
        let mut retries = 0u8;

        let result = loop {
            let mut msg = Message::new(MessageType::Pdm, address, sequence);
            for (ctype, body) in commands {
                msg.add_command(*ctype, body.clone());
            }
            if use_nonce {
                let next = self.nonce.get_next();
                if next == FAKE_NONCE {
                    // No reliable nonce state yet: keep the radio connected
                    // so a bad-nonce challenge can be resolved without a
                    // second connection round-trip.
                    stay_connected = true;
                }
                msg.set_nonce(next);
            }

            n_exchanges += 1;
            let response = match self.radio.send_request_get_response(
                &msg,
                stay_connected,
                low_tx,
                high_tx,
                address2,
            ) {
                Ok(resp) => resp,
                Err(TransmissionOutOfSyncError) => {
                    if let Err(e) = self.interim_resync(address, &mut n_exchanges) {
                        break Err(e);
                    }
                    n_exchanges += 1;
                    match self.radio.send_request_get_response(
                        &msg,
                        stay_connected,
                        low_tx,
                        high_tx,
                        address2,
                    ) {
                        Ok(resp) => resp,
                        Err(_) => {
                            break Err(PdmError::new("Radio link out of sync after resync").into())
                        }
                    }
                }
            };

            if self.is_bad_nonce_challenge(&response, sequence) {
                retries += 1;
                if retries > MAX_NONCE_RETRIES {
                    break Err(PdmError::new("Nonce re-negotiation failed").into());
                }
                continue;
            }

            break Ok(response);
        };

        *message_sequence = sequence.wrapping_add(n_exchanges) % 16;
        result
    }

    /// Recovers from a single out-of-sync report: wait, probe the pod with
    /// a `0x0E 00` status request, the radio left connected and on high TX
    /// power, then wait again before the caller's real retry.
    fn interim_resync(&mut self, address: u32, n_exchanges: &mut u8) -> Result<(), OmnipyError> {
        self.clock.sleep(INTERIM_RESYNC_INITIAL_DELAY);
        let mut probe = Message::new(MessageType::Pdm, address, self.radio.message_sequence());
        probe.add_command(0x0e, vec![0x00]);
        self.radio
            .send_request_get_response(&probe, true, false, true, None)
            .map_err(|_| PdmError::new("Radio link could not be resynchronized"))?;
        *n_exchanges += 1;
        self.clock.sleep(INTERIM_RESYNC_FOLLOWUP_DELAY);
        Ok(())
    }

    /// `0x06` with reason byte `0x14` is a bad-nonce challenge; the
    /// remaining two bytes are the sync word to reseed from. The radio
    /// link's own sequence counter is reset to the message's sequence so
    /// the retry it is about to see isn't mistaken for a repeat.
    fn is_bad_nonce_challenge(&mut self, response: &Message, message_sequence: u8) -> bool {
        for (ctype, body) in response.contents() {
            if *ctype == 0x06 && body.first() == Some(&0x14) && body.len() >= 3 {
                let sync_word = u16::from_be_bytes([body[1], body[2]]);
                self.nonce.sync(sync_word, message_sequence);
                self.radio.set_message_sequence(message_sequence);
                return true;
            }
        }
        false
    }
}

/// Applies a response's commands to the pod shadow. The `0x01` version
/// branch is checked with its own `if`, not chained into the `0x1D`/`0x02`
/// `elif` — a response carrying both a version and a status command
/// updates both fields, matching the source's dispatch exactly.
pub fn apply_response(pod: &mut Pod, response: &Message, now: u64) {
    for (ctype, body) in response.contents() {
        if *ctype == 0x01 {
            pod.handle_version_response(body);
        }
        if *ctype == 0x1d {
            pod.handle_status_response(body, now);
        } else if *ctype == 0x02 {
            pod.handle_information_response(body, now);
        }
    }
}
