//! Wire-level request/response envelope exchanged with the pod.
//!
//! A `Message` carries one or more `(command_type, body)` pairs — the outer
//! `0x1A` schedule header and its companion inner command (`0x13`/`0x16`/
//! `0x17`) are emitted as two commands in the same message.

use arrayvec::ArrayVec;

/// Bodies rarely exceed a few dozen bytes even for a 48-entry basal
/// schedule; this bound matches the teacher's preallocated-buffer style.
pub const MAX_COMMANDS_PER_MESSAGE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Pdm,
    Pod,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub message_type: MessageType,
    pub address: u32,
    pub sequence: u8,
    pub commands: ArrayVec<(u8, Vec<u8>), MAX_COMMANDS_PER_MESSAGE>,
    pub nonce: Option<u32>,
}

impl Message {
    pub fn new(message_type: MessageType, address: u32, sequence: u8) -> Self {
        Self {
            message_type,
            address,
            sequence,
            commands: ArrayVec::new(),
            nonce: None,
        }
    }

    /// Panics if more than `MAX_COMMANDS_PER_MESSAGE` commands are added to
    /// one message — every command path in this crate adds at most two.
    pub fn add_command(&mut self, command_type: u8, body: Vec<u8>) {
        self.commands
            .try_push((command_type, body))
            .expect("message command capacity exceeded");
    }

    pub fn set_nonce(&mut self, nonce: u32) {
        self.nonce = Some(nonce);
    }

    pub fn contents(&self) -> &[(u8, Vec<u8>)] {
        &self.commands
    }
}
