//! The pod shadow: an in-memory mirror of pod state, updated only by
//! Transport's response dispatch and by Commands, under the single-flight
//! lock. See [`crate::store`] for how it is persisted.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Pod lifecycle progress. Ordered exactly as the device reports it —
/// guards compare with `<`/`>=` against this ordering, not by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PodProgress {
    Initial,
    TankPowerActivated,
    TankFillCompleted,
    PairingSuccess,
    Priming,
    RunningNormal,
    Running,
    RunningLow,
    ErrorShuttingDown,
    AlertExpiredShuttingDown,
    Inactive,
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasalState {
    NotRunning,
    TempBasal,
    Program,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BolusState {
    NotRunning,
    Extended,
    Immediate,
}

pub const UNASSIGNED_ADDRESS: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    // Identity
    pub id_lot: u32,
    pub id_t: u32,
    pub radio_address: Option<u32>,
    pub radio_address_candidate: Option<u32>,

    // Radio counters
    pub radio_message_sequence: u8,
    pub radio_packet_sequence: u8,

    // Nonce state
    pub nonce_last: u32,
    pub nonce_seed: u32,

    // Progress
    pub state_progress: PodProgress,

    // Basal / bolus state
    pub state_basal: BasalState,
    pub state_bolus: BolusState,

    // Runtime
    pub state_faulted: bool,
    pub state_alert: u8,
    pub state_last_updated: Option<u64>,
    pub state_active_minutes: Option<u16>,
    pub insulin_reservoir: Decimal,

    // Last enacted bolus
    pub last_enacted_bolus_amount: Option<Decimal>,
    pub last_enacted_bolus_start: Option<u64>,

    // Last enacted temp basal
    pub last_enacted_temp_basal_amount: Option<Decimal>,
    pub last_enacted_temp_basal_start: Option<u64>,
    pub last_enacted_temp_basal_duration: Option<Decimal>,

    // User config
    pub var_maximum_bolus: Option<Decimal>,
    pub var_maximum_temp_basal_rate: Option<Decimal>,
    /// 48 half-hour rates. Stored as a `Vec` rather than `[Decimal; 48]`
    /// purely because `serde`'s array support stops at 32 elements;
    /// callers still work in `[Decimal; 48]`, see [`crate::commands`].
    pub var_basal_schedule: Option<Vec<Decimal>>,
    pub var_alert_low_reservoir: Option<Decimal>,
    pub var_alert_replace_pod: Option<u16>,
    pub var_utc_offset: Option<i32>,
}

impl Pod {
    /// A freshly-identified pod, pre-pairing: only the identity fields are
    /// known, everything else is at its zeroed/unassigned default.
    pub fn new(id_lot: u32, id_t: u32) -> Self {
        Self {
            id_lot,
            id_t,
            radio_address: None,
            radio_address_candidate: None,
            radio_message_sequence: 0,
            radio_packet_sequence: 0,
            nonce_last: 0,
            nonce_seed: 0,
            state_progress: PodProgress::Initial,
            state_basal: BasalState::NotRunning,
            state_bolus: BolusState::NotRunning,
            state_faulted: false,
            state_alert: 0,
            state_last_updated: None,
            state_active_minutes: None,
            insulin_reservoir: Decimal::ZERO,
            last_enacted_bolus_amount: None,
            last_enacted_bolus_start: None,
            last_enacted_temp_basal_amount: None,
            last_enacted_temp_basal_start: None,
            last_enacted_temp_basal_duration: None,
            var_maximum_bolus: None,
            var_maximum_temp_basal_rate: None,
            var_basal_schedule: None,
            var_alert_low_reservoir: None,
            var_alert_replace_pod: None,
            var_utc_offset: None,
        }
    }

    /// Version response (`0x01`) handler. Transport dispatches this branch
    /// unconditionally, never as an `else if` — see [`crate::transport`].
    /// The version payload carries no fields this shadow tracks; receiving
    /// it simply confirms the pod answered.
    pub fn handle_version_response(&mut self, _body: &[u8]) {
        tracing::debug!("pod version response received");
    }

    /// Status response (`0x1D`) handler. Byte layout (an internal
    /// convention for this shadow, not a claim about real pod firmware
    /// framing, since the distilled protocol only specifies the PDM→Pod
    /// direction in byte-exact detail):
    /// `progress(1) | faulted(1) | alert_mask(1) | bolus(1) | basal(1) |
    /// active_minutes(2 BE) | reservoir_decipulses(4 BE)`.
    pub fn handle_status_response(&mut self, body: &[u8], now: u64) {
        if body.len() < 11 {
            tracing::warn!(len = body.len(), "status response too short, ignoring");
            return;
        }
        self.state_progress = progress_from_byte(body[0]);
        self.state_faulted = body[1] != 0;
        self.state_alert = body[2];
        self.state_bolus = bolus_from_byte(body[3]);
        self.state_basal = basal_from_byte(body[4]);
        self.state_active_minutes = Some(u16::from_be_bytes([body[5], body[6]]));
        let decipulses = u32::from_be_bytes([body[7], body[8], body[9], body[10]]);
        self.insulin_reservoir = Decimal::new(i64::from(decipulses), 1);
        self.state_last_updated = Some(now);
    }

    /// Information/fault response (`0x02`) handler.
    pub fn handle_information_response(&mut self, body: &[u8], now: u64) {
        if let Some(&flag) = body.first() {
            self.state_faulted = flag != 0;
        }
        self.state_last_updated = Some(now);
    }
}

fn progress_from_byte(b: u8) -> PodProgress {
    use PodProgress::*;
    const ORDER: [PodProgress; 12] = [
        Initial,
        TankPowerActivated,
        TankFillCompleted,
        PairingSuccess,
        Priming,
        RunningNormal,
        Running,
        RunningLow,
        ErrorShuttingDown,
        AlertExpiredShuttingDown,
        Inactive,
        Fault,
    ];
    ORDER.get(b as usize).copied().unwrap_or(PodProgress::Fault)
}

fn bolus_from_byte(b: u8) -> BolusState {
    match b {
        1 => BolusState::Extended,
        2 => BolusState::Immediate,
        _ => BolusState::NotRunning,
    }
}

fn basal_from_byte(b: u8) -> BasalState {
    match b {
        1 => BasalState::TempBasal,
        2 => BasalState::Program,
        _ => BasalState::NotRunning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_ordering_matches_spec_sequence() {
        assert!(PodProgress::Initial < PodProgress::TankPowerActivated);
        assert!(PodProgress::Running < PodProgress::RunningLow);
        assert!(PodProgress::RunningLow < PodProgress::ErrorShuttingDown);
        assert!(PodProgress::Inactive < PodProgress::Fault);
    }

    #[test]
    fn status_response_updates_shadow() {
        let mut pod = Pod::new(1, 2);
        let body = [
            6,    // Running
            0,    // not faulted
            0x0F, // alert mask
            2,    // bolus immediate
            2,    // basal program
            0, 30, // active minutes = 30
            0, 0, 0x03, 0xE8, // 1000 decipulses = 100.0 U
        ];
        pod.handle_status_response(&body, 1_000);
        assert_eq!(pod.state_progress, PodProgress::Running);
        assert_eq!(pod.state_bolus, BolusState::Immediate);
        assert_eq!(pod.state_basal, BasalState::Program);
        assert_eq!(pod.state_active_minutes, Some(30));
        assert_eq!(pod.insulin_reservoir, Decimal::new(1000, 1));
        assert_eq!(pod.state_last_updated, Some(1_000));
    }
}
