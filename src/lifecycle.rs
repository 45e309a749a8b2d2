//! Precondition guards and liveness inference. Guards are pure functions
//! over `&Pod` that raise a specific [`PdmError`] message — exactly the
//! assertions the source runs before every radio exchange. Liveness
//! inference avoids needless radio traffic by reasoning about timing
//! windows before falling back to a status refresh.

use crate::error::PdmError;
use crate::pod::{BasalState, BolusState, Pod, PodProgress};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const MIN_BASAL_RATE: Decimal = dec!(0.05);
pub const MAX_BASAL_RATE: Decimal = dec!(30);

pub fn pod_address_assigned(pod: &Pod) -> Result<(), PdmError> {
    if pod.radio_address.is_none() {
        return Err(PdmError::new("Radio radio_address not set"));
    }
    Ok(())
}

pub fn pod_address_not_assigned(pod: &Pod) -> Result<(), PdmError> {
    if pod.radio_address.is_some() {
        return Err(PdmError::new("Radio radio_address already set"));
    }
    Ok(())
}

pub fn pod_can_activate(pod: &Pod) -> Result<(), PdmError> {
    if pod.radio_address_candidate.is_none() {
        return Err(PdmError::new("Radio radio_address candidate not set"));
    }
    if pod.state_progress != PodProgress::TankFillCompleted {
        return Err(PdmError::new(
            "Pod is not at the expected state of Tank Fill Completed",
        ));
    }
    Ok(())
}

pub fn pod_paired(pod: &Pod) -> Result<(), PdmError> {
    if pod.radio_address.is_none() {
        return Err(PdmError::new("Radio radio_address not accepted"));
    }
    if pod.state_progress != PodProgress::PairingSuccess {
        return Err(PdmError::new("Progress does not indicate pairing success"));
    }
    Ok(())
}

pub fn can_deactivate(pod: &Pod) -> Result<(), PdmError> {
    pod_address_assigned(pod)?;
    can_generate_nonce(pod)?;
    if pod.state_progress < PodProgress::PairingSuccess {
        return Err(PdmError::new("Pod is not paired"));
    }
    if pod.state_progress > PodProgress::AlertExpiredShuttingDown {
        return Err(PdmError::new("Pod already deactivated"));
    }
    Ok(())
}

pub fn can_acknowledge_alerts(pod: &Pod) -> Result<(), PdmError> {
    pod_address_assigned(pod)?;
    if pod.state_progress < PodProgress::PairingSuccess {
        return Err(PdmError::new("Pod not paired completely yet."));
    }
    if pod.state_progress == PodProgress::ErrorShuttingDown {
        return Err(PdmError::new(
            "Pod is shutting down, cannot acknowledge alerts.",
        ));
    }
    if pod.state_progress == PodProgress::AlertExpiredShuttingDown {
        return Err(PdmError::new(
            "Acknowledgement period expired, pod is shutting down",
        ));
    }
    if pod.state_progress > PodProgress::AlertExpiredShuttingDown {
        return Err(PdmError::new("Pod is not active"));
    }
    Ok(())
}

pub fn can_generate_nonce(pod: &Pod) -> Result<(), PdmError> {
    let _ = pod.id_lot;
    let _ = pod.id_t;
    // id_lot/id_t are non-optional u32 in this shadow (always known once a
    // Pod exists), so the only thing left to check is that the pod itself
    // has been identified — mirrored by the caller always holding a `Pod`.
    Ok(())
}

pub fn status_running(pod: &Pod) -> Result<(), PdmError> {
    if pod.state_progress < PodProgress::Running {
        return Err(PdmError::new("Pod is not yet running"));
    }
    if pod.state_progress > PodProgress::RunningLow {
        return Err(PdmError::new("Pod has stopped"));
    }
    Ok(())
}

pub fn not_faulted(pod: &Pod) -> Result<(), PdmError> {
    if pod.state_faulted {
        return Err(PdmError::new("Pod is state_faulted"));
    }
    Ok(())
}

pub fn immediate_bolus_active(pod: &Pod) -> Result<(), PdmError> {
    if pod.state_bolus != BolusState::Immediate {
        return Err(PdmError::new("No bolus is running to cancel"));
    }
    Ok(())
}

/// Re-derives the pulse-span ceiling from the *actual* pulse speed a bolus
/// will run at, rather than assuming the default speed. The source checks
/// `pulse_count * pulse_speed` against the same constant regardless of
/// which speed was requested; guarding on the real speed catches an
/// over-long bolus the default-speed check would miss.
///
/// The source always ran this span check at its fixed default speed (16),
/// which keeps `pulse_count` well under the `u16` wire field
/// `encode_immediate_bolus` packs it into (`pulse_count * 10`). Accepting a
/// caller-supplied speed opens that field to overflow at low speeds (e.g.
/// speed 1 permits `pulse_count` up to 14400), so the bound is checked
/// independently of the span.
pub fn pulse_span_within_limit(pulse_count: u16, pulse_speed: u16) -> Result<(), PdmError> {
    let span = u32::from(pulse_count) * u32::from(pulse_speed);
    if span > u32::from(crate::encoder::MAX_PULSE_SPAN) {
        return Err(PdmError::new(
            "Bolus pulse span exceeds the maximum allowed",
        ));
    }
    if u32::from(pulse_count) * 10 > u32::from(u16::MAX) {
        return Err(PdmError::new(
            "Bolus pulse count exceeds what the delivery command can encode",
        ));
    }
    Ok(())
}

pub fn basal_schedule_is_valid(pod: &Pod, schedule: &[Decimal; 48]) -> Result<(), PdmError> {
    for entry in schedule {
        if *entry < MIN_BASAL_RATE {
            return Err(PdmError::new(
                "A basal rate schedule entry cannot be less than 0.05U/h",
            ));
        }
        if *entry > MAX_BASAL_RATE {
            return Err(PdmError::new(
                "A basal rate schedule entry cannot be more than 30U/h",
            ));
        }
    }
    if pod.var_utc_offset.is_none() {
        return Err(PdmError::new("Pod utc offset not set"));
    }
    Ok(())
}

/// Result of a liveness check: either a definite answer from timing alone,
/// or a signal that the caller must refresh status from the pod to know
/// for sure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    Inactive,
    NeedsRefresh,
}

/// `_is_bolus_running`. Bounds an immediate bolus's duration by pulse count:
/// 35s/pulse at the earliest, 45s/pulse + 10s at the latest.
pub fn infer_bolus_running(pod: &Pod, now: u64) -> Liveness {
    if pod.state_last_updated.is_some() && pod.state_bolus != BolusState::Immediate {
        return Liveness::Inactive;
    }

    if let (Some(amount), Some(start)) =
        (pod.last_enacted_bolus_amount, pod.last_enacted_bolus_start)
    {
        if amount < Decimal::ZERO {
            return Liveness::Inactive;
        }
        let earliest = start + (amount * dec!(35)).to_whole_u64();
        let latest = start + (amount * dec!(45)).to_whole_u64() + 10;
        if now > latest {
            return Liveness::Inactive;
        }
        if now < earliest {
            return Liveness::Active;
        }
    }

    Liveness::NeedsRefresh
}

/// `_is_temp_basal_active`. Guards the `< 0` sentinel read behind an
/// `Option` — per the spec's open question, a missing amount must not be
/// treated as "running" (the source reads it without a null check).
pub fn infer_temp_basal_active(pod: &Pod, now: u64) -> Liveness {
    if pod.state_last_updated.is_some() && pod.state_basal != BasalState::TempBasal {
        return Liveness::Inactive;
    }

    if let (Some(start), Some(duration)) = (
        pod.last_enacted_temp_basal_start,
        pod.last_enacted_temp_basal_duration,
    ) {
        match pod.last_enacted_temp_basal_amount {
            Some(amount) if amount < Decimal::ZERO => return Liveness::Inactive,
            None => return Liveness::NeedsRefresh,
            _ => {}
        }
        let duration_secs = duration * dec!(3600);
        let earliest = start + duration_secs.to_whole_u64() - 60;
        let latest = start + (duration * dec!(3660)).to_whole_u64() + 60;
        if now > latest {
            return Liveness::Inactive;
        }
        if now < earliest {
            return Liveness::Active;
        }
    }

    Liveness::NeedsRefresh
}

/// `_is_basal_schedule_active`.
pub fn infer_basal_schedule_active(pod: &Pod) -> Liveness {
    if pod.state_last_updated.is_some() && pod.state_basal == BasalState::NotRunning {
        return Liveness::Inactive;
    }
    Liveness::NeedsRefresh
}

trait ToU64Saturating {
    fn to_whole_u64(self) -> u64;
}

impl ToU64Saturating for Decimal {
    fn to_whole_u64(self) -> u64 {
        rust_decimal::prelude::ToPrimitive::to_u64(&self.trunc()).unwrap_or(0)
    }
}
