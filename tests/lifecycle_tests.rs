use pdmcore::lifecycle::*;
use pdmcore::pod::{BasalState, BolusState, Pod, PodProgress};
use rust_decimal_macros::dec;

fn running_pod() -> Pod {
    let mut pod = Pod::new(1, 2);
    pod.radio_address = Some(0x6600_0001);
    pod.state_progress = PodProgress::Running;
    pod.var_utc_offset = Some(0);
    pod
}

#[test]
fn basal_schedule_rejects_out_of_range_entries() {
    let pod = running_pod();
    let mut schedule = [dec!(1.0); 48];
    schedule[10] = dec!(0.01);
    assert!(basal_schedule_is_valid(&pod, &schedule).is_err());

    schedule[10] = dec!(31);
    assert!(basal_schedule_is_valid(&pod, &schedule).is_err());
}

#[test]
fn basal_schedule_requires_utc_offset() {
    let mut pod = running_pod();
    pod.var_utc_offset = None;
    let schedule = [dec!(1.0); 48];
    assert!(basal_schedule_is_valid(&pod, &schedule).is_err());
}

#[test]
fn status_running_bounds_are_inclusive_running_to_running_low() {
    let mut pod = running_pod();
    pod.state_progress = PodProgress::Running;
    assert!(status_running(&pod).is_ok());
    pod.state_progress = PodProgress::RunningLow;
    assert!(status_running(&pod).is_ok());
    pod.state_progress = PodProgress::RunningNormal;
    assert!(status_running(&pod).is_err());
    pod.state_progress = PodProgress::ErrorShuttingDown;
    assert!(status_running(&pod).is_err());
}

#[test]
fn bolus_liveness_within_window_is_active_without_refresh() {
    let mut pod = running_pod();
    pod.state_last_updated = Some(1);
    pod.state_bolus = BolusState::Immediate;
    pod.last_enacted_bolus_amount = Some(dec!(1.0));
    pod.last_enacted_bolus_start = Some(10_000);
    // earliest completion is start + 35s; well before that, it must still be running.
    assert_eq!(infer_bolus_running(&pod, 10_010), Liveness::Active);
}

#[test]
fn bolus_liveness_cancelled_sentinel_is_inactive() {
    let mut pod = running_pod();
    pod.state_last_updated = Some(1);
    pod.last_enacted_bolus_amount = Some(dec!(-1));
    pod.last_enacted_bolus_start = Some(10_000);
    assert_eq!(infer_bolus_running(&pod, 10_100), Liveness::Inactive);
}

#[test]
fn pulse_span_guard_uses_requested_speed_not_default() {
    // 400 pulses * 16 (default speed) stays within MAX_PULSE_SPAN, but the
    // same pulse count at a higher requested speed must not slip through.
    assert!(pulse_span_within_limit(400, 16).is_ok());
    assert!(pulse_span_within_limit(400, 64).is_err());
}

#[test]
fn pulse_span_guard_rejects_counts_the_wire_field_cannot_encode() {
    // span = 14400 * 1 stays within MAX_PULSE_SPAN, but pulse_count * 10
    // would overflow the u16 delivery-delay field the speed-only span check
    // never protected.
    assert!(pulse_span_within_limit(14400, 1).is_err());
}

#[test]
fn temp_basal_liveness_without_amount_needs_refresh_not_active() {
    let mut pod = running_pod();
    pod.state_last_updated = Some(1);
    pod.state_basal = BasalState::TempBasal;
    pod.last_enacted_temp_basal_start = Some(10_000);
    pod.last_enacted_temp_basal_duration = Some(dec!(1.0));
    pod.last_enacted_temp_basal_amount = None;
    assert_eq!(
        infer_temp_basal_active(&pod, 10_100),
        Liveness::NeedsRefresh
    );
}

#[test]
fn bolus_state_not_running_is_inactive_when_fresh() {
    let mut pod = running_pod();
    pod.state_last_updated = Some(1);
    pod.state_bolus = BolusState::NotRunning;
    assert_eq!(infer_bolus_running(&pod, 2), Liveness::Inactive);
}
