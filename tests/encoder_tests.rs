use pdmcore::encoder::*;
use rust_decimal_macros::dec;

#[test]
fn checksum_is_additive_sum_no_complement() {
    assert_eq!(checksum(&[0x01, 0x02, 0x03]), 6);
    assert_eq!(checksum(&[0xFF; 3]), 0x02FD);
}

#[test]
fn e1_immediate_bolus_one_unit_defaults() {
    let (outer, inner) = encode_immediate_bolus(20, DEFAULT_PULSE_SPEED, 0, 2);
    assert_eq!(outer[4], 0x02);
    assert_eq!(&inner[1..3], &(20u16 * 10).to_be_bytes());
}

#[test]
fn e2_cancel_bolus_no_beep() {
    let body = encode_cancel(false, true, false, false);
    assert_eq!(body, vec![0, 0, 0, 0, 0x04]);
}

#[test]
fn e3_acknowledge_alerts_mask() {
    let body = encode_acknowledge_alerts(0x0F);
    assert_eq!(body, vec![0, 0, 0, 0, 0x0F]);
}

#[test]
fn e4_status_request_default() {
    assert_eq!(encode_status_request(0), vec![0]);
}

#[test]
fn ise_round_trip_is_exact() {
    let pulse_list = vec![10, 10, 10, 5, 5, 0];
    let entries = insulin_schedule_table(&pulse_list);
    let packed = pack_ise_table(&entries);
    let unpacked = unpack_ise_table(&packed);
    assert_eq!(expand_insulin_schedule_table(&unpacked), pulse_list);
}

#[test]
fn pulses_for_half_hours_preserves_average_rate_below_one_pulse() {
    let units = vec![dec!(0.025); 2];
    let pulses = pulses_for_half_hours(&units);
    assert_eq!(pulses.iter().sum::<u16>(), 1);
}

#[test]
fn checksum_law_for_temp_basal_outer_body() {
    let rate = dec!(1.0);
    let half_hours = 4u8;
    let (outer, _inner) = encode_temp_basal(rate, half_hours, false);

    let half_hour_units = vec![rate / dec!(2); half_hours as usize];
    let pulse_list = pulses_for_half_hours(&half_hour_units);
    let mut body_for_checksum = vec![half_hours];
    body_for_checksum.extend_from_slice(&MAX_PULSE_SPAN.to_be_bytes());
    body_for_checksum.extend_from_slice(&pulse_list[0].to_be_bytes());
    let mut for_checksum = body_for_checksum.clone();
    for_checksum.extend_from_slice(&pack_pulse_list(&pulse_list));
    let expected = checksum(&for_checksum);

    let csum_bytes = &outer[5..7];
    assert_eq!(u16::from_be_bytes([csum_bytes[0], csum_bytes[1]]), expected);
}

#[test]
fn local_half_hour_position_advances_at_boundary() {
    // 00:29:59 local, offset 0: still in slot 0, 1 second left.
    assert_eq!(local_half_hour_position(29 * 60 + 59, 0), (0, 1));
    // 00:30:00 local: slot has just advanced to 1, 30 minutes remain.
    assert_eq!(local_half_hour_position(30 * 60, 0), (1, 1800));
}

#[test]
fn local_half_hour_position_applies_utc_offset() {
    // 23:45 UTC with a +60 minute offset is 00:45 local: slot 1.
    let now = 23 * 3600 + 45 * 60;
    let (slot, seconds) = local_half_hour_position(now as u64, 60);
    assert_eq!((slot, seconds), (1, 900));
}
