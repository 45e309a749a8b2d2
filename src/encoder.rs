//! Binary command encoding: pulse/interval tables, checksums, and the
//! command bodies described in the protocol. One pulse is 0.05 U of
//! insulin; all math here is base-10 fixed point (`rust_decimal::Decimal`),
//! never binary floating point, to preserve that quantum exactly.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Pulse-span ceiling for an immediate bolus: `pulse_count * pulse_speed`
/// must not exceed this.
pub const MAX_PULSE_SPAN: u16 = 0x3840;
pub const MAX_HALF_HOURS: u8 = 24;
pub const DEFAULT_PULSE_SPEED: u16 = 16;

const SECONDS_PER_HALF_HOUR: u32 = 1800;

/// 16-bit big-endian additive checksum: the unsigned sum of every input
/// byte, wrapped modulo 2^16. No one's-complement step.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| acc + u32::from(b))
        .wrapping_rem(0x1_0000) as u16
}

/// Converts a per-half-hour unit list into integer pulse counts, carrying
/// the fractional remainder forward so the average delivery rate across
/// the whole list matches the requested rate exactly (a half-hour alone
/// cannot represent a non-multiple-of-0.05 rate, e.g. 0.05 U/h split over
/// two half-hours is 1 pulse every other half-hour, not 0.5 pulses each).
pub fn pulses_for_half_hours(half_hour_units: &[Decimal]) -> Vec<u16> {
    let mut carry = Decimal::ZERO;
    half_hour_units
        .iter()
        .map(|units| {
            let exact = units * dec!(20) + carry;
            let pulses = exact.trunc();
            carry = exact - pulses;
            pulses.to_u16().unwrap_or(0)
        })
        .collect()
}

/// A run of `run_length` consecutive half-hours each delivering `count`
/// pulses — the run-length-compressed representation the pod firmware
/// expects for a schedule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IseEntry {
    pub count: u16,
    pub run_length: u8,
}

/// Run-length-compresses a flat per-half-hour pulse list into ISE entries.
pub fn insulin_schedule_table(pulse_list: &[u16]) -> Vec<IseEntry> {
    let mut entries: Vec<IseEntry> = Vec::new();
    for &count in pulse_list {
        match entries.last_mut() {
            Some(last) if last.count == count && last.run_length < u8::MAX => {
                last.run_length += 1;
            }
            _ => entries.push(IseEntry {
                count,
                run_length: 1,
            }),
        }
    }
    entries
}

/// Inverts [`insulin_schedule_table`]: expands ISE entries back into the
/// flat per-half-hour pulse list they were compressed from.
pub fn expand_insulin_schedule_table(entries: &[IseEntry]) -> Vec<u16> {
    let mut out = Vec::new();
    for entry in entries {
        out.extend(std::iter::repeat_n(entry.count, entry.run_length as usize));
    }
    out
}

/// Packs ISE entries for the wire: `u16(count) ‖ u8(run_length)` each.
pub fn pack_ise_table(entries: &[IseEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * 3);
    for entry in entries {
        out.extend_from_slice(&entry.count.to_be_bytes());
        out.push(entry.run_length);
    }
    out
}

/// Decodes a packed ISE table back into entries (used by the round-trip
/// test and by anything that needs to read a schedule table back).
pub fn unpack_ise_table(body: &[u8]) -> Vec<IseEntry> {
    body.chunks_exact(3)
        .map(|c| IseEntry {
            count: u16::from_be_bytes([c[0], c[1]]),
            run_length: c[2],
        })
        .collect()
}

/// Packs a flat per-half-hour pulse list as big-endian `u16`s — the
/// uncompressed form the checksum is computed over.
pub fn pack_pulse_list(pulse_list: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pulse_list.len() * 2);
    for &p in pulse_list {
        out.extend_from_slice(&p.to_be_bytes());
    }
    out
}

/// One delivery-interval entry: `pulse_count` pulses evenly spaced across
/// the half-hour, `interval_micros` apart. A half-hour with zero pulses
/// carries interval `0` as a no-delivery sentinel.
pub fn pulse_interval_entries(half_hour_units: &[Decimal]) -> Vec<(u16, u32)> {
    pulses_for_half_hours(half_hour_units)
        .into_iter()
        .map(|count| {
            let interval = if count == 0 {
                0
            } else {
                SECONDS_PER_HALF_HOUR * 1_000_000 / u32::from(count)
            };
            (count, interval)
        })
        .collect()
}

fn pack_pulse_interval_entries(entries: &[(u16, u32)]) -> Vec<u8> {
    // The first entry is emitted twice: once standalone immediately after
    // the reminders/reserved header, then again as the first element of
    // the general list. This mirrors the source's behavior exactly rather
    // than "fixing" what looks like a duplicate.
    let mut out = Vec::with_capacity((entries.len() + 1) * 6);
    if let Some(&(count, interval)) = entries.first() {
        out.extend_from_slice(&count.to_be_bytes());
        out.extend_from_slice(&interval.to_be_bytes());
    }
    for &(count, interval) in entries {
        out.extend_from_slice(&count.to_be_bytes());
        out.extend_from_slice(&interval.to_be_bytes());
    }
    out
}

/// Outer (`0x1A`) and inner (`0x17`) bodies for an immediate bolus.
pub fn encode_immediate_bolus(
    pulse_count: u16,
    pulse_speed: u16,
    reminders: u8,
    delivery_delay_secs: u32,
) -> (Vec<u8>, Vec<u8>) {
    let pulse_span = pulse_speed.wrapping_mul(pulse_count);

    let mut body_for_checksum = vec![0x01u8];
    body_for_checksum.extend_from_slice(&pulse_span.to_be_bytes());
    body_for_checksum.extend_from_slice(&pulse_count.to_be_bytes());
    body_for_checksum.extend_from_slice(&pulse_count.to_be_bytes());
    let csum = checksum(&body_for_checksum);

    let mut outer = vec![0u8, 0, 0, 0, 0x02];
    outer.extend_from_slice(&csum.to_be_bytes());
    outer.extend_from_slice(&body_for_checksum);

    let mut inner = vec![reminders];
    inner.extend_from_slice(&(pulse_count * 10).to_be_bytes());
    inner.extend_from_slice(&(delivery_delay_secs * 100_000).to_be_bytes());
    inner.extend_from_slice(&[0u8; 6]);

    (outer, inner)
}

/// Outer (`0x1A`) and inner (`0x16`) bodies for a temporary basal rate.
pub fn encode_temp_basal(rate: Decimal, half_hours: u8, confidence: bool) -> (Vec<u8>, Vec<u8>) {
    let half_hour_units = vec![rate / dec!(2); half_hours as usize];
    let pulse_list = pulses_for_half_hours(&half_hour_units);
    let ise_list = insulin_schedule_table(&pulse_list);
    let ise_body = pack_ise_table(&ise_list);
    let pulse_body = pack_pulse_list(&pulse_list);

    let mut body_for_checksum = vec![half_hours];
    body_for_checksum.extend_from_slice(&MAX_PULSE_SPAN.to_be_bytes());
    body_for_checksum.extend_from_slice(&pulse_list[0].to_be_bytes());

    let mut for_checksum = body_for_checksum.clone();
    for_checksum.extend_from_slice(&pulse_body);
    let csum = checksum(&for_checksum);

    let mut outer = vec![0u8, 0, 0, 0, 0x01];
    outer.extend_from_slice(&csum.to_be_bytes());
    outer.extend_from_slice(&body_for_checksum);
    outer.extend_from_slice(&ise_body);

    let reminders = if confidence { 0x40 } else { 0 };
    let mut inner = vec![reminders, 0x00];
    let entries = pulse_interval_entries(&half_hour_units);
    inner.extend_from_slice(&pack_pulse_interval_entries(&entries));

    (outer, inner)
}

/// Outer (`0x1A`) and inner (`0x13`) bodies for installing a basal
/// schedule, given the current half-hour index and the seconds remaining
/// in it — both produced by [`local_half_hour_position`] from the pod's
/// local time.
pub fn encode_basal_schedule(
    schedule: &[Decimal; 48],
    current_half_hour: u8,
    seconds_until_half_hour: u32,
) -> (Vec<u8>, Vec<u8>) {
    let halved: Vec<Decimal> = schedule.iter().map(|r| r / dec!(2)).collect();
    let pulse_list = pulses_for_half_hours(&halved);
    let ise_list = insulin_schedule_table(&pulse_list);
    let ise_body = pack_ise_table(&ise_list);
    let pulse_body = pack_pulse_list(&pulse_list);

    let current_pulses = pulse_list[current_half_hour as usize];
    let pulses_remaining_current =
        (seconds_until_half_hour as u64 * u64::from(current_pulses) / 1800) as u16;

    let mut body_for_checksum = vec![current_half_hour];
    body_for_checksum.extend_from_slice(&(seconds_until_half_hour as u16 * 8).to_be_bytes());
    body_for_checksum.extend_from_slice(&pulses_remaining_current.to_be_bytes());

    let mut for_checksum = body_for_checksum.clone();
    for_checksum.extend_from_slice(&pulse_body);
    let csum = checksum(&for_checksum);

    let mut outer = vec![0u8, 0, 0, 0, 0x00];
    outer.extend_from_slice(&csum.to_be_bytes());
    outer.extend_from_slice(&body_for_checksum);
    outer.extend_from_slice(&ise_body);

    let mut inner = vec![0u8, 0x00];
    inner.extend_from_slice(&(pulses_remaining_current * 10).to_be_bytes());
    let interval = if pulses_remaining_current == 0 {
        0
    } else {
        (u64::from(seconds_until_half_hour) * 1_000_000 / u64::from(pulses_remaining_current))
            as u32
    };
    inner.extend_from_slice(&interval.to_be_bytes());

    // Unlike the temp-basal inner body, the leading pair here is the
    // pro-rated current-half-hour count, not a duplicate of entries[0], so
    // the full entry list follows it without skipping anything.
    for &(count, intv) in &pulse_interval_entries(&halved) {
        inner.extend_from_slice(&count.to_be_bytes());
        inner.extend_from_slice(&intv.to_be_bytes());
    }

    (outer, inner)
}

/// Derives the current half-hour slot (0..48) and the seconds remaining in
/// it from the pod's local time — `now` (unix seconds) shifted by
/// `utc_offset_minutes`. Below the half-hour boundary the slot is left
/// unchanged; at or past it, the slot advances by one, matching the
/// source's `if minute < 30 / else` split exactly.
pub fn local_half_hour_position(now: u64, utc_offset_minutes: i32) -> (u8, u32) {
    const SECONDS_PER_DAY: i64 = 86_400;
    let local = (now as i64 + i64::from(utc_offset_minutes) * 60).rem_euclid(SECONDS_PER_DAY);
    let hour = (local / 3600) as u32;
    let minute = ((local % 3600) / 60) as u32;
    let second = (local % 60) as u32;

    let mut half_hour = hour * 2;
    let seconds_until_half_hour = if minute < 30 {
        (30 - minute - 1) * 60 + (60 - second)
    } else {
        half_hour += 1;
        (60 - minute - 1) * 60 + (60 - second)
    };
    ((half_hour % 48) as u8, seconds_until_half_hour)
}

/// Cancel-delivery (`0x1F`) body.
pub fn encode_cancel(
    beep: bool,
    cancel_bolus: bool,
    cancel_temp_basal: bool,
    cancel_basal: bool,
) -> Vec<u8> {
    let mut flags = if beep { 0x60 } else { 0 };
    if cancel_bolus {
        flags |= 0x04;
    }
    if cancel_temp_basal {
        flags |= 0x02;
    }
    if cancel_basal {
        flags |= 0x01;
    }
    vec![0, 0, 0, 0, flags]
}

/// Status request (`0x0E`) body.
pub fn encode_status_request(update_type: u8) -> Vec<u8> {
    vec![update_type]
}

/// Acknowledge-alerts (`0x11`) body.
pub fn encode_acknowledge_alerts(alert_mask: u8) -> Vec<u8> {
    vec![0, 0, 0, 0, alert_mask]
}

/// Configure-alert (`0x19`) body.
#[allow(clippy::too_many_arguments)]
pub fn encode_configure_alert(
    alert_bit: u8,
    activate: bool,
    trigger_auto_off: bool,
    duration_minutes: u16,
    trigger_reservoir: bool,
    alert_after_minutes: Option<u16>,
    alert_after_reservoir: Option<Decimal>,
    beep_repeat_type: u8,
    beep_type: u8,
) -> Vec<u8> {
    let mut b0 = alert_bit << 4;
    if activate {
        b0 |= 0x08;
    }
    if trigger_reservoir {
        b0 |= 0x04;
    }
    if trigger_auto_off {
        b0 |= 0x02;
    }
    b0 |= ((duration_minutes >> 8) & 0x01) as u8;
    let b1 = (duration_minutes & 0xFF) as u8;

    let (b2, b3) = if trigger_reservoir {
        let limit = (alert_after_reservoir.unwrap_or_default() * dec!(10))
            .to_u16()
            .unwrap_or(0);
        (limit >> 8, limit & 0xFF)
    } else {
        let minutes = alert_after_minutes.unwrap_or(0);
        (minutes >> 8, minutes & 0xFF)
    };

    vec![
        0,
        0,
        0,
        0,
        b0,
        b1,
        b2 as u8,
        b3 as u8,
        beep_repeat_type,
        beep_type,
    ]
}

/// Assign-address (`0x07`) body.
pub fn encode_assign_address(address_candidate: u32) -> Vec<u8> {
    address_candidate.to_be_bytes().to_vec()
}

/// Setup-pod (`0x03`) body.
#[allow(clippy::too_many_arguments)]
pub fn encode_setup_pod(
    address_candidate: u32,
    month: u8,
    day: u8,
    year_since_2000: u8,
    hour: u8,
    minute: u8,
    id_lot: u32,
    id_t: u32,
) -> Vec<u8> {
    let mut body = address_candidate.to_be_bytes().to_vec();
    body.push(0x14);
    body.push(4); // packet timeout
    body.extend_from_slice(&[month, day, year_since_2000, hour, minute]);
    body.extend_from_slice(&id_lot.to_be_bytes());
    body.extend_from_slice(&id_t.to_be_bytes());
    body
}

/// Deactivate (`0x1C`) body.
pub fn encode_deactivate() -> Vec<u8> {
    vec![0, 0, 0, 0]
}
