//! The public command surface: every operation a PDM product would call.
//! Each method follows the same skeleton — take the single-flight lock,
//! check preconditions, encode, exchange over the radio, fold the response
//! into the pod shadow, then persist the shadow before releasing the lock,
//! regardless of whether the command itself succeeded.
//!
//! The per-command bodies are associated functions taking `&mut Pod` and
//! `&mut Transport<..>` directly, rather than `&mut self` methods: the
//! lock guard borrows `self.lock` for the whole call, and a `&mut self`
//! method would conflict with that borrow even though the two fields never
//! actually alias.

use crate::encoder;
use crate::error::{OmnipyError, PdmError, PdmResult};
use crate::lifecycle;
use crate::lock::PdmLock;
use crate::nonce::NonceGen;
use crate::pod::{BasalState, BolusState, Pod, PodProgress};
use crate::radio::RadioLink;
use crate::store::PodStore;
use crate::transport::{apply_response, Clock, SystemClock, Transport};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const PULSE_UNIT: Decimal = dec!(0.05);
const DEFAULT_BOLUS_DELIVERY_DELAY_SECS: u32 = 2;
const ACTIVATION_PRIME_PULSES: u16 = 52;
const ACTIVATION_ADDRESS: u32 = 0x6600_0000;

pub struct Pdm<R, N, S, C = SystemClock>
where
    R: RadioLink,
    N: NonceGen,
    S: PodStore,
    C: Clock,
{
    transport: Transport<R, N, C>,
    pod: Pod,
    store: S,
    lock: PdmLock,
}

impl<R, N, S, C> Pdm<R, N, S, C>
where
    R: RadioLink,
    N: NonceGen,
    S: PodStore,
    C: Clock,
{
    /// Loads a persisted pod if the store has one, otherwise starts a fresh
    /// shadow for `id_lot`/`id_t`.
    pub fn new(radio: R, nonce: N, clock: C, store: S, id_lot: u32, id_t: u32) -> PdmResult<Self> {
        let pod = store
            .load()
            .map_err(OmnipyError::unexpected)?
            .unwrap_or_else(|| Pod::new(id_lot, id_t));
        Ok(Self {
            transport: Transport::new(radio, nonce, clock),
            pod,
            store,
            lock: PdmLock::new(),
        })
    }

    pub fn pod(&self) -> &Pod {
        &self.pod
    }

    /// Direct shadow access for callers that provision a pod's identity out
    /// of band (e.g. after a pairing flow not modeled by this crate).
    pub fn pod_mut(&mut self) -> &mut Pod {
        &mut self.pod
    }

    /// Direct radio access, mainly useful for tests asserting on what was
    /// actually sent.
    pub fn radio(&self) -> &R {
        &self.transport.radio
    }

    /// Non-blocking: `true` immediately if another logical caller currently
    /// holds the command lock (a [`PdmBusyError`](crate::error::PdmBusyError)
    /// swallowed into `true`, as the source does). Otherwise runs the same
    /// bolus-liveness check `bolus` itself runs — a status refresh only if
    /// the timing window is ambiguous — and reports whether a bolus is
    /// currently infusing. Any other failure (e.g. the radio itself failing
    /// during that refresh) propagates rather than being folded into
    /// `false`.
    pub fn is_busy(&mut self) -> PdmResult<bool> {
        let _guard = match self.lock.try_enter() {
            Ok(guard) => guard,
            Err(_) => return Ok(true),
        };
        let result = Self::is_busy_inner(&mut self.pod, &mut self.transport);
        self.transport.radio.disconnect();
        result
    }

    fn is_busy_inner(pod: &mut Pod, transport: &mut Transport<R, N, C>) -> PdmResult<bool> {
        let now = transport.clock.now();
        match lifecycle::infer_bolus_running(pod, now) {
            lifecycle::Liveness::Active => Ok(true),
            lifecycle::Liveness::Inactive => Ok(false),
            lifecycle::Liveness::NeedsRefresh => {
                Self::update_pod_status_inner(pod, transport, 0)?;
                Ok(pod.state_bolus == BolusState::Immediate)
            }
        }
    }

    /// `updatePodStatus`. Refreshes the shadow from the pod without
    /// requiring a nonce — a pure read.
    pub fn update_pod_status(&mut self, update_type: u8) -> PdmResult<()> {
        let _guard = self.lock.enter();
        let result = Self::update_pod_status_inner(&mut self.pod, &mut self.transport, update_type);
        self.transport.radio.disconnect();
        Self::finish(&self.pod, &self.store, result)
    }

    /// Fresh-shadow threshold below which a plain (`update_type == 0`)
    /// status refresh is skipped rather than re-polling the radio.
    const STATUS_FRESHNESS_SECS: u64 = 60;

    fn update_pod_status_inner(
        pod: &mut Pod,
        transport: &mut Transport<R, N, C>,
        update_type: u8,
    ) -> PdmResult<()> {
        lifecycle::pod_address_assigned(pod)?;
        if update_type == 0 {
            if let Some(last) = pod.state_last_updated {
                let now = transport.clock.now();
                if now.saturating_sub(last) < Self::STATUS_FRESHNESS_SECS {
                    return Ok(());
                }
            }
        }
        let address = pod.radio_address.expect("checked by guard");
        let body = encoder::encode_status_request(update_type);
        let response = transport.send(
            address,
            &mut pod.radio_message_sequence,
            &[(0x0e, body)],
            false,
            false,
            false,
            false,
            None,
        )?;
        let now = transport.clock.now();
        apply_response(pod, &response, now);
        Ok(())
    }

    /// `bolus`. `pulse_speed` defaults to [`encoder::DEFAULT_PULSE_SPEED`]
    /// when `None`; the pulse-span guard always re-derives its limit from
    /// whichever speed is actually used.
    pub fn bolus(
        &mut self,
        amount: Decimal,
        pulse_speed: Option<u16>,
        reminders: u8,
    ) -> PdmResult<()> {
        let _guard = self.lock.enter();
        let result = Self::bolus_inner(
            &mut self.pod,
            &mut self.transport,
            amount,
            pulse_speed,
            reminders,
        );
        self.transport.radio.disconnect();
        Self::finish(&self.pod, &self.store, result)
    }

    fn bolus_inner(
        pod: &mut Pod,
        transport: &mut Transport<R, N, C>,
        amount: Decimal,
        pulse_speed: Option<u16>,
        reminders: u8,
    ) -> PdmResult<()> {
        lifecycle::pod_address_assigned(pod)?;
        lifecycle::status_running(pod)?;
        lifecycle::not_faulted(pod)?;
        Self::refresh_if_needed_bolus(pod, transport)?;
        if pod.state_bolus == BolusState::Immediate {
            return Err(PdmError::new("A bolus is already running").into());
        }
        if let Some(max) = pod.var_maximum_bolus {
            if amount > max {
                return Err(PdmError::new("Requested bolus exceeds the configured maximum").into());
            }
        }
        if amount > pod.insulin_reservoir {
            return Err(PdmError::new("Requested bolus exceeds the remaining reservoir").into());
        }

        let pulse_count = (amount / PULSE_UNIT)
            .round()
            .to_u16()
            .ok_or_else(|| PdmError::new("Bolus amount out of range"))?;
        if pulse_count == 0 {
            return Err(PdmError::new("Bolus amount must be greater than zero").into());
        }
        let speed = pulse_speed.unwrap_or(encoder::DEFAULT_PULSE_SPEED);
        lifecycle::pulse_span_within_limit(pulse_count, speed)?;

        let (outer, inner) = encoder::encode_immediate_bolus(
            pulse_count,
            speed,
            reminders,
            DEFAULT_BOLUS_DELIVERY_DELAY_SECS,
        );
        let address = pod.radio_address.expect("checked by guard");
        let response = transport.send(
            address,
            &mut pod.radio_message_sequence,
            &[(0x1a, outer), (0x17, inner)],
            true,
            false,
            false,
            false,
            None,
        )?;
        let now = transport.clock.now();
        apply_response(pod, &response, now);
        if pod.state_bolus != BolusState::Immediate {
            return Err(PdmError::new("Pod did not confirm the bolus").into());
        }
        pod.last_enacted_bolus_amount = Some(amount);
        pod.last_enacted_bolus_start = Some(now);
        Ok(())
    }

    /// `cancelBolus`.
    pub fn cancel_bolus(&mut self, beep: bool) -> PdmResult<()> {
        let _guard = self.lock.enter();
        let result = Self::cancel_bolus_inner(&mut self.pod, &mut self.transport, beep);
        self.transport.radio.disconnect();
        Self::finish(&self.pod, &self.store, result)
    }

    fn cancel_bolus_inner(
        pod: &mut Pod,
        transport: &mut Transport<R, N, C>,
        beep: bool,
    ) -> PdmResult<()> {
        lifecycle::immediate_bolus_active(pod)?;
        Self::cancel_inner(pod, transport, beep, true, false, false)
    }

    /// `setTempBasal`.
    pub fn set_temp_basal(
        &mut self,
        rate: Decimal,
        half_hours: u8,
        confidence_reminder: bool,
    ) -> PdmResult<()> {
        let _guard = self.lock.enter();
        let result = Self::set_temp_basal_inner(
            &mut self.pod,
            &mut self.transport,
            rate,
            half_hours,
            confidence_reminder,
        );
        self.transport.radio.disconnect();
        Self::finish(&self.pod, &self.store, result)
    }

    fn set_temp_basal_inner(
        pod: &mut Pod,
        transport: &mut Transport<R, N, C>,
        rate: Decimal,
        half_hours: u8,
        confidence_reminder: bool,
    ) -> PdmResult<()> {
        lifecycle::pod_address_assigned(pod)?;
        lifecycle::status_running(pod)?;
        lifecycle::not_faulted(pod)?;
        if half_hours == 0 || half_hours > encoder::MAX_HALF_HOURS {
            return Err(PdmError::new("Temp basal duration out of range").into());
        }
        if let Some(max) = pod.var_maximum_temp_basal_rate {
            if rate > max {
                return Err(PdmError::new(
                    "Requested temp basal rate exceeds the configured maximum",
                )
                .into());
            }
        }
        if Self::is_temp_basal_active_refreshed(pod, transport)? {
            Self::cancel_inner(pod, transport, false, false, true, false)?;
        }

        let (outer, inner) = encoder::encode_temp_basal(rate, half_hours, confidence_reminder);
        let address = pod.radio_address.expect("checked by guard");
        let response = transport.send(
            address,
            &mut pod.radio_message_sequence,
            &[(0x1a, outer), (0x16, inner)],
            true,
            false,
            false,
            false,
            None,
        )?;
        let now = transport.clock.now();
        apply_response(pod, &response, now);
        pod.last_enacted_temp_basal_amount = Some(rate);
        pod.last_enacted_temp_basal_start = Some(now);
        pod.last_enacted_temp_basal_duration = Some(Decimal::from(half_hours) / dec!(2));
        pod.state_basal = BasalState::TempBasal;
        Ok(())
    }

    /// `cancelTempBasal`.
    pub fn cancel_temp_basal(&mut self, beep: bool) -> PdmResult<()> {
        let _guard = self.lock.enter();
        let result =
            Self::cancel_inner(&mut self.pod, &mut self.transport, beep, false, true, false);
        self.transport.radio.disconnect();
        Self::finish(&self.pod, &self.store, result)
    }

    fn cancel_inner(
        pod: &mut Pod,
        transport: &mut Transport<R, N, C>,
        beep: bool,
        cancel_bolus: bool,
        cancel_temp_basal: bool,
        cancel_basal: bool,
    ) -> PdmResult<()> {
        lifecycle::pod_address_assigned(pod)?;
        lifecycle::status_running(pod)?;
        lifecycle::not_faulted(pod)?;
        let body = encoder::encode_cancel(beep, cancel_bolus, cancel_temp_basal, cancel_basal);
        let address = pod.radio_address.expect("checked by guard");
        let response = transport.send(
            address,
            &mut pod.radio_message_sequence,
            &[(0x1f, body)],
            true,
            false,
            false,
            false,
            None,
        )?;
        let now = transport.clock.now();
        apply_response(pod, &response, now);
        if cancel_bolus {
            if pod.state_bolus == BolusState::Immediate {
                return Err(PdmError::new("Pod did not confirm the bolus cancel").into());
            }
            pod.last_enacted_bolus_amount = Some(Decimal::from(-1));
        }
        if cancel_temp_basal {
            if pod.state_basal == BasalState::TempBasal {
                return Err(PdmError::new("Pod did not confirm the temp basal cancel").into());
            }
            pod.last_enacted_temp_basal_amount = Some(Decimal::from(-1));
        }
        Ok(())
    }

    /// `setBasalSchedule`. `current_half_hour`/`seconds_until_half_hour` are
    /// derived from the pod's own clock reading and `var_utc_offset`, same
    /// as the source — not left to the caller to prorate.
    pub fn set_basal_schedule(&mut self, schedule: [Decimal; 48]) -> PdmResult<()> {
        let _guard = self.lock.enter();
        let result = Self::set_basal_schedule_inner(&mut self.pod, &mut self.transport, schedule);
        self.transport.radio.disconnect();
        Self::finish(&self.pod, &self.store, result)
    }

    fn set_basal_schedule_inner(
        pod: &mut Pod,
        transport: &mut Transport<R, N, C>,
        schedule: [Decimal; 48],
    ) -> PdmResult<()> {
        lifecycle::pod_address_assigned(pod)?;
        lifecycle::status_running(pod)?;
        lifecycle::not_faulted(pod)?;
        lifecycle::basal_schedule_is_valid(pod, &schedule)?;

        let utc_offset = pod
            .var_utc_offset
            .expect("checked by basal_schedule_is_valid");
        let (current_half_hour, seconds_until_half_hour) =
            encoder::local_half_hour_position(transport.clock.now(), utc_offset);
        let (outer, inner) =
            encoder::encode_basal_schedule(&schedule, current_half_hour, seconds_until_half_hour);
        let address = pod.radio_address.expect("checked by guard");
        let response = transport.send(
            address,
            &mut pod.radio_message_sequence,
            &[(0x1a, outer), (0x13, inner)],
            true,
            false,
            false,
            false,
            None,
        )?;
        let now = transport.clock.now();
        apply_response(pod, &response, now);
        pod.var_basal_schedule = Some(schedule.to_vec());
        pod.state_basal = BasalState::Program;
        Ok(())
    }

    /// `acknowledgeAlerts`.
    pub fn acknowledge_alerts(&mut self, alert_mask: u8) -> PdmResult<()> {
        let _guard = self.lock.enter();
        let result = Self::acknowledge_alerts_inner(&mut self.pod, &mut self.transport, alert_mask);
        self.transport.radio.disconnect();
        Self::finish(&self.pod, &self.store, result)
    }

    fn acknowledge_alerts_inner(
        pod: &mut Pod,
        transport: &mut Transport<R, N, C>,
        alert_mask: u8,
    ) -> PdmResult<()> {
        lifecycle::can_acknowledge_alerts(pod)?;
        let body = encoder::encode_acknowledge_alerts(alert_mask);
        let address = pod.radio_address.expect("checked by guard");
        let response = transport.send(
            address,
            &mut pod.radio_message_sequence,
            &[(0x11, body)],
            true,
            false,
            false,
            false,
            None,
        )?;
        let now = transport.clock.now();
        apply_response(pod, &response, now);
        pod.state_alert &= !alert_mask;
        Ok(())
    }

    /// `deactivatePod`.
    pub fn deactivate_pod(&mut self) -> PdmResult<()> {
        let _guard = self.lock.enter();
        let result = Self::deactivate_pod_inner(&mut self.pod, &mut self.transport);
        self.transport.radio.disconnect();
        Self::finish(&self.pod, &self.store, result)
    }

    fn deactivate_pod_inner(pod: &mut Pod, transport: &mut Transport<R, N, C>) -> PdmResult<()> {
        lifecycle::can_deactivate(pod)?;
        let body = encoder::encode_deactivate();
        let address = pod.radio_address.expect("checked by guard");
        let response = transport.send(
            address,
            &mut pod.radio_message_sequence,
            &[(0x1c, body)],
            true,
            false,
            false,
            false,
            None,
        )?;
        let now = transport.clock.now();
        apply_response(pod, &response, now);
        pod.state_progress = PodProgress::Inactive;
        Ok(())
    }

    /// `activatePod`: assign an address, set up the pod's identity and
    /// clock, reseed the nonce, arm the low-reservoir and replace-pod
    /// alerts, deliver the fixed 52-pulse priming bolus, then install the
    /// basal schedule. Each step's failure aborts the whole sequence; the
    /// shadow reflects however far activation got.
    #[allow(clippy::too_many_arguments)]
    pub fn activate_pod(
        &mut self,
        month: u8,
        day: u8,
        year_since_2000: u8,
        hour: u8,
        minute: u8,
        low_reservoir_units: Option<Decimal>,
        replace_pod_after_minutes: Option<u16>,
        basal_schedule: [Decimal; 48],
    ) -> PdmResult<()> {
        let _guard = self.lock.enter();
        let result = Self::activate_pod_inner(
            &mut self.pod,
            &mut self.transport,
            month,
            day,
            year_since_2000,
            hour,
            minute,
            low_reservoir_units,
            replace_pod_after_minutes,
            basal_schedule,
        );
        self.transport.radio.disconnect();
        Self::finish(&self.pod, &self.store, result)
    }

    #[allow(clippy::too_many_arguments)]
    fn activate_pod_inner(
        pod: &mut Pod,
        transport: &mut Transport<R, N, C>,
        month: u8,
        day: u8,
        year_since_2000: u8,
        hour: u8,
        minute: u8,
        low_reservoir_units: Option<Decimal>,
        replace_pod_after_minutes: Option<u16>,
        basal_schedule: [Decimal; 48],
    ) -> PdmResult<()> {
        lifecycle::pod_address_not_assigned(pod)?;
        lifecycle::pod_can_activate(pod)?;
        let candidate = pod.radio_address_candidate.expect("checked by guard");

        let assign_body = encoder::encode_assign_address(candidate);
        let response = transport.send(
            candidate,
            &mut pod.radio_message_sequence,
            &[(0x07, assign_body)],
            false,
            true,
            false,
            false,
            None,
        )?;
        apply_response(pod, &response, transport.clock.now());
        pod.radio_address = Some(ACTIVATION_ADDRESS | (candidate & 0x00FF_FFFF));

        let setup_body = encoder::encode_setup_pod(
            pod.radio_address.expect("just set"),
            month,
            day,
            year_since_2000,
            hour,
            minute,
            pod.id_lot,
            pod.id_t,
        );
        let address = pod.radio_address.expect("just set");
        let response = transport.send(
            address,
            &mut pod.radio_message_sequence,
            &[(0x03, setup_body)],
            false,
            true,
            false,
            false,
            None,
        )?;
        apply_response(pod, &response, transport.clock.now());
        lifecycle::pod_paired(pod)?;

        transport.nonce.sync(0, 0);
        pod.nonce_seed = 0;

        if let Some(units) = low_reservoir_units {
            Self::configure_alert_inner(
                pod,
                transport,
                0,
                true,
                false,
                0,
                true,
                None,
                Some(units),
                0,
                0,
            )?;
        }
        if let Some(minutes) = replace_pod_after_minutes {
            // The second low-reservoir-style alert only fires once the pod
            // has actually been running a while; a freshly activated pod
            // with no elapsed active minutes yet has nothing to compare
            // against, so this is skipped rather than configured with a
            // meaningless zero threshold.
            if pod.state_active_minutes.is_some() {
                Self::configure_alert_inner(
                    pod,
                    transport,
                    1,
                    true,
                    true,
                    minutes,
                    false,
                    Some(minutes),
                    None,
                    0,
                    0,
                )?;
            }
        }

        let (outer, inner) = encoder::encode_immediate_bolus(ACTIVATION_PRIME_PULSES, 8, 0, 1);
        let response = transport.send(
            address,
            &mut pod.radio_message_sequence,
            &[(0x1a, outer), (0x17, inner)],
            true,
            true,
            false,
            false,
            None,
        )?;
        let now = transport.clock.now();
        apply_response(pod, &response, now);
        pod.last_enacted_bolus_amount = Some(Decimal::from(ACTIVATION_PRIME_PULSES) * PULSE_UNIT);
        pod.last_enacted_bolus_start = Some(now);

        transport.clock.sleep(std::time::Duration::from_secs(55));

        if let Some(minutes) = replace_pod_after_minutes {
            Self::configure_alert_inner(
                pod,
                transport,
                2,
                true,
                true,
                minutes,
                false,
                Some(minutes),
                None,
                0,
                0,
            )?;
        }

        lifecycle::basal_schedule_is_valid(pod, &basal_schedule)?;
        let utc_offset = pod
            .var_utc_offset
            .expect("checked by basal_schedule_is_valid");
        let (current_half_hour, seconds_until_half_hour) =
            encoder::local_half_hour_position(transport.clock.now(), utc_offset);
        let (outer, inner) = encoder::encode_basal_schedule(
            &basal_schedule,
            current_half_hour,
            seconds_until_half_hour,
        );
        let response = transport.send(
            address,
            &mut pod.radio_message_sequence,
            &[(0x1a, outer), (0x13, inner)],
            true,
            false,
            false,
            false,
            None,
        )?;
        apply_response(pod, &response, transport.clock.now());
        pod.var_basal_schedule = Some(basal_schedule.to_vec());
        pod.state_basal = BasalState::Program;
        pod.state_progress = PodProgress::PairingSuccess;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn configure_alert_inner(
        pod: &mut Pod,
        transport: &mut Transport<R, N, C>,
        alert_bit: u8,
        activate: bool,
        trigger_auto_off: bool,
        duration_minutes: u16,
        trigger_reservoir: bool,
        alert_after_minutes: Option<u16>,
        alert_after_reservoir: Option<Decimal>,
        beep_repeat_type: u8,
        beep_type: u8,
    ) -> PdmResult<()> {
        let body = encoder::encode_configure_alert(
            alert_bit,
            activate,
            trigger_auto_off,
            duration_minutes,
            trigger_reservoir,
            alert_after_minutes,
            alert_after_reservoir,
            beep_repeat_type,
            beep_type,
        );
        let address = pod.radio_address.expect("set before alerts are configured");
        let response = transport.send(
            address,
            &mut pod.radio_message_sequence,
            &[(0x19, body)],
            true,
            true,
            false,
            false,
            None,
        )?;
        apply_response(pod, &response, transport.clock.now());
        Ok(())
    }

    fn refresh_if_needed_bolus(pod: &mut Pod, transport: &mut Transport<R, N, C>) -> PdmResult<()> {
        let now = transport.clock.now();
        if lifecycle::infer_bolus_running(pod, now) == lifecycle::Liveness::NeedsRefresh {
            Self::update_pod_status_inner(pod, transport, 0)?;
        }
        Ok(())
    }

    fn is_temp_basal_active_refreshed(
        pod: &mut Pod,
        transport: &mut Transport<R, N, C>,
    ) -> PdmResult<bool> {
        let now = transport.clock.now();
        if lifecycle::infer_temp_basal_active(pod, now) == lifecycle::Liveness::NeedsRefresh {
            Self::update_pod_status_inner(pod, transport, 0)?;
        }
        let now = transport.clock.now();
        Ok(lifecycle::infer_temp_basal_active(pod, now) == lifecycle::Liveness::Active)
    }

    /// Persists the shadow regardless of `result`, surfacing a persistence
    /// failure only when the command itself otherwise succeeded — a
    /// command failure already tells the caller something is wrong, and
    /// swallowing it behind "not saved" would hide the real cause.
    fn finish<T>(pod: &Pod, store: &S, result: PdmResult<T>) -> PdmResult<T> {
        match store.save(pod) {
            Ok(()) => result,
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist pod state");
                match result {
                    Ok(_) => Err(PdmError::new("Pod status was not saved").into()),
                    Err(err) => Err(err),
                }
            }
        }
    }
}
