//! Safety interlock: the single gate every pump start must pass.
//!
//! Pure decision logic over `SystemState` + `SystemConfig` — no mutable
//! state of its own. Stops are fail-open and never consult the interlock:
//! safety always favors turning the pump off.

use std::fmt;

use crate::config::SystemConfig;
use crate::state::SystemState;

// ---------------------------------------------------------------------------
// Refusal reasons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRefusal {
    /// Pump is already running.
    PumpActive,
    /// Mandatory gap since the last run has not yet elapsed.
    CooldownActive { remaining_ms: u64 },
    /// Rolling one-hour activation cap reached.
    HourlyCapReached,
    /// Too many consecutive sensor faults.
    SensorFaulted,
}

impl fmt::Display for StartRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PumpActive => write!(f, "pump already active"),
            Self::CooldownActive { remaining_ms } => {
                write!(f, "cooldown active ({remaining_ms}ms remaining)")
            }
            Self::HourlyCapReached => write!(f, "hourly pump cycle cap reached"),
            Self::SensorFaulted => write!(f, "sensor fault threshold reached"),
        }
    }
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// Authorize a pump start. Grants only if the pump is off, the cooldown has
/// elapsed (a pump that has never run has no cooldown), the hourly cycle cap
/// has room, and the sensor is not fault-escalated.
pub fn authorize_start(
    state: &SystemState,
    config: &SystemConfig,
    now_ms: u64,
) -> Result<(), StartRefusal> {
    if state.pump_active {
        return Err(StartRefusal::PumpActive);
    }

    if let Some(last) = state.last_pump_cycle {
        let elapsed = now_ms.saturating_sub(last);
        if elapsed < config.pump_cooldown_ms {
            return Err(StartRefusal::CooldownActive {
                remaining_ms: config.pump_cooldown_ms - elapsed,
            });
        }
    }

    if state.pump_cycles_this_hour >= config.max_pump_cycles {
        return Err(StartRefusal::HourlyCapReached);
    }

    if state.sensor_error_count >= config.max_sensor_errors {
        return Err(StartRefusal::SensorFaulted);
    }

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn base_state() -> SystemState {
        SystemState::new(true, 0)
    }

    fn cfg() -> SystemConfig {
        SystemConfig::default()
    }

    // -- Grants -----------------------------------------------------------

    #[test]
    fn fresh_boot_start_granted() {
        // last_pump_cycle is None: no cooldown applies to a pump that has
        // never run.
        assert_eq!(authorize_start(&base_state(), &cfg(), 0), Ok(()));
    }

    #[test]
    fn start_granted_after_cooldown_elapsed() {
        let mut st = base_state();
        st.last_pump_cycle = Some(10_000);
        assert_eq!(authorize_start(&st, &cfg(), 15_000), Ok(()));
    }

    #[test]
    fn start_granted_at_exact_cooldown_boundary() {
        let mut st = base_state();
        st.last_pump_cycle = Some(10_000);
        // cooldown is 5000ms; elapsed == 5000 satisfies `>=`.
        assert_eq!(authorize_start(&st, &cfg(), 15_000), Ok(()));
    }

    // -- Pump already active ----------------------------------------------

    #[test]
    fn start_refused_while_pump_active() {
        let mut st = base_state();
        st.pump_active = true;
        assert_eq!(
            authorize_start(&st, &cfg(), 60_000),
            Err(StartRefusal::PumpActive)
        );
    }

    // -- Cooldown ---------------------------------------------------------

    #[test]
    fn start_refused_during_cooldown() {
        let mut st = base_state();
        st.last_pump_cycle = Some(10_000);
        assert_eq!(
            authorize_start(&st, &cfg(), 12_000),
            Err(StartRefusal::CooldownActive { remaining_ms: 3000 })
        );
    }

    #[test]
    fn start_refused_one_ms_before_cooldown_ends() {
        let mut st = base_state();
        st.last_pump_cycle = Some(0);
        assert_eq!(
            authorize_start(&st, &cfg(), 4999),
            Err(StartRefusal::CooldownActive { remaining_ms: 1 })
        );
    }

    // -- Hourly cap -------------------------------------------------------

    #[test]
    fn start_refused_at_hourly_cap() {
        let mut st = base_state();
        st.pump_cycles_this_hour = cfg().max_pump_cycles;
        assert_eq!(
            authorize_start(&st, &cfg(), 60_000),
            Err(StartRefusal::HourlyCapReached)
        );
    }

    #[test]
    fn start_granted_one_below_cap() {
        let mut st = base_state();
        st.pump_cycles_this_hour = cfg().max_pump_cycles - 1;
        assert_eq!(authorize_start(&st, &cfg(), 60_000), Ok(()));
    }

    // -- Sensor fault -----------------------------------------------------

    #[test]
    fn start_refused_when_sensor_faulted() {
        let mut st = base_state();
        st.sensor_error_count = cfg().max_sensor_errors;
        assert_eq!(
            authorize_start(&st, &cfg(), 60_000),
            Err(StartRefusal::SensorFaulted)
        );
    }

    #[test]
    fn start_granted_below_fault_threshold() {
        // Transient faults below the threshold never block a start.
        let mut st = base_state();
        st.sensor_error_count = cfg().max_sensor_errors - 1;
        assert_eq!(authorize_start(&st, &cfg(), 60_000), Ok(()));
    }

    // -- Refusal ordering -------------------------------------------------

    #[test]
    fn active_pump_reported_before_other_refusals() {
        let mut st = base_state();
        st.pump_active = true;
        st.pump_cycles_this_hour = 100;
        st.sensor_error_count = 100;
        assert_eq!(
            authorize_start(&st, &cfg(), 60_000),
            Err(StartRefusal::PumpActive)
        );
    }

    // -- Display ----------------------------------------------------------

    #[test]
    fn refusal_messages_are_descriptive() {
        assert_eq!(StartRefusal::PumpActive.to_string(), "pump already active");
        assert_eq!(
            StartRefusal::CooldownActive { remaining_ms: 1200 }.to_string(),
            "cooldown active (1200ms remaining)"
        );
        assert_eq!(
            StartRefusal::HourlyCapReached.to_string(),
            "hourly pump cycle cap reached"
        );
        assert_eq!(
            StartRefusal::SensorFaulted.to_string(),
            "sensor fault threshold reached"
        );
    }
}
