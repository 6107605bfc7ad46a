//! Irrigation control state machine.
//!
//! Owns `SystemState` and is its only writer. Each measurement tick runs a
//! fixed sequence: ingest the sensor poll (stale values are retained on
//! fault), roll the hourly cycle-cap window, then evaluate the pump decision
//! for the current state. Every transition into `Watering` passes through
//! the safety interlock; stops never do.
//!
//! ```text
//! Idle ──[auto && moisture < low, interlock grants]──▶ Watering
//! Idle ──[manual start, interlock grants]────────────▶ Watering
//! Watering ──[moisture >= high (auto) | manual stop | timeout]──▶ Cooldown
//! Cooldown ──[cooldown elapsed]──▶ Idle
//! any ──[consecutive faults reach threshold]──▶ Fault (pump forced off)
//! Fault ──[one successful reading]──▶ Idle
//! ```

use std::fmt;

use tracing::{debug, info, warn};

use crate::config::SystemConfig;
use crate::interlock::{self, StartRefusal};
use crate::sensor::{Readings, SensorFault};
use crate::state::{ControlState, PushEvent, StatusResponse, SystemState};

/// Width of the rolling cycle-cap window.
const HOUR_MS: u64 = 3_600_000;

// ---------------------------------------------------------------------------
// Commands & errors
// ---------------------------------------------------------------------------

/// Operator commands accepted by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetAutoMode(bool),
    RequestPump(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// The interlock refused a pump start. A no-op for state; the next tick
    /// re-evaluates naturally.
    ActuationRefused(StartRefusal),
    /// Pump starts are rejected while the controller is fault-escalated.
    FaultActive,
    /// Malformed control input; state unchanged.
    InvalidCommand(String),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActuationRefused(r) => write!(f, "pump start refused: {r}"),
            Self::FaultActive => write!(f, "sensor fault active — pump start rejected"),
            Self::InvalidCommand(msg) => write!(f, "invalid command: {msg}"),
        }
    }
}

/// Result of a successfully applied command.
#[derive(Debug, Default)]
pub struct CommandOutcome {
    pub events: Vec<PushEvent>,
    /// True when the command changed `SystemConfig` and it should be
    /// re-persisted (best-effort).
    pub config_changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopCause {
    TargetReached,
    Timeout,
    Manual,
    Fault,
}

impl StopCause {
    fn detail(self) -> &'static str {
        match self {
            Self::TargetReached => "target moisture reached",
            Self::Timeout => "run timeout — forced stop",
            Self::Manual => "manual stop",
            Self::Fault => "sensor fault — forced stop",
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller {
    state: SystemState,
    config: SystemConfig,
}

impl Controller {
    pub fn new(config: SystemConfig, now_ms: u64) -> Self {
        let state = SystemState::new(config.auto_mode, now_ms);
        Self { state, config }
    }

    pub fn state(&self) -> &SystemState {
        &self.state
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn status(&self, now_ms: u64) -> StatusResponse {
        self.state.to_status(now_ms)
    }

    /// Record a change in network-surface liveness. Returns the push event
    /// when the flag actually changed.
    pub fn set_wifi(&mut self, connected: bool) -> Option<PushEvent> {
        if self.state.wifi_connected == connected {
            return None;
        }
        self.state.wifi_connected = connected;
        self.state.record_system(
            if connected { "network up" } else { "network down" }.to_string(),
        );
        Some(PushEvent::Wifi(connected))
    }

    // -- Tick path --------------------------------------------------------

    /// One measurement/decision cycle. Returns the push events produced.
    pub fn tick(
        &mut self,
        now_ms: u64,
        poll: Result<Readings, SensorFault>,
    ) -> Vec<PushEvent> {
        let mut out = Vec::new();
        self.ingest(now_ms, poll, &mut out);
        self.roll_hour_window(now_ms);
        self.evaluate(now_ms, &mut out);
        out
    }

    /// Step 1: fold the sensor poll into state. Success refreshes the
    /// readings and clears any fault; failure keeps the stale values and
    /// escalates once the consecutive-fault threshold is reached.
    fn ingest(
        &mut self,
        now_ms: u64,
        poll: Result<Readings, SensorFault>,
        out: &mut Vec<PushEvent>,
    ) {
        match poll.and_then(Readings::validate) {
            Ok(r) => {
                self.state.soil_moisture = r.soil_moisture;
                self.state.temperature = r.temperature;
                self.state.humidity = r.humidity;
                self.state.last_measurement = Some(now_ms);

                if self.state.sensor_error {
                    self.state.sensor_error = false;
                    self.state.record_sensor("sensor recovered".to_string());
                }
                self.state.sensor_error_count = 0;

                if self.state.control == ControlState::Fault {
                    info!("sensor fault cleared — resuming");
                    self.state.control = ControlState::Idle;
                    self.state.record_system("fault cleared".to_string());
                }
                self.state.system_ready = true;

                out.push(PushEvent::Sensors {
                    soil_moisture: r.soil_moisture,
                    temperature: r.temperature,
                    humidity: r.humidity,
                });
            }
            Err(fault) => {
                self.state.sensor_error_count = self.state.sensor_error_count.saturating_add(1);
                debug!(
                    consecutive = self.state.sensor_error_count,
                    %fault,
                    "sensor poll failed — keeping stale readings"
                );

                if self.state.sensor_error_count >= self.config.max_sensor_errors
                    && self.state.control != ControlState::Fault
                {
                    self.enter_fault(now_ms, fault, out);
                }
            }
        }
    }

    /// Step 2: reset the hourly cycle counter when the window rolls.
    fn roll_hour_window(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.state.last_hour_reset) >= HOUR_MS {
            self.state.pump_cycles_this_hour = 0;
            self.state.last_hour_reset = now_ms;
        }
    }

    /// Steps 3-5: evaluate the pump decision for the current state, gate
    /// starts through the interlock, apply.
    fn evaluate(&mut self, now_ms: u64, out: &mut Vec<PushEvent>) {
        match self.state.control {
            ControlState::Fault => {
                // Pump is already held off; only a successful reading in
                // `ingest` leaves this state.
            }
            ControlState::Watering => {
                let elapsed = self
                    .state
                    .pump_start_time
                    .map(|t| now_ms.saturating_sub(t))
                    .unwrap_or(0);

                if elapsed >= self.config.pump_timeout_ms {
                    warn!(elapsed_ms = elapsed, "pump run timeout");
                    self.stop_pump(now_ms, StopCause::Timeout, out);
                } else if self.state.auto_mode
                    && self.state.soil_moisture >= self.config.moisture_threshold_high
                {
                    self.stop_pump(now_ms, StopCause::TargetReached, out);
                }
            }
            ControlState::Cooldown => {
                let done = self
                    .state
                    .last_pump_cycle
                    .map(|t| now_ms.saturating_sub(t) >= self.config.pump_cooldown_ms)
                    .unwrap_or(true);
                if done {
                    self.state.control = ControlState::Idle;
                }
            }
            ControlState::Idle => {
                if self.state.auto_mode
                    && self.state.system_ready
                    && self.state.soil_moisture < self.config.moisture_threshold_low
                {
                    match interlock::authorize_start(&self.state, &self.config, now_ms) {
                        Ok(()) => self.start_pump(now_ms, "auto", out),
                        Err(refusal) => debug!(%refusal, "auto start refused"),
                    }
                }
            }
        }
    }

    // -- Command path -----------------------------------------------------

    /// Apply an operator command. Synchronous; validated against current
    /// state and config before any mutation.
    pub fn apply_command(
        &mut self,
        cmd: Command,
        now_ms: u64,
    ) -> Result<CommandOutcome, ControlError> {
        match cmd {
            Command::SetAutoMode(enabled) => Ok(self.set_auto_mode(enabled)),
            Command::RequestPump(true) => self.manual_start(now_ms),
            Command::RequestPump(false) => Ok(self.manual_stop(now_ms)),
        }
    }

    /// Auto-mode toggles are accepted in every state, fault included.
    /// Idempotent: re-applying the current mode changes nothing.
    fn set_auto_mode(&mut self, enabled: bool) -> CommandOutcome {
        if self.state.auto_mode == enabled {
            return CommandOutcome::default();
        }
        self.state.auto_mode = enabled;
        self.config.auto_mode = enabled;
        info!(auto = enabled, "auto mode changed");
        self.state.record_mode(format!(
            "auto mode {}",
            if enabled { "enabled" } else { "disabled" }
        ));
        CommandOutcome {
            events: vec![PushEvent::Auto(enabled)],
            config_changed: true,
        }
    }

    fn manual_start(&mut self, now_ms: u64) -> Result<CommandOutcome, ControlError> {
        if self.state.control == ControlState::Fault {
            return Err(ControlError::FaultActive);
        }
        interlock::authorize_start(&self.state, &self.config, now_ms)
            .map_err(ControlError::ActuationRefused)?;

        let mut events = Vec::new();
        self.start_pump(now_ms, "manual", &mut events);
        Ok(CommandOutcome {
            events,
            config_changed: false,
        })
    }

    /// Stops are fail-open: honored immediately in any state. Stopping a
    /// pump that is not running is a no-op, not an error.
    fn manual_stop(&mut self, now_ms: u64) -> CommandOutcome {
        let mut events = Vec::new();
        if self.state.pump_active {
            self.stop_pump(now_ms, StopCause::Manual, &mut events);
        }
        CommandOutcome {
            events,
            config_changed: false,
        }
    }

    // -- Transitions ------------------------------------------------------

    fn start_pump(&mut self, now_ms: u64, trigger: &str, out: &mut Vec<PushEvent>) {
        self.state.pump_active = true;
        self.state.pump_start_time = Some(now_ms);
        self.state.last_watering = Some(now_ms);
        self.state.control = ControlState::Watering;

        info!(
            trigger,
            moisture = self.state.soil_moisture,
            "pump started"
        );
        self.state.record_pump(format!(
            "pump started ({trigger}, moisture {:.1}%)",
            self.state.soil_moisture
        ));
        out.push(PushEvent::Pump(true));
    }

    /// Every stop — auto, manual, timeout, fault — ends the cycle: it counts
    /// against the hourly cap and starts the cooldown clock. The cap bounds
    /// total water delivered per hour, so a forced stop counts too.
    fn stop_pump(&mut self, now_ms: u64, cause: StopCause, out: &mut Vec<PushEvent>) {
        self.state.pump_active = false;
        self.state.pump_start_time = None;
        self.state.last_pump_cycle = Some(now_ms);
        self.state.pump_cycles_this_hour = self.state.pump_cycles_this_hour.saturating_add(1);
        self.state.control = ControlState::Cooldown;

        info!(cause = cause.detail(), "pump stopped");
        self.state
            .record_pump(format!("pump stopped ({})", cause.detail()));
        out.push(PushEvent::Pump(false));
    }

    fn enter_fault(&mut self, now_ms: u64, fault: SensorFault, out: &mut Vec<PushEvent>) {
        warn!(
            consecutive = self.state.sensor_error_count,
            %fault,
            "sensor fault threshold reached — entering fault state"
        );
        self.state.sensor_error = true;

        if self.state.pump_active {
            self.stop_pump(now_ms, StopCause::Fault, out);
        }
        self.state.control = ControlState::Fault;
        self.state.system_ready = false;
        self.state
            .record_sensor(format!("fault escalated: {fault}"));
    }
}

// ===========================================================================
// Tests
// ===========================================================================
