use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;
use time::OffsetDateTime;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Monotonic millisecond counter anchored at boot.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// The controller's operating state. Replaces the boolean flag soup of the
/// old firmware with one tagged value; transitions happen in exactly one
/// place (`controller::Controller`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    Idle,
    Watering,
    Cooldown,
    Fault,
}

/// Mutable system state, owned exclusively by the irrigation controller.
/// Everyone else sees copies or `StatusResponse` snapshots.
pub struct SystemState {
    pub control: ControlState,

    /// Last valid readings. Retained across sensor faults — the controller
    /// never synthesizes missing data.
    pub soil_moisture: f32,
    pub temperature: f32,
    pub humidity: f32,

    pub pump_active: bool,
    pub auto_mode: bool,

    /// Milliseconds since boot; `None` means "never".
    pub last_watering: Option<u64>,
    pub last_measurement: Option<u64>,
    pub pump_start_time: Option<u64>,
    pub last_pump_cycle: Option<u64>,

    pub pump_cycles_this_hour: u32,
    pub last_hour_reset: u64,

    pub sensor_error: bool,
    pub sensor_error_count: u32,

    /// True once at least one measurement has succeeded and the controller
    /// is not fault-escalated.
    pub system_ready: bool,

    pub wifi_connected: bool,

    pub events: VecDeque<SystemEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Pump,
    Mode,
    Sensor,
    System,
}

// ---------------------------------------------------------------------------
// Push events (SSE payloads)
// ---------------------------------------------------------------------------

/// Change notification emitted after a tick or command. The controller pushes
/// these into a bounded broadcast channel; the web layer forwards them as
/// named server-sent events. The controller never blocks on a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Sensors {
        soil_moisture: f32,
        temperature: f32,
        humidity: f32,
    },
    Pump(bool),
    Auto(bool),
    Wifi(bool),
}

impl PushEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sensors { .. } => "sensors",
            Self::Pump(_) => "pump",
            Self::Auto(_) => "auto",
            Self::Wifi(_) => "wifi",
        }
    }

    /// SSE data payload. The string tokens match what the web UI listens for.
    pub fn data(&self) -> String {
        match self {
            Self::Sensors {
                soil_moisture,
                temperature,
                humidity,
            } => serde_json::json!({
                "soil_moisture": soil_moisture,
                "temperature": temperature,
                "humidity": humidity,
            })
            .to_string(),
            Self::Pump(on) => (if *on { "pump_on" } else { "pump_off" }).to_string(),
            Self::Auto(on) => (if *on { "auto_on" } else { "auto_off" }).to_string(),
            Self::Wifi(up) => (if *up { "connected" } else { "disconnected" }).to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub soil_moisture: f32,
    pub temperature: f32,
    pub humidity: f32,
    pub pump_active: bool,
    pub auto_mode: bool,
    pub sensor_error: bool,
    pub wifi_connected: bool,
    pub system_ready: bool,
    pub state: ControlState,
    pub uptime_secs: u64,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    /// Boot state: everything zeroed, not ready until the first successful
    /// measurement.
    pub fn new(auto_mode: bool, now_ms: u64) -> Self {
        Self {
            control: ControlState::Idle,
            soil_moisture: 0.0,
            temperature: 0.0,
            humidity: 0.0,
            pump_active: false,
            auto_mode,
            last_watering: None,
            last_measurement: None,
            pump_start_time: None,
            last_pump_cycle: None,
            pump_cycles_this_hour: 0,
            last_hour_reset: now_ms,
            sensor_error: false,
            sensor_error_count: 0,
            system_ready: false,
            wifi_connected: false,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn record_pump(&mut self, detail: String) {
        self.push_event(EventKind::Pump, detail);
    }

    pub fn record_mode(&mut self, detail: String) {
        self.push_event(EventKind::Mode, detail);
    }

    pub fn record_sensor(&mut self, detail: String) {
        self.push_event(EventKind::Sensor, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self, now_ms: u64) -> StatusResponse {
        StatusResponse {
            soil_moisture: self.soil_moisture,
            temperature: self.temperature,
            humidity: self.humidity,
            pump_active: self.pump_active,
            auto_mode: self.auto_mode,
            sensor_error: self.sensor_error,
            wifi_connected: self.wifi_connected,
            system_ready: self.system_ready,
            state: self.control,
            uptime_secs: now_ms / 1000,
        }
    }

    /// Recent events, newest first.
    pub fn recent_events(&self) -> Vec<SystemEvent> {
        self.events.iter().rev().cloned().collect()
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
