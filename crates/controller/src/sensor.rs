//! Sensor reading contract and backends.
//!
//! The controller consumes one `read()` per tick and treats anything it
//! cannot trust — bus errors, out-of-range percentages — as a fault. Faults
//! never overwrite the last-known-good values.
//!
//! The `sim` feature (default) provides a `fastrand` random-walk simulator
//! for local development; without it, the only backend always faults, which
//! drives the controller into its fault state and keeps the pump off.

use std::fmt;

// ---------------------------------------------------------------------------
// Reading + fault types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readings {
    /// Soil moisture, percent.
    pub soil_moisture: f32,
    /// Air temperature, °C.
    pub temperature: f32,
    /// Relative humidity, percent.
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorFault {
    /// The sensor bus did not answer or returned garbage.
    ReadFailed,
    /// A percentage field fell outside [0, 100].
    OutOfRange { field: &'static str, value: f32 },
}

impl fmt::Display for SensorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFailed => write!(f, "sensor read failed"),
            Self::OutOfRange { field, value } => {
                write!(f, "{field} reading {value} out of range [0, 100]")
            }
        }
    }
}

impl Readings {
    /// Range-check the percentage fields. Out-of-range input is a fault,
    /// never a value.
    pub fn validate(self) -> Result<Self, SensorFault> {
        if !(0.0..=100.0).contains(&self.soil_moisture) {
            return Err(SensorFault::OutOfRange {
                field: "soil_moisture",
                value: self.soil_moisture,
            });
        }
        if !(0.0..=100.0).contains(&self.humidity) {
            return Err(SensorFault::OutOfRange {
                field: "humidity",
                value: self.humidity,
            });
        }
        Ok(self)
    }
}

/// One poll per measurement tick. Implementations must bound their own I/O;
/// the controller never waits on a sensor.
pub trait SensorReader: Send {
    fn read(&mut self) -> Result<Readings, SensorFault>;
}

// ---------------------------------------------------------------------------
// Simulator (default backend for development)
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO` env var.
#[cfg(feature = "sim")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range, steady drying drift. Exercises the full
    /// water/soak/re-water loop against the thresholds.
    Drying,
    /// Hovers near the centre with low noise. Good for testing the UI
    /// without triggering watering.
    Stable,
    /// High noise plus a ~5% fault rate per read. Exercises stale-value
    /// retention and fault escalation.
    Flaky,
}

#[cfg(feature = "sim")]
impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            _ => Self::Drying, // default
        }
    }
}

#[cfg(feature = "sim")]
impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

/// Stateful simulator producing plausible greenhouse readings: a moisture
/// random walk with drying drift and watering response, slow-moving
/// temperature and humidity.
#[cfg(feature = "sim")]
pub struct SimSensor {
    moisture: f64,
    temperature: f64,
    humidity: f64,

    drift_per_read: f64,
    noise: f64,
    fault_prob: f32,

    /// Set from the pump state each tick so moisture recovers while watering.
    watering: bool,
    wet_rate: f64,
}

#[cfg(feature = "sim")]
impl SimSensor {
    pub fn new(scenario: Scenario) -> Self {
        let (start, drift, noise, fault_prob) = match scenario {
            Scenario::Drying => (55.0, 0.08, 0.6, 0.0),
            Scenario::Stable => (50.0, 0.005, 0.2, 0.0),
            Scenario::Flaky => (55.0, 0.05, 2.0, 0.05_f32),
        };

        Self {
            moisture: start,
            temperature: 21.0,
            humidity: 50.0,
            drift_per_read: drift,
            noise,
            fault_prob,
            watering: false,
            wet_rate: 1.5,
        }
    }

    /// Feed the pump state back so the simulated soil responds to watering.
    pub fn set_watering(&mut self, on: bool) {
        self.watering = on;
    }

    fn jitter(&self, sigma: f64) -> f64 {
        (fastrand::f64() - 0.5) * 2.0 * sigma
    }
}

#[cfg(feature = "sim")]
impl SensorReader for SimSensor {
    fn read(&mut self) -> Result<Readings, SensorFault> {
        if self.fault_prob > 0.0 && fastrand::f32() < self.fault_prob {
            return Err(SensorFault::ReadFailed);
        }

        if self.watering {
            self.moisture += self.wet_rate;
        } else {
            self.moisture -= self.drift_per_read;
        }
        self.moisture = (self.moisture + self.jitter(self.noise)).clamp(0.0, 100.0);

        self.temperature = (self.temperature + self.jitter(0.05)).clamp(-10.0, 50.0);
        self.humidity = (self.humidity + self.jitter(0.2)).clamp(0.0, 100.0);

        Readings {
            soil_moisture: self.moisture as f32,
            temperature: self.temperature as f32,
            humidity: self.humidity as f32,
        }
        .validate()
    }
}

// ---------------------------------------------------------------------------
// Fallback backend (no sensor compiled in)
// ---------------------------------------------------------------------------

/// Backend used when the build carries no real sensor driver and the sim is
/// disabled. Every read faults, so the controller holds the pump off.
pub struct NoSensor;

impl SensorReader for NoSensor {
    fn read(&mut self) -> Result<Readings, SensorFault> {
        Err(SensorFault::ReadFailed)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
