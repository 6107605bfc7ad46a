//! TOML config file loading, validation, and best-effort persistence of the
//! irrigation parameters.
//!
//! Defaults mirror the firmware the controller replaces: 30/70 percent
//! moisture thresholds, 10 s pump timeout, 5 s cooldown, 3 consecutive
//! sensor errors before fault escalation.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Config structure
// ---------------------------------------------------------------------------

/// Immutable during a control cycle; changed only by a validated operator
/// command (auto-mode toggle) or by editing the config file before boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Whether moisture thresholds drive the pump without operator input.
    pub auto_mode: bool,
    /// Pump starts (auto mode) when moisture drops below this percentage.
    pub moisture_threshold_low: f32,
    /// Pump stops (auto mode) when moisture reaches this percentage.
    pub moisture_threshold_high: f32,
    /// Maximum pump activations within any rolling one-hour window.
    pub max_pump_cycles: u32,
    /// Maximum continuous pump run before a forced stop, in milliseconds.
    pub pump_timeout_ms: u64,
    /// Mandatory idle gap between pump runs, in milliseconds.
    pub pump_cooldown_ms: u64,
    /// Consecutive sensor faults before the controller enters fault state.
    pub max_sensor_errors: u32,
    /// Interval between measurement ticks, in milliseconds.
    pub measurement_interval_ms: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            auto_mode: true,
            moisture_threshold_low: 30.0,
            moisture_threshold_high: 70.0,
            max_pump_cycles: 6,
            pump_timeout_ms: 10_000,
            pump_cooldown_ms: 5_000,
            max_sensor_errors: 3,
            measurement_interval_ms: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl SystemConfig {
    /// Validate all fields. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // ── Moisture thresholds ─────────────────────────────────
        if !(0.0..=100.0).contains(&self.moisture_threshold_low) {
            errors.push(format!(
                "moisture_threshold_low {} out of range [0, 100]",
                self.moisture_threshold_low
            ));
        }
        if !(0.0..=100.0).contains(&self.moisture_threshold_high) {
            errors.push(format!(
                "moisture_threshold_high {} out of range [0, 100]",
                self.moisture_threshold_high
            ));
        }
        if self.moisture_threshold_low >= self.moisture_threshold_high {
            errors.push(format!(
                "moisture_threshold_low ({}) must be less than moisture_threshold_high ({})",
                self.moisture_threshold_low, self.moisture_threshold_high
            ));
        }

        // ── Timing values (all must be positive) ────────────────
        if self.pump_timeout_ms == 0 {
            errors.push("pump_timeout_ms must be positive".to_string());
        }
        if self.pump_cooldown_ms == 0 {
            errors.push("pump_cooldown_ms must be positive".to_string());
        }
        if self.measurement_interval_ms == 0 {
            errors.push("measurement_interval_ms must be positive".to_string());
        }

        // ── Counters ────────────────────────────────────────────
        if self.max_pump_cycles == 0 {
            errors.push("max_pump_cycles must be positive".to_string());
        }
        if self.max_sensor_errors == 0 {
            errors.push("max_sensor_errors must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Load + save
// ---------------------------------------------------------------------------

/// Read, parse, and validate the TOML config file. A missing file is not an
/// error — the controller boots on defaults, like the firmware did with a
/// blank EEPROM.
pub fn load(path: &str) -> Result<SystemConfig> {
    if !Path::new(path).exists() {
        tracing::info!(path, "no config file — using defaults");
        return Ok(SystemConfig::default());
    }

    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: SystemConfig =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Persist the config. Best-effort: callers log the error and carry on.
pub fn save(config: &SystemConfig, path: &str) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, contents).with_context(|| format!("failed to write config: {path}"))?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
