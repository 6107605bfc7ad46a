//! Pump relay control via GPIO. The `gpio` feature gates the real rppal
//! driver; without it, a mock implementation logs state changes.

use anyhow::Result;
use tracing::info;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Real GPIO relay (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct PumpRelay {
    pin: OutputPin,
    active_low: bool, // many relay boards are active-low
}

#[cfg(feature = "gpio")]
impl PumpRelay {
    pub fn new(pin_num: u8, active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pin = gpio.get(pin_num)?.into_output();

        // Fail-safe: ensure OFF at startup
        if active_low {
            pin.set_high(); // active-low relay OFF
        } else {
            pin.set_low(); // active-high relay OFF
        }

        Ok(Self { pin, active_low })
    }

    pub fn set(&mut self, on: bool) {
        if self.active_low {
            // active-low relay: LOW = ON, HIGH = OFF
            if on {
                self.pin.set_low()
            } else {
                self.pin.set_high()
            }
        } else {
            // active-high relay: HIGH = ON, LOW = OFF
            if on {
                self.pin.set_high()
            } else {
                self.pin.set_low()
            }
        }
        info!(pump = if on { "ON" } else { "OFF" }, "relay set");
    }
}

// ---------------------------------------------------------------------------
// Mock relay (development — no hardware, logs state changes)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct PumpRelay {
    pub(crate) on: bool,
}

#[cfg(not(feature = "gpio"))]
impl PumpRelay {
    pub fn new(pin_num: u8, _active_low: bool) -> Result<Self> {
        info!(gpio = pin_num, "mock pump relay initialised (not wired)");
        Ok(Self { on: false })
    }

    pub fn set(&mut self, on: bool) {
        self.on = on;
        info!(pump = if on { "ON" } else { "OFF" }, "mock relay set");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
