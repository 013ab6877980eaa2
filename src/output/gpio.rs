//! Raspberry Pi GPIO sink (rppal)
//!
//! Relay boards energise on a low signal, so with `active_low` set an
//! `Active` write drives the pin low and `Inactive` drives it high. Pins are
//! claimed at their inactive level so a relay never clicks on during setup.

use parking_lot::Mutex;
use rppal::gpio::{Gpio, OutputPin};
use std::collections::HashMap;
use tracing::{debug, info};

use super::{pins, Level, OutputSink, PinId};
use crate::config::PinNumbering;
use crate::error::DriverError;

pub struct GpioSink {
    gpio: Gpio,
    numbering: PinNumbering,
    active_low: bool,
    outputs: Mutex<HashMap<PinId, OutputPin>>,
}

impl GpioSink {
    /// Open the GPIO peripheral
    pub fn new(numbering: PinNumbering, active_low: bool) -> Result<Self, DriverError> {
        let gpio = Gpio::new().map_err(|e| DriverError::Unavailable(e.to_string()))?;
        info!(
            "✅ GPIO opened ({:?} numbering, active {})",
            numbering,
            if active_low { "low" } else { "high" }
        );
        Ok(Self {
            gpio,
            numbering,
            active_low,
            outputs: Mutex::new(HashMap::new()),
        })
    }

    fn bcm(&self, pin: PinId) -> Result<u8, DriverError> {
        match self.numbering {
            PinNumbering::Board => pins::board_to_bcm(pin).ok_or(DriverError::InvalidPin(pin)),
            PinNumbering::Bcm => Ok(pin),
        }
    }

    /// Electrical level for a logical level: true = high
    fn drives_high(&self, level: Level) -> bool {
        matches!(
            (level, self.active_low),
            (Level::Active, false) | (Level::Inactive, true)
        )
    }
}

impl OutputSink for GpioSink {
    fn name(&self) -> &str {
        "gpio"
    }

    fn configure(&self, pin: PinId) -> Result<(), DriverError> {
        let bcm = self.bcm(pin)?;
        let raw = self
            .gpio
            .get(bcm)
            .map_err(|e| DriverError::Unavailable(format!("pin {} (BCM {}): {}", pin, bcm, e)))?;

        let output = if self.drives_high(Level::Inactive) {
            raw.into_output_high()
        } else {
            raw.into_output_low()
        };

        self.outputs.lock().insert(pin, output);
        debug!("Configured pin {} (BCM {}) as output", pin, bcm);
        Ok(())
    }

    fn write(&self, pin: PinId, level: Level) -> Result<(), DriverError> {
        let high = self.drives_high(level);
        let mut outputs = self.outputs.lock();
        let output = outputs.get_mut(&pin).ok_or(DriverError::NotConfigured(pin))?;
        if high {
            output.set_high();
        } else {
            output.set_low();
        }
        debug!("Pin {} → {:?} ({})", pin, level, if high { "high" } else { "low" });
        Ok(())
    }

    fn teardown(&self) -> Result<(), DriverError> {
        // Dropping an OutputPin restores the pin's previous mode
        let released: Vec<PinId> = self.outputs.lock().drain().map(|(pin, _)| pin).collect();
        info!("GPIO released pins {:?}", released);
        Ok(())
    }
}
