//! Digital outputs (relay-driven lights)
//!
//! The [`OutputController`] owns the channel groups and their on/off state;
//! the pins themselves are driven through an [`OutputSink`].

use std::sync::Arc;

use crate::config::{OutputConfig, OutputDriverKind};
use crate::error::DriverError;

pub mod console;
pub mod controller;
#[cfg(feature = "rpi")]
pub mod gpio;
pub mod pins;

pub use console::ConsoleSink;
pub use controller::{ChannelGroup, OutputController};

/// Pin identifier in the configured numbering scheme
pub type PinId = u8;

/// Logical output level, independent of relay wiring polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Channel energised (lights on)
    Active,
    /// Channel released (lights off)
    Inactive,
}

/// Sink trait - every digital output backend implements this
///
/// All methods take &self so a sink can be shared as `Arc<dyn OutputSink>`
/// between the controller and its deferred tasks. Implementations use
/// interior mutability for pin handles.
pub trait OutputSink: Send + Sync {
    /// Backend name for logs (e.g., "console", "gpio")
    fn name(&self) -> &str;

    /// Claim a pin as an output, starting at its inactive level
    fn configure(&self, pin: PinId) -> Result<(), DriverError>;

    /// Drive a configured pin
    fn write(&self, pin: PinId, level: Level) -> Result<(), DriverError>;

    /// Release every claimed pin
    fn teardown(&self) -> Result<(), DriverError>;
}

/// Build the sink selected by the configuration
///
/// `force_console` overrides the configured driver (dry-run).
pub fn build_sink(
    config: &OutputConfig,
    force_console: bool,
) -> Result<Arc<dyn OutputSink>, DriverError> {
    if force_console {
        return Ok(Arc::new(ConsoleSink::new("console")));
    }

    match config.driver {
        OutputDriverKind::Console => Ok(Arc::new(ConsoleSink::new("console"))),
        #[cfg(feature = "rpi")]
        OutputDriverKind::Gpio => Ok(Arc::new(gpio::GpioSink::new(
            config.numbering,
            config.active_low,
        )?)),
        #[cfg(not(feature = "rpi"))]
        OutputDriverKind::Gpio => Err(DriverError::Unavailable(
            "built without the `rpi` feature; rebuild with --features rpi or use driver: console"
                .to_string(),
        )),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording sink shared by the output and application tests

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SinkCall {
        Configure(PinId),
        Write(PinId, Level),
        Teardown,
    }

    #[derive(Default)]
    pub struct RecordingSink {
        calls: Mutex<Vec<SinkCall>>,
        configured: Mutex<HashSet<PinId>>,
    }

    impl RecordingSink {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn calls(&self) -> Vec<SinkCall> {
            self.calls.lock().clone()
        }

        pub fn writes(&self) -> Vec<(PinId, Level)> {
            self.calls
                .lock()
                .iter()
                .filter_map(|c| match c {
                    SinkCall::Write(pin, level) => Some((*pin, *level)),
                    _ => None,
                })
                .collect()
        }

        pub fn clear(&self) {
            self.calls.lock().clear();
        }

        /// Last level written to a pin
        pub fn level(&self, pin: PinId) -> Option<Level> {
            self.writes()
                .into_iter()
                .rev()
                .find(|(p, _)| *p == pin)
                .map(|(_, level)| level)
        }
    }

    impl OutputSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        fn configure(&self, pin: PinId) -> Result<(), DriverError> {
            self.configured.lock().insert(pin);
            self.calls.lock().push(SinkCall::Configure(pin));
            Ok(())
        }

        fn write(&self, pin: PinId, level: Level) -> Result<(), DriverError> {
            if !self.configured.lock().contains(&pin) {
                return Err(DriverError::NotConfigured(pin));
            }
            self.calls.lock().push(SinkCall::Write(pin, level));
            Ok(())
        }

        fn teardown(&self) -> Result<(), DriverError> {
            self.configured.lock().clear();
            self.calls.lock().push(SinkCall::Teardown);
            Ok(())
        }
    }
}
