//! Console sink - logs every pin operation instead of touching hardware
//!
//! This is useful for:
//! - Running the watcher on a development machine without GPIO
//! - Checking group wiring and timing from the logs (`--dry-run`)

use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::{Level, OutputSink, PinId};
use crate::error::DriverError;

/// ConsoleSink keeps a shadow level per pin and logs transitions
pub struct ConsoleSink {
    name: String,
    /// Configured pins and their last written level
    levels: RwLock<BTreeMap<PinId, Level>>,
    /// Write counter for debugging
    write_count: RwLock<u64>,
}

impl ConsoleSink {
    /// Create a new ConsoleSink with a given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            levels: RwLock::new(BTreeMap::new()),
            write_count: RwLock::new(0),
        }
    }

    /// Last level written to a pin (None if not configured)
    pub fn level(&self, pin: PinId) -> Option<Level> {
        self.levels.read().get(&pin).copied()
    }
}

impl OutputSink for ConsoleSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&self, pin: PinId) -> Result<(), DriverError> {
        self.levels.write().insert(pin, Level::Inactive);
        debug!("🔌 Sink '{}' configured pin {} as output", self.name, pin);
        Ok(())
    }

    fn write(&self, pin: PinId, level: Level) -> Result<(), DriverError> {
        let mut levels = self.levels.write();
        let Some(slot) = levels.get_mut(&pin) else {
            warn!("⚠️  Sink '{}' write to unconfigured pin {}", self.name, pin);
            return Err(DriverError::NotConfigured(pin));
        };
        *slot = level;
        drop(levels);

        let mut count = self.write_count.write();
        *count += 1;
        let write_num = *count;
        drop(count);

        let marker = match level {
            Level::Active => "●",
            Level::Inactive => "○",
        };
        info!(
            "💡 [{}] Sink '{}' pin {} {} {:?} [write #{}]",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            self.name,
            pin,
            marker,
            level,
            write_num
        );

        Ok(())
    }

    fn teardown(&self) -> Result<(), DriverError> {
        let released = std::mem::take(&mut *self.levels.write());
        info!(
            "🛑 Sink '{}' released {} pin(s) after {} write(s)",
            self.name,
            released.len(),
            *self.write_count.read()
        );
        Ok(())
    }
}
