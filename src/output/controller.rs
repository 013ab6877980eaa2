//! Channel group state machine with cancellable deferred actions
//!
//! Each group is OFF or ON. A group's state flag and its pin writes are
//! updated under one mutex, so a freshly requested transition and a timer
//! that is just waking up can never interleave. Every scheduled action
//! carries the group's generation number at scheduling time; any later
//! transition bumps the generation, and a timer that wakes with a stale
//! number does nothing.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{Level, OutputSink, PinId};
use crate::config::GroupConfig;
use crate::error::DriverError;

/// Named set of pins switched together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelGroup {
    pub name: String,
    pub pins: Vec<PinId>,
}

impl From<&GroupConfig> for ChannelGroup {
    fn from(config: &GroupConfig) -> Self {
        Self {
            name: config.name.clone(),
            pins: config.pins.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeferredAction {
    TurnOn,
    TurnOff,
}

#[derive(Default)]
struct GroupState {
    on: bool,
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl GroupState {
    /// Invalidate and abort whatever deferred action is pending
    fn cancel_pending(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

struct Inner {
    groups: Vec<ChannelGroup>,
    states: Vec<Mutex<GroupState>>,
    sink: Arc<dyn OutputSink>,
    duration: Duration,
}

/// Owns the channel groups and drives them through an [`OutputSink`]
///
/// Cheap to clone; clones share state. Must be used from within a Tokio
/// runtime because deferred actions are spawned tasks.
#[derive(Clone)]
pub struct OutputController {
    inner: Arc<Inner>,
}

impl OutputController {
    /// Configure every pin and drive it to the OFF level
    pub fn new(
        groups: Vec<ChannelGroup>,
        sink: Arc<dyn OutputSink>,
        duration: Duration,
    ) -> Result<Self, DriverError> {
        for group in &groups {
            for &pin in &group.pins {
                sink.configure(pin)?;
                sink.write(pin, Level::Inactive)?;
            }
            debug!("Group '{}' ready on pins {:?}", group.name, group.pins);
        }

        let states = groups.iter().map(|_| Mutex::new(GroupState::default())).collect();
        info!(
            "✅ Output controller ready: {} group(s) on sink '{}', auto-off after {:?}",
            groups.len(),
            sink.name(),
            duration
        );

        Ok(Self {
            inner: Arc::new(Inner {
                groups,
                states,
                sink,
                duration,
            }),
        })
    }

    /// Group names in configuration order
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.inner.groups.iter().map(|g| g.name.as_str())
    }

    /// Whether a group is currently ON
    pub fn is_on(&self, group: &str) -> Result<bool, DriverError> {
        let idx = self.index_of(group)?;
        Ok(self.inner.states[idx].lock().on)
    }

    /// Turn a group ON
    ///
    /// No pin writes if the group is already ON. With `auto_off`, a deferred
    /// turn-off is (re)armed for the configured duration, replacing any
    /// pending action on the group; without it, any pending action is
    /// cancelled and the group stays ON.
    pub fn turn_on(&self, group: &str, auto_off: bool) -> Result<(), DriverError> {
        let idx = self.index_of(group)?;
        let mut state = self.inner.states[idx].lock();

        if state.on {
            if auto_off {
                self.schedule(idx, &mut state, DeferredAction::TurnOff);
                debug!("Group '{}' already on, auto-off re-armed", group);
            } else {
                state.cancel_pending();
                debug!("Group '{}' already on, pending action cancelled", group);
            }
            return Ok(());
        }

        self.drive(idx, Level::Active)?;
        state.on = true;
        info!("💡 Group '{}' ON", group);

        if auto_off {
            self.schedule(idx, &mut state, DeferredAction::TurnOff);
        } else {
            state.cancel_pending();
        }
        Ok(())
    }

    /// Turn a group OFF (idempotent) and cancel its pending action
    pub fn turn_off(&self, group: &str) -> Result<(), DriverError> {
        let idx = self.index_of(group)?;
        let mut state = self.inner.states[idx].lock();
        state.cancel_pending();
        self.drive(idx, Level::Inactive)?;
        if state.on {
            info!("Group '{}' OFF", group);
        }
        state.on = false;
        Ok(())
    }

    /// Turn every group ON
    pub fn all_on(&self, auto_off: bool) -> Result<(), DriverError> {
        for group in &self.inner.groups {
            self.turn_on(&group.name, auto_off)?;
        }
        Ok(())
    }

    /// Turn every group OFF
    pub fn all_off(&self) -> Result<(), DriverError> {
        for group in &self.inner.groups {
            self.turn_off(&group.name)?;
        }
        Ok(())
    }

    /// Timed scene: primary OFF and secondary ON now, reversed after the duration
    ///
    /// The reversal is two independent deferred actions (secondary OFF,
    /// primary ON), each replacing whatever was pending on its group.
    pub fn show_scene(&self, primary: &str, secondary: &str) -> Result<(), DriverError> {
        let p = self.index_of(primary)?;
        let s = self.index_of(secondary)?;
        if p == s {
            return Err(DriverError::InvalidScene(primary.to_string()));
        }

        // Lock in index order
        let (mut primary_state, mut secondary_state) = if p < s {
            let a = self.inner.states[p].lock();
            let b = self.inner.states[s].lock();
            (a, b)
        } else {
            let b = self.inner.states[s].lock();
            let a = self.inner.states[p].lock();
            (a, b)
        };

        self.drive(p, Level::Inactive)?;
        primary_state.on = false;
        self.drive(s, Level::Active)?;
        secondary_state.on = true;
        info!("🎬 Scene: '{}' OFF, '{}' ON", primary, secondary);

        self.schedule(s, &mut secondary_state, DeferredAction::TurnOff);
        self.schedule(p, &mut primary_state, DeferredAction::TurnOn);
        Ok(())
    }

    /// Startup liveness signal
    ///
    /// With `alternate = Some((a, b))` the two groups take turns being ON;
    /// otherwise every group goes ON and OFF together. Each of the `count`
    /// cycles has two steps of `step` each. Everything is OFF afterwards.
    pub async fn flash(
        &self,
        count: u32,
        step: Duration,
        alternate: Option<(&str, &str)>,
    ) -> Result<(), DriverError> {
        debug!("Flashing {} time(s)", count);
        for _ in 0..count {
            match alternate {
                Some((a, b)) => {
                    self.turn_off(b)?;
                    self.turn_on(a, false)?;
                    tokio::time::sleep(step).await;
                    self.turn_off(a)?;
                    self.turn_on(b, false)?;
                    tokio::time::sleep(step).await;
                }
                None => {
                    self.all_on(false)?;
                    tokio::time::sleep(step).await;
                    self.all_off()?;
                    tokio::time::sleep(step).await;
                }
            }
        }
        self.all_off()
    }

    /// Cancel every pending action, turn everything OFF and release the sink
    ///
    /// Keeps going past individual pin failures; the first error is returned.
    pub fn shutdown(&self) -> Result<(), DriverError> {
        let mut first_err = None;

        for (idx, state) in self.inner.states.iter().enumerate() {
            let mut state = state.lock();
            state.cancel_pending();
            if let Err(e) = self.drive(idx, Level::Inactive) {
                error!("Failed to release group '{}': {}", self.inner.groups[idx].name, e);
                first_err.get_or_insert(e);
            }
            state.on = false;
        }

        if let Err(e) = self.inner.sink.teardown() {
            error!("Sink teardown failed: {}", e);
            first_err.get_or_insert(e);
        }
        info!("🛑 Outputs released");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn index_of(&self, group: &str) -> Result<usize, DriverError> {
        self.inner
            .groups
            .iter()
            .position(|g| g.name == group)
            .ok_or_else(|| DriverError::UnknownGroup(group.to_string()))
    }

    fn drive(&self, idx: usize, level: Level) -> Result<(), DriverError> {
        for &pin in &self.inner.groups[idx].pins {
            self.inner.sink.write(pin, level)?;
        }
        Ok(())
    }

    /// Replace the group's pending action with `action` after the duration
    ///
    /// Caller holds the group's lock.
    fn schedule(&self, idx: usize, state: &mut GroupState, action: DeferredAction) {
        state.cancel_pending();
        let generation = state.generation;
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.duration;

        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Self::fire(weak, idx, generation, action);
        }));
    }

    fn fire(weak: Weak<Inner>, idx: usize, generation: u64, action: DeferredAction) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let controller = OutputController { inner };
        let name = &controller.inner.groups[idx].name;
        let mut state = controller.inner.states[idx].lock();

        if state.generation != generation {
            debug!("Deferred {:?} for '{}' superseded", action, name);
            return;
        }
        // Detach our own handle; aborting it here would be a no-op anyway
        state.pending = None;

        let result = match action {
            DeferredAction::TurnOff => controller.drive(idx, Level::Inactive).map(|_| {
                state.on = false;
                info!("⏱️  Group '{}' auto-off", name);
            }),
            DeferredAction::TurnOn if !state.on => {
                controller.drive(idx, Level::Active).map(|_| {
                    state.on = true;
                    info!("⏱️  Group '{}' restored ON", name);
                })
            }
            DeferredAction::TurnOn => Ok(()),
        };

        if let Err(e) = result {
            error!("Deferred {:?} for group '{}' failed: {}", action, name, e);
        }
    }
}
