//! What happens to the lights when a match arrives

use async_trait::async_trait;
use tracing::debug;

use crate::config::{MatchBehavior, OutputConfig};
use crate::feed::{FeedItem, MatchHandler};
use crate::output::OutputController;

/// Reaction to a single match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Every group ON, auto-off after the configured duration
    AllOn,
    /// Primary OFF and secondary ON, reversed after the duration
    Scene { primary: String, secondary: String },
}

impl Reaction {
    pub fn from_config(config: &OutputConfig) -> Self {
        match (&config.on_match, &config.scene) {
            (MatchBehavior::Scene, Some(scene)) => Reaction::Scene {
                primary: scene.primary.clone(),
                secondary: scene.secondary.clone(),
            },
            _ => Reaction::AllOn,
        }
    }
}

/// [`MatchHandler`] that drives an [`OutputController`]
pub struct LightsAction {
    controller: OutputController,
    reaction: Reaction,
}

impl LightsAction {
    pub fn new(controller: OutputController, reaction: Reaction) -> Self {
        Self {
            controller,
            reaction,
        }
    }

    pub fn reaction(&self) -> &Reaction {
        &self.reaction
    }
}

#[async_trait]
impl MatchHandler for LightsAction {
    async fn on_match(&self, item: &FeedItem) -> anyhow::Result<()> {
        debug!("Reacting to item {} with {:?}", item.id, self.reaction);
        match &self.reaction {
            Reaction::AllOn => self.controller.all_on(true)?,
            Reaction::Scene { primary, secondary } => {
                self.controller.show_scene(primary, secondary)?
            }
        }
        Ok(())
    }
}
