//! Configuration management for Hashtag Lights
//!
//! Handles loading, parsing and validation of the YAML configuration file.
//! Secrets never live here; they come from the credentials file (see
//! [`credentials`]).

pub mod credentials;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::output::pins;

pub use credentials::Credentials;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub output: OutputConfig,
}

/// How the watcher talks to the feed provider
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    /// Periodic search requests with a `since_id` cursor
    Poll,
    /// Long-lived filtered stream driven by server-side rules
    Stream,
}

/// Feed provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_mode")]
    pub mode: FeedMode,
    /// Hashtag searched in poll mode (leading `#` optional)
    pub hashtag: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Delete and re-create the server-side rule set at startup (stream mode)
    #[serde(default = "default_true")]
    pub replace_rules: bool,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Reconnect when the stream sends nothing (not even a keep-alive) for this long
    #[serde(default = "default_stream_idle")]
    pub stream_idle_secs: u64,
}

/// Server-side stream filter rule
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RuleConfig {
    pub value: String,
    pub tag: String,
}

/// Stream reconnect backoff
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base")]
    pub base: u32,
    #[serde(default = "default_backoff_cap")]
    pub max_delay_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: default_backoff_base(),
            max_delay_secs: default_backoff_cap(),
        }
    }
}

/// Which output sink drives the pins
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputDriverKind {
    /// Log writes only (no hardware)
    Console,
    /// Raspberry Pi GPIO header (requires the `rpi` feature)
    Gpio,
}

/// How pin numbers in `groups` are interpreted
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PinNumbering {
    /// Physical position on the 40-pin header
    Board,
    /// Broadcom GPIO number
    Bcm,
}

/// What a feed match does to the lights
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchBehavior {
    /// Every group on, then auto-off
    Lights,
    /// Primary off / secondary on, then reversed
    Scene,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_driver")]
    pub driver: OutputDriverKind,
    #[serde(default = "default_numbering")]
    pub numbering: PinNumbering,
    /// Relay boards switch on a low signal
    #[serde(default = "default_true")]
    pub active_low: bool,
    pub groups: Vec<GroupConfig>,
    #[serde(default = "default_auto_off")]
    pub auto_off_ms: u64,
    #[serde(default = "default_on_match")]
    pub on_match: MatchBehavior,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene: Option<SceneConfig>,
    #[serde(default)]
    pub startup_flash: FlashConfig,
}

/// Named set of pins switched together
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GroupConfig {
    pub name: String,
    pub pins: Vec<u8>,
}

/// Scene group names
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SceneConfig {
    pub primary: String,
    pub secondary: String,
}

/// Startup liveness flash
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlashConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_flash_count")]
    pub count: u32,
    #[serde(default = "default_flash_step")]
    pub step_ms: u64,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: default_flash_count(),
            step_ms: default_flash_step(),
        }
    }
}

impl FeedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stream_idle(&self) -> Duration {
        Duration::from_secs(self.stream_idle_secs)
    }

    /// Hashtag with exactly one leading `#`
    pub fn query_hashtag(&self) -> String {
        format!("#{}", self.hashtag.trim().trim_start_matches('#'))
    }
}

impl OutputConfig {
    pub fn auto_off(&self) -> Duration {
        Duration::from_millis(self.auto_off_ms)
    }
}

impl FlashConfig {
    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        let feed = &self.feed;
        if feed.hashtag.trim().trim_start_matches('#').is_empty() {
            anyhow::bail!("feed.hashtag cannot be empty");
        }
        if feed.poll_interval_ms == 0 {
            anyhow::bail!("feed.poll_interval_ms must be greater than zero");
        }
        if feed.stream_idle_secs == 0 {
            anyhow::bail!("feed.stream_idle_secs must be greater than zero");
        }
        if feed.backoff.base == 0 {
            anyhow::bail!("feed.backoff.base must be at least 1");
        }
        if feed.mode == FeedMode::Stream && feed.replace_rules && feed.rules.is_empty() {
            anyhow::bail!("stream mode with replace_rules needs at least one rule");
        }
        for (idx, rule) in feed.rules.iter().enumerate() {
            if rule.value.trim().is_empty() {
                anyhow::bail!("feed.rules[{}] value cannot be empty", idx);
            }
        }

        self.validate_groups()?;

        if self.output.on_match == MatchBehavior::Scene {
            let scene = self
                .output
                .scene
                .as_ref()
                .context("on_match: scene requires an output.scene section")?;
            self.validate_scene(scene)?;
        } else if let Some(scene) = &self.output.scene {
            self.validate_scene(scene)?;
        }

        Ok(())
    }

    fn validate_groups(&self) -> Result<()> {
        let output = &self.output;
        if output.groups.is_empty() {
            anyhow::bail!("At least one output group must be defined");
        }

        let mut names = HashSet::new();
        let mut seen_pins = HashSet::new();
        for (idx, group) in output.groups.iter().enumerate() {
            if group.name.trim().is_empty() {
                anyhow::bail!("Output group {} name cannot be empty", idx);
            }
            if !names.insert(group.name.as_str()) {
                anyhow::bail!("Output group '{}' is defined twice", group.name);
            }
            if group.pins.is_empty() {
                anyhow::bail!("Output group '{}' has no pins", group.name);
            }
            for &pin in &group.pins {
                if output.numbering == PinNumbering::Board && pins::board_to_bcm(pin).is_none() {
                    anyhow::bail!(
                        "Output group '{}' pin {} is not a GPIO position on the 40-pin header",
                        group.name,
                        pin
                    );
                }
                if !seen_pins.insert(pin) {
                    anyhow::bail!(
                        "Pin {} appears in more than one output group (second use in '{}')",
                        pin,
                        group.name
                    );
                }
            }
        }

        Ok(())
    }

    fn validate_scene(&self, scene: &SceneConfig) -> Result<()> {
        let exists = |name: &str| self.output.groups.iter().any(|g| g.name == name);
        if !exists(&scene.primary) {
            anyhow::bail!("Scene primary group '{}' is not defined", scene.primary);
        }
        if !exists(&scene.secondary) {
            anyhow::bail!("Scene secondary group '{}' is not defined", scene.secondary);
        }
        if scene.primary == scene.secondary {
            anyhow::bail!("Scene primary and secondary must be different groups");
        }
        Ok(())
    }
}

// Default value functions
fn default_feed_mode() -> FeedMode { FeedMode::Poll }
fn default_api_base() -> String { "https://api.twitter.com".to_string() }
fn default_user_agent() -> String { "AnalyzeMyTweets".to_string() }
fn default_poll_interval() -> u64 { 4000 }
fn default_true() -> bool { true }
fn default_backoff_base() -> u32 { 2 }
fn default_backoff_cap() -> u64 { 300 }
fn default_stream_idle() -> u64 { 90 }
fn default_output_driver() -> OutputDriverKind { OutputDriverKind::Console }
fn default_numbering() -> PinNumbering { PinNumbering::Board }
fn default_auto_off() -> u64 { 30_000 }
fn default_on_match() -> MatchBehavior { MatchBehavior::Lights }
fn default_flash_count() -> u32 { 2 }
fn default_flash_step() -> u64 { 2000 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
feed:
  hashtag: "avianaart"
output:
  groups:
    - name: white
      pins: [11]
    - name: brown
      pins: [13]
"#;

    fn parse(yaml: &str) -> AppConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_load_minimal_config_applies_defaults() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, MINIMAL)?;

        let config = AppConfig::load(&config_path).await?;

        assert_eq!(config.feed.mode, FeedMode::Poll);
        assert_eq!(config.feed.poll_interval(), Duration::from_secs(4));
        assert_eq!(config.feed.backoff.base, 2);
        assert_eq!(config.feed.backoff.max_delay_secs, 300);
        assert_eq!(config.feed.stream_idle(), Duration::from_secs(90));
        assert_eq!(config.output.driver, OutputDriverKind::Console);
        assert_eq!(config.output.numbering, PinNumbering::Board);
        assert!(config.output.active_low);
        assert_eq!(config.output.auto_off(), Duration::from_secs(30));
        assert_eq!(config.output.on_match, MatchBehavior::Lights);
        assert!(config.output.startup_flash.enabled);
        assert_eq!(config.output.startup_flash.count, 2);
        assert_eq!(config.output.groups.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = AppConfig::load(temp_dir.path().join("nope.yaml")).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_query_hashtag_normalizes_prefix() {
        let mut config = parse(MINIMAL);
        assert_eq!(config.feed.query_hashtag(), "#avianaart");

        config.feed.hashtag = "##avianaart ".to_string();
        assert_eq!(config.feed.query_hashtag(), "#avianaart");
    }

    #[test]
    fn test_pin_shared_between_groups_is_rejected() {
        let mut config = parse(MINIMAL);
        config.output.groups[1].pins.push(11);

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("more than one output group"), "{}", err);
    }

    #[test]
    fn test_duplicate_group_name_is_rejected() {
        let mut config = parse(MINIMAL);
        config.output.groups[1].name = "white".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_gpio_board_pin_is_rejected() {
        let mut config = parse(MINIMAL);
        // Pin 6 is ground
        config.output.groups[0].pins = vec![6];
        assert!(config.validate().is_err());

        config.output.numbering = PinNumbering::Bcm;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scene_mode_requires_scene_section() {
        let mut config = parse(MINIMAL);
        config.output.on_match = MatchBehavior::Scene;
        assert!(config.validate().is_err());

        config.output.scene = Some(SceneConfig {
            primary: "white".to_string(),
            secondary: "brown".to_string(),
        });
        assert!(config.validate().is_ok());

        config.output.scene = Some(SceneConfig {
            primary: "white".to_string(),
            secondary: "white".to_string(),
        });
        assert!(config.validate().is_err());

        config.output.scene = Some(SceneConfig {
            primary: "white".to_string(),
            secondary: "green".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stream_mode_requires_rules_when_replacing() {
        let mut config = parse(MINIMAL);
        config.feed.mode = FeedMode::Stream;
        assert!(config.validate().is_err());

        config.feed.replace_rules = false;
        assert!(config.validate().is_ok());

        config.feed.replace_rules = true;
        config.feed.rules.push(RuleConfig {
            value: "#avianaart -sucks".to_string(),
            tag: "avianaart".to_string(),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = parse(include_str!("../../config.example.yaml"));
        config.validate().unwrap();
        assert_eq!(config.output.scene.as_ref().unwrap().secondary, "brown");
        assert_eq!(config.feed.rules.len(), 1);
    }

    #[test]
    fn test_zero_stream_idle_is_rejected() {
        let mut config = parse(MINIMAL);
        config.feed.stream_idle_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_hashtag_is_rejected() {
        let mut config = parse(MINIMAL);
        config.feed.hashtag = "#".to_string();
        assert!(config.validate().is_err());
    }
}
