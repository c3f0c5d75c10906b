//! # Configuration
//!
//! Manages the loading and parsing of the application's configuration file (`config.yaml`).
//! Defines the structs for shred credentials, command timeouts, ratelimit overrides and system settings.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main application configuration structure.
/// Matches the layout of `data/config.yaml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub shreds: Vec<ShredConfig>,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub system: SystemConfig,
}

/// Credentials for one bot identity.
#[derive(Debug, Deserialize, Clone)]
pub struct ShredConfig {
    pub name: String,
    pub homeserver: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommandsConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_ask_timeout")]
    pub ask_timeout_secs: u64,
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
    #[serde(default = "default_liveness_poll")]
    pub liveness_poll_secs: u64,
    /// Per-command overrides of the built-in cooldowns, keyed by command name.
    #[serde(default)]
    pub ratelimits: HashMap<String, RatelimitConfig>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            ask_timeout_secs: default_ask_timeout(),
            confirm_timeout_secs: default_confirm_timeout(),
            liveness_poll_secs: default_liveness_poll(),
            ratelimits: HashMap::new(),
        }
    }
}

impl CommandsConfig {
    /// `None` means wait forever.
    pub fn ask_timeout(&self) -> Option<Duration> {
        secs_or_forever(self.ask_timeout_secs)
    }

    pub fn confirm_timeout(&self) -> Option<Duration> {
        secs_or_forever(self.confirm_timeout_secs)
    }

    pub fn liveness_poll(&self) -> Option<Duration> {
        secs_or_forever(self.liveness_poll_secs)
    }
}

/// Cooldown declaration. `bucket` shares one cooldown between several commands.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RatelimitConfig {
    pub window_secs: u64,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub scope: RatelimitScope,
}

/// What the cooldown is counted against.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RatelimitScope {
    #[default]
    Actor,
    Room,
    Channel,
    Global,
}

/// System-level settings for the bot.
#[derive(Debug, Deserialize, Clone)]
pub struct SystemConfig {
    #[serde(default)]
    pub admin: Vec<String>,
    /// Room that receives operator diagnostics.
    #[serde(default)]
    pub report_room: Option<String>,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_clash_check")]
    pub clash_check_secs: u64,
    #[serde(default = "default_true")]
    pub auto_join_invites: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            admin: Vec::new(),
            report_room: None,
            log_dir: default_log_dir(),
            clash_check_secs: default_clash_check(),
            auto_join_invites: true,
        }
    }
}

impl SystemConfig {
    /// Period of the background clash sweep. `None` disables it.
    pub fn clash_check(&self) -> Option<Duration> {
        secs_or_forever(self.clash_check_secs)
    }

    pub fn is_admin(&self, actor: &str) -> bool {
        self.admin.iter().any(|a| a.eq_ignore_ascii_case(actor))
    }
}

fn default_prefix() -> String {
    ".".to_string()
}
fn default_ask_timeout() -> u64 {
    60
}
fn default_confirm_timeout() -> u64 {
    30
}
fn default_liveness_poll() -> u64 {
    10
}
fn default_log_dir() -> String {
    "data".to_string()
}
fn default_clash_check() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

fn secs_or_forever(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.shreds.is_empty() {
            bail!("at least one shred must be configured");
        }
        let mut names: Vec<&str> = self.shreds.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            bail!("duplicate shred name '{}'", w[0]);
        }
        if self.commands.prefix.is_empty() {
            bail!("command prefix must not be empty");
        }
        for (name, limit) in &self.commands.ratelimits {
            if limit.window_secs == 0 {
                bail!("ratelimit for '{name}' has a zero window");
            }
        }
        Ok(())
    }
}
