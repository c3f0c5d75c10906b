//! # Commands
//!
//! Command metadata ([`CommandDef`]), the [`Command`] trait implemented by handlers in
//! `interface::commands`, and the static list the router looks commands up in.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::application::context::CommandContext;
use crate::application::ratelimit::Ratelimit;
use crate::domain::config::{RatelimitConfig, RatelimitScope};
use crate::domain::errors::CommandResult;

#[derive(Debug, Clone)]
pub struct CommandDef {
    pub name: String,
    pub aliases: Vec<String>,
    pub description: String,
    pub usage: Option<String>,
    pub admin_only: bool,
    pub ratelimit: Option<Ratelimit>,
}

impl CommandDef {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            description: description.to_string(),
            usage: None,
            admin_only: false,
            ratelimit: None,
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn usage(mut self, usage: &str) -> Self {
        self.usage = Some(usage.to_string());
        self
    }

    pub fn admin_only(mut self) -> Self {
        self.admin_only = true;
        self
    }

    /// Per-actor cooldown in a bucket named after the command.
    pub fn cooldown(mut self, window: Duration) -> Self {
        self.ratelimit = Some(Ratelimit {
            bucket: self.name.clone(),
            window,
            scope: RatelimitScope::Actor,
        });
        self
    }

    /// Share the cooldown bucket with other commands using the same name.
    pub fn shared_bucket(mut self, bucket: &str) -> Self {
        if let Some(limit) = &mut self.ratelimit {
            limit.bucket = bucket.to_string();
        }
        self
    }

    pub fn scope(mut self, scope: RatelimitScope) -> Self {
        if let Some(limit) = &mut self.ratelimit {
            limit.scope = scope;
        }
        self
    }

    fn apply_override(&mut self, config: &RatelimitConfig) {
        self.ratelimit = Some(Ratelimit {
            bucket: config.bucket.clone().unwrap_or_else(|| self.name.clone()),
            window: Duration::from_secs(config.window_secs),
            scope: config.scope,
        });
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    fn definition(&self) -> CommandDef;

    async fn execute(&self, ctx: &CommandContext, args: &str) -> CommandResult;
}

#[derive(Clone)]
pub struct RegisteredCommand {
    pub def: Arc<CommandDef>,
    pub handler: Arc<dyn Command>,
}

/// Explicit, static command list.
#[derive(Clone, Default)]
pub struct CommandSet {
    commands: Vec<RegisteredCommand>,
    index: HashMap<String, usize>,
}

impl CommandSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl Command + 'static) -> Self {
        self.register(Arc::new(handler));
        self
    }

    pub fn register(&mut self, handler: Arc<dyn Command>) {
        let def = handler.definition();
        let slot = self.commands.len();
        for key in std::iter::once(&def.name).chain(def.aliases.iter()) {
            if self.index.insert(key.to_lowercase(), slot).is_some() {
                tracing::warn!(command = %def.name, key = %key, "Command name shadows an earlier registration");
            }
        }
        self.commands.push(RegisteredCommand {
            def: Arc::new(def),
            handler,
        });
    }

    /// Replace built-in cooldowns with configured ones.
    pub fn apply_overrides(&mut self, overrides: &HashMap<String, RatelimitConfig>) {
        for (name, limit) in overrides {
            let Some(&slot) = self.index.get(&name.to_lowercase()) else {
                tracing::warn!(command = %name, "Ratelimit override for unknown command");
                continue;
            };
            let entry = &mut self.commands[slot];
            let mut def = (*entry.def).clone();
            def.apply_override(limit);
            entry.def = Arc::new(def);
        }
    }

    pub fn find(&self, invoked: &str) -> Option<&RegisteredCommand> {
        self.index
            .get(&invoked.to_lowercase())
            .and_then(|&slot| self.commands.get(slot))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredCommand> {
        self.commands.iter()
    }

    /// Distinct cooldown buckets with their windows. When commands sharing a bucket disagree on
    /// the window, the later definition wins and the conflict is logged.
    pub fn buckets(&self) -> HashMap<String, Duration> {
        let mut buckets = HashMap::new();
        for command in &self.commands {
            let Some(limit) = &command.def.ratelimit else {
                continue;
            };
            if let Some(previous) = buckets.insert(limit.bucket.clone(), limit.window)
                && previous != limit.window
            {
                tracing::warn!(
                    bucket = %limit.bucket,
                    command = %command.def.name,
                    ?previous,
                    window = ?limit.window,
                    "Commands sharing a ratelimit bucket declare different windows"
                );
            }
        }
        buckets
    }
}
