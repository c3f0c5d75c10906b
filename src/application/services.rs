//! # Services
//!
//! The registries shared by the router, the gateway adapters and running commands.
//! Each registry guards its own state; nothing here locks across two of them.

use std::sync::Arc;

use crate::application::command::CommandSet;
use crate::application::process::ProcessRegistry;
use crate::application::ratelimit::RatelimitRegistry;
use crate::application::shreds::ShredRegistry;
use crate::application::waiter::EventWaiter;
use crate::domain::config::AppConfig;

pub struct Services {
    pub config: AppConfig,
    pub commands: CommandSet,
    pub waiter: Arc<EventWaiter>,
    pub processes: Arc<ProcessRegistry>,
    pub ratelimits: Arc<RatelimitRegistry>,
    pub shreds: Arc<ShredRegistry>,
}

impl Services {
    /// Apply configured cooldown overrides and declare every bucket.
    pub fn new(config: AppConfig, mut commands: CommandSet) -> Arc<Self> {
        commands.apply_overrides(&config.commands.ratelimits);
        let ratelimits = Arc::new(RatelimitRegistry::new());
        for (bucket, window) in commands.buckets() {
            ratelimits.configure(&bucket, window);
        }
        Arc::new(Self {
            config,
            commands,
            waiter: Arc::new(EventWaiter::new()),
            processes: Arc::new(ProcessRegistry::new()),
            ratelimits,
            shreds: Arc::new(ShredRegistry::new()),
        })
    }
}
