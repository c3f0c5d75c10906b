#![recursion_limit = "256"]
//! # Main Entry Point
//!
//! Wires the bot together:
//! - Domain: configuration and types
//! - Infrastructure: one Matrix client per shred
//! - Application: registries, router, logging
//! - Interface: built-in command handlers
//!

mod application;
mod domain;
mod infrastructure;
mod interface;
mod strings;

use anyhow::{Context, Result};
use clap::Parser;
use matrix_sdk::{
    Client,
    config::SyncSettings,
    room::Room,
    ruma::{
        OwnedUserId,
        events::{
            reaction::OriginalSyncReactionEvent,
            room::{
                member::{MembershipState, StrippedRoomMemberEvent, SyncRoomMemberEvent},
                message::OriginalSyncRoomMessageEvent,
                redaction::OriginalSyncRoomRedactionEvent,
            },
        },
    },
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::application::logging;
use crate::application::router::CommandRouter;
use crate::application::services::Services;
use crate::domain::config::AppConfig;
use crate::domain::types::ShredId;
use crate::infrastructure::matrix::{self, MatrixShred};
use crate::strings::messages;

#[derive(Parser, Debug)]
#[command(name = "shredbot", about = "Multi-identity Matrix command bot")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load Configuration
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    // 2. Logging Setup
    let _log_guard = logging::init(&config.system.log_dir)?;
    tracing::info!("Starting shredbot with {} shreds...", config.shreds.len());

    // 3. Application Components
    let services = Services::new(config.clone(), interface::commands::builtin());
    let router = Arc::new(CommandRouter::new(services.clone()));

    // 4. Log every shred in
    let mut fleet = Vec::with_capacity(config.shreds.len());
    for shred_config in &config.shreds {
        let shred = MatrixShred::login(shred_config).await?;
        let id = services.shreds.register(shred.clone());
        fleet.push((id, shred));
    }
    let fleet_users: Arc<HashSet<OwnedUserId>> = Arc::new(
        fleet
            .iter()
            .filter_map(|(_, shred)| shred.client().user_id().map(ToOwned::to_owned))
            .collect(),
    );

    // 5. Initial sync, then hand each shred to its own sync loop
    let mut syncs = JoinSet::new();
    for (id, shred) in fleet {
        let response = shred
            .client()
            .sync_once(SyncSettings::default())
            .await
            .with_context(|| format!("Initial sync failed for shred {id}"))?;
        services.shreds.report_rooms(id, shred.joined_rooms());
        install_handlers(id, shred.client(), &router, &fleet_users, config.system.auto_join_invites);

        let settings = SyncSettings::default().token(response.next_batch);
        let services = services.clone();
        syncs.spawn(async move {
            if let Err(e) = shred.client().sync(settings).await {
                tracing::error!(shred = %id, "Matrix sync ended: {}", e);
            }
            shred.set_connected(false);
            services.shreds.shred_disconnected(id);
        });
    }

    // 6. Clash handling: once now, then periodically
    tokio::spawn(sweep(services.clone()));
    if let Some(period) = config.system.clash_check() {
        let sweep_services = services.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep(sweep_services.clone()).await;
            }
        });
    }

    // 7. Run until Ctrl-C or until every shred is gone
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down..."),
        _ = async { while syncs.join_next().await.is_some() {} } => {
            tracing::error!("All shred sync loops ended");
        }
    }

    for process in services.processes.list() {
        services.processes.interrupt(process.pid());
    }
    Ok(())
}

async fn sweep(services: Arc<Services>) {
    for resolution in services.shreds.resolve_clashes().await {
        let name = |id: ShredId| {
            services
                .shreds
                .shred(id)
                .map_or_else(|| id.to_string(), |s| format!("{id} {}", s.name()))
        };
        let left: Vec<String> = resolution.left.iter().map(|&id| name(id)).collect();
        let failed: Vec<String> = resolution.failed.iter().map(|(id, _)| name(*id)).collect();
        tracing::info!(
            "{}",
            messages::clash_summary(&resolution.room, &name(resolution.keeper), &left, &failed)
        );
    }
}

/// Translate SDK events for one shred and feed them to the router.
fn install_handlers(
    id: ShredId,
    client: &Client,
    router: &Arc<CommandRouter>,
    fleet_users: &Arc<HashSet<OwnedUserId>>,
    auto_join: bool,
) {
    let msg_router = router.clone();
    let msg_users = fleet_users.clone();
    client.add_event_handler(move |ev: OriginalSyncRoomMessageEvent, room: Room| {
        let router = msg_router.clone();
        let users = msg_users.clone();
        async move {
            if users.contains(&ev.sender) {
                return;
            }
            if let Some(event) = matrix::message_event(id, &ev, &room) {
                tracing::info!(
                    "Received message from {}: \n{}",
                    ev.sender,
                    event.body().unwrap_or_default()
                );
                router.handle_event(event);
            }
        }
    });

    let reaction_router = router.clone();
    let reaction_users = fleet_users.clone();
    client.add_event_handler(move |ev: OriginalSyncReactionEvent, room: Room| {
        let router = reaction_router.clone();
        let users = reaction_users.clone();
        async move {
            if !users.contains(&ev.sender) {
                router.handle_event(matrix::reaction_event(id, &ev, &room));
            }
        }
    });

    let redaction_router = router.clone();
    client.add_event_handler(move |ev: OriginalSyncRoomRedactionEvent, room: Room| {
        let router = redaction_router.clone();
        async move {
            if let Some(event) = matrix::redaction_event(id, &ev, &room) {
                router.handle_event(event);
            }
        }
    });

    // Own membership changes keep the room map current
    let member_services = router.services().clone();
    client.add_event_handler(
        move |ev: SyncRoomMemberEvent, room: Room, client: Client| {
            let services = member_services.clone();
            async move {
                if client.user_id() != Some(&**ev.state_key()) {
                    return;
                }
                let room_id = room.room_id().as_str();
                match ev.membership() {
                    MembershipState::Join => {
                        if services.shreds.room_joined(id, room_id) {
                            tokio::spawn(sweep(services.clone()));
                        }
                    }
                    MembershipState::Leave | MembershipState::Ban => {
                        services.shreds.room_left(id, room_id);
                    }
                    _ => {}
                }
            }
        },
    );

    if auto_join {
        client.add_event_handler(
            |ev: StrippedRoomMemberEvent, room: Room, client: Client| async move {
                if ev.content.membership != MembershipState::Invite
                    || client.user_id() != Some(&*ev.state_key)
                {
                    return;
                }
                tracing::info!(room = %room.room_id(), "Accepting invite");
                if let Err(e) = room.join().await {
                    tracing::warn!(room = %room.room_id(), "Failed to join room: {}", e);
                }
            },
        );
    }
}
