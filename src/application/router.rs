//! # Command Router
//!
//! Entry point for every inbound event. Drops events seen through a shred that does not own the
//! room, feeds the event waiter, and turns prefixed messages into processes once the admin and
//! ratelimit checks pass.
//!
//! `handle_event` never awaits: it is called from the gateway's event handlers, and anything slow
//! (notices, the command itself) runs on its own task.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::application::context::CommandContext;
use crate::application::process::Process;
use crate::application::reporting;
use crate::application::services::Services;
use crate::domain::errors::CommandResult;
use crate::domain::traits::ChatProvider;
use crate::domain::types::{EventKind, InboundEvent, Origin};
use crate::strings::messages;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    AdminOnly,
    Ratelimited(Duration),
    NoShred,
}

#[derive(Debug)]
pub enum Routed {
    /// Seen through a shred that does not own the room.
    NotOwner,
    /// Not a command.
    Ignored,
    Unknown,
    Rejected(Rejection),
    Launched(Arc<Process>),
}

#[derive(Clone)]
pub struct CommandRouter {
    services: Arc<Services>,
}

impl CommandRouter {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn handle_event(&self, event: InboundEvent) -> Routed {
        if !self.services.shreds.is_owner(event.shred, &event.room) {
            tracing::trace!(shred = %event.shred, room = %event.room, "Ignoring event from non-owning shred");
            return Routed::NotOwner;
        }
        self.services.waiter.dispatch(&event);
        if event.kind() != EventKind::MessageReceived {
            return Routed::Ignored;
        }
        self.route(event)
    }

    fn route(&self, event: InboundEvent) -> Routed {
        let Some((cmd, args)) = self.parse(event.body().unwrap_or_default()) else {
            return Routed::Ignored;
        };
        tracing::info!(
            "Router dispatching cmd='{}' args='{}' sender='{}'",
            cmd,
            args,
            event.actor
        );

        let Some(chat) = self
            .services
            .shreds
            .current_shred_for(&event.room)
            .and_then(|shred| shred.chat(&event.room))
        else {
            tracing::warn!(room = %event.room, "No shred can act in room");
            return Routed::Rejected(Rejection::NoShred);
        };

        let Some(entry) = self.services.commands.find(&cmd).cloned() else {
            notify(chat, messages::UNKNOWN_COMMAND.to_string());
            return Routed::Unknown;
        };

        if entry.def.admin_only && !self.services.config.system.is_admin(&event.actor) {
            notify(chat, messages::AUTH_DENIED.to_string());
            return Routed::Rejected(Rejection::AdminOnly);
        }

        let origin = Origin::from(&event);
        let reservation = match &entry.def.ratelimit {
            Some(limit) => match self
                .services
                .ratelimits
                .try_acquire(&limit.bucket, &limit.key_for(&origin))
            {
                Ok(reservation) => reservation,
                Err(remaining) => {
                    tracing::debug!(command = %entry.def.name, actor = %origin.actor, ?remaining, "Ratelimited");
                    notify(chat, messages::ratelimited(remaining));
                    return Routed::Rejected(Rejection::Ratelimited(remaining));
                }
            },
            None => None,
        };

        let body_services = self.services.clone();
        let exit_services = self.services.clone();
        let body_chat = chat.clone();
        let handler = entry.handler.clone();
        let process = self.services.processes.run(
            entry.def.clone(),
            origin,
            move |process| {
                let ctx = CommandContext::new(body_services, process, event, body_chat);
                Box::pin(async move { handler.execute(&ctx, &args).await })
            },
            Box::new(
                move |process: Arc<Process>, outcome: CommandResult| -> BoxFuture<'static, ()> {
                    Box::pin(reporting::finish(exit_services, process, chat, reservation, outcome))
                },
            ),
        );
        Routed::Launched(process)
    }

    /// Split `<prefix><cmd> <args>` into `(cmd, args)`.
    fn parse(&self, body: &str) -> Option<(String, String)> {
        let rest = body
            .trim()
            .strip_prefix(self.services.config.commands.prefix.as_str())?;
        let (cmd, args) = match rest.find(char::is_whitespace) {
            Some(idx) => (&rest[..idx], rest[idx..].trim()),
            None => (rest, ""),
        };
        (!cmd.is_empty()).then(|| (cmd.to_string(), args.to_string()))
    }
}

fn notify(chat: Arc<dyn ChatProvider>, text: String) {
    tokio::spawn(async move {
        if let Err(e) = chat.send_notification(&text).await {
            tracing::warn!(error = %e, "Failed to send notice");
        }
    });
}
