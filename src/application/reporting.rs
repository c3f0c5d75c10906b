//! # Outcome Reporting
//!
//! Maps how a process ended to what the user sees, whether operators hear about it, and whether
//! the use still counts against the command's cooldown.

use std::sync::Arc;
use tracing::Level;

use crate::application::process::Process;
use crate::application::ratelimit::Reservation;
use crate::application::services::Services;
use crate::domain::errors::{CommandError, CommandResult};
use crate::domain::traits::ChatProvider;
use crate::strings::messages;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    pub notice: Option<String>,
    pub report_operator: bool,
    pub keep_ratelimit: bool,
    pub level: Level,
}

impl Disposition {
    fn quiet() -> Self {
        Self {
            notice: None,
            report_operator: false,
            keep_ratelimit: true,
            level: Level::DEBUG,
        }
    }

    fn notice(text: &str, level: Level) -> Self {
        Self {
            notice: Some(text.to_string()),
            level,
            ..Self::quiet()
        }
    }
}

pub fn disposition(outcome: &CommandResult) -> Disposition {
    match outcome {
        Ok(()) | Err(CommandError::Exit) => Disposition::quiet(),
        Err(CommandError::Timeout) => Disposition::notice(messages::NO_LONGER_WAITING, Level::DEBUG),
        Err(CommandError::ResourceGone) => Disposition::notice(messages::WATCHED_GONE, Level::DEBUG),
        Err(CommandError::Interrupted) => Disposition::notice(messages::COMMAND_KILLED, Level::INFO),
        Err(CommandError::Cancelled) => Disposition {
            keep_ratelimit: false,
            ..Disposition::notice(messages::COMMAND_CANCELLED, Level::DEBUG)
        },
        Err(CommandError::Failure {
            message,
            counts_against_ratelimit,
        }) => Disposition {
            keep_ratelimit: *counts_against_ratelimit,
            ..Disposition::notice(message, Level::INFO)
        },
        Err(CommandError::Internal(_)) => Disposition {
            report_operator: true,
            keep_ratelimit: false,
            ..Disposition::notice(messages::INTERNAL_FAULT, Level::ERROR)
        },
    }
}

/// Final step of every process: notify, report, and refund the cooldown where the outcome says so.
pub async fn finish(
    services: Arc<Services>,
    process: Arc<Process>,
    chat: Arc<dyn ChatProvider>,
    reservation: Option<Reservation>,
    outcome: CommandResult,
) {
    let disposition = disposition(&outcome);
    let pid = process.pid();
    let command = process.command().name.clone();

    match &outcome {
        Ok(()) => tracing::debug!(pid, command = %command, "Process finished"),
        Err(e) if disposition.level == Level::ERROR => {
            tracing::error!(pid, command = %command, error = ?e, "Process failed");
        }
        Err(e) if disposition.level == Level::INFO => {
            tracing::info!(pid, command = %command, error = %e, "Process ended");
        }
        Err(e) => tracing::debug!(pid, command = %command, error = %e, "Process ended"),
    }

    if !disposition.keep_ratelimit
        && let Some(reservation) = &reservation
    {
        services.ratelimits.release(reservation);
    }

    if let Some(notice) = &disposition.notice
        && let Err(e) = chat.send_notification(notice).await
    {
        tracing::warn!(pid, error = %e, "Failed to deliver outcome notice");
    }

    if disposition.report_operator
        && let Err(e) = &outcome
    {
        report_to_operators(&services, &process, &format!("{e:?}")).await;
    }
}

async fn report_to_operators(services: &Services, process: &Process, detail: &str) {
    let Some(room) = &services.config.system.report_room else {
        return;
    };
    let Some(chat) = services
        .shreds
        .current_shred_for(room)
        .and_then(|shred| shred.chat(room))
    else {
        tracing::warn!(room = %room, "No shred can reach the report room");
        return;
    };
    let origin = process.origin();
    let report = messages::operator_report(
        process.pid(),
        &process.command().name,
        &origin.actor,
        &origin.room,
        detail,
    );
    if let Err(e) = chat.send_message(&report).await {
        tracing::warn!(room = %room, error = %e, "Failed to deliver operator report");
    }
}
