//! # Shreds Command
//!
//! `.shreds` shows the fleet; `.shreds resolve` settles room clashes now instead of waiting for
//! the periodic sweep.

use async_trait::async_trait;

use crate::application::command::{Command, CommandDef};
use crate::application::context::CommandContext;
use crate::application::shreds::ShredRegistry;
use crate::domain::errors::{CommandError, CommandResult};
use crate::domain::types::ShredId;
use crate::strings::messages;

pub struct Shreds;

fn label(registry: &ShredRegistry, id: ShredId) -> String {
    match registry.shred(id) {
        Some(shred) => format!("{id} {}", shred.name()),
        None => id.to_string(),
    }
}

fn overview(registry: &ShredRegistry) -> String {
    let shreds = registry.shreds();
    if shreds.is_empty() {
        return messages::NO_SHREDS.to_string();
    }
    let mut lines: Vec<String> = shreds
        .iter()
        .map(|s| {
            messages::shred_line(
                &s.id().to_string(),
                s.name(),
                s.is_connected(),
                registry.rooms_of(s.id()).len(),
            )
        })
        .collect();
    let contested = registry.contested_rooms().len();
    if contested > 0 {
        lines.push(messages::contested_line(contested));
    }
    lines.join("\n")
}

async fn resolve(registry: &ShredRegistry) -> String {
    let resolutions = registry.resolve_clashes().await;
    if resolutions.is_empty() {
        return messages::NO_CLASHES.to_string();
    }
    resolutions
        .iter()
        .map(|r| {
            let left: Vec<String> = r.left.iter().map(|&id| label(registry, id)).collect();
            let failed: Vec<String> = r
                .failed
                .iter()
                .map(|(id, e)| format!("{} ({e})", label(registry, *id)))
                .collect();
            messages::clash_summary(&r.room, &label(registry, r.keeper), &left, &failed)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Command for Shreds {
    fn definition(&self) -> CommandDef {
        CommandDef::new("shreds", "Show shreds and resolve room clashes")
            .usage("[resolve]")
            .admin_only()
    }

    async fn execute(&self, ctx: &CommandContext, args: &str) -> CommandResult {
        let registry = &ctx.services().shreds;
        let out = match args.trim() {
            "" => overview(registry),
            "resolve" => {
                ctx.typing(true).await;
                let summary = resolve(registry).await;
                ctx.typing(false).await;
                summary
            }
            _ => {
                return Err(CommandError::failure_refunded(messages::command_usage(
                    "shreds", "[resolve]",
                )));
            }
        };
        ctx.reply(&out).await?;
        Ok(())
    }
}
