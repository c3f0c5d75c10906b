//! # Help Command
//!
//! Handles the `.help` command.
//! Lists every registered command, admin commands in their own section.

use async_trait::async_trait;

use crate::application::command::{Command, CommandDef};
use crate::application::context::CommandContext;
use crate::domain::errors::CommandResult;
use crate::strings::help;

pub struct Help;

#[async_trait]
impl Command for Help {
    fn definition(&self) -> CommandDef {
        CommandDef::new("help", "List commands").alias("h")
    }

    async fn execute(&self, ctx: &CommandContext, _args: &str) -> CommandResult {
        let services = ctx.services();
        let prefix = &services.config.commands.prefix;
        let line = |def: &CommandDef| {
            help::command_line(prefix, &def.name, def.usage.as_deref(), &def.description)
        };

        let mut out = vec![help::HEADER.to_string()];
        let (admin, public): (Vec<_>, Vec<_>) =
            services.commands.iter().partition(|c| c.def.admin_only);
        out.extend(public.iter().map(|c| line(&c.def)));
        if !admin.is_empty() && ctx.is_admin() {
            out.push(help::ADMIN_SECTION.to_string());
            out.extend(admin.iter().map(|c| line(&c.def)));
        }

        ctx.reply(&out.join("\n")).await?;
        Ok(())
    }
}
