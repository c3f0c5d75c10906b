//! # Admin Commands
//!
//! `.ps` lists running processes, `.kill` interrupts them and `.keep` lets a waiting process wait
//! past its deadline.

use async_trait::async_trait;
use clap::Parser;
use clap::error::ErrorKind;

use crate::application::command::{Command, CommandDef};
use crate::application::context::CommandContext;
use crate::application::process::Process;
use crate::domain::errors::{CommandError, CommandResult};
use crate::domain::types::{Origin, Pid};
use crate::strings::messages;

#[derive(Parser, Debug, Default)]
#[command(name = "ps", about = "List running processes")]
struct PsArgs {
    /// Only processes in this room
    #[arg(short, long)]
    room: bool,
    /// Only processes started by you
    #[arg(short, long)]
    actor: bool,
    /// Only processes carrying a payload
    #[arg(short, long)]
    payload: bool,
    /// Include this ps invocation
    #[arg(long)]
    all: bool,
}

impl PsArgs {
    fn parse_args(args: &str) -> Result<Self, clap::Error> {
        Self::try_parse_from(std::iter::once("ps").chain(args.split_whitespace()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Flags {
    room: bool,
    actor: bool,
    payload: bool,
}

impl Flags {
    fn of(process: &Process, caller: &Origin) -> Self {
        Self {
            room: process.origin().room == caller.room,
            actor: process.origin().actor == caller.actor,
            payload: process.has_payload(),
        }
    }

    fn render(self) -> String {
        [(self.room, 'R'), (self.actor, 'A'), (self.payload, 'P')]
            .iter()
            .map(|&(set, c)| if set { c } else { '-' })
            .collect()
    }
}

fn row(process: &Process, flags: Flags) -> String {
    let age = chrono::Local::now()
        .signed_duration_since(process.started_at())
        .to_std()
        .unwrap_or_default();
    messages::ps_row(
        process.pid(),
        &flags.render(),
        process.phase().label(),
        &process.command().name,
        &process.origin().actor,
        &messages::format_duration(age),
    )
}

pub struct Ps;

#[async_trait]
impl Command for Ps {
    fn definition(&self) -> CommandDef {
        CommandDef::new("ps", "List running processes")
            .usage("[--room] [--actor] [--payload] [--all]")
            .admin_only()
    }

    async fn execute(&self, ctx: &CommandContext, args: &str) -> CommandResult {
        let args = match PsArgs::parse_args(args) {
            Ok(args) => args,
            Err(e) if e.kind() == ErrorKind::DisplayHelp => {
                ctx.notify(&format!("```\n{}\n```", e.render())).await?;
                return ctx.exit();
            }
            Err(e) => return Err(CommandError::failure_refunded(e.to_string())),
        };
        let caller = ctx.origin();
        let own = ctx.process().pid();

        let rows: Vec<String> = ctx
            .services()
            .processes
            .list()
            .iter()
            .filter(|p| args.all || p.pid() != own)
            .filter_map(|p| {
                let flags = Flags::of(p, caller);
                let keep = (!args.room || flags.room)
                    && (!args.actor || flags.actor)
                    && (!args.payload || flags.payload);
                keep.then(|| row(p, flags))
            })
            .collect();

        if rows.is_empty() {
            ctx.reply(messages::NO_PROCESSES).await?;
        } else {
            ctx.reply(&format!("```\n{}\n{}\n```", messages::PS_HEADER, rows.join("\n")))
                .await?;
        }
        Ok(())
    }
}

fn parse_pids(args: &str, usage: &str) -> Result<Vec<Pid>, CommandError> {
    let pids = args
        .split_whitespace()
        .map(|arg| {
            arg.parse::<Pid>()
                .map_err(|_| CommandError::failure_refunded(messages::invalid_pid(arg)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if pids.is_empty() {
        return Err(CommandError::failure_refunded(usage));
    }
    Ok(pids)
}

pub struct Kill;

#[async_trait]
impl Command for Kill {
    fn definition(&self) -> CommandDef {
        CommandDef::new("kill", "Interrupt processes")
            .usage("<pid>...")
            .admin_only()
    }

    async fn execute(&self, ctx: &CommandContext, args: &str) -> CommandResult {
        let pids = parse_pids(args, messages::KILL_USAGE)?;
        if pids.len() > 1 && !ctx.confirm(&messages::kill_confirm(pids.len())).await? {
            return ctx.cancel();
        }

        let processes = &ctx.services().processes;
        let (killed, missing): (Vec<Pid>, Vec<Pid>) =
            pids.into_iter().partition(|&pid| processes.interrupt(pid));
        tracing::info!(actor = %ctx.origin().actor, ?killed, ?missing, "Kill requested");

        ctx.reply(&messages::kill_result(&killed, &missing)).await?;
        Ok(())
    }
}

pub struct Keep;

#[async_trait]
impl Command for Keep {
    fn definition(&self) -> CommandDef {
        CommandDef::new("keep", "Let waiting processes wait without a deadline")
            .usage("<pid>...")
            .admin_only()
    }

    async fn execute(&self, ctx: &CommandContext, args: &str) -> CommandResult {
        let pids = parse_pids(args, messages::KEEP_USAGE)?;
        let processes = &ctx.services().processes;
        let (kept, idle): (Vec<Pid>, Vec<Pid>) = pids
            .into_iter()
            .partition(|&pid| processes.get(pid).is_some_and(|p| p.lift_deadlines() > 0));
        tracing::info!(actor = %ctx.origin().actor, ?kept, ?idle, "Deadlines lifted");

        ctx.reply(&messages::keep_result(&kept, &idle)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::command::CommandSet;
    use crate::application::process::ProcessPhase;
    use crate::application::testing::{ADMIN, TestBed, reaction, until};
    use crate::application::waiter::WaitRequest;
    use crate::domain::types::EventKind;
    use crate::interface::commands::builtin;
    use std::sync::Arc;
    use std::time::Duration;

    /// Sets a payload and then waits for `release` forever.
    struct Hold;

    #[async_trait]
    impl Command for Hold {
        fn definition(&self) -> CommandDef {
            CommandDef::new("hold", "wait")
        }

        async fn execute(&self, ctx: &CommandContext, _args: &str) -> CommandResult {
            ctx.set_payload(42u32);
            ctx.wait_for(WaitRequest::new(EventKind::MessageReceived, |e| {
                e.body() == Some("release")
            }))
            .await?;
            Ok(())
        }
    }

    /// Asks for a name with the configured deadline.
    struct AskName;

    #[async_trait]
    impl Command for AskName {
        fn definition(&self) -> CommandDef {
            CommandDef::new("askname", "ask")
        }

        async fn execute(&self, ctx: &CommandContext, _args: &str) -> CommandResult {
            let name = ctx.ask("name?").await?;
            ctx.reply(&format!("hi {name}")).await?;
            Ok(())
        }
    }

    fn bed() -> TestBed {
        let mut commands: CommandSet = builtin();
        commands.register(Arc::new(Hold));
        commands.register(Arc::new(AskName));
        TestBed::new(commands)
    }

    async fn hold(bed: &TestBed) -> Arc<Process> {
        let process = bed.launch("@alice:x", ".hold");
        let target = process.clone();
        until(|| target.has_payload() && target.phase() == ProcessPhase::Waiting).await;
        process
    }

    #[test]
    fn test_ps_args() {
        let args = PsArgs::parse_args("-r --payload").unwrap();
        assert!(args.room && args.payload && !args.actor && !args.all);
        assert!(PsArgs::parse_args("--bogus").is_err());
        assert_eq!(
            PsArgs::parse_args("--help").unwrap_err().kind(),
            ErrorKind::DisplayHelp
        );
    }

    #[test]
    fn test_parse_pids() {
        assert_eq!(parse_pids(" 3 14 ", messages::KILL_USAGE).unwrap(), vec![3, 14]);
        assert!(matches!(
            parse_pids("3 x", messages::KILL_USAGE),
            Err(CommandError::Failure { message, counts_against_ratelimit: false }) if message == messages::invalid_pid("x")
        ));
        assert!(matches!(
            parse_pids("", messages::KEEP_USAGE),
            Err(CommandError::Failure { message, .. }) if message == messages::KEEP_USAGE
        ));
    }

    #[tokio::test]
    async fn test_ps_help_is_shown_without_outcome_notice() {
        let bed = bed();
        let chat = bed.chat();
        bed.launch(ADMIN, ".ps --help").finished().await;
        until(|| !chat.sent().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sent = chat.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("--payload"));
    }

    #[tokio::test]
    async fn test_ps_flags_and_filters() {
        let bed = bed();
        let chat = bed.chat();
        let held = hold(&bed).await;

        bed.launch(ADMIN, ".ps").finished().await;
        let listing = chat.last_sent().unwrap();
        assert!(listing.contains(&format!("{:>5} R-P waiting  hold", held.pid())));
        assert!(!listing.contains(" ps "));

        bed.launch(ADMIN, ".ps --actor").finished().await;
        assert_eq!(chat.last_sent().as_deref(), Some(messages::NO_PROCESSES));

        bed.launch(ADMIN, ".ps --actor --all").finished().await;
        let own = chat.last_sent().unwrap();
        assert!(own.contains("RA- runnable ps"));
        assert!(!own.contains("hold"));

        assert_eq!(running_pids(&bed), vec![held.pid()]);
    }

    fn running_pids(bed: &TestBed) -> Vec<Pid> {
        bed.services().processes.list().iter().map(|p| p.pid()).collect()
    }

    #[tokio::test]
    async fn test_kill_single_and_confirmed_batch() {
        let bed = bed();
        let chat = bed.chat();
        let first = hold(&bed).await;
        let second = hold(&bed).await;

        bed.launch(ADMIN, &format!(".kill {}", first.pid())).finished().await;
        first.finished().await;
        until(|| chat.sent().contains(&format!("Killed: {}", first.pid()))).await;

        let batch = bed.launch(ADMIN, &format!(".kill {} 999", second.pid()));
        until(|| chat.reactions.lock().unwrap().len() == 2).await;
        let prompt = chat.reactions.lock().unwrap()[0].0.clone();
        assert!(chat.sent().contains(&messages::kill_confirm(2)));
        bed.router
            .handle_event(reaction(ADMIN, &prompt, messages::CONFIRM_YES));

        batch.finished().await;
        second.finished().await;
        assert!(
            chat.sent()
                .contains(&format!("Killed: {}\nNot found: 999", second.pid()))
        );
        assert!(bed.services().processes.is_empty());
    }

    #[tokio::test]
    async fn test_kill_batch_declined() {
        let bed = bed();
        let chat = bed.chat();
        let held = hold(&bed).await;

        let batch = bed.launch(ADMIN, &format!(".kill {} 7", held.pid()));
        until(|| chat.reactions.lock().unwrap().len() == 2).await;
        let prompt = chat.reactions.lock().unwrap()[0].0.clone();
        bed.router
            .handle_event(reaction(ADMIN, &prompt, messages::CONFIRM_NO));

        batch.finished().await;
        until(|| chat.last_sent().as_deref() == Some(messages::COMMAND_CANCELLED)).await;
        assert!(bed.services().processes.get(held.pid()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_lifts_deadline_of_waiting_process() {
        let bed = bed();
        let chat = bed.chat();
        let asking = bed.launch("@alice:x", ".askname");
        let target = asking.clone();
        until(|| target.phase() == ProcessPhase::Waiting).await;

        bed.launch(ADMIN, &format!(".keep {} 99", asking.pid()))
            .finished()
            .await;
        assert_eq!(
            chat.last_sent(),
            Some(messages::keep_result(&[asking.pid()], &[99]))
        );

        // well past the ask deadline
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(bed.services().processes.get(asking.pid()).is_some());

        bed.send("@alice:x", "Ada");
        asking.finished().await;
        assert_eq!(chat.last_sent().as_deref(), Some("hi Ada"));
    }

    #[tokio::test]
    async fn test_kill_rejects_bad_pid() {
        let bed = bed();
        let chat = bed.chat();
        bed.launch(ADMIN, ".kill nine").finished().await;
        until(|| chat.last_sent() == Some(messages::invalid_pid("nine"))).await;
    }
}
