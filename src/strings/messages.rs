//! # Messages
//!
//! Contains constant strings and format functions for user-facing messages.
//! Includes rejection notices, process outcomes and admin command output.

use std::time::Duration;

pub const AUTH_DENIED: &str = "🚫 **Authorization Denied**.";
pub const UNKNOWN_COMMAND: &str = "❓ Unknown command.";

// Process outcomes
pub const NO_LONGER_WAITING: &str = "⌛ No longer waiting for a response.";
pub const WATCHED_GONE: &str = "🗑️ The message I was waiting on was deleted.";
pub const COMMAND_KILLED: &str = "🛑 Command was killed.";
pub const COMMAND_CANCELLED: &str = "❌ Cancelled.";
pub const INTERNAL_FAULT: &str = "💥 Something went wrong running that command. The operators have been notified.";

// Confirmation prompts
pub const CONFIRM_YES: &str = "✅";
pub const CONFIRM_NO: &str = "❌";
pub const CONFIRM_TEXT_FALLBACK: &str = "Reply `yes` or `no`.";

pub fn ratelimited(remaining: Duration) -> String {
    format!("⏳ Slow down! Try again in {}.", format_duration(remaining))
}

pub fn operator_report(pid: u32, command: &str, actor: &str, room: &str, err: &str) -> String {
    format!("**Process {pid} failed** (`{command}` by {actor} in {room})\n```\n{err}\n```")
}

pub fn command_usage(name: &str, usage: &str) -> String {
    format!("Usage: `{name} {usage}`")
}

// Admin
pub const NO_PROCESSES: &str = "No processes running.";
pub const KILL_USAGE: &str = "Usage: `kill <pid>...`";
pub const KEEP_USAGE: &str = "Usage: `keep <pid>...`";

pub fn kill_confirm(count: usize) -> String {
    format!("Kill {count} processes?")
}

pub fn kill_result(killed: &[u32], missing: &[u32]) -> String {
    pid_groups(&[("Killed", killed), ("Not found", missing)])
}

pub fn keep_result(kept: &[u32], idle: &[u32]) -> String {
    pid_groups(&[("Waiting without deadline", kept), ("Not waiting", idle)])
}

fn pid_groups(groups: &[(&str, &[u32])]) -> String {
    groups
        .iter()
        .filter(|(_, pids)| !pids.is_empty())
        .map(|(label, pids)| format!("{label}: {}", join_pids(pids)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn invalid_pid(arg: &str) -> String {
    format!("`{arg}` is not a process id.")
}

pub fn clash_summary(room: &str, keeper: &str, left: &[String], failed: &[String]) -> String {
    let mut line = format!("{room}: kept by {keeper}");
    if !left.is_empty() {
        line.push_str(&format!(", left by {}", left.join(", ")));
    }
    if !failed.is_empty() {
        line.push_str(&format!(", leave failed for {}", failed.join(", ")));
    }
    line
}

pub const NO_CLASHES: &str = "No room clashes.";
pub const NO_SHREDS: &str = "No shreds registered.";

pub fn ps_row(pid: u32, flags: &str, phase: &str, command: &str, actor: &str, age: &str) -> String {
    format!("{pid:>5} {flags} {phase:<8} {command:<10} {actor} {age}")
}

pub const PS_HEADER: &str = "  PID RAP PHASE    COMMAND    ACTOR AGE";

pub fn shred_line(id: &str, name: &str, connected: bool, rooms: usize) -> String {
    let state = if connected { "🟢 online" } else { "🔴 offline" };
    format!("{id} {name}: {state}, {rooms} rooms")
}

pub fn contested_line(count: usize) -> String {
    format!("⚠️ {count} contested rooms. Run `shreds resolve`.")
}

fn join_pids(pids: &[u32]) -> String {
    pids.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
}

/// Compact `1h 2m 3s` rendering, rounding sub-second remainders up.
pub fn format_duration(d: Duration) -> String {
    let mut secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs += 1;
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m {s}s"),
        _ => format!("{h}h {m}m {s}s"),
    }
}
