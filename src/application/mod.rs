//! # Application Layer
//!
//! The concurrency core of the bot: handoffs, the event waiter, the process, ratelimit and
//! shred registries, plus the router and reporting that tie them to commands.

pub mod command;
pub mod context;
pub mod handoff;
pub mod logging;
pub mod process;
pub mod ratelimit;
pub mod reporting;
pub mod router;
pub mod services;
pub mod shreds;
pub mod waiter;

#[cfg(test)]
pub mod testing;
