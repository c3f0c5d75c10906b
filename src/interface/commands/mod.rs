//! # Command Handlers
//!
//! Built-in commands. Each handler implements [`Command`](crate::application::command::Command)
//! and is listed in [`builtin`].

pub mod admin;
pub mod help;
pub mod shreds;

use crate::application::command::CommandSet;

pub fn builtin() -> CommandSet {
    CommandSet::new()
        .with(help::Help)
        .with(admin::Ps)
        .with(admin::Kill)
        .with(admin::Keep)
        .with(shreds::Shreds)
}
