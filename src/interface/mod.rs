//! # Interface Layer
//!
//! User-facing command handlers invoked through the router.

pub mod commands;
