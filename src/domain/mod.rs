//! # Domain Layer
//!
//! Core definitions, types, and traits shared by the bot.
//! Independent of the gateway SDK, serving as the contract for other layers.

pub mod config;
pub mod errors;
pub mod traits;
pub mod types;
