//! # Infrastructure Layer
//!
//! Handles interactions with external systems.
//! Implements the gateway traits defined in the Domain layer (`ChatProvider`, `ShredConnection`).

pub mod matrix;
