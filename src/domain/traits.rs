//! # Domain Traits
//!
//! Abstract interfaces for the gateway side of the bot.
//! Allows for pluggable implementations in the Infrastructure layer (Matrix, in-memory fakes for tests).

use async_trait::async_trait;
use std::sync::Arc;

/// Abstract interface for room-scoped actions performed through one shred.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send a message to the room, returning its event id
    async fn send_message(&self, content: &str) -> Result<String, String>;

    /// Send a notification (not tracked)
    async fn send_notification(&self, content: &str) -> Result<(), String>;

    /// React to a message. Fails when the identity may not react in this room.
    async fn add_reaction(&self, message_id: &str, key: &str) -> Result<(), String>;

    /// Whether the message still exists. Used as the liveness check while waiting on reactions.
    async fn message_exists(&self, message_id: &str) -> bool;

    /// Send a typing indicator
    async fn typing(&self, active: bool) -> Result<(), String>;

    /// Get the current room ID
    fn room_id(&self) -> String;
}

/// One bot identity's live connection.
#[async_trait]
pub trait ShredConnection: Send + Sync {
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Room-scoped chat handle, if this identity can see the room.
    fn chat(&self, room_id: &str) -> Option<Arc<dyn ChatProvider>>;

    /// Drop membership of a room.
    async fn leave_room(&self, room_id: &str) -> Result<(), String>;
}
