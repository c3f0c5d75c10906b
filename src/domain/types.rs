//! # Domain Types
//!
//! Identifiers and the inbound event model shared by every layer.
//! Events are produced by the gateway adapters and consumed by the router and the event waiter.

use std::fmt;

pub type ActorId = String;
pub type RoomId = String;
pub type ChannelId = String;
pub type EventId = String;

/// Process identifier. Allocated by the process registry from a wrapping counter.
pub type Pid = u32;

/// Index of a shred in registration order. Lower index wins room clashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShredId(pub usize);

impl fmt::Display for ShredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Classification used by the event waiter to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageReceived,
    ReactionAdded,
    MessageDeleted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Message { event_id: EventId, body: String },
    Reaction { target: EventId, key: String },
    Deletion { target: EventId },
}

/// One event delivered by a shred's connection.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub shred: ShredId,
    pub actor: ActorId,
    pub room: RoomId,
    pub channel: ChannelId,
    pub payload: EventPayload,
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Message { .. } => EventKind::MessageReceived,
            EventPayload::Reaction { .. } => EventKind::ReactionAdded,
            EventPayload::Deletion { .. } => EventKind::MessageDeleted,
        }
    }

    /// Message text, if this is a message event.
    pub fn body(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Message { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Message { event_id, .. } => Some(event_id),
            _ => None,
        }
    }

    /// `(target, key)` of a reaction event.
    pub fn reaction(&self) -> Option<(&str, &str)> {
        match &self.payload {
            EventPayload::Reaction { target, key } => Some((target, key)),
            _ => None,
        }
    }

    /// The message a deletion event removed.
    pub fn deleted_message(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Deletion { target } => Some(target),
            _ => None,
        }
    }
}

/// Where a command invocation came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub shred: ShredId,
    pub actor: ActorId,
    pub room: RoomId,
    pub channel: ChannelId,
}

impl From<&InboundEvent> for Origin {
    fn from(event: &InboundEvent) -> Self {
        Self {
            shred: event.shred,
            actor: event.actor.clone(),
            room: event.room.clone(),
            channel: event.channel.clone(),
        }
    }
}
