//! # Matrix Gateway Adapter
//!
//! Implements `ChatProvider` and `ShredConnection` for the Matrix protocol using `matrix_sdk`.
//! One [`MatrixShred`] wraps one logged-in client; [`MatrixService`] is the room-scoped handle
//! commands talk through. The `*_event` functions translate SDK events into [`InboundEvent`]s.

use anyhow::{Context, Result};
use async_trait::async_trait;
use matrix_sdk::Client;
use matrix_sdk::room::Room;
use matrix_sdk::ruma::events::AnySyncTimelineEvent;
use matrix_sdk::ruma::events::reaction::{OriginalSyncReactionEvent, ReactionEventContent};
use matrix_sdk::ruma::events::relation::Annotation;
use matrix_sdk::ruma::events::room::message::{
    MessageType, OriginalSyncRoomMessageEvent, RoomMessageEventContent,
};
use matrix_sdk::ruma::events::room::redaction::OriginalSyncRoomRedactionEvent;
use matrix_sdk::ruma::{OwnedEventId, OwnedRoomId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::config::ShredConfig;
use crate::domain::traits::{ChatProvider, ShredConnection};
use crate::domain::types::{EventPayload, InboundEvent, ShredId};

fn event_id(id: &str) -> Result<OwnedEventId, String> {
    OwnedEventId::try_from(id).map_err(|e| e.to_string())
}

#[derive(Clone)]
pub struct MatrixService {
    room: Room,
}

impl MatrixService {
    pub fn new(room: Room) -> Self {
        Self { room }
    }
}

#[async_trait]
impl ChatProvider for MatrixService {
    fn room_id(&self) -> String {
        self.room.room_id().as_str().to_string()
    }

    async fn send_message(&self, content: &str) -> Result<String, String> {
        tracing::info!("Bot sending message to {}: {}", self.room_id(), content);
        self.room
            .send(RoomMessageEventContent::text_markdown(content))
            .await
            .map(|resp| resp.event_id.to_string())
            .map_err(|e| e.to_string())
    }

    async fn send_notification(&self, content: &str) -> Result<(), String> {
        self.room
            .send(RoomMessageEventContent::notice_markdown(content))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn add_reaction(&self, message_id: &str, key: &str) -> Result<(), String> {
        let target = event_id(message_id)?;
        self.room
            .send(ReactionEventContent::new(Annotation::new(
                target,
                key.to_string(),
            )))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn message_exists(&self, message_id: &str) -> bool {
        let Ok(target) = event_id(message_id) else {
            return false;
        };
        match self.room.event(&target, None).await {
            Ok(event) => match event.raw().deserialize() {
                Ok(AnySyncTimelineEvent::MessageLike(ev)) => ev.original_content().is_some(),
                _ => true,
            },
            Err(e) if e
                .as_client_api_error()
                .is_some_and(|api| api.status_code.as_u16() == 404) =>
            {
                false
            }
            Err(e) => {
                // transient failures must not end a wait
                tracing::debug!(room = %self.room_id(), error = %e, "Liveness check failed");
                true
            }
        }
    }

    async fn typing(&self, active: bool) -> Result<(), String> {
        self.room
            .typing_notice(active)
            .await
            .map_err(|e| e.to_string())
    }
}

/// One logged-in bot identity.
pub struct MatrixShred {
    name: String,
    client: Client,
    connected: AtomicBool,
}

impl MatrixShred {
    pub async fn login(config: &ShredConfig) -> Result<Arc<Self>> {
        let client = Client::builder()
            .homeserver_url(&config.homeserver)
            .build()
            .await
            .with_context(|| format!("Failed to build client for shred '{}'", config.name))?;

        let mut login = client
            .matrix_auth()
            .login_username(&config.username, &config.password);
        if let Some(display_name) = &config.display_name {
            login = login.initial_device_display_name(display_name);
        }
        login
            .send()
            .await
            .with_context(|| format!("Login failed for shred '{}'", config.name))?;

        tracing::info!("Logged in as {} (shred '{}')", config.username, config.name);
        Ok(Arc::new(Self {
            name: config.name.clone(),
            client,
            connected: AtomicBool::new(true),
        }))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn joined_rooms(&self) -> Vec<String> {
        self.client
            .joined_rooms()
            .iter()
            .map(|room| room.room_id().to_string())
            .collect()
    }

    fn room(&self, room_id: &str) -> Option<Room> {
        let id = OwnedRoomId::try_from(room_id).ok()?;
        self.client.get_room(&id)
    }
}

#[async_trait]
impl ShredConnection for MatrixShred {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn chat(&self, room_id: &str) -> Option<Arc<dyn ChatProvider>> {
        self.room(room_id)
            .map(|room| Arc::new(MatrixService::new(room)) as Arc<dyn ChatProvider>)
    }

    async fn leave_room(&self, room_id: &str) -> Result<(), String> {
        let room = self
            .room(room_id)
            .ok_or_else(|| format!("room {room_id} unknown to shred '{}'", self.name))?;
        room.leave().await.map_err(|e| e.to_string())
    }
}

fn inbound(shred: ShredId, sender: &str, room: &Room, payload: EventPayload) -> InboundEvent {
    let room = room.room_id().to_string();
    InboundEvent {
        shred,
        actor: sender.to_string(),
        // Matrix has no sub-channels; the room is the channel.
        channel: room.clone(),
        room,
        payload,
    }
}

/// Text and notice messages; other message types are not command input.
pub fn message_event(
    shred: ShredId,
    ev: &OriginalSyncRoomMessageEvent,
    room: &Room,
) -> Option<InboundEvent> {
    let body = match &ev.content.msgtype {
        MessageType::Text(text) => text.body.clone(),
        MessageType::Notice(notice) => notice.body.clone(),
        _ => return None,
    };
    Some(inbound(
        shred,
        ev.sender.as_str(),
        room,
        EventPayload::Message {
            event_id: ev.event_id.to_string(),
            body,
        },
    ))
}

pub fn reaction_event(shred: ShredId, ev: &OriginalSyncReactionEvent, room: &Room) -> InboundEvent {
    let annotation = &ev.content.relates_to;
    inbound(
        shred,
        ev.sender.as_str(),
        room,
        EventPayload::Reaction {
            target: annotation.event_id.to_string(),
            key: annotation.key.clone(),
        },
    )
}

pub fn redaction_event(
    shred: ShredId,
    ev: &OriginalSyncRoomRedactionEvent,
    room: &Room,
) -> Option<InboundEvent> {
    let target = ev.content.redacts.clone().or_else(|| ev.redacts.clone())?;
    Some(inbound(
        shred,
        ev.sender.as_str(),
        room,
        EventPayload::Deletion {
            target: target.to_string(),
        },
    ))
}
