//! In-memory gateway fakes for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::application::command::CommandSet;
use crate::application::process::Process;
use crate::application::router::{CommandRouter, Routed};
use crate::application::services::Services;
use crate::domain::config::AppConfig;
use crate::domain::traits::{ChatProvider, ShredConnection};
use crate::domain::types::{EventPayload, InboundEvent, ShredId};

#[derive(Default)]
pub struct FakeChat {
    pub room: String,
    pub sent: Mutex<Vec<String>>,
    pub reactions: Mutex<Vec<(String, String)>>,
    pub deleted: Mutex<HashSet<String>>,
    pub reactions_forbidden: AtomicBool,
    pub typing: Mutex<Vec<bool>>,
    next_id: AtomicU64,
}

impl FakeChat {
    pub fn new(room: &str) -> Arc<Self> {
        Arc::new(Self {
            room: room.to_string(),
            ..Self::default()
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_sent(&self) -> Option<String> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ChatProvider for FakeChat {
    async fn send_message(&self, content: &str) -> Result<String, String> {
        self.sent.lock().unwrap().push(content.to_string());
        Ok(format!("$msg{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn send_notification(&self, content: &str) -> Result<(), String> {
        self.send_message(content).await.map(|_| ())
    }

    async fn add_reaction(&self, message_id: &str, key: &str) -> Result<(), String> {
        if self.reactions_forbidden.load(Ordering::SeqCst) {
            return Err("M_FORBIDDEN".to_string());
        }
        self.reactions
            .lock()
            .unwrap()
            .push((message_id.to_string(), key.to_string()));
        Ok(())
    }

    async fn message_exists(&self, message_id: &str) -> bool {
        !self.deleted.lock().unwrap().contains(message_id)
    }

    async fn typing(&self, active: bool) -> Result<(), String> {
        self.typing.lock().unwrap().push(active);
        Ok(())
    }

    fn room_id(&self) -> String {
        self.room.clone()
    }
}

#[derive(Default)]
pub struct FakeShred {
    pub name: String,
    pub connected: AtomicBool,
    pub chats: Mutex<HashMap<String, Arc<FakeChat>>>,
    pub left: Mutex<Vec<String>>,
    pub fail_leave: AtomicBool,
}

impl FakeShred {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            connected: AtomicBool::new(true),
            ..Self::default()
        })
    }

    /// Chat handle for `room`, created on first use.
    pub fn chat_for(&self, room: &str) -> Arc<FakeChat> {
        self.chats
            .lock()
            .unwrap()
            .entry(room.to_string())
            .or_insert_with(|| FakeChat::new(room))
            .clone()
    }

    pub fn left(&self) -> Vec<String> {
        self.left.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShredConnection for FakeShred {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn chat(&self, room_id: &str) -> Option<Arc<dyn ChatProvider>> {
        Some(self.chat_for(room_id) as Arc<dyn ChatProvider>)
    }

    async fn leave_room(&self, room_id: &str) -> Result<(), String> {
        if self.fail_leave.load(Ordering::SeqCst) {
            return Err("leave rejected".to_string());
        }
        self.left.lock().unwrap().push(room_id.to_string());
        Ok(())
    }
}

pub const ROOM: &str = "!room:x";
pub const OPS: &str = "!ops:x";
pub const ADMIN: &str = "@admin:x";

/// A router over one fake shred that sees [`ROOM`] and the [`OPS`] report room.
pub struct TestBed {
    pub router: Arc<CommandRouter>,
    pub shred: Arc<FakeShred>,
}

impl TestBed {
    pub fn new(commands: CommandSet) -> Self {
        let config = AppConfig::parse(&format!(
            "shreds:\n  - {{ name: a, homeserver: h, username: u, password: p }}\n\
             system:\n  admin: ['{ADMIN}']\n  report_room: '{OPS}'\n"
        ))
        .unwrap();
        let services = Services::new(config, commands);
        let shred = FakeShred::new("a");
        let id = services.shreds.register(shred.clone());
        services
            .shreds
            .report_rooms(id, vec![ROOM.to_string(), OPS.to_string()]);
        Self {
            router: Arc::new(CommandRouter::new(services)),
            shred,
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        self.router.services()
    }

    pub fn chat(&self) -> Arc<FakeChat> {
        self.shred.chat_for(ROOM)
    }

    pub fn send(&self, actor: &str, body: &str) -> Routed {
        self.router.handle_event(message(ShredId(0), actor, body))
    }

    pub fn launch(&self, actor: &str, body: &str) -> Arc<Process> {
        match self.send(actor, body) {
            Routed::Launched(process) => process,
            other => panic!("expected launch, got {other:?}"),
        }
    }
}

pub fn message(shred: ShredId, actor: &str, body: &str) -> InboundEvent {
    InboundEvent {
        shred,
        actor: actor.to_string(),
        room: ROOM.to_string(),
        channel: ROOM.to_string(),
        payload: EventPayload::Message {
            event_id: format!("$in-{body}"),
            body: body.to_string(),
        },
    }
}

pub fn reaction(actor: &str, target: &str, key: &str) -> InboundEvent {
    InboundEvent {
        shred: ShredId(0),
        actor: actor.to_string(),
        room: ROOM.to_string(),
        channel: ROOM.to_string(),
        payload: EventPayload::Reaction {
            target: target.to_string(),
            key: key.to_string(),
        },
    }
}

pub fn deletion(actor: &str, target: &str) -> InboundEvent {
    InboundEvent {
        shred: ShredId(0),
        actor: actor.to_string(),
        room: ROOM.to_string(),
        channel: ROOM.to_string(),
        payload: EventPayload::Deletion {
            target: target.to_string(),
        },
    }
}

/// Poll `cond` on a short timer until it holds.
pub async fn until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition never became true");
}
