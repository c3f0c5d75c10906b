//! # Shred Registry
//!
//! Routes rooms to the bot identity ("shred") that owns them.
//!
//! Each shred reports which rooms it can see. A room seen by one shred is owned by it; a room seen
//! by several is contested until [`ShredRegistry::resolve_clashes`] makes every shred but the
//! keeper leave. The keeper is always the contender with the lowest [`ShredId`], so routing picks
//! the same identity before and after resolution and a command never speaks through two.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::traits::{ChatProvider, ShredConnection};
use crate::domain::types::{RoomId, ShredId};

pub struct Shred {
    id: ShredId,
    connection: Arc<dyn ShredConnection>,
}

impl Shred {
    pub fn id(&self) -> ShredId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.connection.name()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn chat(&self, room: &str) -> Option<Arc<dyn ChatProvider>> {
        self.connection.chat(room)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    Unassigned,
    Owned(ShredId),
    Contested(Vec<ShredId>),
}

/// What one clash resolution did for one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClashResolution {
    pub room: RoomId,
    pub keeper: ShredId,
    pub left: Vec<ShredId>,
    pub failed: Vec<(ShredId, String)>,
}

#[derive(Default)]
struct Fleet {
    shreds: Vec<Arc<Shred>>,
    visibility: HashMap<RoomId, BTreeSet<ShredId>>,
}

impl Fleet {
    fn add(&mut self, shred: ShredId, room: &str) -> bool {
        let seen = self.visibility.entry(room.to_string()).or_default();
        seen.insert(shred);
        seen.len() > 1
    }

    fn remove(&mut self, shred: ShredId, room: &str) {
        if let Some(seen) = self.visibility.get_mut(room) {
            seen.remove(&shred);
            if seen.is_empty() {
                self.visibility.remove(room);
            }
        }
    }

    fn drop_shred(&mut self, shred: ShredId) {
        self.visibility.retain(|_, seen| {
            seen.remove(&shred);
            !seen.is_empty()
        });
    }
}

#[derive(Default)]
pub struct ShredRegistry {
    fleet: RwLock<Fleet>,
    resolving: tokio::sync::Mutex<()>,
}

impl ShredRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Fleet> {
        self.fleet.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Fleet> {
        self.fleet.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, connection: Arc<dyn ShredConnection>) -> ShredId {
        let mut fleet = self.write();
        let id = ShredId(fleet.shreds.len());
        tracing::info!(shred = %id, name = connection.name(), "Shred registered");
        fleet.shreds.push(Arc::new(Shred { id, connection }));
        id
    }

    pub fn shred(&self, id: ShredId) -> Option<Arc<Shred>> {
        self.read().shreds.get(id.0).cloned()
    }

    pub fn shreds(&self) -> Vec<Arc<Shred>> {
        self.read().shreds.clone()
    }

    /// Replace a shred's visible room set. Returns the rooms now contested.
    pub fn report_rooms(&self, shred: ShredId, rooms: impl IntoIterator<Item = RoomId>) -> Vec<RoomId> {
        let mut fleet = self.write();
        fleet.drop_shred(shred);
        let mut contested: Vec<RoomId> = rooms
            .into_iter()
            .filter(|room| fleet.add(shred, room))
            .collect();
        contested.sort();
        contested.dedup();
        tracing::info!(
            shred = %shred,
            rooms = fleet.visibility.values().filter(|s| s.contains(&shred)).count(),
            contested = contested.len(),
            "Shred reported rooms"
        );
        contested
    }

    /// Returns `true` when the join created a clash.
    pub fn room_joined(&self, shred: ShredId, room: &str) -> bool {
        let clash = self.write().add(shred, room);
        if clash {
            tracing::warn!(shred = %shred, room, "Room clash detected");
        }
        clash
    }

    pub fn room_left(&self, shred: ShredId, room: &str) {
        self.write().remove(shred, room);
    }

    /// Forget everything a shred could see. Its rooms fall back to other shreds or become unassigned.
    pub fn shred_disconnected(&self, shred: ShredId) {
        self.write().drop_shred(shred);
        tracing::warn!(shred = %shred, "Shred disconnected; rooms released");
    }

    pub fn ownership(&self, room: &str) -> Ownership {
        let fleet = self.read();
        let Some(seen) = fleet.visibility.get(room) else {
            return Ownership::Unassigned;
        };
        match seen.first() {
            None => Ownership::Unassigned,
            Some(&only) if seen.len() == 1 => Ownership::Owned(only),
            Some(_) => Ownership::Contested(seen.iter().copied().collect()),
        }
    }

    /// The shred that acts for `room`. Contested rooms route to their future keeper.
    pub fn owner_of(&self, room: &str) -> Option<Arc<Shred>> {
        let fleet = self.read();
        let keeper = fleet.visibility.get(room)?.first()?;
        fleet.shreds.get(keeper.0).cloned()
    }

    /// Which shred a command running in `room` must use for room-scoped actions.
    pub fn current_shred_for(&self, room: &str) -> Option<Arc<Shred>> {
        self.owner_of(room)
    }

    pub fn is_owner(&self, shred: ShredId, room: &str) -> bool {
        self.owner_of(room).is_some_and(|s| s.id == shred)
    }

    pub fn rooms_of(&self, shred: ShredId) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self
            .read()
            .visibility
            .iter()
            .filter(|(_, seen)| seen.contains(&shred))
            .map(|(room, _)| room.clone())
            .collect();
        rooms.sort();
        rooms
    }

    /// Rooms seen by more than one shred, with their contenders in keeper order.
    pub fn contested_rooms(&self) -> Vec<(RoomId, Vec<ShredId>)> {
        let mut contested: Vec<(RoomId, Vec<ShredId>)> = self
            .read()
            .visibility
            .iter()
            .filter(|(_, seen)| seen.len() > 1)
            .map(|(room, seen)| (room.clone(), seen.iter().copied().collect()))
            .collect();
        contested.sort();
        contested
    }

    /// Make every contested room converge on its keeper.
    ///
    /// Runs are serialized. A failed leave keeps the membership, so the next run retries it.
    /// Running again on a resolved fleet does nothing.
    pub async fn resolve_clashes(&self) -> Vec<ClashResolution> {
        let _running = self.resolving.lock().await;
        let plan = self.contested_rooms();
        let mut resolutions = Vec::with_capacity(plan.len());

        for (room, contenders) in plan {
            let Some((&keeper, losers)) = contenders.split_first() else {
                continue;
            };
            let mut resolution = ClashResolution {
                room: room.clone(),
                keeper,
                left: Vec::new(),
                failed: Vec::new(),
            };
            for &loser in losers {
                let Some(shred) = self.shred(loser) else {
                    continue;
                };
                match shred.connection.leave_room(&room).await {
                    Ok(()) => {
                        self.room_left(loser, &room);
                        resolution.left.push(loser);
                        tracing::info!(room = %room, keeper = %keeper, left = %loser, "Clash resolved");
                    }
                    Err(e) => {
                        tracing::warn!(room = %room, shred = %loser, error = %e, "Failed to leave contested room");
                        resolution.failed.push((loser, e));
                    }
                }
            }
            resolutions.push(resolution);
        }
        resolutions
    }
}
