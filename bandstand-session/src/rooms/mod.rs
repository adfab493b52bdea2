mod room;
mod votes;

use std::sync::Arc;

use bandstand_core::{ConnectionId, SchedulerError};
use log::info;
use thiserror::Error;

pub use room::{JoinOutcome, Role, Room, RoomId, User};
pub use votes::{VoteKind, VoteSet};

use crate::{random_string, SessionContext, SessionEvent};

#[derive(Debug, Error, PartialEq)]
pub enum RoomError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("User is not in the room")]
    UnknownUser,
    #[error("Room does not exist")]
    UnknownRoom,
    #[error("The server is at its room limit")]
    RoomsFull,
}

/// Owns every live room and the lobby-level lifecycle around them.
pub struct RoomManager {
    context: SessionContext,
}

impl RoomManager {
    pub fn new(context: SessionContext) -> Self {
        Self { context }
    }

    pub fn create_room(
        &self,
        created_by: ConnectionId,
        name: String,
        theme: String,
    ) -> Result<Arc<Room>, RoomError> {
        if self.context.rooms.len() >= self.context.config.max_rooms {
            return Err(RoomError::RoomsFull);
        }

        let id = random_string(8);
        let room = Room::new(&self.context, id.clone(), name, theme, created_by);

        info!("Room {} created: {}", id, room.name());

        self.context.rooms.insert(id, room.clone());
        self.context.events.send(SessionEvent::RoomListChanged).ok();

        Ok(room)
    }

    pub fn room_by_id(&self, id: &str) -> Option<Arc<Room>> {
        self.context.rooms.get(id).map(|r| r.clone())
    }

    /// The room a connection currently belongs to, if any. A connection can
    /// only ever be in one room.
    pub fn room_of(&self, handle: ConnectionId) -> Option<Arc<Room>> {
        self.context
            .rooms
            .iter()
            .find(|r| r.contains(handle))
            .map(|r| r.clone())
    }

    pub fn delete_room(&self, id: &str) -> Option<Arc<Room>> {
        let (_, room) = self.context.rooms.remove(id)?;

        info!("Room {} deleted", id);
        self.context.events.send(SessionEvent::RoomListChanged).ok();

        Some(room)
    }

    pub fn list(&self) -> Vec<crate::RoomSummary> {
        let mut summaries: Vec<_> = self.context.rooms.iter().map(|r| r.summary()).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Per-room maintenance plus deletion of rooms whose empty-room grace
    /// has run out.
    pub fn tick(&self) {
        let mut expired = vec![];

        for room in self.context.rooms.iter() {
            room.tick();

            if room.ready_for_deletion() {
                expired.push(room.id().clone());
            }
        }

        for id in expired {
            self.delete_room(&id);
        }
    }
}
