mod events;
mod input;
mod limits;
mod rooms;
mod serialized;
mod util;

use std::sync::Arc;

use bandstand_core::Config;
use dashmap::DashMap;

pub use events::*;
pub use input::*;
pub use limits::*;
pub use rooms::*;
pub use serialized::*;
pub use util::*;

/// The session layer: rooms, the people in them, and what they are
/// listening to.
pub struct Session {
    pub rooms: RoomManager,
}

/// Passed to rooms so they can reach shared state and emit events.
pub struct SessionContext {
    pub config: Config,
    pub events: EventSender,
    pub rooms: Arc<DashMap<RoomId, Arc<Room>>>,
}

impl Session {
    /// Creates the session layer, returning the receiving end of its event
    /// stream for the transport to drain.
    pub fn new(config: Config) -> (Self, EventReceiver) {
        let (events, receiver) = tokio::sync::mpsc::unbounded_channel();

        let context = SessionContext {
            config,
            events,
            rooms: Default::default(),
        };

        let session = Self {
            rooms: RoomManager::new(context),
        };

        (session, receiver)
    }
}

impl Clone for SessionContext {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            events: self.events.clone(),
            rooms: self.rooms.clone(),
        }
    }
}
