use tokio::sync::mpsc;

use crate::{NowPlaying, RoomId, SchedulerProjection, SnapshotProjection};

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Events emitted by rooms for transitions the transport did not initiate
/// directly, i.e. everything driven by timers or cascades. The transport
/// fans these out to the room's members.
#[derive(Debug)]
pub enum SessionEvent {
    /// A new track started playing.
    TrackStarted {
        room_id: RoomId,
        announcement: NowPlaying,
    },
    /// The room ran out of queued tracks.
    PlaybackIdle { room_id: RoomId },
    /// The current track was cut short, e.g. voted off or skipped by its
    /// presenter.
    TrackSkipped { room_id: RoomId, reason: String },
    /// A track was dequeued by the scheduler, changing queue contents.
    SchedulerUpdated {
        room_id: RoomId,
        state: SchedulerProjection,
    },
    /// Votes were cleared for a new track.
    VotesReset { room_id: RoomId },
    /// The periodic playback snapshot for an active room.
    Snapshot {
        room_id: RoomId,
        snapshot: SnapshotProjection,
    },
    /// The lobby list changed (a room was created or deleted).
    RoomListChanged,
}
