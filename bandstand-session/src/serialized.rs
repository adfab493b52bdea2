//! Outward-facing projections of room state.
//!
//! Everything in this module is safe to send to clients: connection handles
//! are always substituted with public identities before a value is built.

use bandstand_core::{PlaybackSnapshot, Track};
use serde::Serialize;

use crate::Role;

/// A participant as other clients see them.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    /// The public identity, never the connection handle.
    pub id: String,
    pub username: String,
    pub avatar_id: u8,
    pub role: Role,
    pub reputation: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackProjection {
    pub video_id: String,
    pub title: String,
    pub thumbnail: String,
    pub duration: f32,
}

impl From<&Track> for TrackProjection {
    fn from(track: &Track) -> Self {
        Self {
            video_id: track.video_id.clone(),
            title: track.title.clone(),
            thumbnail: track.thumbnail.clone(),
            duration: track.duration,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenterProjection {
    pub user_id: String,
    pub username: String,
}

/// The playback snapshot as broadcast to clients.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotProjection {
    pub track_id: Option<String>,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: f32,
    pub presenter: Option<PresenterProjection>,
    pub playing: bool,
    pub elapsed: f32,
    /// Server clock at snapshot time, unix milliseconds. Clients combine
    /// this with their adopted clock offset to re-derive position.
    pub server_time: i64,
}

impl SnapshotProjection {
    /// Builds the projection, substituting the presenter's public identity
    /// via `resolve`.
    pub fn from_snapshot<F>(snapshot: PlaybackSnapshot, resolve: F) -> Self
    where
        F: Fn(bandstand_core::ConnectionId) -> Option<String>,
    {
        Self {
            track_id: snapshot.track_id,
            title: snapshot.title,
            thumbnail: snapshot.thumbnail,
            duration: snapshot.duration,
            presenter: snapshot.presenter.map(|p| PresenterProjection {
                user_id: resolve(p.handle).unwrap_or_default(),
                username: p.name,
            }),
            playing: snapshot.playing,
            elapsed: snapshot.elapsed,
            server_time: snapshot.server_time,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotProjection {
    pub user_id: String,
    pub username: String,
    pub avatar_id: u8,
    pub queue: Vec<TrackProjection>,
    pub reputation: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerProjection {
    pub slots: Vec<SlotProjection>,
    pub current_index: Option<usize>,
    pub max_slots: usize,
}

/// The announcement sent when a new track starts.
#[derive(Debug, Clone, Serialize)]
pub struct NowPlaying {
    pub track: TrackProjection,
    pub presenter: PresenterProjection,
    pub sync: SnapshotProjection,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct VoteCounts {
    pub approve: usize,
    pub disapprove: usize,
}

/// The result of a cast vote, including the skip recommendation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VoteTally {
    pub approve: usize,
    pub disapprove: usize,
    pub should_skip: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatEntry {
    pub user_id: String,
    pub username: String,
    pub avatar_id: u8,
    pub text: String,
    pub timestamp: i64,
}

/// A lobby-list entry.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub theme: String,
    pub user_count: usize,
    pub presenter_count: usize,
    pub current_track: Option<String>,
    pub current_presenter: Option<String>,
}

/// Everything a freshly joined client needs to render the room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomStateProjection {
    pub id: String,
    pub name: String,
    pub theme: String,
    /// The receiving client's own public identity.
    pub my_id: Option<String>,
    pub users: Vec<UserProfile>,
    pub scheduler: SchedulerProjection,
    pub sync: SnapshotProjection,
    pub votes: VoteCounts,
    pub chat: Vec<ChatEntry>,
}
