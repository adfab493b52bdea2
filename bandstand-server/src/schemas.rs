//! The gateway wire format.
//!
//! Field-level constraints are enforced during deserialization through the
//! `try_from` newtypes, so a handler never sees an out-of-range value.

use bandstand_session::{
    sanitize_string, ChatEntry, NowPlaying, RoomStateProjection, RoomSummary, SchedulerProjection,
    SnapshotProjection, UserProfile, VoteCounts, VoteKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_USERNAME_CHARS: usize = 24;
pub const MAX_ROOM_NAME_CHARS: usize = 50;
pub const MAX_THEME_CHARS: usize = 24;
pub const MAX_CHAT_CHARS: usize = 500;
pub const MAX_AVATAR_ID: u8 = 11;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Value must not be empty")]
    Empty,
    #[error("Avatar id must be at most {MAX_AVATAR_ID}")]
    BadAvatar,
    #[error("Not a recognizable video id or URL")]
    BadVideoId,
}

/// A display name, trimmed and bounded.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct Username(String);

impl TryFrom<String> for Username {
    type Error = SchemaError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let clean = sanitize_string(&raw, MAX_USERNAME_CHARS);

        if clean.is_empty() {
            return Err(SchemaError::Empty);
        }

        Ok(Self(clean))
    }
}

impl Username {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct RoomName(String);

impl TryFrom<String> for RoomName {
    type Error = SchemaError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let clean = sanitize_string(&raw, MAX_ROOM_NAME_CHARS);

        if clean.is_empty() {
            return Err(SchemaError::Empty);
        }

        Ok(Self(clean))
    }
}

impl RoomName {
    pub fn into_inner(self) -> String {
        self.0
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct ChatText(String);

impl TryFrom<String> for ChatText {
    type Error = SchemaError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let clean = sanitize_string(&raw, MAX_CHAT_CHARS);

        if clean.is_empty() {
            return Err(SchemaError::Empty);
        }

        Ok(Self(clean))
    }
}

impl ChatText {
    pub fn into_inner(self) -> String {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(try_from = "u8")]
pub struct AvatarId(u8);

impl TryFrom<u8> for AvatarId {
    type Error = SchemaError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        if raw > MAX_AVATAR_ID {
            return Err(SchemaError::BadAvatar);
        }

        Ok(Self(raw))
    }
}

impl AvatarId {
    pub fn value(self) -> u8 {
        self.0
    }
}

/// What a client can ask of the gateway.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One leg of the clock handshake. `t0` is the client's send time.
    ClockPing { t0: i64 },
    CreateRoom {
        name: RoomName,
        theme: String,
        username: Username,
        avatar_id: AvatarId,
    },
    JoinRoom {
        room_id: String,
        username: Username,
        avatar_id: AvatarId,
    },
    LeaveRoom,
    StepUp,
    StepDown,
    /// Queues a video by URL or bare id.
    QueueTrack { input: String },
    RemoveTrack { index: usize },
    /// The current presenter cutting their own track short.
    SkipTrack,
    Vote { kind: VoteKind },
    Chat { text: ChatText },
    /// A client reporting that the current track finished on its end.
    TrackEnded { video_id: String },
    /// The presenter supplying authoritative metadata for the current
    /// track, once per track.
    CorrectMetadata {
        video_id: String,
        title: Option<String>,
        duration: Option<f32>,
    },
}

/// What the gateway sends back.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The reply to a clock ping. `t1` is the server's receive time.
    ClockPong { t0: i64, t1: i64 },
    /// The full room state, sent on join and create.
    RoomState { state: RoomStateProjection },
    RoomList { rooms: Vec<RoomSummary> },
    UserJoined { user: UserProfile },
    UserLeft { user_id: String },
    SchedulerUpdate { state: SchedulerProjection },
    TrackStarted { now_playing: NowPlaying },
    PlaybackIdle,
    TrackSkipped { reason: String },
    VotesUpdate { votes: VoteCounts },
    VotesReset,
    /// The periodic playback position broadcast.
    Snapshot { sync: SnapshotProjection },
    Chat { entry: ChatEntry },
    /// Announcements such as queue notices and skips.
    Notice { text: String },
    MetadataCorrected {
        video_id: String,
        title: String,
        duration: f32,
    },
    Error { message: String },
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(raw: &str) -> Result<ClientMessage, serde_json::Error> {
        serde_json::from_str(raw)
    }

    #[test]
    fn test_username_is_sanitized() {
        let message = parse(
            r#"{"type": "join_room", "room_id": "abc", "username": "  Alice  ", "avatar_id": 3}"#,
        )
        .unwrap();

        match message {
            ClientMessage::JoinRoom { username, .. } => assert_eq!(username.as_str(), "Alice"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_fields() {
        // Whitespace-only username.
        assert!(parse(
            r#"{"type": "join_room", "room_id": "abc", "username": "   ", "avatar_id": 0}"#
        )
        .is_err());

        // Avatar out of range.
        assert!(parse(
            r#"{"type": "join_room", "room_id": "abc", "username": "Alice", "avatar_id": 12}"#
        )
        .is_err());

        // Unknown message types are refused outright.
        assert!(parse(r#"{"type": "reboot"}"#).is_err());
    }

    #[test]
    fn test_long_values_are_truncated() {
        let long = "x".repeat(600);
        let message =
            parse(&format!(r#"{{"type": "chat", "text": "{long}"}}"#)).unwrap();

        match message {
            ClientMessage::Chat { text } => {
                assert_eq!(text.into_inner().chars().count(), MAX_CHAT_CHARS)
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_server_messages_tag() {
        let encoded = serde_json::to_string(&ServerMessage::PlaybackIdle).unwrap();
        assert_eq!(encoded, r#"{"type":"playback_idle"}"#);
    }
}
