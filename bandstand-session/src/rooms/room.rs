use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Instant;

use bandstand_core::{
    now_millis, ConnectionId, DjQueue, EndedTrack, SyncEngine, Track,
};
use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    random_string, ChatEntry, NowPlaying, PresenterProjection, RoomError,
    SchedulerProjection, SessionContext, SessionEvent, SlotProjection, SnapshotProjection,
    RoomStateProjection, RoomSummary, UserProfile, VoteKind, VoteSet, VoteTally,
};

pub type RoomId = String;

/// One isolated listening session: roster, scheduler, playback, and votes.
///
/// The room is the identity boundary. Internally everything is keyed by
/// connection handle; no outward projection ever contains one.
pub struct Room {
    id: RoomId,
    name: String,
    theme: String,
    created_at: i64,
    created_by: ConnectionId,
    context: SessionContext,

    users: Mutex<HashMap<ConnectionId, User>>,
    queue: Mutex<DjQueue>,
    engine: Arc<SyncEngine>,
    votes: Mutex<VoteSet>,
    chat: Mutex<VecDeque<ChatEntry>>,
    /// When the room last became empty, for grace-period deletion.
    emptied_at: Mutex<Option<Instant>>,
}

/// A participant in a room.
#[derive(Debug, Clone)]
pub struct User {
    pub handle: ConnectionId,
    pub public_id: String,
    pub username: String,
    pub avatar_id: u8,
    pub role: Role,
    pub reputation: u32,
    pub joined_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Listener,
    Presenter,
}

/// What [`Room::join`] produced.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub public_id: String,
    /// Whether a reserved presenter slot was reclaimed.
    pub restored: bool,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Room {
    pub fn new(
        context: &SessionContext,
        id: RoomId,
        name: String,
        theme: String,
        created_by: ConnectionId,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Room>| {
            let weak = me.clone();

            let engine = SyncEngine::new(
                context.config.clone(),
                Box::new(move |ended| {
                    if let Some(room) = weak.upgrade() {
                        room.finish_track(ended);
                    }
                }),
            );

            Self {
                id,
                name,
                theme,
                created_at: now_millis(),
                created_by,
                context: context.clone(),
                users: Mutex::new(HashMap::new()),
                queue: Mutex::new(DjQueue::new(context.config.clone())),
                engine,
                votes: Mutex::new(VoteSet::default()),
                chat: Mutex::new(VecDeque::new()),
                emptied_at: Mutex::new(None),
            }
        })
    }

    /// Adds a user, minting their public identity and attempting to reclaim
    /// a reserved presenter slot under the same username.
    pub fn join(&self, handle: ConnectionId, username: &str, avatar_id: u8) -> JoinOutcome {
        let public_id = random_string(8);

        let restored = self
            .queue
            .lock()
            .claim(username, handle, avatar_id)
            .is_some();

        let role = if restored {
            Role::Presenter
        } else {
            Role::Listener
        };

        self.users.lock().insert(
            handle,
            User {
                handle,
                public_id: public_id.clone(),
                username: username.to_string(),
                avatar_id,
                role,
                reputation: 0,
                joined_at: now_millis(),
            },
        );

        // The room is inhabited again; cancel any pending deletion.
        *self.emptied_at.lock() = None;

        if restored {
            info!("{username} reclaimed their presenter slot in room {}", self.id);
        }

        JoinOutcome { public_id, restored }
    }

    /// Removes a user. A presenter's slot is not discarded but reserved for
    /// the reconnection grace window.
    pub fn leave(&self, handle: ConnectionId) -> Option<User> {
        let user = self.users.lock().remove(&handle)?;

        {
            let mut queue = self.queue.lock();
            if queue.is_presenter(handle) {
                queue.reserve(handle, &user.username);
            }
        }

        self.votes.lock().remove(handle);

        if self.users.lock().is_empty() {
            *self.emptied_at.lock() = Some(Instant::now());
        }

        Some(user)
    }

    pub fn public_id(&self, handle: ConnectionId) -> Option<String> {
        self.users.lock().get(&handle).map(|u| u.public_id.clone())
    }

    pub fn username(&self, handle: ConnectionId) -> Option<String> {
        self.users.lock().get(&handle).map(|u| u.username.clone())
    }

    /// Promotes the user to presenter, appending a slot to the rotation.
    pub fn step_up(&self, handle: ConnectionId) -> Result<(), RoomError> {
        let (username, avatar_id) = {
            let users = self.users.lock();
            let user = users.get(&handle).ok_or(RoomError::UnknownUser)?;
            (user.username.clone(), user.avatar_id)
        };

        self.queue.lock().step_up(handle, &username, avatar_id)?;

        if let Some(user) = self.users.lock().get_mut(&handle) {
            user.role = Role::Presenter;
        }

        Ok(())
    }

    /// Demotes the user back to listener, removing their slot.
    pub fn step_down(&self, handle: ConnectionId) -> Result<(), RoomError> {
        self.queue.lock().step_down(handle)?;

        if let Some(user) = self.users.lock().get_mut(&handle) {
            user.role = Role::Listener;
        }

        Ok(())
    }

    /// Appends a track to the presenter's queue. Starts playback right away
    /// when the room is idle.
    pub fn queue_track(&self, handle: ConnectionId, track: Track) -> Result<usize, RoomError> {
        let position = self.queue.lock().enqueue_track(handle, track)?;

        if self.engine.is_idle() {
            self.advance();
        }

        Ok(position)
    }

    /// Removes a track from the presenter's queue by position.
    pub fn remove_track(&self, handle: ConnectionId, index: usize) -> Result<(), RoomError> {
        self.queue.lock().dequeue_track(handle, index)?;
        Ok(())
    }

    /// Casts a vote on the current track.
    ///
    /// Fails closed (returns `None`) when nothing is playing, the voter is
    /// not in the room, or the voter is the current presenter. A prior vote
    /// by the same connection is replaced, never double-counted.
    pub fn vote(&self, voter: ConnectionId, kind: VoteKind) -> Option<VoteTally> {
        let track_id = self.engine.current_track_id()?;

        let total_users = {
            let users = self.users.lock();
            if !users.contains_key(&voter) {
                return None;
            }
            users.len()
        };

        if self.engine.current_presenter() == Some(voter) {
            return None;
        }

        let (counts, should_skip) = {
            let mut votes = self.votes.lock();
            votes.apply(voter, kind);

            let counts = votes.counts();
            let should_skip = self
                .context
                .config
                .skip_threshold(total_users)
                .map(|threshold| counts.disapprove >= threshold)
                .unwrap_or(false);

            (counts, should_skip)
        };

        if should_skip {
            self.emit(SessionEvent::TrackSkipped {
                room_id: self.id.clone(),
                reason: "Voted off!".to_string(),
            });
            // Scoped to the voted-on track, so a concurrent end followed by
            // an advance cannot be cut short by this skip.
            self.engine.report_track_ended(&track_id);
        }

        Some(VoteTally {
            approve: counts.approve,
            disapprove: counts.disapprove,
            should_skip,
        })
    }

    /// Lets the current presenter cut their own track short. Anyone else is
    /// silently ignored. The presenter check happens inside the engine's end
    /// transition, so a track that ends concurrently cannot be confused with
    /// its successor.
    pub fn skip_own_track(&self, handle: ConnectionId) -> bool {
        let name = self
            .users
            .lock()
            .get(&handle)
            .map(|u| u.username.clone())
            .unwrap_or_else(|| "Presenter".to_string());

        if !self.engine.end_if_presenter(handle) {
            return false;
        }

        self.emit(SessionEvent::TrackSkipped {
            room_id: self.id.clone(),
            reason: format!("{name} skipped their track"),
        });

        true
    }

    /// The presenter's one-shot metadata correction for the current track.
    pub fn correct_metadata(
        &self,
        from: ConnectionId,
        video_id: &str,
        title: Option<String>,
        duration: Option<f32>,
    ) -> Option<(String, f32)> {
        self.engine
            .apply_metadata_correction(from, video_id, title, duration)
    }

    /// A client's report that the current track finished playing.
    pub fn report_track_ended(&self, video_id: &str) {
        self.engine.report_track_ended(video_id);
    }

    /// Appends a chat message and returns its public projection.
    pub fn chat_message(&self, handle: ConnectionId, text: String) -> Option<ChatEntry> {
        let entry = {
            let users = self.users.lock();
            let user = users.get(&handle)?;

            ChatEntry {
                user_id: user.public_id.clone(),
                username: user.username.clone(),
                avatar_id: user.avatar_id,
                text,
                timestamp: now_millis(),
            }
        };

        let mut chat = self.chat.lock();
        chat.push_back(entry.clone());

        while chat.len() > self.context.config.max_chat_history {
            chat.pop_front();
        }

        Some(entry)
    }

    /// Attempts to play the next track from the rotation. Falls back to
    /// idle when every queue is empty.
    pub fn advance(&self) -> Option<NowPlaying> {
        let next = self.queue.lock().advance();

        let Some(next) = next else {
            self.engine.go_idle();
            self.votes.lock().set_track(None);
            self.emit(SessionEvent::PlaybackIdle {
                room_id: self.id.clone(),
            });
            return None;
        };

        self.votes
            .lock()
            .set_track(Some(next.track.video_id.clone()));

        self.engine
            .start_track(next.track.clone(), next.presenter, &next.username);

        let announcement = NowPlaying {
            track: (&next.track).into(),
            presenter: PresenterProjection {
                user_id: self.public_id(next.presenter).unwrap_or_default(),
                username: next.username.clone(),
            },
            sync: self.playback_state(),
        };

        self.emit(SessionEvent::TrackStarted {
            room_id: self.id.clone(),
            announcement: announcement.clone(),
        });
        self.emit(SessionEvent::VotesReset {
            room_id: self.id.clone(),
        });
        self.emit(SessionEvent::SchedulerUpdated {
            room_id: self.id.clone(),
            state: self.scheduler_state(),
        });

        Some(announcement)
    }

    /// Periodic maintenance: reservation expiry, the playback watchdog, and
    /// the snapshot broadcast for active playback.
    pub fn tick(&self) {
        self.queue.lock().purge_expired();

        // A track marked playing long past its declared end means the end
        // task was lost; force the transition.
        if self.engine.end_if_overdue() {
            warn!("Playback was overdue in room {}, forced the track end", self.id);
        }

        let snapshot = self.playback_state();
        if snapshot.playing {
            self.emit(SessionEvent::Snapshot {
                room_id: self.id.clone(),
                snapshot,
            });
        }
    }

    /// Reputation award and vote reset for the track that just ended, then
    /// the next advance.
    fn finish_track(&self, ended: EndedTrack) {
        let approvals = self.votes.lock().reset() as u32;

        if approvals > 0 {
            self.queue.lock().award_reputation(ended.presenter, approvals);

            if let Some(user) = self.users.lock().get_mut(&ended.presenter) {
                user.reputation += approvals;
            }
        }

        self.advance();
    }

    // Projections. These substitute public identities for connection
    // handles; the reverse mapping never leaves the room.

    pub fn roster(&self) -> Vec<UserProfile> {
        let mut users: Vec<_> = self.users.lock().values().cloned().collect();
        users.sort_by_key(|u| u.joined_at);

        users
            .into_iter()
            .map(|u| UserProfile {
                id: u.public_id,
                username: u.username,
                avatar_id: u.avatar_id,
                role: u.role,
                reputation: u.reputation,
            })
            .collect()
    }

    pub fn scheduler_state(&self) -> SchedulerProjection {
        let users = self.users.lock();
        let queue = self.queue.lock();

        SchedulerProjection {
            slots: queue
                .slots()
                .iter()
                .map(|slot| SlotProjection {
                    user_id: users
                        .get(&slot.handle)
                        .map(|u| u.public_id.clone())
                        .unwrap_or_default(),
                    username: slot.username.clone(),
                    avatar_id: slot.avatar_id,
                    queue: slot.queue.iter().map(Into::into).collect(),
                    reputation: slot.reputation,
                })
                .collect(),
            current_index: queue.current_index(),
            max_slots: queue.max_slots(),
        }
    }

    pub fn playback_state(&self) -> SnapshotProjection {
        let snapshot = self.engine.snapshot();
        let users = self.users.lock();

        SnapshotProjection::from_snapshot(snapshot, |handle| {
            users.get(&handle).map(|u| u.public_id.clone())
        })
    }

    pub fn full_state(&self, for_handle: ConnectionId) -> RoomStateProjection {
        RoomStateProjection {
            id: self.id.clone(),
            name: self.name.clone(),
            theme: self.theme.clone(),
            my_id: self.public_id(for_handle),
            users: self.roster(),
            scheduler: self.scheduler_state(),
            sync: self.playback_state(),
            votes: self.votes.lock().counts(),
            chat: self.chat.lock().iter().cloned().collect(),
        }
    }

    pub fn summary(&self) -> RoomSummary {
        let snapshot = self.engine.snapshot();

        RoomSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            theme: self.theme.clone(),
            user_count: self.users.lock().len(),
            presenter_count: self.queue.lock().slots().len(),
            current_track: snapshot.title,
            current_presenter: snapshot.presenter.map(|p| p.name),
        }
    }

    pub fn contains(&self, handle: ConnectionId) -> bool {
        self.users.lock().contains_key(&handle)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.users.lock().keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.users.lock().is_empty()
    }

    /// Whether the empty-room grace period has fully elapsed.
    pub fn ready_for_deletion(&self) -> bool {
        let emptied_at = self.emptied_at.lock();

        self.users.lock().is_empty()
            && emptied_at
                .map(|at| at.elapsed() >= self.context.config.empty_room_grace)
                .unwrap_or(false)
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn created_by(&self) -> ConnectionId {
        self.created_by
    }

    fn emit(&self, event: SessionEvent) {
        // The receiver can only be gone during shutdown; dropping the event
        // is fine then.
        self.context.events.send(event).ok();
    }
}
