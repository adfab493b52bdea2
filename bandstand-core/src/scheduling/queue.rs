use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use thiserror::Error;

use crate::{Config, ConnectionId, Track};

/// The round-robin presenter scheduler for one room.
///
/// Slots keep insertion order, except where a reclaimed reservation
/// re-inserts at its remembered position. `current_index` always points at
/// the slot that most recently yielded a track, or `None` before the first
/// advance.
pub struct DjQueue {
    config: Config,
    slots: Vec<PresenterSlot>,
    current_index: Option<usize>,
    reservations: HashMap<String, Reservation>,
}

/// A queue-holding participant eligible for rotation.
#[derive(Debug, Clone)]
pub struct PresenterSlot {
    pub handle: ConnectionId,
    pub username: String,
    pub avatar_id: u8,
    pub queue: VecDeque<Track>,
    pub reputation: u32,
}

/// A time-boxed snapshot of a departed presenter's slot, claimable only
/// under the identical username.
struct Reservation {
    slot: PresenterSlot,
    original_index: usize,
    expires_at: Instant,
}

/// The next item to play, as selected by [`DjQueue::advance`].
#[derive(Debug, Clone)]
pub struct NextUp {
    pub track: Track,
    pub presenter: ConnectionId,
    pub username: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Presenter slots are full")]
    SlotsFull,
    #[error("Already a presenter")]
    AlreadyPresenter,
    #[error("Not a presenter")]
    NotPresenter,
    #[error("Queue is full")]
    QueueFull,
    #[error("Track is already in your queue")]
    DuplicateTrack,
    #[error("Invalid track index")]
    InvalidIndex,
}

impl DjQueue {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            slots: Vec::new(),
            current_index: None,
            reservations: HashMap::new(),
        }
    }

    /// Appends a new presenter slot at the end of the rotation.
    pub fn step_up(
        &mut self,
        handle: ConnectionId,
        username: &str,
        avatar_id: u8,
    ) -> Result<usize, SchedulerError> {
        if self.slots.len() >= self.config.max_presenter_slots {
            return Err(SchedulerError::SlotsFull);
        }

        if self.is_presenter(handle) {
            return Err(SchedulerError::AlreadyPresenter);
        }

        self.slots.push(PresenterSlot {
            handle,
            username: username.to_string(),
            avatar_id,
            queue: VecDeque::new(),
            reputation: 0,
        });

        Ok(self.slots.len() - 1)
    }

    /// Removes the presenter's slot, keeping the rotation aimed at the same
    /// neighbor.
    pub fn step_down(&mut self, handle: ConnectionId) -> Result<PresenterSlot, SchedulerError> {
        let index = self
            .slots
            .iter()
            .position(|s| s.handle == handle)
            .ok_or(SchedulerError::NotPresenter)?;

        let removed = self.slots.remove(index);
        self.adjust_index_after_removal(index);

        Ok(removed)
    }

    /// Appends a track to the presenter's queue.
    pub fn enqueue_track(
        &mut self,
        handle: ConnectionId,
        track: Track,
    ) -> Result<usize, SchedulerError> {
        let max_queue_length = self.config.max_queue_length;
        let slot = self.slot_mut(handle)?;

        if slot.queue.len() >= max_queue_length {
            return Err(SchedulerError::QueueFull);
        }

        if slot.queue.iter().any(|t| t.video_id == track.video_id) {
            return Err(SchedulerError::DuplicateTrack);
        }

        slot.queue.push_back(track);
        Ok(slot.queue.len() - 1)
    }

    /// Removes a track from the presenter's queue by position.
    pub fn dequeue_track(
        &mut self,
        handle: ConnectionId,
        index: usize,
    ) -> Result<Track, SchedulerError> {
        let slot = self.slot_mut(handle)?;

        slot.queue
            .remove(index)
            .ok_or(SchedulerError::InvalidIndex)
    }

    /// Selects the next track to play.
    ///
    /// Starting from `current_index`, at most `slots.len()` slots are probed
    /// circularly; the first with a non-empty queue has its head dequeued.
    /// When every queue is empty the rotation target is left untouched.
    pub fn advance(&mut self) -> Option<NextUp> {
        if self.slots.is_empty() {
            return None;
        }

        let start = self.current_index.unwrap_or(self.slots.len() - 1);

        for step in 1..=self.slots.len() {
            let index = (start + step) % self.slots.len();
            let slot = &mut self.slots[index];

            if let Some(track) = slot.queue.pop_front() {
                self.current_index = Some(index);

                return Some(NextUp {
                    track,
                    presenter: slot.handle,
                    username: slot.username.clone(),
                });
            }
        }

        None
    }

    /// Converts the presenter's slot into a reservation with a fresh expiry
    /// deadline, replacing any existing reservation under the same username.
    /// Returns false if the handle holds no slot.
    pub fn reserve(&mut self, handle: ConnectionId, username: &str) -> bool {
        let Some(index) = self.slots.iter().position(|s| s.handle == handle) else {
            return false;
        };

        let slot = self.slots.remove(index);
        self.adjust_index_after_removal(index);

        self.reservations.insert(
            username.to_string(),
            Reservation {
                slot,
                original_index: index,
                expires_at: Instant::now() + self.config.reservation_ttl,
            },
        );

        true
    }

    /// Reclaims a reservation under the identical username, rebinding the
    /// slot to the new connection while preserving its queue and reputation.
    /// The slot is re-inserted at its original position where possible.
    pub fn claim(
        &mut self,
        username: &str,
        new_handle: ConnectionId,
        new_avatar_id: u8,
    ) -> Option<&PresenterSlot> {
        self.purge_expired();

        let reservation = self.reservations.remove(username)?;

        let mut slot = reservation.slot;
        slot.handle = new_handle;
        slot.avatar_id = new_avatar_id;

        let insert_at = reservation.original_index.min(self.slots.len());
        self.slots.insert(insert_at, slot);

        // Inserting at or before the rotation target shifts it right.
        if let Some(current) = self.current_index {
            if insert_at <= current {
                self.current_index = Some(current + 1);
            }
        }

        Some(&self.slots[insert_at])
    }

    /// Whether a live reservation exists under this username.
    pub fn has_reservation(&self, username: &str) -> bool {
        self.reservations
            .get(username)
            .map(|r| r.expires_at > Instant::now())
            .unwrap_or(false)
    }

    /// Drops reservations whose grace window has elapsed.
    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        self.reservations.retain(|_, r| r.expires_at > now);
    }

    /// Adds to a presenter's accumulated score. Points awarded while the
    /// slot is only reserved are dropped.
    pub fn award_reputation(&mut self, handle: ConnectionId, points: u32) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.handle == handle) {
            slot.reputation += points;
        }
    }

    pub fn is_presenter(&self, handle: ConnectionId) -> bool {
        self.slots.iter().any(|s| s.handle == handle)
    }

    pub fn slot_for(&self, handle: ConnectionId) -> Option<&PresenterSlot> {
        self.slots.iter().find(|s| s.handle == handle)
    }

    pub fn slots(&self) -> &[PresenterSlot] {
        &self.slots
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn max_slots(&self) -> usize {
        self.config.max_presenter_slots
    }

    fn slot_mut(&mut self, handle: ConnectionId) -> Result<&mut PresenterSlot, SchedulerError> {
        self.slots
            .iter_mut()
            .find(|s| s.handle == handle)
            .ok_or(SchedulerError::NotPresenter)
    }

    /// Keeps `current_index` aimed at the slot that last played after the
    /// slot at `removed` disappears. Removing at or before it shifts it
    /// left, clamped to the first slot; an emptied rotation resets it.
    fn adjust_index_after_removal(&mut self, removed: usize) {
        if self.slots.is_empty() {
            self.current_index = None;
        } else if let Some(current) = self.current_index {
            if removed <= current {
                self.current_index = Some(current.saturating_sub(1));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn queue() -> DjQueue {
        DjQueue::new(Config::default())
    }

    fn track(id: &str) -> Track {
        Track {
            video_id: id.to_string(),
            title: format!("Track {id}"),
            thumbnail: String::new(),
            duration: 100.,
            added_at: 0,
        }
    }

    #[test]
    fn test_step_up_and_down() {
        let mut q = queue();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();

        assert_eq!(q.step_up(alice, "Alice", 0), Ok(0));
        assert_eq!(q.step_up(bob, "Bob", 1), Ok(1));
        assert_eq!(q.step_up(alice, "Alice", 0), Err(SchedulerError::AlreadyPresenter));

        assert!(q.step_down(alice).is_ok());
        assert_eq!(q.slots().len(), 1);
        assert_eq!(q.slots()[0].username, "Bob");

        assert_eq!(
            q.step_down(ConnectionId::new()).unwrap_err(),
            SchedulerError::NotPresenter
        );
    }

    #[test]
    fn test_slots_full() {
        let mut q = queue();

        for i in 0..5 {
            q.step_up(ConnectionId::new(), &format!("User{i}"), 0).unwrap();
        }

        assert_eq!(
            q.step_up(ConnectionId::new(), "User5", 0),
            Err(SchedulerError::SlotsFull)
        );
    }

    #[test]
    fn test_round_robin_rotation() {
        let mut q = queue();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();

        q.step_up(alice, "Alice", 0).unwrap();
        q.step_up(bob, "Bob", 1).unwrap();

        q.enqueue_track(alice, track("a")).unwrap();
        q.enqueue_track(bob, track("b")).unwrap();
        q.enqueue_track(alice, track("c")).unwrap();

        let first = q.advance().unwrap();
        assert_eq!(first.username, "Alice");
        assert_eq!(first.track.video_id, "a");

        let second = q.advance().unwrap();
        assert_eq!(second.username, "Bob");
        assert_eq!(second.track.video_id, "b");

        let third = q.advance().unwrap();
        assert_eq!(third.username, "Alice");
        assert_eq!(third.track.video_id, "c");
    }

    #[test]
    fn test_advance_skips_empty_queues() {
        let mut q = queue();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();

        q.step_up(alice, "Alice", 0).unwrap();
        q.step_up(bob, "Bob", 1).unwrap();
        q.enqueue_track(bob, track("b")).unwrap();

        assert_eq!(q.advance().unwrap().username, "Bob");
    }

    #[test]
    fn test_advance_with_all_empty_leaves_index_untouched() {
        let mut q = queue();
        let alice = ConnectionId::new();

        q.step_up(alice, "Alice", 0).unwrap();
        assert!(q.advance().is_none());
        assert_eq!(q.current_index(), None);

        q.enqueue_track(alice, track("a")).unwrap();
        q.advance().unwrap();
        assert_eq!(q.current_index(), Some(0));

        assert!(q.advance().is_none());
        assert_eq!(q.current_index(), Some(0));
    }

    #[test]
    fn test_queue_caps() {
        let mut q = queue();
        let alice = ConnectionId::new();
        q.step_up(alice, "Alice", 0).unwrap();

        for i in 0..20 {
            q.enqueue_track(alice, track(&format!("v{i}"))).unwrap();
        }

        assert_eq!(
            q.enqueue_track(alice, track("v20")),
            Err(SchedulerError::QueueFull)
        );
    }

    #[test]
    fn test_duplicate_track_rejected() {
        let mut q = queue();
        let alice = ConnectionId::new();

        q.step_up(alice, "Alice", 0).unwrap();
        q.enqueue_track(alice, track("dup")).unwrap();

        assert_eq!(
            q.enqueue_track(alice, track("dup")),
            Err(SchedulerError::DuplicateTrack)
        );
    }

    #[test]
    fn test_dequeue_track() {
        let mut q = queue();
        let alice = ConnectionId::new();

        q.step_up(alice, "Alice", 0).unwrap();
        q.enqueue_track(alice, track("a")).unwrap();
        q.enqueue_track(alice, track("b")).unwrap();

        let removed = q.dequeue_track(alice, 0).unwrap();
        assert_eq!(removed.video_id, "a");
        assert_eq!(q.slot_for(alice).unwrap().queue[0].video_id, "b");

        assert_eq!(q.dequeue_track(alice, 5), Err(SchedulerError::InvalidIndex));
    }

    #[test]
    fn test_step_down_at_or_before_current_shifts_index() {
        let mut q = queue();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        let carol = ConnectionId::new();

        q.step_up(alice, "Alice", 0).unwrap();
        q.step_up(bob, "Bob", 1).unwrap();
        q.step_up(carol, "Carol", 2).unwrap();

        q.enqueue_track(alice, track("a")).unwrap();
        q.enqueue_track(bob, track("b")).unwrap();
        q.enqueue_track(carol, track("c")).unwrap();

        q.advance().unwrap();
        assert_eq!(q.current_index(), Some(0));

        // Alice leaves; the rotation must not skip or repeat a neighbor.
        q.step_down(alice).unwrap();
        assert_eq!(q.current_index(), Some(0));
        assert_eq!(q.advance().unwrap().username, "Carol");
    }

    #[test]
    fn test_step_down_after_current_leaves_index() {
        let mut q = queue();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        let carol = ConnectionId::new();

        q.step_up(alice, "Alice", 0).unwrap();
        q.step_up(bob, "Bob", 1).unwrap();
        q.step_up(carol, "Carol", 2).unwrap();

        q.enqueue_track(alice, track("a")).unwrap();
        q.enqueue_track(bob, track("b")).unwrap();
        q.enqueue_track(carol, track("c")).unwrap();

        q.advance().unwrap();
        q.step_down(carol).unwrap();

        assert_eq!(q.current_index(), Some(0));
        assert_eq!(q.advance().unwrap().username, "Bob");
    }

    #[test]
    fn test_reserve_and_claim_restores_slot() {
        let mut q = queue();
        let alice = ConnectionId::new();

        q.step_up(alice, "Alice", 0).unwrap();
        q.enqueue_track(alice, track("a")).unwrap();
        q.enqueue_track(alice, track("b")).unwrap();
        q.award_reputation(alice, 7);

        assert!(q.reserve(alice, "Alice"));
        assert!(q.slots().is_empty());
        assert!(q.has_reservation("Alice"));

        let reconnected = ConnectionId::new();
        let slot = q.claim("Alice", reconnected, 3).unwrap();

        assert_eq!(slot.handle, reconnected);
        assert_eq!(slot.avatar_id, 3);
        assert_eq!(slot.reputation, 7);
        assert_eq!(slot.queue.len(), 2);
        assert_eq!(slot.queue[0].video_id, "a");
        assert!(!q.has_reservation("Alice"));
    }

    #[test]
    fn test_claim_without_reservation() {
        let mut q = queue();
        assert!(q.claim("Nobody", ConnectionId::new(), 0).is_none());
    }

    #[test]
    fn test_claim_reinserts_at_original_position() {
        let mut q = queue();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        let carol = ConnectionId::new();

        q.step_up(alice, "Alice", 0).unwrap();
        q.step_up(bob, "Bob", 1).unwrap();
        q.step_up(carol, "Carol", 2).unwrap();

        q.reserve(bob, "Bob");
        assert_eq!(q.slots().len(), 2);

        q.claim("Bob", ConnectionId::new(), 1).unwrap();
        let order: Vec<_> = q.slots().iter().map(|s| s.username.as_str()).collect();
        assert_eq!(order, ["Alice", "Bob", "Carol"]);
    }

    #[test]
    fn test_claim_at_or_before_current_bumps_index() {
        let mut q = queue();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();

        q.step_up(alice, "Alice", 0).unwrap();
        q.step_up(bob, "Bob", 1).unwrap();

        q.enqueue_track(alice, track("a")).unwrap();
        q.enqueue_track(bob, track("b")).unwrap();

        q.advance().unwrap(); // Alice plays, index 0.
        q.reserve(alice, "Alice");
        assert_eq!(q.current_index(), Some(0));

        // Alice returns at index 0; Bob must still be next.
        q.claim("Alice", ConnectionId::new(), 0).unwrap();
        assert_eq!(q.current_index(), Some(1));
        assert_eq!(q.advance().unwrap().username, "Bob");
    }

    #[test]
    fn test_reservation_expiry() {
        let config = Config {
            reservation_ttl: Duration::from_millis(10),
            ..Config::default()
        };
        let mut q = DjQueue::new(config);
        let alice = ConnectionId::new();

        q.step_up(alice, "Alice", 0).unwrap();
        q.reserve(alice, "Alice");
        assert!(q.has_reservation("Alice"));

        std::thread::sleep(Duration::from_millis(30));

        assert!(!q.has_reservation("Alice"));
        assert!(q.claim("Alice", ConnectionId::new(), 0).is_none());
    }

    #[test]
    fn test_award_reputation_ignores_unknown_handle() {
        let mut q = queue();
        let alice = ConnectionId::new();

        q.step_up(alice, "Alice", 0).unwrap();
        q.award_reputation(ConnectionId::new(), 5);
        assert_eq!(q.slot_for(alice).unwrap().reputation, 0);
    }
}
