use std::time::Duration;

/// Tunables for the session engine.
///
/// The defaults match the production values. Tests shrink the durations to
/// keep themselves fast.
#[derive(Debug, Clone)]
pub struct Config {
    /// How many presenter slots a room can hold.
    pub max_presenter_slots: usize,
    /// How many tracks a single presenter can have queued.
    pub max_queue_length: usize,
    /// How long a disconnected presenter's slot is held for reclaiming.
    pub reservation_ttl: Duration,
    /// Seconds added to a track's duration before the server declares it
    /// over, absorbing client network and codec variance.
    pub track_end_buffer: f32,
    /// Seconds past the declared duration after which a still-"playing"
    /// track is considered stuck and forcibly ended.
    pub watchdog_margin: f32,
    /// Fraction of the room that must disapprove before a skip is
    /// recommended.
    pub skip_ratio: f32,
    /// Minimum room size before disapproval votes can skip a track.
    pub skip_quorum: usize,
    /// How often playback snapshots are broadcast to active rooms.
    pub snapshot_interval: Duration,
    /// How long an empty room lingers before it is deleted.
    pub empty_room_grace: Duration,
    /// Upper bound on concurrently existing rooms.
    pub max_rooms: usize,
    /// Upper bound on connections admitted from a single address.
    pub max_connections_per_ip: usize,
    /// Duration assigned to tracks whose metadata could not be resolved.
    pub fallback_duration: f32,
    /// Longest accepted track duration, in seconds (12 hours).
    pub max_track_duration: f32,
    /// How many chat messages a room retains.
    pub max_chat_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_presenter_slots: 5,
            max_queue_length: 20,
            reservation_ttl: Duration::from_secs(30),
            track_end_buffer: 1.5,
            watchdog_margin: 5.,
            skip_ratio: 0.6,
            skip_quorum: 3,
            snapshot_interval: Duration::from_secs(5),
            empty_room_grace: Duration::from_secs(10),
            max_rooms: 50,
            max_connections_per_ip: 10,
            fallback_duration: 300.,
            max_track_duration: 43_200.,
            max_chat_history: 100,
        }
    }
}

impl Config {
    /// Returns the deadline for a track's end timer.
    pub fn end_deadline(&self, duration: f32) -> Duration {
        Duration::from_secs_f32((duration + self.track_end_buffer).max(0.))
    }

    /// How many disapprovals are needed to skip, given the room size.
    /// Returns `None` when the room is below the quorum floor.
    pub fn skip_threshold(&self, total_users: usize) -> Option<usize> {
        if total_users < self.skip_quorum {
            return None;
        }

        Some((total_users as f32 * self.skip_ratio).ceil() as usize)
    }
}
