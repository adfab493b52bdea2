use std::sync::{Arc, Weak};
use std::time::Instant;

use crossbeam::atomic::AtomicCell;
use log::info;
use parking_lot::Mutex;

use crate::{clamp_duration, now_millis, Config, ConnectionId, TaskTimer, Track};

/// Invoked after a track ends, before the engine settles back to idle.
/// The owner uses this to award reputation and attempt the next advance.
pub type EndCallback = Box<dyn Fn(EndedTrack) + Send + Sync>;

/// What just finished playing, handed to the end callback. Carries the
/// pre-advance presenter so reputation can be awarded to the right slot.
#[derive(Debug, Clone)]
pub struct EndedTrack {
    pub track: Track,
    pub presenter: ConnectionId,
    pub presenter_name: String,
}

/// The playback state machine for one room.
///
/// Exactly one track can be active at a time. The engine arms a deferred end
/// task for the track's natural end and exposes a point-in-time snapshot that
/// clients use to re-derive their playback position.
pub struct SyncEngine {
    me: Weak<SyncEngine>,
    config: Config,
    state: Mutex<Playback>,
    timer: TaskTimer,
    /// Monotonic playback instance counter. Never reused, even across idle
    /// gaps, so a stale end task can always be told apart.
    epoch: AtomicCell<u64>,
    on_track_end: EndCallback,
}

/// The explicit playback states. A contradictory combination of flags is
/// unrepresentable.
enum Playback {
    /// Nothing is playing.
    Idle,
    /// A track is active and its end task is armed.
    Playing {
        track: Track,
        presenter: ConnectionId,
        presenter_name: String,
        started_at: Instant,
        /// Frozen elapsed value while paused.
        paused_at: Option<f32>,
        /// Whether the one-shot metadata correction was spent.
        corrected: bool,
        /// Identifies this playback instance, so a stale end task that
        /// already fired cannot end a newer track.
        epoch: u64,
    },
    /// An end is in flight. Further end requests are no-ops.
    Transitioning,
}

/// The view of the active track handed to end predicates.
struct ActiveTrack<'a> {
    track: &'a Track,
    presenter: ConnectionId,
    epoch: u64,
    elapsed: f32,
    playing: bool,
}

/// Who is presenting, as recorded by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenterInfo {
    pub handle: ConnectionId,
    pub name: String,
}

/// A point-in-time description of what is playing, since when, and the
/// server's clock.
#[derive(Debug, Clone)]
pub struct PlaybackSnapshot {
    pub track_id: Option<String>,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: f32,
    pub presenter: Option<PresenterInfo>,
    pub playing: bool,
    pub elapsed: f32,
    pub server_time: i64,
}

impl SyncEngine {
    pub fn new(config: Config, on_track_end: EndCallback) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            state: Mutex::new(Playback::Idle),
            timer: TaskTimer::new(),
            epoch: AtomicCell::new(0),
            on_track_end,
        })
    }

    /// Installs `track` as the current one and arms its end task.
    /// Any previously pending end task is invalidated first.
    pub fn start_track(&self, track: Track, presenter: ConnectionId, presenter_name: &str) {
        self.timer.cancel();

        let deadline = self.config.end_deadline(track.duration);
        let epoch = self.epoch.fetch_add(1) + 1;

        {
            let mut state = self.state.lock();

            *state = Playback::Playing {
                track,
                presenter,
                presenter_name: presenter_name.to_string(),
                started_at: Instant::now(),
                paused_at: None,
                corrected: false,
                epoch,
            };
        }

        self.arm_end_task(deadline, epoch);
    }

    /// Ends the current track: clears to idle, then invokes the end
    /// callback. Idempotent; a second call while one is in flight, or a call
    /// while idle, is a no-op.
    pub fn handle_track_end(&self) {
        self.end_matching(|_| true);
    }

    /// A client's claim that playback finished. Only honored when it names
    /// the currently active track, so replayed end reports from a previous
    /// track cannot cut a new one short.
    pub fn report_track_ended(&self, video_id: &str) {
        self.end_matching(|active| active.track.video_id == video_id);
    }

    /// Ends the current track only if `from` is its presenter, which is the
    /// access check for a presenter-initiated skip. Returns whether a track
    /// was ended.
    pub fn end_if_presenter(&self, from: ConnectionId) -> bool {
        self.end_matching(|active| active.presenter == from)
    }

    /// The watchdog: ends the current track if playback has run past its
    /// declared duration by more than the margin, indicating a lost end
    /// task. Returns whether a track was ended.
    pub fn end_if_overdue(&self) -> bool {
        let margin = self.config.watchdog_margin;

        self.end_matching(|active| {
            active.playing && active.elapsed > active.track.duration + margin
        })
    }

    /// Ends the current track if `predicate` approves of it. The check and
    /// the state transition happen in one critical section, so a concurrent
    /// end cannot slip in between and leave the predicate approving a track
    /// that is no longer the one being ended. Returns whether a track was
    /// ended.
    fn end_matching<F>(&self, predicate: F) -> bool
    where
        F: FnOnce(&ActiveTrack) -> bool,
    {
        let ended = {
            let mut state = self.state.lock();

            let approved = match &*state {
                Playback::Idle | Playback::Transitioning => false,
                Playback::Playing {
                    track,
                    presenter,
                    started_at,
                    paused_at,
                    epoch,
                    ..
                } => predicate(&ActiveTrack {
                    track,
                    presenter: *presenter,
                    epoch: *epoch,
                    elapsed: paused_at.unwrap_or_else(|| started_at.elapsed().as_secs_f32()),
                    playing: paused_at.is_none(),
                }),
            };

            if !approved {
                return false;
            }

            std::mem::replace(&mut *state, Playback::Transitioning)
        };

        self.timer.cancel();

        let Playback::Playing {
            track,
            presenter,
            presenter_name,
            started_at,
            paused_at,
            ..
        } = ended
        else {
            unreachable!("only a playing track can be ended");
        };

        // A track ending well before its declared duration is a quality
        // signal worth diagnosing, not an error.
        let elapsed = paused_at.unwrap_or_else(|| started_at.elapsed().as_secs_f32());

        if elapsed < track.duration * 0.9 {
            info!(
                "Track \"{}\" ended prematurely: elapsed={elapsed:.1}s / duration={}s",
                track.title, track.duration
            );
        }

        (self.on_track_end)(EndedTrack {
            track,
            presenter,
            presenter_name,
        });

        // The callback may have already started the next track. Only settle
        // to idle if it did not.
        let mut state = self.state.lock();
        if matches!(*state, Playback::Transitioning) {
            *state = Playback::Idle;
        }

        true
    }

    /// Applies the presenter's one-shot metadata correction.
    ///
    /// Only honored from the connection currently recorded as presenter and
    /// only while `video_id` is still current. A corrected duration
    /// re-derives the remaining time from the elapsed portion and re-arms
    /// the end task; if the track should already be over, it ends now.
    ///
    /// Returns the corrected `(title, duration)` for broadcasting, or `None`
    /// when the correction was rejected.
    pub fn apply_metadata_correction(
        &self,
        from: ConnectionId,
        video_id: &str,
        title: Option<String>,
        duration: Option<f32>,
    ) -> Option<(String, f32)> {
        let mut rearm = None;

        let result = {
            let mut state = self.state.lock();

            match &mut *state {
                Playback::Playing {
                    track,
                    presenter,
                    started_at,
                    paused_at,
                    corrected,
                    epoch,
                    ..
                } if *presenter == from && track.video_id == video_id && !*corrected => {
                    *corrected = true;

                    if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
                        track.title = title;
                    }

                    if let Some(duration) = duration.filter(|d| *d > 0.) {
                        track.duration = clamp_duration(duration.round());

                        let elapsed =
                            paused_at.unwrap_or_else(|| started_at.elapsed().as_secs_f32());
                        let remaining =
                            track.duration - elapsed + self.config.track_end_buffer;

                        rearm = Some((remaining, *epoch));
                    }

                    Some((track.title.clone(), track.duration))
                }
                _ => None,
            }
        };

        if let Some((remaining, epoch)) = rearm {
            if remaining > 0. {
                self.arm_end_task(std::time::Duration::from_secs_f32(remaining), epoch);
            } else {
                self.handle_track_end();
            }
        }

        result
    }

    /// Forcibly clears to idle without invoking the end callback.
    pub fn go_idle(&self) {
        self.timer.cancel();
        *self.state.lock() = Playback::Idle;
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let state = self.state.lock();

        match &*state {
            Playback::Playing {
                track,
                presenter,
                presenter_name,
                started_at,
                paused_at,
                ..
            } => PlaybackSnapshot {
                track_id: Some(track.video_id.clone()),
                title: Some(track.title.clone()),
                thumbnail: Some(track.thumbnail.clone()),
                duration: track.duration,
                presenter: Some(PresenterInfo {
                    handle: *presenter,
                    name: presenter_name.clone(),
                }),
                playing: paused_at.is_none(),
                elapsed: paused_at.unwrap_or_else(|| started_at.elapsed().as_secs_f32()),
                server_time: now_millis(),
            },
            _ => PlaybackSnapshot {
                track_id: None,
                title: None,
                thumbnail: None,
                duration: 0.,
                presenter: None,
                playing: false,
                elapsed: 0.,
                server_time: now_millis(),
            },
        }
    }

    /// The connection currently allowed to perform presenter-only actions.
    pub fn current_presenter(&self) -> Option<ConnectionId> {
        match &*self.state.lock() {
            Playback::Playing { presenter, .. } => Some(*presenter),
            _ => None,
        }
    }

    pub fn current_track_id(&self) -> Option<String> {
        self.state.lock().track().map(|t| t.video_id.clone())
    }

    pub fn is_idle(&self) -> bool {
        matches!(*self.state.lock(), Playback::Idle)
    }

    fn arm_end_task(&self, deadline: std::time::Duration, epoch: u64) {
        let me = self.me.clone();

        self.timer.arm(deadline, move || {
            if let Some(engine) = me.upgrade() {
                engine.end_if_epoch(epoch);
            }
        });
    }

    /// End-task entry point. Checks the epoch so a task that fired just as a
    /// new track started cannot end the wrong one.
    fn end_if_epoch(&self, epoch: u64) {
        self.end_matching(|active| active.epoch == epoch);
    }
}

impl Playback {
    fn track(&self) -> Option<&Track> {
        match self {
            Playback::Playing { track, .. } => Some(track),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn track(id: &str, duration: f32) -> Track {
        Track {
            video_id: id.to_string(),
            title: format!("Track {id}"),
            thumbnail: String::new(),
            duration,
            added_at: 0,
        }
    }

    fn engine_with_counter() -> (Arc<SyncEngine>, Arc<AtomicUsize>) {
        let ends = Arc::new(AtomicUsize::new(0));
        let counter = ends.clone();

        let engine = SyncEngine::new(
            Config::default(),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        (engine, ends)
    }

    #[tokio::test]
    async fn test_start_and_snapshot() {
        let (engine, _) = engine_with_counter();
        let presenter = ConnectionId::new();

        engine.start_track(track("a", 100.), presenter, "Alice");

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.track_id.as_deref(), Some("a"));
        assert!(snapshot.playing);
        assert!(snapshot.elapsed < 1.);
        assert_eq!(snapshot.presenter.unwrap().name, "Alice");
        assert_eq!(engine.current_presenter(), Some(presenter));
    }

    #[tokio::test]
    async fn test_double_end_invokes_callback_once() {
        let (engine, ends) = engine_with_counter();

        engine.start_track(track("a", 100.), ConnectionId::new(), "Alice");

        // Simulates the race between the end task firing and a client
        // report arriving at the same moment.
        engine.handle_track_end();
        engine.handle_track_end();

        assert_eq!(ends.load(Ordering::SeqCst), 1);
        assert!(engine.is_idle());
    }

    #[tokio::test]
    async fn test_stale_end_report_is_ignored() {
        let (engine, ends) = engine_with_counter();

        engine.start_track(track("b", 100.), ConnectionId::new(), "Alice");
        engine.report_track_ended("a");

        assert_eq!(ends.load(Ordering::SeqCst), 0);
        assert_eq!(engine.current_track_id().as_deref(), Some("b"));

        engine.report_track_ended("b");
        assert_eq!(ends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_end_task_fires_naturally() {
        let (engine, ends) = engine_with_counter();

        // Short deadline: 0.2s duration plus a 0.1s buffer.
        let short = Config {
            track_end_buffer: 0.1,
            ..Config::default()
        };

        let engine_short = SyncEngine::new(short, {
            let ends = ends.clone();
            Box::new(move |_| {
                ends.fetch_add(1, Ordering::SeqCst);
            })
        });

        engine_short.start_track(track("a", 0.2), ConnectionId::new(), "Alice");
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(ends.load(Ordering::SeqCst), 1);
        assert!(engine_short.is_idle());
        drop(engine);
    }

    #[tokio::test]
    async fn test_metadata_correction_guards() {
        let (engine, _) = engine_with_counter();
        let presenter = ConnectionId::new();
        let stranger = ConnectionId::new();

        engine.start_track(track("a", 300.), presenter, "Alice");

        // Wrong sender.
        assert!(engine
            .apply_metadata_correction(stranger, "a", Some("Nope".into()), None)
            .is_none());

        // Stale video id.
        assert!(engine
            .apply_metadata_correction(presenter, "b", Some("Nope".into()), None)
            .is_none());

        // Valid correction.
        let (title, duration) = engine
            .apply_metadata_correction(presenter, "a", Some("Real Title".into()), Some(250.))
            .unwrap();
        assert_eq!(title, "Real Title");
        assert_eq!(duration, 250.);

        // The correction is one-shot.
        assert!(engine
            .apply_metadata_correction(presenter, "a", Some("Again".into()), None)
            .is_none());
    }

    #[tokio::test]
    async fn test_overdue_correction_ends_immediately() {
        let ends = Arc::new(AtomicUsize::new(0));
        let config = Config {
            track_end_buffer: 0.1,
            ..Config::default()
        };

        let engine = SyncEngine::new(config, {
            let ends = ends.clone();
            Box::new(move |_| {
                ends.fetch_add(1, Ordering::SeqCst);
            })
        });

        let presenter = ConnectionId::new();
        engine.start_track(track("a", 300.), presenter, "Alice");
        tokio::time::sleep(Duration::from_millis(1300)).await;

        // Corrected duration of 1s is already behind the elapsed 1.3s, so no
        // timer can be armed; the track ends on the spot.
        engine.apply_metadata_correction(presenter, "a", None, Some(1.));

        assert_eq!(ends.load(Ordering::SeqCst), 1);
        assert!(engine.is_idle());
    }

    #[tokio::test]
    async fn test_go_idle_skips_callback() {
        let (engine, ends) = engine_with_counter();

        engine.start_track(track("a", 100.), ConnectionId::new(), "Alice");
        engine.go_idle();

        assert!(engine.is_idle());
        assert_eq!(ends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_end_if_presenter_rejects_others() {
        let (engine, ends) = engine_with_counter();
        let presenter = ConnectionId::new();

        engine.start_track(track("a", 100.), presenter, "Alice");

        assert!(!engine.end_if_presenter(ConnectionId::new()));
        assert_eq!(engine.current_track_id().as_deref(), Some("a"));
        assert_eq!(ends.load(Ordering::SeqCst), 0);

        assert!(engine.end_if_presenter(presenter));
        assert_eq!(ends.load(Ordering::SeqCst), 1);
        assert!(engine.is_idle());
    }

    #[tokio::test]
    async fn test_watchdog_ends_stuck_playback() {
        let ends = Arc::new(AtomicUsize::new(0));

        // A huge end buffer keeps the end task far in the future, imitating
        // a lost timer; only the watchdog can end the track.
        let config = Config {
            track_end_buffer: 600.,
            watchdog_margin: 0.05,
            ..Config::default()
        };

        let engine = SyncEngine::new(config, {
            let ends = ends.clone();
            Box::new(move |_| {
                ends.fetch_add(1, Ordering::SeqCst);
            })
        });

        engine.start_track(track("a", 0.1), ConnectionId::new(), "Alice");

        // Not yet past duration + margin.
        assert!(!engine.end_if_overdue());
        assert_eq!(ends.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(engine.end_if_overdue());
        assert_eq!(ends.load(Ordering::SeqCst), 1);
        assert!(engine.is_idle());
    }
}
