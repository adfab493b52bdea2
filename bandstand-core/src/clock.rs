//! The clock-sync protocol contract.
//!
//! The server side is a pure stateless echo: a client sends its local send
//! time `t0`, and the server replies with `t0` and its own receive time `t1`.
//! The client takes three such samples spaced [`SAMPLE_SPACING_MS`] apart,
//! derives a one-way offset estimate from each, and adopts the median as its
//! steady-state clock offset.
//!
//! Combined with the periodic playback snapshot, the offset lets a client
//! compute where playback should be right now and seek whenever its local
//! position drifts past [`RESYNC_THRESHOLD`].

use serde::{Deserialize, Serialize};

/// How many ping samples a client takes per sync round.
pub const SYNC_SAMPLES: usize = 3;

/// Spacing between ping samples, in milliseconds.
pub const SAMPLE_SPACING_MS: u64 = 200;

/// Drift, in seconds, beyond which a client should seek to the target
/// position.
pub const RESYNC_THRESHOLD: f32 = 0.5;

/// A client's sync ping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClockPing {
    /// Client send time, unix milliseconds on the client's clock.
    pub t0: i64,
}

/// The server's reply to a [`ClockPing`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClockPong {
    /// The client's `t0`, echoed back untouched.
    pub t0: i64,
    /// Server receive time, unix milliseconds on the server's clock.
    pub t1: i64,
}

/// One completed round trip, as recorded by the client.
#[derive(Debug, Clone, Copy)]
pub struct ClockSample {
    /// Client send time.
    pub t0: i64,
    /// Server receive time.
    pub t1: i64,
    /// Client receive time.
    pub t2: i64,
}

/// Answers a ping. `now` is the server's current unix millisecond clock.
pub fn respond(ping: ClockPing, now: i64) -> ClockPong {
    ClockPong { t0: ping.t0, t1: now }
}

/// The one-way offset estimate for a single sample:
/// `t1 - t0 - rtt / 2`, in milliseconds.
pub fn offset_estimate(sample: ClockSample) -> f64 {
    let rtt = (sample.t2 - sample.t0) as f64;
    (sample.t1 - sample.t0) as f64 - rtt / 2.
}

/// The offset a client should adopt: the median estimate of its samples.
/// Returns `None` when no samples were collected.
pub fn median_offset(samples: &[ClockSample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    let mut estimates: Vec<_> = samples.iter().copied().map(offset_estimate).collect();
    estimates.sort_by(|a, b| a.total_cmp(b));

    Some(estimates[estimates.len() / 2])
}

/// Where playback should be right now, in seconds.
///
/// * `elapsed` and `server_time` come from the latest playback snapshot.
/// * `now` is the client's current unix millisecond clock.
/// * `offset` is the adopted clock offset in milliseconds.
pub fn target_position(elapsed: f32, server_time: i64, now: i64, offset: f64) -> f32 {
    elapsed + ((now - server_time) as f64 + offset) as f32 / 1000.
}

/// Whether the given drift warrants a corrective seek.
pub fn needs_resync(drift: f32) -> bool {
    drift.abs() > RESYNC_THRESHOLD
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_respond_echoes_t0() {
        let pong = respond(ClockPing { t0: 1234 }, 9999);

        assert_eq!(pong.t0, 1234);
        assert_eq!(pong.t1, 9999);
    }

    #[test]
    fn test_offset_estimate() {
        // Client is 500ms behind the server, 100ms rtt each way.
        let sample = ClockSample {
            t0: 1000,
            t1: 1600,
            t2: 1200,
        };

        assert_eq!(offset_estimate(sample), 500.);
    }

    #[test]
    fn test_median_offset_picks_middle() {
        let sample = |t1| ClockSample { t0: 0, t1, t2: 0 };

        // One outlier sample does not move the adopted offset.
        let samples = [sample(500), sample(4000), sample(510)];
        assert_eq!(median_offset(&samples), Some(510.));

        assert_eq!(median_offset(&[]), None);
    }

    #[test]
    fn test_target_position() {
        // Snapshot said 10s elapsed, taken 2 seconds ago by the client's
        // clock, client runs 500ms behind the server.
        let position = target_position(10., 10_000, 12_000, 500.);

        assert!((position - 12.5).abs() < 1e-4);
    }

    #[test]
    fn test_resync_threshold() {
        assert!(!needs_resync(0.3));
        assert!(!needs_resync(-0.5));
        assert!(needs_resync(0.6));
        assert!(needs_resync(-2.1));
    }
}
