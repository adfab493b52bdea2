use crate::util::now_millis;

/// A single playable item in a presenter's queue.
///
/// Tracks are immutable once playing, except for the one-shot metadata
/// correction applied through the playback engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// The external media identifier, e.g. a video id.
    pub video_id: String,
    pub title: String,
    pub thumbnail: String,
    /// Declared length in seconds, always within `(0, max_track_duration]`.
    pub duration: f32,
    /// Unix milliseconds at which the track was enqueued.
    pub added_at: i64,
}

impl Track {
    pub fn new(video_id: String, title: String, thumbnail: String, duration: f32) -> Self {
        Self {
            video_id,
            title,
            thumbnail,
            duration: clamp_duration(duration),
            added_at: now_millis(),
        }
    }

    /// A stand-in for a track whose metadata could not be resolved.
    /// The real duration arrives later via the metadata correction path.
    pub fn placeholder(video_id: String, fallback_duration: f32) -> Self {
        Self::new(
            video_id,
            "Loading...".to_string(),
            String::new(),
            fallback_duration,
        )
    }
}

/// Clamps a declared duration into the accepted range of one second to
/// twelve hours.
pub fn clamp_duration(duration: f32) -> f32 {
    duration.clamp(1., 43_200.)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duration_bounds() {
        assert_eq!(clamp_duration(0.), 1.);
        assert_eq!(clamp_duration(-5.), 1.);
        assert_eq!(clamp_duration(180.), 180.);
        assert_eq!(clamp_duration(100_000.), 43_200.);
    }

    #[test]
    fn test_placeholder() {
        let track = Track::placeholder("dQw4w9WgXcQ".to_string(), 300.);

        assert_eq!(track.title, "Loading...");
        assert_eq!(track.duration, 300.);
        assert!(track.thumbnail.is_empty());
    }
}
