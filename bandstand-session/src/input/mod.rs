use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

mod youtube;

pub use youtube::YouTubeProvider;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Input did not match")]
    NoMatch,

    #[error("Resource was not found")]
    NotFound,

    #[error("No API key is configured")]
    MissingApiKey,

    #[error("Failed to fetch resource: {0}")]
    FetchError(String),

    #[error("Failed to parse resource: {0}")]
    ParseError(String),
}

/// Resolved metadata for a playable video.
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub video_id: String,
    pub title: String,
    pub thumbnail: String,
    pub duration: f32,
}

/// A source of video metadata. The server depends on this seam so tests can
/// substitute a canned provider.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<VideoInfo>, InputError>;

    async fn video_info(&self, video_id: &str) -> Result<VideoInfo, InputError>;
}

lazy_static! {
    static ref URL_ID_REGEX: Regex = Regex::new(
        r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/shorts/)([A-Za-z0-9_-]{11})"
    )
    .unwrap();
    static ref BARE_ID_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap();
}

/// Pulls the video id out of a URL in any of the common shapes, or accepts
/// a bare id.
pub fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();

    if let Some(captures) = URL_ID_REGEX.captures(input) {
        return Some(captures[1].to_string());
    }

    if BARE_ID_REGEX.is_match(input) {
        return Some(input.to_string());
    }

    None
}
