use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;

use super::{InputError, MetadataProvider, VideoInfo};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const SEARCH_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const SEARCH_RESULTS: usize = 10;

/// Metadata lookups against the YouTube Data API, with an in-memory search
/// cache to stay inside the daily quota.
pub struct YouTubeProvider {
    client: Client,
    api_key: Option<String>,
    search_cache: Mutex<HashMap<String, CachedSearch>>,
}

struct CachedSearch {
    results: Vec<VideoInfo>,
    fetched_at: Instant,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    title: String,
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    snippet: Snippet,
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}

impl YouTubeProvider {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key,
            search_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drops expired search entries. Called on the maintenance interval.
    pub fn clean_cache(&self) {
        self.search_cache
            .lock()
            .retain(|_, entry| entry.fetched_at.elapsed() < SEARCH_CACHE_TTL);
    }

    fn cached_search(&self, query: &str) -> Option<Vec<VideoInfo>> {
        let cache = self.search_cache.lock();
        let entry = cache.get(query)?;

        (entry.fetched_at.elapsed() < SEARCH_CACHE_TTL).then(|| entry.results.clone())
    }

    fn api_key(&self) -> Result<&str, InputError> {
        self.api_key.as_deref().ok_or(InputError::MissingApiKey)
    }
}

#[async_trait]
impl MetadataProvider for YouTubeProvider {
    async fn search(&self, query: &str) -> Result<Vec<VideoInfo>, InputError> {
        if let Some(results) = self.cached_search(query) {
            return Ok(results);
        }

        let key = self.api_key()?;
        let max_results = SEARCH_RESULTS.to_string();

        let response: SearchResponse = self
            .client
            .get(format!("{API_BASE}/search"))
            .query(&[
                ("part", "snippet"),
                ("type", "video"),
                ("videoEmbeddable", "true"),
                ("maxResults", max_results.as_str()),
                ("q", query),
                ("key", key),
            ])
            .send()
            .await
            .map_err(|e| InputError::FetchError(e.to_string()))?
            .error_for_status()
            .map_err(|e| InputError::FetchError(e.to_string()))?
            .json()
            .await
            .map_err(|e| InputError::ParseError(e.to_string()))?;

        let results: Vec<_> = response
            .items
            .into_iter()
            .filter_map(|item| {
                Some(VideoInfo {
                    video_id: item.id.video_id?,
                    title: item.snippet.title,
                    thumbnail: best_thumbnail(item.snippet.thumbnails),
                    // The search endpoint does not return durations; they
                    // are resolved when the track is queued.
                    duration: 0.,
                })
            })
            .collect();

        self.search_cache.lock().insert(
            query.to_string(),
            CachedSearch {
                results: results.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(results)
    }

    async fn video_info(&self, video_id: &str) -> Result<VideoInfo, InputError> {
        let key = self.api_key()?;

        let response: VideosResponse = self
            .client
            .get(format!("{API_BASE}/videos"))
            .query(&[
                ("part", "snippet,contentDetails"),
                ("id", video_id),
                ("key", key),
            ])
            .send()
            .await
            .map_err(|e| InputError::FetchError(e.to_string()))?
            .error_for_status()
            .map_err(|e| InputError::FetchError(e.to_string()))?
            .json()
            .await
            .map_err(|e| InputError::ParseError(e.to_string()))?;

        let item = response.items.into_iter().next().ok_or(InputError::NotFound)?;

        Ok(VideoInfo {
            video_id: item.id,
            title: item.snippet.title,
            thumbnail: best_thumbnail(item.snippet.thumbnails),
            duration: parse_iso8601_duration(&item.content_details.duration)
                .ok_or_else(|| {
                    InputError::ParseError(format!(
                        "Bad duration: {}",
                        item.content_details.duration
                    ))
                })?,
        })
    }
}

fn best_thumbnail(thumbnails: Thumbnails) -> String {
    thumbnails
        .medium
        .or(thumbnails.default)
        .map(|t| t.url)
        .unwrap_or_default()
}

lazy_static! {
    static ref DURATION_REGEX: Regex =
        Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$").unwrap();
}

/// Parses the API's ISO 8601 durations, e.g. `PT1H2M30S`.
fn parse_iso8601_duration(value: &str) -> Option<f32> {
    let captures = DURATION_REGEX.captures(value)?;

    let part = |i: usize| {
        captures
            .get(i)
            .map(|m| m.as_str().parse::<u32>().unwrap_or(0))
            .unwrap_or(0)
    };

    let seconds = part(1) * 3600 + part(2) * 60 + part(3);

    // "PT" alone means a livestream, which has no fixed duration.
    (seconds > 0).then(|| seconds as f32)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duration_parsing() {
        assert_eq!(parse_iso8601_duration("PT3M25S"), Some(205.));
        assert_eq!(parse_iso8601_duration("PT1H2M30S"), Some(3750.));
        assert_eq!(parse_iso8601_duration("PT45S"), Some(45.));
        assert_eq!(parse_iso8601_duration("PT2H"), Some(7200.));

        assert_eq!(parse_iso8601_duration("PT"), None);
        assert_eq!(parse_iso8601_duration("3 minutes"), None);
    }

    #[tokio::test]
    async fn test_search_requires_api_key() {
        let provider = YouTubeProvider::new(None);

        assert!(matches!(
            provider.search("test").await,
            Err(InputError::MissingApiKey)
        ));
    }

    #[test]
    fn test_cache_expiry() {
        let provider = YouTubeProvider::new(None);

        provider.search_cache.lock().insert(
            "stale".to_string(),
            CachedSearch {
                results: vec![],
                fetched_at: Instant::now() - SEARCH_CACHE_TTL * 2,
            },
        );

        assert!(provider.cached_search("stale").is_none());

        provider.clean_cache();
        assert!(provider.search_cache.lock().is_empty());
    }
}
