//! Metadata resolution for recognized remote sources.
//!
//! One class of submitted URL carries a numeric track id. For those, the
//! title and artist are looked up on an external text service and joined
//! into a filename candidate, and the fetch URL is rewritten to the
//! service's canonical audio endpoint for the same id. Lookups are pure
//! enrichment: any failure degrades to an empty string, never an error.

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use tracing::debug;

/// Substring that marks a submitted URL as a recognized source.
const RECOGNIZED_HOST: &str = "music.163.com";

lazy_static! {
    static ref TRACK_ID_RE: Regex = Regex::new(r"[?&]id=(\d+)").unwrap();
}

/// Extract the numeric track id from a recognized-source URL.
///
/// Returns `None` for URLs that are not recognized or carry no id, in
/// which case the caller falls back to generic filename derivation.
pub fn recognize_track_id(url: &str) -> Option<String> {
    if !url.contains(RECOGNIZED_HOST) {
        return None;
    }
    TRACK_ID_RE
        .captures(url)
        .map(|captures| captures[1].to_string())
}

/// Title and artist as returned by the metadata service; either field may
/// be empty when its lookup failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
}

impl TrackMetadata {
    /// Combine title and artist into a filename candidate.
    ///
    /// An empty title yields `None` even when the artist is known; a lone
    /// artist name is not a usable filename.
    pub fn filename_candidate(&self) -> Option<String> {
        if self.title.is_empty() {
            return None;
        }
        if self.artist.is_empty() {
            Some(self.title.clone())
        } else {
            Some(format!("{}_{}", self.title, self.artist))
        }
    }
}

/// Client for the external track-metadata text endpoints.
pub struct MetadataResolver {
    client: reqwest::Client,
    base_url: String,
}

impl MetadataResolver {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Look up title and artist for a track id.
    ///
    /// The two lookups run concurrently and are both awaited; a failed or
    /// slow artist lookup never discards a successful title lookup.
    pub async fn resolve(&self, track_id: &str) -> TrackMetadata {
        let (title, artist) = tokio::join!(
            self.fetch_field("name", track_id),
            self.fetch_field("artist", track_id),
        );
        debug!(
            track_id,
            title = %title,
            artist = %artist,
            "Resolved track metadata"
        );
        TrackMetadata { title, artist }
    }

    /// Canonical audio endpoint for a track id; replaces the submitted URL
    /// as the fetch target.
    pub fn audio_url(&self, track_id: &str) -> String {
        format!("{}/?type=url&id={}", self.base_url, track_id)
    }

    /// Fetch one text field, mapping every failure to an empty string.
    async fn fetch_field(&self, field: &str, track_id: &str) -> String {
        let url = format!("{}/?type={}&id={}", self.base_url, field, track_id);
        let response = match self
            .client
            .get(&url)
            .header(USER_AGENT, "Mozilla/5.0")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("Metadata lookup for {} failed: {}", field, e);
                return String::new();
            }
        };

        if response.status() != StatusCode::OK {
            debug!(
                "Metadata lookup for {} returned status {}",
                field,
                response.status()
            );
            return String::new();
        }

        match response.text().await {
            Ok(body) => body.trim().to_string(),
            Err(_) => String::new(),
        }
    }
}
