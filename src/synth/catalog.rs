//! External catalog abstraction.

use std::collections::HashSet;

use thiserror::Error;

/// Max track IDs per catalog lookup
pub const LOOKUP_BATCH_LIMIT: usize = 50;
/// Max tracks per playlist add
pub const ADD_BATCH_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// 401/403: the access token is missing, expired or lacks a scope
    #[error("Catalog rejected the access token: {0}")]
    Unauthorized(String),
    #[error("Catalog rate limit exceeded (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Catalog request failed: {0}")]
    Request(String),
    #[error("Unexpected catalog response: {0}")]
    BadResponse(String),
}

impl CatalogError {
    /// Errors that end a whole synthesis run instead of one track
    pub fn is_fatal(&self) -> bool {
        matches!(self, CatalogError::Unauthorized(_))
    }
}

/// A playlist owned by the authenticated user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPlaylist {
    pub id: String,
    pub name: String,
    pub url: String,
}

/// A track confirmed by the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTrack {
    pub id: String,
    pub name: String,
}

/// Interface to the music service that owns tracks and playlists.
pub trait Catalog: Send + Sync {
    /// Exact-name match among the user's playlists
    fn find_playlist(&self, name: &str) -> Result<Option<CatalogPlaylist>, CatalogError>;
    /// Create a private playlist for the user
    fn create_playlist(&self, name: &str) -> Result<CatalogPlaylist, CatalogError>;
    fn playlist(&self, id: &str) -> Result<CatalogPlaylist, CatalogError>;
    /// IDs of every track currently in the playlist
    fn playlist_track_ids(&self, id: &str) -> Result<HashSet<String>, CatalogError>;
    /// Follow a short link to its canonical track ID
    fn resolve_short_link(&self, url: &str) -> Result<String, CatalogError>;
    /// Look up at most [`LOOKUP_BATCH_LIMIT`] IDs; the result is aligned with `ids`
    fn lookup_tracks(&self, ids: &[String]) -> Result<Vec<Option<CatalogTrack>>, CatalogError>;
    /// Append at most [`ADD_BATCH_LIMIT`] tracks
    fn add_tracks(&self, playlist_id: &str, ids: &[String]) -> Result<(), CatalogError>;
}

pub fn track_uri(id: &str) -> String {
    format!("spotify:track:{}", id)
}

pub fn playlist_url(id: &str) -> String {
    format!("https://open.spotify.com/playlist/{}", id)
}
