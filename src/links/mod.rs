//! Music link extraction.
//!
//! Finds Spotify links in message text and normalizes them:
//!
//! - `https://open.spotify.com/track/<id>` (optionally `/intl-xx/` or `/embed/`, any query)
//! - `spotify:track:<id>`
//! - `https://spotify.link/<code>` and `https://spoti.fi/<code>` short links
//!
//! Canonical forms collapse to the 22-character track ID offline. Short links are kept as
//! given. Album, playlist, artist, show and episode links count as music links for
//! conversation statistics but never become [`TrackKey`](crate::models::TrackKey)s.

pub mod extractor;

pub use extractor::{
    LinkKind, MusicLink, contains_music_link, extract_track_keys, find_music_links,
    track_references,
};
