use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a track candidate.
///
/// Canonical web URLs and `spotify:` URIs collapse to the catalog ID without any network
/// access. Short links cannot be decoded offline and are kept as given until the catalog
/// resolves them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TrackKey {
    Canonical(String),
    ShortLink(String),
}

impl TrackKey {
    pub fn canonical_id(&self) -> Option<&str> {
        match self {
            TrackKey::Canonical(id) => Some(id),
            TrackKey::ShortLink(_) => None,
        }
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKey::Canonical(id) => write!(f, "spotify:track:{}", id),
            TrackKey::ShortLink(url) => f.write_str(url),
        }
    }
}

/// A track link found in a message, with the time it was shared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackReference {
    pub key: TrackKey,
    pub sent_at: DateTime<Utc>,
}
