use std::collections::HashSet;

use url::Url;

use crate::models::{MessageUnit, TrackKey, TrackReference};

const TRACK_ID_LEN: usize = 22;
const WEB_HOSTS: &[&str] = &["open.spotify.com", "play.spotify.com"];
const SHORT_LINK_HOSTS: &[&str] = &["spotify.link", "spoti.fi", "spotify.app.link"];
const URL_PREFIXES: &[&str] = &["https://", "http://", "spotify:"];
const TRIM_CHARS: &[char] = &['<', '>', '(', ')', '[', ']', '"', '\'', ',', '.', '!', '?', ';'];

/// What a recognized music-service link points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Track,
    Album,
    Playlist,
    Artist,
    Show,
    Episode,
    ShortLink,
    /// Service URL that is not a recognizable resource (profile pages, malformed IDs, ...)
    Other,
}

impl LinkKind {
    fn from_segment(segment: &str) -> Self {
        match segment {
            "track" => LinkKind::Track,
            "album" => LinkKind::Album,
            "playlist" => LinkKind::Playlist,
            "artist" => LinkKind::Artist,
            "show" => LinkKind::Show,
            "episode" => LinkKind::Episode,
            _ => LinkKind::Other,
        }
    }
}

/// A music-service link found in text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicLink {
    pub kind: LinkKind,
    /// Present for tracks with a valid ID and for short links
    pub key: Option<TrackKey>,
    pub url: String,
}

fn is_track_id(candidate: &str) -> bool {
    candidate.len() == TRACK_ID_LEN && candidate.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Locate the start of a URL inside a whitespace-delimited token
fn url_start(token: &str) -> Option<usize> {
    let lower = token.to_ascii_lowercase();
    URL_PREFIXES.iter().filter_map(|prefix| lower.find(prefix)).min()
}

fn classify_resource(kind_segment: &str, id: Option<&str>, url: String) -> MusicLink {
    let kind = LinkKind::from_segment(kind_segment);
    match (kind, id) {
        (LinkKind::Track, Some(id)) if is_track_id(id) => {
            MusicLink { kind, key: Some(TrackKey::Canonical(id.to_string())), url }
        }
        (LinkKind::Track, _) => MusicLink { kind: LinkKind::Other, key: None, url },
        _ => MusicLink { kind, key: None, url },
    }
}

fn parse_uri(candidate: &str) -> Option<MusicLink> {
    let mut parts = candidate.split(':');
    if !parts.next()?.eq_ignore_ascii_case("spotify") {
        return None;
    }
    let kind_segment = parts.next()?.to_ascii_lowercase();
    let id = parts.next();
    Some(classify_resource(&kind_segment, id, candidate.to_string()))
}

fn parse_web(candidate: &str) -> Option<MusicLink> {
    let url = Url::parse(candidate).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    if SHORT_LINK_HOSTS.contains(&host) {
        let has_code =
            url.path_segments().and_then(|mut s| s.next()).is_some_and(|s| !s.is_empty());
        if !has_code {
            return Some(MusicLink { kind: LinkKind::Other, key: None, url: candidate.to_string() });
        }
        return Some(MusicLink {
            kind: LinkKind::ShortLink,
            key: Some(TrackKey::ShortLink(candidate.to_string())),
            url: candidate.to_string(),
        });
    }

    if !WEB_HOSTS.contains(&host) {
        return None;
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    let mut resource = segments
        .iter()
        .copied()
        .skip_while(|seg| seg.starts_with("intl-") || *seg == "embed");

    let Some(kind_segment) = resource.next() else {
        return Some(MusicLink { kind: LinkKind::Other, key: None, url: candidate.to_string() });
    };
    let kind_segment = kind_segment.to_ascii_lowercase();
    Some(classify_resource(&kind_segment, resource.next(), candidate.to_string()))
}

/// Find every music-service link in the text, in order of appearance
pub fn find_music_links(text: &str) -> Vec<MusicLink> {
    let mut links = Vec::new();

    for token in text.split_whitespace() {
        let Some(start) = url_start(token) else {
            continue;
        };
        let candidate = token[start..].trim_matches(TRIM_CHARS);
        if candidate.is_empty() {
            continue;
        }

        let is_uri = candidate.get(..8).is_some_and(|p| p.eq_ignore_ascii_case("spotify:"));
        let parsed = if is_uri {
            parse_uri(candidate)
        } else {
            parse_web(candidate)
        };
        if let Some(link) = parsed {
            links.push(link);
        }
    }

    links
}

/// True when the text contains any music-service link, track or not
pub fn contains_music_link(text: &str) -> bool {
    !find_music_links(text).is_empty()
}

/// Track keys in the text, deduplicated, in order of first appearance
pub fn extract_track_keys(text: &str) -> Vec<TrackKey> {
    let mut seen = HashSet::new();
    find_music_links(text)
        .into_iter()
        .filter_map(|link| link.key)
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

/// Track references across messages, deduplicated by key; the earliest share wins
pub fn track_references(units: &[MessageUnit]) -> Vec<TrackReference> {
    let mut seen = HashSet::new();
    let mut references = Vec::new();
    for unit in units.iter().filter(|u| u.has_link) {
        for key in extract_track_keys(&unit.text) {
            if seen.insert(key.clone()) {
                references.push(TrackReference { key, sent_at: unit.sent_at });
            }
        }
    }
    references
}
