use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::DateRange;

/// What the caller asked the synthesizer to do.
///
/// Conversations are selected by identity key, never by display name, so duplicate names
/// cannot make the selection ambiguous.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
    #[serde(default)]
    pub chat_ids: Vec<i64>,
    #[serde(default, flatten)]
    pub date_range: DateRange,
}

impl PlaylistRequest {
    pub fn target_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }

    pub fn target_id(&self) -> Option<&str> {
        self.playlist_id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }
}

/// Running totals of a synthesis run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    /// Unique track references collected from the selected conversations
    pub found: usize,
    /// References the catalog resolved to a playable track
    pub resolved: usize,
    pub added: usize,
    /// Already in the target playlist, or resolved to a track collected earlier in the run
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Collecting,
    Resolving,
    Adding,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Collecting => "collecting",
            Stage::Resolving => "resolving",
            Stage::Adding => "adding",
        }
    }
}

/// Progress payload of the synthesis stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub message: String,
    /// Percent complete, 0..=100
    pub progress: u8,
    #[serde(default)]
    pub totals: RunTotals,
}

/// Reference to the playlist a run wrote into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRef {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackFailure {
    pub track: String,
    pub reason: String,
}

/// Final report of a synthesis run. Partial failure is still a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub tracks_added: usize,
    pub tracks_found: usize,
    #[serde(default)]
    pub tracks_skipped: usize,
    #[serde(default)]
    pub tracks_failed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TrackFailure>,
    pub playlist: PlaylistRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Complete,
    Failed(String),
    Cancelled,
}

/// One invocation of the synthesis pipeline
#[derive(Debug, Clone)]
pub struct PlaylistRun {
    pub id: Uuid,
    pub request: PlaylistRequest,
    pub totals: RunTotals,
    pub failures: Vec<TrackFailure>,
    pub status: RunStatus,
}

impl PlaylistRun {
    pub fn new(request: PlaylistRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            totals: RunTotals::default(),
            failures: Vec::new(),
            status: RunStatus::Running,
        }
    }

    pub fn record_failure(&mut self, track: impl Into<String>, reason: impl Into<String>) {
        self.totals.failed += 1;
        self.failures.push(TrackFailure { track: track.into(), reason: reason.into() });
    }

    pub fn summary(&self, playlist: PlaylistRef) -> PlaylistSummary {
        PlaylistSummary {
            tracks_added: self.totals.added,
            tracks_found: self.totals.found,
            tracks_skipped: self.totals.skipped,
            tracks_failed: self.totals.failed,
            failures: self.failures.clone(),
            playlist,
        }
    }
}
