//! Data models shared by the backend and the stream consumer.
//!
//! - [`SearchRequest`] / [`DateRange`] - what the user asked for
//! - [`ConversationRecord`] - one aggregated conversation (keyed by `chat_id`, never by name)
//! - [`MessageUnit`] - a single message loaded while aggregating or collecting tracks
//! - [`TrackReference`] - a normalized music link found in a message
//! - [`PlaylistRequest`], [`PlaylistRun`], [`PlaylistSummary`], [`ProgressUpdate`] - synthesis
//!
//! Everything that crosses the wire derives serde traits; field names are the wire names.

pub mod conversation;
pub mod playlist;
pub mod request;
pub mod track;

pub use conversation::{ConversationRecord, MessageUnit};
pub use playlist::{
    PlaylistRef, PlaylistRequest, PlaylistRun, PlaylistSummary, ProgressUpdate, RunStatus,
    RunTotals, Stage, TrackFailure,
};
pub use request::{DateRange, SearchRequest};
pub use track::{TrackKey, TrackReference};
