use serde::{Deserialize, Serialize};

use crate::models::{ConversationRecord, PlaylistSummary, ProgressUpdate};

/// A non-terminal unit produced while a stream is running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    Result(ConversationRecord),
    Progress(ProgressUpdate),
}

/// Terminal payload of a successful stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Completion {
    Playlist(PlaylistSummary),
    Search {
        #[serde(default)]
        results: usize,
    },
}

/// The single event that ends a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Complete(Completion),
    Error(String),
}

impl Terminal {
    pub fn search_complete(results: usize) -> Self {
        Terminal::Complete(Completion::Search { results })
    }
}

/// Any event as observed by a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Result(ConversationRecord),
    Progress(ProgressUpdate),
    Complete(Completion),
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete(_) | StreamEvent::Error(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Result(_) => "result",
            StreamEvent::Progress(_) => "progress",
            StreamEvent::Complete(_) => "complete",
            StreamEvent::Error(_) => "error",
        }
    }
}

impl From<Unit> for StreamEvent {
    fn from(unit: Unit) -> Self {
        match unit {
            Unit::Result(record) => StreamEvent::Result(record),
            Unit::Progress(update) => StreamEvent::Progress(update),
        }
    }
}

impl From<Terminal> for StreamEvent {
    fn from(terminal: Terminal) -> Self {
        match terminal {
            Terminal::Complete(completion) => StreamEvent::Complete(completion),
            Terminal::Error(message) => StreamEvent::Error(message),
        }
    }
}

/// Wire shape of every payload that carries a `status` discriminator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatusFrame {
    Progress(ProgressUpdate),
    Complete(Completion),
    Error { message: String },
}

impl From<StatusFrame> for StreamEvent {
    fn from(frame: StatusFrame) -> Self {
        match frame {
            StatusFrame::Progress(update) => StreamEvent::Progress(update),
            StatusFrame::Complete(completion) => StreamEvent::Complete(completion),
            StatusFrame::Error { message } => StreamEvent::Error(message),
        }
    }
}
