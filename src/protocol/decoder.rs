//! Line decoder for the consumer side.
//!
//! Payloads are classified explicitly instead of by trial deserialization:
//!
//! 1. `[DONE]` is the transport sentinel
//! 2. an object with `chat_id` is a search result
//! 3. an object with `status` is a progress / complete / error frame
//! 4. anything else decodes to [`Frame::Unknown`] and is ignored by callers

use serde_json::Value;

use super::event::{StatusFrame, StreamEvent};
use super::{DATA_PREFIX, DONE_SENTINEL};
use crate::models::ConversationRecord;

/// Classification of one received line
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(StreamEvent),
    /// `data: [DONE]`
    Done,
    /// Blank line between events
    KeepAlive,
    /// Line without the `data:` marker, or a payload that is not JSON
    Malformed(String),
    /// Identity-bearing payload that does not decode as a conversation record
    BadResult(String),
    /// Well-formed JSON of an unrecognized shape
    Unknown(Value),
}

pub fn decode_line(line: &str) -> Frame {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Frame::KeepAlive;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Malformed(format!("missing '{}' marker", DATA_PREFIX));
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Frame::Done;
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => return Frame::Malformed(format!("invalid JSON: {}", e)),
    };
    let Some(object) = value.as_object() else {
        return Frame::Unknown(value);
    };

    if object.contains_key("chat_id") {
        return match serde_json::from_value::<ConversationRecord>(value) {
            Ok(record) => Frame::Event(StreamEvent::Result(record)),
            Err(e) => Frame::BadResult(e.to_string()),
        };
    }
    if object.contains_key("status") {
        return match serde_json::from_value::<StatusFrame>(value.clone()) {
            Ok(frame) => Frame::Event(frame.into()),
            Err(_) => Frame::Unknown(value),
        };
    }
    Frame::Unknown(value)
}
