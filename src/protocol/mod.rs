//! Push-event line protocol shared by the server and the stream consumer.
//!
//! Each event is one `data: <json>` line followed by a blank line. A stream carries any
//! number of non-terminal events (`result`, `progress`), then exactly one terminal event
//! (`complete` or `error`), then the transport sentinel `data: [DONE]`.
//!
//! ```text
//! data: {"chat_id":10,"display_name":"Roadtrip",...}
//!
//! data: {"status":"complete","results":1}
//!
//! data: [DONE]
//! ```

pub mod decoder;
pub mod encoder;
pub mod event;

pub use decoder::{Frame, decode_line};
pub use encoder::{EventWriter, encode_event, stream_units};
pub use event::{Completion, StatusFrame, StreamEvent, Terminal, Unit};

/// Line prefix of every event
pub const DATA_PREFIX: &str = "data:";
/// Payload of the transport end-of-stream sentinel
pub const DONE_SENTINEL: &str = "[DONE]";
