//! Event stream encoder.
//!
//! [`EventWriter::send`] takes `&mut self` and may be called any number of times;
//! [`EventWriter::finish`] consumes the writer, so nothing can follow the terminal event.
//! Every event is flushed as soon as it is written.

use std::io::{self, Write};

use anyhow::Result;
use log::debug;

use super::event::{Completion, StatusFrame, StreamEvent, Terminal, Unit};
use super::{DATA_PREFIX, DONE_SENTINEL};

/// Render one event as its wire text, including the trailing blank line
pub fn encode_event(event: &StreamEvent) -> Result<String> {
    let payload = match event {
        StreamEvent::Result(record) => serde_json::to_string(record)?,
        StreamEvent::Progress(update) => {
            serde_json::to_string(&StatusFrame::Progress(update.clone()))?
        }
        StreamEvent::Complete(completion) => {
            serde_json::to_string(&StatusFrame::Complete(completion.clone()))?
        }
        StreamEvent::Error(message) => {
            serde_json::to_string(&StatusFrame::Error { message: message.clone() })?
        }
    };
    Ok(format!("{} {}\n\n", DATA_PREFIX, payload))
}

pub struct EventWriter<W: Write> {
    out: W,
    sent: usize,
}

impl<W: Write> EventWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, sent: 0 }
    }

    /// Non-terminal events written so far
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Write one unit and flush. An error means the client is gone.
    pub fn send(&mut self, unit: &Unit) -> io::Result<()> {
        let event = match unit {
            Unit::Result(record) => StreamEvent::Result(record.clone()),
            Unit::Progress(update) => StreamEvent::Progress(update.clone()),
        };
        self.write_event(&event)?;
        self.sent += 1;
        Ok(())
    }

    /// Write the terminal event and the `[DONE]` sentinel
    pub fn finish(mut self, terminal: Terminal) -> io::Result<()> {
        let event = StreamEvent::from(terminal);
        debug!("Stream finished with {} after {} events", event.kind(), self.sent);
        self.write_event(&event)?;
        write!(self.out, "{} {}\n\n", DATA_PREFIX, DONE_SENTINEL)?;
        self.out.flush()
    }

    fn write_event(&mut self, event: &StreamEvent) -> io::Result<()> {
        let text = encode_event(event).map_err(io::Error::other)?;
        self.out.write_all(text.as_bytes())?;
        self.out.flush()
    }
}

/// Pump a fallible producer into the writer and terminate the stream.
///
/// The first producer error becomes the terminal `error` event; otherwise `complete` is built
/// from the number of units sent. A write failure stops pulling from the producer.
pub fn stream_units<W, I, F>(mut writer: EventWriter<W>, units: I, complete: F) -> io::Result<usize>
where
    W: Write,
    I: IntoIterator<Item = Result<Unit>>,
    F: FnOnce(usize) -> Completion,
{
    for unit in units {
        match unit {
            Ok(unit) => writer.send(&unit)?,
            Err(e) => {
                let sent = writer.sent();
                writer.finish(Terminal::Error(format!("{:#}", e)))?;
                return Ok(sent);
            }
        }
    }
    let sent = writer.sent();
    writer.finish(Terminal::Complete(complete(sent)))?;
    Ok(sent)
}
