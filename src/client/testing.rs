//! Channel-backed stream sources for the client unit tests.

use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};

use super::source::{StreamRequest, StreamSource};

/// Reader fed from a channel; EOF once the sender is dropped.
///
/// With a poll interval it behaves like a socket with a read timeout: an idle interval
/// fails the read with `WouldBlock`.
struct ChannelReader {
    rx: Receiver<String>,
    pending: Cursor<Vec<u8>>,
    poll: Option<Duration>,
    released: Arc<AtomicUsize>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.pending.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            let chunk = match self.poll {
                Some(interval) => match self.rx.recv_timeout(interval) {
                    Ok(chunk) => chunk,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(io::Error::new(io::ErrorKind::WouldBlock, "idle"));
                    }
                    Err(RecvTimeoutError::Disconnected) => return Ok(0),
                },
                None => match self.rx.recv() {
                    Ok(chunk) => chunk,
                    Err(_) => return Ok(0),
                },
            };
            self.pending = Cursor::new(chunk.into_bytes());
        }
    }
}

impl Drop for ChannelReader {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Each open hands out the next queued stream; the senders stay with the test
pub(crate) struct ChannelSource {
    streams: Mutex<Vec<Receiver<String>>>,
    poll: Option<Duration>,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl ChannelSource {
    /// A source with a single stream
    pub(crate) fn new() -> (Arc<Self>, Sender<String>) {
        let (source, mut senders) = Self::with_streams(1, None);
        (source, senders.remove(0))
    }

    pub(crate) fn with_streams(
        count: usize,
        poll: Option<Duration>,
    ) -> (Arc<Self>, Vec<Sender<String>>) {
        let (senders, mut receivers): (Vec<Sender<String>>, Vec<Receiver<String>>) =
            (0..count).map(|_| mpsc::channel()).unzip();
        receivers.reverse();
        let source = Self {
            streams: Mutex::new(receivers),
            poll,
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        };
        (Arc::new(source), senders)
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Readers dropped so far
    pub(crate) fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl StreamSource for ChannelSource {
    fn open(&self, _request: &StreamRequest) -> Result<Box<dyn BufRead + Send>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let rx = self.streams.lock().unwrap().pop().ok_or_else(|| anyhow!("no stream queued"))?;
        let reader = ChannelReader {
            rx,
            pending: Cursor::new(Vec::new()),
            poll: self.poll,
            released: Arc::clone(&self.released),
        };
        Ok(Box::new(BufReader::new(reader)))
    }
}
