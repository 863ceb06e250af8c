//! Cancellable stream consumer.
//!
//! A [`StreamHandle`] owns one connection and the [`Projection`] built from its events.
//! A background thread reads lines, decodes them and applies each event under the handle's
//! lock. Cancelling takes the same lock, so once [`StreamHandle::cancel`] returns no further
//! event can touch the projection. The reader checks the flag between lines and after every
//! idle read, then drops the connection; sources that poll with a read timeout (see
//! [`HttpSource`](super::HttpSource)) release it within one poll interval even when the
//! backend is silent.
//!
//! # Lifecycle
//!
//! ```text
//! idle -> requesting -> streaming -> complete | error | cancelled
//! ```
//!
//! Terminal phases are final. Events decoded after a terminal are ignored.

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use super::source::{Intent, StreamRequest, StreamSource};
use crate::models::{ConversationRecord, ProgressUpdate};
use crate::protocol::{Completion, Frame, StreamEvent, decode_line};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Requesting,
    Streaming,
    Complete,
    Error,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Error | Phase::Cancelled)
    }
}

/// Client-side view of one stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub phase: Phase,
    /// Search results in receipt order
    pub results: Vec<ConversationRecord>,
    /// Latest synthesis progress
    pub progress: Option<ProgressUpdate>,
    pub completion: Option<Completion>,
    pub error: Option<String>,
    /// Lines dropped as malformed or undecodable
    pub skipped_lines: usize,
}

impl Projection {
    /// Apply one event. Returns false when the projection is already terminal.
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = Phase::Streaming;
        match event {
            StreamEvent::Result(record) => self.results.push(record.clone()),
            StreamEvent::Progress(update) => self.progress = Some(update.clone()),
            StreamEvent::Complete(completion) => {
                self.completion = Some(completion.clone());
                self.phase = Phase::Complete;
            }
            StreamEvent::Error(message) => {
                self.error = Some(message.clone());
                self.phase = Phase::Error;
            }
        }
        true
    }
}

/// Called with every applied event and the projection after applying it
pub type Observer = Box<dyn FnMut(&StreamEvent, &Projection) + Send>;

struct Inner {
    projection: Projection,
    observer: Option<Observer>,
}

struct Shared {
    state: Mutex<Inner>,
    changed: Condvar,
    cancelled: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, event: &StreamEvent) -> bool {
        let mut inner = self.lock();
        if self.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        let Inner { projection, observer } = &mut *inner;
        if !projection.apply(event) {
            return false;
        }
        if let Some(observer) = observer {
            observer(event, projection);
        }
        if projection.phase.is_terminal() {
            self.changed.notify_all();
        }
        true
    }

    fn connected(&self) {
        let mut inner = self.lock();
        if inner.projection.phase == Phase::Requesting {
            inner.projection.phase = Phase::Streaming;
        }
    }

    fn skipped(&self) {
        let mut inner = self.lock();
        if !inner.projection.phase.is_terminal() {
            inner.projection.skipped_lines += 1;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Handle to one in-flight stream. Clones share the same stream.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<Shared>,
    intent: Intent,
}

impl StreamHandle {
    /// Open `request` on a reader thread and return immediately
    pub fn start(
        source: Arc<dyn StreamSource>,
        request: StreamRequest,
        observer: Option<Observer>,
    ) -> Self {
        let intent = request.intent();
        let shared = Arc::new(Shared {
            state: Mutex::new(Inner {
                projection: Projection { phase: Phase::Requesting, ..Default::default() },
                observer,
            }),
            changed: Condvar::new(),
            cancelled: AtomicBool::new(false),
        });

        let reader_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("stream-{:?}", intent).to_lowercase())
            .spawn(move || read_stream(&*source, &request, &reader_shared));
        if let Err(e) = spawned {
            shared.apply(&StreamEvent::Error(format!("Failed to start stream reader: {}", e)));
        }

        Self { shared, intent }
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn snapshot(&self) -> Projection {
        self.shared.lock().projection.clone()
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().projection.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase().is_terminal()
    }

    /// Stop applying events. No-op once the stream has ended.
    pub fn cancel(&self) {
        let mut inner = self.shared.lock();
        if inner.projection.phase.is_terminal() {
            return;
        }
        self.shared.cancelled.store(true, Ordering::SeqCst);
        inner.projection.phase = Phase::Cancelled;
        self.shared.changed.notify_all();
        debug!("Cancelled {:?} stream", self.intent);
    }

    /// Block until the stream reaches a terminal phase
    pub fn wait(&self) -> Projection {
        let inner = self.shared.lock();
        let inner = self
            .shared
            .changed
            .wait_while(inner, |inner| !inner.projection.phase.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        inner.projection.clone()
    }

    /// Like [`wait`](Self::wait), but cancels the stream when `timeout` expires first
    pub fn wait_timeout(&self, timeout: Duration) -> Projection {
        let inner = self.shared.lock();
        let (inner, result) = self
            .shared
            .changed
            .wait_timeout_while(inner, timeout, |inner| !inner.projection.phase.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        drop(inner);
        if result.timed_out() {
            debug!("{:?} stream deadline of {:?} expired", self.intent, timeout);
            self.cancel();
        }
        self.snapshot()
    }
}

/// Idle reads fail with one of these when the source polls with a read timeout
fn is_idle(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn read_stream(source: &dyn StreamSource, request: &StreamRequest, shared: &Shared) {
    let mut reader = match source.open(request) {
        Ok(reader) => reader,
        Err(e) => {
            shared.apply(&StreamEvent::Error(format!("{:#}", e)));
            return;
        }
    };
    if shared.is_cancelled() {
        return;
    }
    shared.connected();

    let intent = request.intent();
    // Bytes of a line split across idle timeouts stay here until its newline arrives
    let mut line = Vec::new();
    loop {
        if shared.is_cancelled() {
            debug!("Dropping {:?} stream after cancel", intent);
            return;
        }
        match reader.read_until(b'\n', &mut line) {
            Ok(0) if line.is_empty() => break,
            Ok(_) => {}
            Err(e) if is_idle(&e) => continue,
            Err(e) => {
                shared.apply(&StreamEvent::Error(format!("Stream read failed: {}", e)));
                return;
            }
        }

        let raw = std::mem::take(&mut line);
        let finished = match String::from_utf8(raw) {
            Ok(text) => apply_line(shared, intent, trim_line_end(&text)),
            Err(e) => {
                warn!("Skipping stream line that is not UTF-8: {}", e);
                shared.skipped();
                false
            }
        };
        if finished {
            return;
        }
    }

    if !shared.is_cancelled() {
        shared.apply(&StreamEvent::Error("Stream ended before a terminal event".to_string()));
    }
}

fn trim_line_end(text: &str) -> &str {
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.strip_suffix('\r').unwrap_or(text)
}

/// Decode and apply one line. Returns true once the stream is over.
fn apply_line(shared: &Shared, intent: Intent, line: &str) -> bool {
    match decode_line(line) {
        Frame::KeepAlive => false,
        Frame::Event(event) => {
            shared.apply(&event);
            event.is_terminal()
        }
        Frame::Done => {
            end_without_terminal(shared, intent);
            true
        }
        Frame::Malformed(reason) => {
            warn!("Skipping malformed stream line: {}", reason);
            shared.skipped();
            false
        }
        Frame::BadResult(reason) => {
            warn!("Skipping undecodable result: {}", reason);
            shared.skipped();
            false
        }
        Frame::Unknown(value) => {
            debug!("Ignoring unrecognized payload: {}", value);
            false
        }
    }
}

/// `[DONE]` without a preceding terminal: a search is simply over, a synthesis is not
fn end_without_terminal(shared: &Shared, intent: Intent) {
    let event = match intent {
        Intent::Search => {
            let results = shared.lock().projection.results.len();
            StreamEvent::Complete(Completion::Search { results })
        }
        Intent::Synthesis => {
            StreamEvent::Error("Synthesis stream ended without a summary".to_string())
        }
    };
    shared.apply(&event);
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Instant;

    use anyhow::{Result, anyhow};
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::client::testing::ChannelSource;
    use crate::models::{PlaylistRequest, SearchRequest, Stage};

    struct FixedSource(Vec<u8>);

    impl StreamSource for FixedSource {
        fn open(&self, _request: &StreamRequest) -> Result<Box<dyn BufRead + Send>> {
            Ok(Box::new(Cursor::new(self.0.clone())))
        }
    }

    fn fixed(body: impl Into<Vec<u8>>) -> Arc<FixedSource> {
        Arc::new(FixedSource(body.into()))
    }

    struct RefusedSource;

    impl StreamSource for RefusedSource {
        fn open(&self, _request: &StreamRequest) -> Result<Box<dyn BufRead + Send>> {
            Err(anyhow!("Connection to backend failed: connection refused"))
        }
    }

    fn search() -> StreamRequest {
        StreamRequest::Search(SearchRequest { query: Some("roadtrip".into()), ..Default::default() })
    }

    fn result_line(chat_id: i64) -> String {
        let record = ConversationRecord {
            chat_id,
            display_name: "Roadtrip".to_string(),
            participant_count: 2,
            message_count: 4,
            link_message_count: 1,
            last_message_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            participants: vec![],
        };
        format!("data: {}\n\n", serde_json::to_string(&record).unwrap())
    }

    #[test]
    fn test_projection_ignores_events_after_terminal() {
        let mut projection = Projection::default();
        assert!(projection.apply(&StreamEvent::Complete(Completion::Search { results: 0 })));
        assert!(!projection.apply(&StreamEvent::Error("late".into())));
        assert_eq!(projection.phase, Phase::Complete);
        assert!(projection.error.is_none());
    }

    #[test]
    fn test_error_after_three_results_keeps_them() {
        let body = format!(
            "{}{}{}data: {{\"status\":\"error\",\"message\":\"corpus went away\"}}\n\n{}",
            result_line(1),
            result_line(2),
            result_line(3),
            result_line(4)
        );
        let handle = StreamHandle::start(fixed(body), search(), None);
        let projection = handle.wait();
        assert_eq!(projection.phase, Phase::Error);
        assert_eq!(projection.results.len(), 3);
        assert_eq!(projection.error.as_deref(), Some("corpus went away"));
    }

    #[test]
    fn test_complete_and_done() {
        let body = format!(
            "{}data: {{\"status\":\"complete\",\"results\":1}}\n\ndata: [DONE]\n\n",
            result_line(10)
        );
        let handle = StreamHandle::start(fixed(body), search(), None);
        let projection = handle.wait();
        assert_eq!(projection.phase, Phase::Complete);
        assert_eq!(projection.completion, Some(Completion::Search { results: 1 }));
    }

    #[test]
    fn test_done_alone_completes_a_search() {
        let body = format!("{}data: [DONE]\n\n", result_line(10));
        let projection = StreamHandle::start(fixed(body), search(), None).wait();
        assert_eq!(projection.phase, Phase::Complete);
        assert_eq!(projection.completion, Some(Completion::Search { results: 1 }));
    }

    #[test]
    fn test_malformed_lines_are_counted_and_skipped() {
        let body = format!(
            "event: ping\ndata: {{not json\ndata: {{\"chat_id\":\"x\"}}\n{}data: [DONE]\n",
            result_line(5)
        );
        let projection = StreamHandle::start(fixed(body), search(), None).wait();
        assert_eq!(projection.skipped_lines, 3);
        assert_eq!(projection.results.len(), 1);
        assert_eq!(projection.phase, Phase::Complete);
    }

    #[test]
    fn test_eof_without_terminal_is_an_error() {
        let body = result_line(7);
        let projection = StreamHandle::start(fixed(body), search(), None).wait();
        assert_eq!(projection.phase, Phase::Error);
        assert_eq!(projection.results.len(), 1);
    }

    #[test]
    fn test_transport_error_before_data() {
        let projection = StreamHandle::start(Arc::new(RefusedSource), search(), None).wait();
        assert_eq!(projection.phase, Phase::Error);
        assert!(projection.error.unwrap().contains("connection refused"));
    }

    #[test]
    fn test_synthesis_done_without_summary_is_an_error() {
        let request =
            StreamRequest::Playlist { request: PlaylistRequest::default(), token: None };
        let body = "data: {\"status\":\"progress\",\"stage\":\"collecting\",\"message\":\"m\",\
                    \"progress\":5}\n\ndata: [DONE]\n\n"
            .to_string();
        let projection = StreamHandle::start(fixed(body), request, None).wait();
        assert_eq!(projection.phase, Phase::Error);
        assert_eq!(projection.progress.unwrap().stage, Stage::Collecting);
    }

    #[test]
    fn test_cancel_freezes_projection() {
        let (source, tx) = ChannelSource::new();
        let handle = StreamHandle::start(source, search(), None);
        tx.send(result_line(1)).unwrap();
        tx.send(result_line(2)).unwrap();
        while handle.snapshot().results.len() < 2 {
            thread::sleep(Duration::from_millis(5));
        }

        handle.cancel();
        let frozen = handle.snapshot();
        let _ = tx.send(result_line(3));
        let _ = tx.send("data: {\"status\":\"complete\",\"results\":3}\n\n".to_string());
        thread::sleep(Duration::from_millis(50));

        assert_eq!(frozen.phase, Phase::Cancelled);
        assert_eq!(handle.snapshot(), frozen);
        assert!(frozen.error.is_none());
    }

    #[test]
    fn test_wait_timeout_cancels() {
        let (source, tx) = ChannelSource::new();
        let handle = StreamHandle::start(source, search(), None);
        tx.send(result_line(1)).unwrap();
        let projection = handle.wait_timeout(Duration::from_millis(100));
        assert_eq!(projection.phase, Phase::Cancelled);
        assert!(projection.error.is_none());
        drop(tx);
    }

    #[test]
    fn test_observer_sees_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: Observer = Box::new(move |event: &StreamEvent, projection: &Projection| {
            sink.lock().unwrap().push((event.kind(), projection.results.len()));
        });
        let body = format!(
            "{}{}data: {{\"status\":\"complete\",\"results\":2}}\n\n",
            result_line(1),
            result_line(2)
        );
        StreamHandle::start(fixed(body), search(), Some(observer)).wait();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("result", 1), ("result", 2), ("complete", 2)]
        );
    }

    #[test]
    fn test_cancel_releases_idle_connection() {
        let (source, senders) = ChannelSource::with_streams(1, Some(Duration::from_millis(10)));
        let handle = StreamHandle::start(source.clone(), search(), None);
        senders[0].send(result_line(1)).unwrap();
        while handle.snapshot().results.is_empty() {
            thread::sleep(Duration::from_millis(5));
        }

        // The backend stays connected but silent
        handle.cancel();
        let deadline = Instant::now() + Duration::from_secs(2);
        while source.released() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(source.released(), 1);
        assert_eq!(handle.phase(), Phase::Cancelled);
        drop(senders);
    }

    #[test]
    fn test_line_split_across_idle_reads() {
        let (source, senders) = ChannelSource::with_streams(1, Some(Duration::from_millis(5)));
        let handle = StreamHandle::start(source, search(), None);
        senders[0].send("data: {\"status\":\"comp".to_string()).unwrap();
        thread::sleep(Duration::from_millis(40));
        senders[0].send("lete\",\"results\":0}\r\n\r\n".to_string()).unwrap();

        let projection = handle.wait_timeout(Duration::from_secs(5));
        assert_eq!(projection.phase, Phase::Complete);
        assert_eq!(projection.completion, Some(Completion::Search { results: 0 }));
        assert_eq!(projection.skipped_lines, 0);
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let mut body = b"data: \xff\xfe\n\n".to_vec();
        body.extend_from_slice(b"data: {\"status\":\"complete\",\"results\":0}\n\n");
        let projection = StreamHandle::start(fixed(body), search(), None).wait();
        assert_eq!(projection.skipped_lines, 1);
        assert_eq!(projection.phase, Phase::Complete);
    }
}
