//! Transports that open an event stream.

use std::io::{BufRead, BufReader};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use log::debug;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::models::{PlaylistRequest, SearchRequest};

/// Characters left as-is in query values (RFC 3986 unreserved)
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Logical purpose of a stream. At most one stream per intent is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Search,
    Synthesis,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRequest {
    Search(SearchRequest),
    Playlist { request: PlaylistRequest, token: Option<String> },
}

impl StreamRequest {
    pub fn intent(&self) -> Intent {
        match self {
            StreamRequest::Search(_) => Intent::Search,
            StreamRequest::Playlist { .. } => Intent::Synthesis,
        }
    }
}

/// Longest a read on an idle stream blocks before the consumer checks for cancellation
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Opens the connection for a request and hands back its body as lines.
///
/// Readers may fail with `WouldBlock` or `TimedOut` while the stream is idle; the consumer
/// treats those as "nothing yet" and reads again. Dropping the reader closes the connection.
pub trait StreamSource: Send + Sync {
    fn open(&self, request: &StreamRequest) -> Result<Box<dyn BufRead + Send>>;
}

/// Event streams from a running backend over HTTP
pub struct HttpSource {
    http_client: ureq::Agent,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: &str) -> Self {
        Self::with_poll_interval(base_url, POLL_INTERVAL)
    }

    /// Streams stay open as long as the backend is producing; a read that sees nothing for
    /// `poll` returns to the consumer so a cancelled stream lets go of its socket. The
    /// backend has to send the response head within the same interval.
    pub fn with_poll_interval(base_url: &str, poll: Duration) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(poll)
            .build();
        Self { http_client, base_url: base_url.trim().trim_end_matches('/').to_string() }
    }

    pub fn search_url(&self, request: &SearchRequest) -> String {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(query) = request.query_text() {
            params.push(("q", query.to_string()));
        }
        if let Some(start) = request.date_range.start {
            params.push(("start", start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = request.date_range.end {
            params.push(("end", end.format("%Y-%m-%d").to_string()));
        }
        for participant in request.participant_names() {
            params.push(("participant", participant.to_string()));
        }
        if let Some(contains) = request.contains_text() {
            params.push(("contains", contains.to_string()));
        }
        if request.links_only {
            params.push(("links_only", "true".to_string()));
        }
        params.push(("stream", "true".to_string()));

        let query: Vec<String> = params
            .iter()
            .map(|(key, value)| format!("{}={}", key, utf8_percent_encode(value, QUERY_VALUE)))
            .collect();
        format!("{}/search?{}", self.base_url, query.join("&"))
    }

    /// Event streams are close-delimited, so the connection must not be kept alive
    fn streaming(call: ureq::Request) -> ureq::Request {
        call.set("Accept", "text/event-stream").set("Connection", "close")
    }

    fn check(response: std::result::Result<ureq::Response, ureq::Error>) -> Result<ureq::Response> {
        match response {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                let message = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                    .unwrap_or(body);
                bail!("HTTP {}: {}", code, message.trim())
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(anyhow!("Connection to backend failed: {}", transport))
            }
        }
    }
}

impl StreamSource for HttpSource {
    fn open(&self, request: &StreamRequest) -> Result<Box<dyn BufRead + Send>> {
        let response = match request {
            StreamRequest::Search(search) => {
                let url = self.search_url(search);
                debug!("GET {}", url);
                let call = self.http_client.get(&url);
                Self::check(Self::streaming(call).call())?
            }
            StreamRequest::Playlist { request, token } => {
                let url = format!("{}/playlist", self.base_url);
                debug!("POST {}", url);
                let mut call = Self::streaming(self.http_client.post(&url));
                if let Some(token) = token {
                    call = call.set("Authorization", &format!("Bearer {}", token));
                }
                Self::check(call.send_json(request))?
            }
        };
        Ok(Box::new(BufReader::new(response.into_reader())))
    }
}
