//! HTTP backend.
//!
//! ```text
//! GET  /health                  {"status":"ok"}
//! GET  /search?q=..&stream=1    conversation records (JSON or event stream)
//! POST /playlist                synthesis progress (always an event stream)
//! ```
//!
//! Every request runs on its own thread with its own read-only corpus connection. Event
//! streams are written straight to the socket as a close-delimited `text/event-stream`
//! body so each event reaches the client as soon as it is flushed. Validation failures are
//! plain JSON errors with a 4xx status; once a request validates, the stream head goes out
//! immediately and every later failure (an unreadable corpus included) is the terminal
//! `error` event. The socket is only closed
//! after the handler returns when the client sent `Connection: close`; clients that keep the
//! connection alive must stop reading at the terminal event.

pub mod params;

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};
use serde::Serialize;
use tiny_http::{Header, Method, Request, Response, Server};

use crate::aggregator::{self, Conversations};
use crate::config::Config;
use crate::corpus::SqliteCorpus;
use crate::filters::compile;
use crate::models::{ConversationRecord, PlaylistRun};
use crate::protocol::{Completion, EventWriter, Terminal, Unit, stream_units};
use crate::synth::catalog::ADD_BATCH_LIMIT;
use crate::synth::spotify::DEFAULT_API_BASE;
use crate::synth::{Catalog, SpotifyCatalog, SynthesisError, Synthesizer};

const MAX_BODY_BYTES: u64 = 1024 * 1024;
const STREAM_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
    Content-Type: text/event-stream\r\n\
    Cache-Control: no-cache\r\n\
    Connection: close\r\n\r\n";

/// Builds a catalog client for one access token
pub type CatalogFactory = dyn Fn(&str) -> Box<dyn Catalog> + Send + Sync;

/// Read-only state shared by all request threads
pub struct ServerContext {
    corpus_path: PathBuf,
    access_token: Option<String>,
    batch_size: usize,
    catalog_factory: Box<CatalogFactory>,
}

impl ServerContext {
    pub fn new(corpus_path: PathBuf) -> Self {
        Self {
            corpus_path,
            access_token: None,
            batch_size: ADD_BATCH_LIMIT,
            catalog_factory: Box::new(|token: &str| -> Box<dyn Catalog> {
                Box::new(SpotifyCatalog::new(DEFAULT_API_BASE, token, Duration::from_secs(15)))
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let api_base = config.catalog.api_base.clone();
        let timeout = config.timeout();
        Self::new(config.corpus_path())
            .with_access_token(config.access_token().map(str::to_string))
            .with_batch_size(config.batch_size())
            .with_catalog(move |token| Box::new(SpotifyCatalog::new(&api_base, token, timeout)))
    }

    /// Token used when a request carries no `Authorization` header
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_catalog<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Box<dyn Catalog> + Send + Sync + 'static,
    {
        self.catalog_factory = Box::new(factory);
        self
    }
}

pub fn bind(addr: &str) -> Result<Server> {
    Server::http(addr).map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))
}

/// Accept requests until the server is dropped or unblocked
pub fn serve(server: Server, context: Arc<ServerContext>) {
    for request in server.incoming_requests() {
        let context = Arc::clone(&context);
        let spawned = thread::Builder::new()
            .name("request".to_string())
            .spawn(move || handle(request, &context));
        if let Err(e) = spawned {
            error!("Failed to spawn request thread: {}", e);
        }
    }
}

fn header(field: &str, value: &str) -> io::Result<Header> {
    Header::from_bytes(field, value).map_err(|_| io::Error::other("invalid header"))
}

fn header_value(request: &Request, field: &'static str) -> Option<String> {
    request.headers().iter().find(|h| h.field.equiv(field)).map(|h| h.value.as_str().to_string())
}

fn respond_json<T: Serialize>(request: Request, status: u16, body: &T) -> io::Result<()> {
    let text = serde_json::to_string(body).map_err(io::Error::other)?;
    let mut response = Response::from_string(text).with_status_code(status);
    response.add_header(header("Content-Type", "application/json")?);
    request.respond(response)
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn respond_error(request: Request, status: u16, message: &str) -> io::Result<()> {
    debug!("Responding {}: {}", status, message);
    respond_json(request, status, &ErrorBody { error: message })
}

#[derive(Serialize)]
struct SearchBody<'a> {
    results: &'a [ConversationRecord],
    count: usize,
}

/// Take over the connection and write the stream head
fn start_stream(request: Request) -> io::Result<EventWriter<Box<dyn Write + Send>>> {
    let mut out = request.into_writer();
    out.write_all(STREAM_HEAD)?;
    out.flush()?;
    Ok(EventWriter::new(out))
}

fn handle(request: Request, context: &ServerContext) {
    let url = request.url().to_string();
    let method = request.method().clone();
    let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
    debug!("{} {}", method, path);

    let outcome = match (&method, path) {
        (Method::Get, "/health") => {
            respond_json(request, 200, &serde_json::json!({ "status": "ok" }))
        }
        (Method::Get, "/search") => handle_search(request, query, context),
        (Method::Post, "/playlist") => handle_playlist(request, context),
        (_, "/health" | "/search" | "/playlist") => {
            respond_error(request, 405, "Method not allowed")
        }
        _ => respond_error(request, 404, "Not found"),
    };
    if let Err(e) = outcome {
        debug!("{} {}: client went away ({})", method, path, e);
    }
}

fn open_corpus(context: &ServerContext) -> Result<SqliteCorpus> {
    SqliteCorpus::open(&context.corpus_path).inspect_err(|e| error!("{:#}", e))
}

fn handle_search(request: Request, query: &str, context: &ServerContext) -> io::Result<()> {
    let search = match params::search_request(query) {
        Ok(search) => search,
        Err(e) => return respond_error(request, 400, &format!("{:#}", e)),
    };
    let filter = match compile(&search) {
        Ok(filter) => filter,
        Err(e) => return respond_error(request, 400, &e.to_string()),
    };

    if !search.stream {
        let corpus = match open_corpus(context) {
            Ok(corpus) => corpus,
            Err(e) => return respond_error(request, 500, &format!("{:#}", e)),
        };
        return match aggregator::search(&corpus, &filter) {
            Ok(records) => {
                let body = SearchBody { results: &records, count: records.len() };
                respond_json(request, 200, &body)
            }
            Err(e) => respond_error(request, 500, &format!("{:#}", e)),
        };
    }

    let writer = start_stream(request)?;
    let corpus = match open_corpus(context) {
        Ok(corpus) => corpus,
        Err(e) => return writer.finish(Terminal::Error(format!("{:#}", e))),
    };
    let conversations = match Conversations::new(&corpus, &filter) {
        Ok(conversations) => conversations,
        Err(e) => return writer.finish(Terminal::Error(format!("{:#}", e))),
    };
    let sent = stream_units(writer, conversations.map(|r| r.map(Unit::Result)), |results| {
        Completion::Search { results }
    })?;
    info!("Streamed {} conversations", sent);
    Ok(())
}

fn handle_playlist(mut request: Request, context: &ServerContext) -> io::Result<()> {
    let token = header_value(&request, "Authorization")
        .and_then(|value| params::bearer_token(&value).map(str::to_string))
        .or_else(|| context.access_token.clone());
    let content_type = header_value(&request, "Content-Type");

    let mut body = String::new();
    if let Err(e) = request.as_reader().take(MAX_BODY_BYTES).read_to_string(&mut body) {
        return respond_error(request, 400, &format!("Unreadable body: {}", e));
    }
    let playlist = match params::playlist_request(content_type.as_deref(), &body)
        .and_then(|playlist| params::validate_playlist(&playlist).map(|_| playlist))
    {
        Ok(playlist) => playlist,
        Err(e) => return respond_error(request, 400, &format!("{:#}", e)),
    };
    let Some(token) = token else {
        return respond_error(request, 401, "Missing catalog access token");
    };

    let mut writer = start_stream(request)?;
    let corpus = match open_corpus(context) {
        Ok(corpus) => corpus,
        Err(e) => return writer.finish(Terminal::Error(format!("{:#}", e))),
    };
    let catalog = (context.catalog_factory)(&token);
    let synthesizer = Synthesizer::new(&corpus, &*catalog).with_batch_size(context.batch_size);
    let mut run = PlaylistRun::new(playlist);

    match synthesizer.run(&mut run, &mut writer) {
        Ok(summary) => writer.finish(Terminal::Complete(Completion::Playlist(summary))),
        Err(SynthesisError::Fatal(message)) => writer.finish(Terminal::Error(message)),
        Err(SynthesisError::Cancelled) => {
            warn!("Run {} abandoned by client", run.id);
            Ok(())
        }
    }
}
