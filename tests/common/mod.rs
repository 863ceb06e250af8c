//! Shared test utilities for integration tests
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::{Result, anyhow};
use chat_playlist_explorer::client::{StreamRequest, StreamSource};
use chat_playlist_explorer::corpus::schema::{create_schema, utc_to_apple_nanos};
use chat_playlist_explorer::synth::catalog::playlist_url;
use chat_playlist_explorer::synth::{Catalog, CatalogError, CatalogPlaylist, CatalogTrack};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tempfile::TempDir;

pub const TRACK_A: &str = "4cOdK2wGLETKBW3PvgPWqT";
pub const TRACK_B: &str = "7GhIk7Il098yCjg4BQjzvb";
pub const TRACK_C: &str = "3n3Ppam7vgaVa1iaRUc9Lp";
pub const TRACK_D: &str = "0VjIjW4GlUZAMYd2vXMi3b";

pub fn track_url(id: &str) -> String {
    format!("https://open.spotify.com/track/{}?si=share", id)
}

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

/// Builder for message databases on disk, laid out like the real `chat.db`
pub struct CorpusBuilder {
    temp_dir: TempDir,
    conn: Connection,
}

impl CorpusBuilder {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let conn = Connection::open(temp_dir.path().join("chat.db")).expect("Failed to open db");
        create_schema(&conn).expect("Failed to create schema");
        Self { temp_dir, conn }
    }

    fn handle(&self, id: &str) -> i64 {
        let existing: Option<i64> = self
            .conn
            .query_row("SELECT ROWID FROM handle WHERE id = ?1", params![id], |r| r.get(0))
            .optional()
            .unwrap();
        existing.unwrap_or_else(|| {
            self.conn.execute("INSERT INTO handle (id) VALUES (?1)", params![id]).unwrap();
            self.conn.last_insert_rowid()
        })
    }

    /// Add a conversation with the given participants
    pub fn chat(self, chat_id: i64, name: &str, handles: &[&str]) -> Self {
        self.conn
            .execute(
                "INSERT INTO chat (ROWID, guid, chat_identifier, display_name) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![chat_id, format!("guid-{}", chat_id), format!("chat{}", chat_id), name],
            )
            .unwrap();
        for handle in handles {
            let handle_id = self.handle(handle);
            self.conn
                .execute(
                    "INSERT INTO chat_handle_join (chat_id, handle_id) VALUES (?1, ?2)",
                    params![chat_id, handle_id],
                )
                .unwrap();
        }
        self
    }

    /// Add a message; `sender: None` is a message from the corpus owner
    pub fn message(self, chat_id: i64, sender: Option<&str>, text: &str, at: DateTime<Utc>) -> Self {
        let handle_id = sender.map(|s| self.handle(s)).unwrap_or(0);
        self.conn
            .execute(
                "INSERT INTO message (guid, text, handle_id, date, is_from_me) \
                 VALUES (lower(hex(randomblob(16))), ?1, ?2, ?3, ?4)",
                params![text, handle_id, utc_to_apple_nanos(at), sender.is_none()],
            )
            .unwrap();
        let message_id = self.conn.last_insert_rowid();
        self.conn
            .execute(
                "INSERT INTO chat_message_join (chat_id, message_id) VALUES (?1, ?2)",
                params![chat_id, message_id],
            )
            .unwrap();
        self
    }

    /// Add a message with a raw `date` column value and possibly NULL text
    pub fn raw_message(self, chat_id: i64, text: Option<&str>, date: i64) -> Self {
        self.conn
            .execute(
                "INSERT INTO message (guid, text, handle_id, date, is_from_me) \
                 VALUES (lower(hex(randomblob(16))), ?1, 0, ?2, 1)",
                params![text, date],
            )
            .unwrap();
        let message_id = self.conn.last_insert_rowid();
        self.conn
            .execute(
                "INSERT INTO chat_message_join (chat_id, message_id) VALUES (?1, ?2)",
                params![chat_id, message_id],
            )
            .unwrap();
        self
    }

    /// Close the connection and return the temp dir plus the database path
    pub fn build(self) -> (TempDir, PathBuf) {
        let path = self.temp_dir.path().join("chat.db");
        drop(self.conn);
        (self.temp_dir, path)
    }
}

impl Default for CorpusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Two group chats called "Roadtrip" (10 and 77) sharing one track, plus an unrelated chat
pub fn roadtrip_corpus() -> (TempDir, PathBuf) {
    CorpusBuilder::new()
        .chat(10, "Roadtrip", &["+15550000001", "+15550000002"])
        .chat(77, "Roadtrip", &["+15550000003"])
        .chat(5, "Book club", &["alice@example.com"])
        .message(10, Some("+15550000001"), &format!("first {}", track_url(TRACK_A)), at(2024, 6, 1))
        .message(10, None, &format!("spotify:track:{}", TRACK_B), at(2024, 6, 2))
        .message(10, Some("+15550000002"), "leaving at 7", at(2024, 6, 3))
        .message(77, Some("+15550000003"), &track_url(TRACK_A), at(2024, 7, 1))
        .message(77, None, &track_url(TRACK_C), at(2024, 7, 2))
        .message(5, Some("alice@example.com"), "chapter 4 for the roadtrip?", at(2024, 5, 1))
        .build()
}

#[derive(Default)]
struct CatalogState {
    playlists: HashMap<String, (String, Vec<String>)>,
    add_calls: Vec<usize>,
    created: usize,
}

/// In-memory catalog that knows every track ID it was built with. Clones share playlists.
#[derive(Clone)]
pub struct MemoryCatalog {
    known: HashSet<String>,
    short_links: HashMap<String, String>,
    state: Arc<Mutex<CatalogState>>,
}

impl MemoryCatalog {
    pub fn new(known: &[&str]) -> Self {
        Self {
            known: known.iter().map(|s| s.to_string()).collect(),
            short_links: HashMap::new(),
            state: Arc::new(Mutex::new(CatalogState::default())),
        }
    }

    pub fn with_short_link(mut self, url: &str, id: &str) -> Self {
        self.short_links.insert(url.to_string(), id.to_string());
        self
    }

    pub fn tracks_in(&self, playlist_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.playlists.get(playlist_id).map(|(_, tracks)| tracks.clone()).unwrap_or_default()
    }

    pub fn add_calls(&self) -> Vec<usize> {
        self.state.lock().unwrap().add_calls.clone()
    }

    pub fn playlists_created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    fn to_playlist(id: &str, name: &str) -> CatalogPlaylist {
        CatalogPlaylist { id: id.to_string(), name: name.to_string(), url: playlist_url(id) }
    }
}

impl Catalog for MemoryCatalog {
    fn find_playlist(&self, name: &str) -> Result<Option<CatalogPlaylist>, CatalogError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .playlists
            .iter()
            .find(|(_, (existing, _))| existing == name)
            .map(|(id, (name, _))| Self::to_playlist(id, name)))
    }

    fn create_playlist(&self, name: &str) -> Result<CatalogPlaylist, CatalogError> {
        let mut state = self.state.lock().unwrap();
        state.created += 1;
        let id = format!("pl{}", state.created);
        state.playlists.insert(id.clone(), (name.to_string(), Vec::new()));
        Ok(Self::to_playlist(&id, name))
    }

    fn playlist(&self, id: &str) -> Result<CatalogPlaylist, CatalogError> {
        let state = self.state.lock().unwrap();
        state
            .playlists
            .get(id)
            .map(|(name, _)| Self::to_playlist(id, name))
            .ok_or_else(|| CatalogError::NotFound(format!("playlist {}", id)))
    }

    fn playlist_track_ids(&self, id: &str) -> Result<HashSet<String>, CatalogError> {
        let state = self.state.lock().unwrap();
        let (_, tracks) =
            state.playlists.get(id).ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        Ok(tracks.iter().cloned().collect())
    }

    fn resolve_short_link(&self, url: &str) -> Result<String, CatalogError> {
        self.short_links.get(url).cloned().ok_or_else(|| CatalogError::NotFound(url.to_string()))
    }

    fn lookup_tracks(&self, ids: &[String]) -> Result<Vec<Option<CatalogTrack>>, CatalogError> {
        Ok(ids
            .iter()
            .map(|id| {
                self.known
                    .contains(id)
                    .then(|| CatalogTrack { id: id.clone(), name: format!("Song {}", id) })
            })
            .collect())
    }

    fn add_tracks(&self, playlist_id: &str, ids: &[String]) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        state.add_calls.push(ids.len());
        let (_, tracks) = state
            .playlists
            .get_mut(playlist_id)
            .ok_or_else(|| CatalogError::NotFound(playlist_id.to_string()))?;
        tracks.extend(ids.iter().cloned());
        Ok(())
    }
}

/// Reader fed from a channel so tests control when each line arrives
pub struct ChannelReader {
    rx: Receiver<String>,
    pending: Cursor<Vec<u8>>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.pending.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            match self.rx.recv() {
                Ok(chunk) => self.pending = Cursor::new(chunk.into_bytes()),
                Err(_) => return Ok(0),
            }
        }
    }
}

/// Stream source whose single stream is written by the test through a [`Sender`]
pub struct ChannelSource {
    rx: Mutex<Option<Receiver<String>>>,
}

impl ChannelSource {
    pub fn new() -> (Self, Sender<String>) {
        let (tx, rx) = mpsc::channel();
        (Self { rx: Mutex::new(Some(rx)) }, tx)
    }
}

impl StreamSource for ChannelSource {
    fn open(&self, _request: &StreamRequest) -> Result<Box<dyn BufRead + Send>> {
        let rx = self.rx.lock().unwrap().take().ok_or_else(|| anyhow!("stream already opened"))?;
        Ok(Box::new(BufReader::new(ChannelReader { rx, pending: Cursor::new(Vec::new()) })))
    }
}

pub fn path_str(path: &Path) -> &str {
    path.to_str().expect("temp paths are UTF-8")
}
