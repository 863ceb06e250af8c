//! Chat Playlist Explorer - find the conversations where music was shared and turn them into
//! playlists
//!
//! This library reads a local message database (SQLite, opened read-only) and provides:
//!
//! - Filtered search over conversations, aggregated per conversation and streamed as events
//! - Extraction of music-service track links, canonical and shortened
//! - Playlist synthesis against the streaming catalog, with progress streamed as it runs
//! - A line-oriented event protocol, a `tiny_http` backend serving it, and a cancellable
//!   client-side consumer
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use chat_playlist_explorer::{SqliteCorpus, compile, parse_filter, search};
//!
//! let corpus = SqliteCorpus::open(Path::new("/Users/alice/Library/Messages/chat.db"))?;
//! let filter = compile(&parse_filter("roadtrip since:2024-06-01")?)?;
//! for record in search(&corpus, &filter)? {
//!     println!("[{}] {}", record.chat_id, record.display_name);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod aggregator;
pub mod cli;
pub mod client;
pub mod clipboard;
pub mod config;
pub mod corpus;
pub mod filters;
pub mod links;
pub mod models;
pub mod protocol;
pub mod server;
pub mod synth;
pub mod utils;

// Re-export commonly used types
pub use aggregator::{Conversations, search};
pub use client::{StreamCoordinator, StreamHandle};
pub use corpus::SqliteCorpus;
pub use filters::{compile, parse_filter};
pub use links::extract_track_keys;
pub use models::{ConversationRecord, SearchRequest};
pub use synth::Synthesizer;
pub use utils::paths::format_path_with_tilde;
