//! Read-only access to the message corpus.
//!
//! A [`SqliteCorpus`] wraps one SQLite connection. The server opens a fresh one per request
//! so no connection state is shared between requests.

pub mod query;
pub mod schema;

#[cfg(test)]
pub(crate) mod fixtures;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rayon::prelude::*;
use rusqlite::{Connection, OpenFlags, params, params_from_iter};

use crate::filters::CompiledFilter;
use crate::links::contains_music_link;
use crate::models::{DateRange, MessageUnit};
use crate::utils::paths::validate_corpus_path;
use query::{PARTICIPANTS_SQL, candidate_query, messages_query};
use schema::{apple_nanos_to_utc, apple_time_to_utc};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A conversation selected by a filter, before its statistics are computed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub chat_id: i64,
    pub display_name: String,
    /// Most recent message inside the filter scope
    pub last_activity: DateTime<Utc>,
}

/// Whole-corpus counters for the `stats` command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusStats {
    pub conversations: usize,
    pub messages: usize,
    pub link_messages: usize,
    pub first_message_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct SqliteCorpus {
    conn: Connection,
}

impl SqliteCorpus {
    /// Open the corpus read-only
    pub fn open(path: &Path) -> Result<Self> {
        validate_corpus_path(path)?;
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open message corpus {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT).context("Failed to set busy timeout")?;
        debug!("Opened corpus {}", path.display());
        Ok(Self { conn })
    }

    /// Wrap an existing connection (in-memory corpora in tests)
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Conversations matching the filter, most recently active first
    pub fn candidates(&self, filter: &CompiledFilter) -> Result<Vec<Candidate>> {
        let query = candidate_query(filter);
        let mut stmt = self.conn.prepare(&query.sql).context("Failed to prepare search query")?;
        let rows = stmt
            .query_map(params_from_iter(query.params.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
            })
            .context("Failed to run search query")?;

        let mut candidates = Vec::new();
        for row in rows {
            let (chat_id, display_name, last_date) = row.context("Failed to read search row")?;
            match apple_nanos_to_utc(last_date) {
                Some(last_activity) => {
                    candidates.push(Candidate { chat_id, display_name, last_activity })
                }
                None => warn!("Skipping chat {} with out-of-range date {}", chat_id, last_date),
            }
        }
        debug!("Filter matched {} conversations", candidates.len());
        Ok(candidates)
    }

    /// Messages of one conversation inside the scope, oldest first
    pub fn messages(&self, chat_id: i64, scope: &DateRange) -> Result<Vec<MessageUnit>> {
        let query = messages_query(chat_id, scope);
        let mut stmt = self.conn.prepare(&query.sql).context("Failed to prepare message query")?;
        let rows = stmt
            .query_map(params_from_iter(query.params.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)? != 0,
                ))
            })
            .with_context(|| format!("Failed to load messages for chat {}", chat_id))?;

        let mut raw = Vec::new();
        for row in rows {
            let (text, date, handle, is_from_me) =
                row.with_context(|| format!("Failed to read message row for chat {}", chat_id))?;
            let Some(sent_at) = apple_time_to_utc(date) else {
                warn!("Skipping message in chat {} with out-of-range date {}", chat_id, date);
                continue;
            };
            raw.push((text, sent_at, if is_from_me { None } else { handle }));
        }

        Ok(raw
            .into_par_iter()
            .map(|(text, sent_at, sender)| {
                let has_link = contains_music_link(&text);
                MessageUnit { text, sent_at, sender, has_link }
            })
            .collect())
    }

    /// Participant handles of one conversation, sorted
    pub fn participants(&self, chat_id: i64) -> Result<Vec<String>> {
        let mut stmt =
            self.conn.prepare(PARTICIPANTS_SQL).context("Failed to prepare participant query")?;
        let rows = stmt
            .query_map(params![chat_id], |row| row.get::<_, String>(0))
            .with_context(|| format!("Failed to load participants for chat {}", chat_id))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to read participants for chat {}", chat_id))
    }

    pub fn stats(&self) -> Result<CorpusStats> {
        let conversations: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chat", [], |row| row.get(0))
            .context("Failed to count conversations")?;
        let (messages, first, last): (i64, Option<i64>, Option<i64>) = self
            .conn
            .query_row(
                &format!(
                    "SELECT COUNT(*), MIN({d}), MAX({d}) FROM message m WHERE m.date IS NOT NULL",
                    d = schema::date_nanos_expr("m")
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("Failed to count messages")?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT text FROM message WHERE text LIKE '%spotify%' OR text LIKE '%spoti.fi%'",
            )
            .context("Failed to prepare link scan")?;
        let texts = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to scan messages for links")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read message text")?;
        let link_messages = texts.par_iter().filter(|text| contains_music_link(text)).count();

        Ok(CorpusStats {
            conversations: conversations.max(0) as usize,
            messages: messages.max(0) as usize,
            link_messages,
            first_message_at: first.and_then(apple_nanos_to_utc),
            last_message_at: last.and_then(apple_nanos_to_utc),
        })
    }
}
