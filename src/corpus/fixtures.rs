//! In-memory corpora for unit tests.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::SqliteCorpus;
use super::schema::{create_schema, utc_to_apple_nanos};

pub(crate) struct TestCorpus {
    conn: Connection,
}

impl TestCorpus {
    pub(crate) fn new() -> Self {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        Self { conn }
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

    pub(crate) fn chat(&self, chat_id: i64, name: &str, handles: &[&str]) {
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
    }

    pub(crate) fn message(
        &self,
        chat_id: i64,
        sender: Option<&str>,
        text: &str,
        at: DateTime<Utc>,
    ) {
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
    }

    pub(crate) fn into_corpus(self) -> SqliteCorpus {
        SqliteCorpus::from_connection(self.conn)
    }
}
