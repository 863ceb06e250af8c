//! Corpus layout and timestamp conventions.
//!
//! The corpus follows the macOS Messages store: chats, handles and messages joined through
//! `chat_message_join` / `chat_handle_join`. Only the columns read here are listed.
//!
//! `message.date` counts from the Apple epoch (2001-01-01T00:00:00Z). Current stores use
//! nanoseconds; legacy stores use seconds. Magnitudes below [`LEGACY_SECONDS_LIMIT`] are
//! read as seconds.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

/// Seconds between the Unix epoch and the Apple epoch
pub const APPLE_EPOCH_OFFSET_SECS: i64 = 978_307_200;
/// Raw `message.date` magnitudes below this are seconds, not nanoseconds. It is the largest
/// magnitude whose nanosecond value still fits in an `i64` (SQLite INTEGER).
pub const LEGACY_SECONDS_LIMIT: i64 = i64::MAX / NANOS_PER_SEC;
const NANOS_PER_SEC: i64 = 1_000_000_000;

pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS chat (
    ROWID INTEGER PRIMARY KEY AUTOINCREMENT,
    guid TEXT UNIQUE NOT NULL,
    chat_identifier TEXT,
    display_name TEXT
);
CREATE TABLE IF NOT EXISTS handle (
    ROWID INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL,
    service TEXT NOT NULL DEFAULT 'iMessage'
);
CREATE TABLE IF NOT EXISTS message (
    ROWID INTEGER PRIMARY KEY AUTOINCREMENT,
    guid TEXT UNIQUE NOT NULL,
    text TEXT,
    handle_id INTEGER DEFAULT 0,
    date INTEGER,
    is_from_me INTEGER DEFAULT 0
);
CREATE TABLE IF NOT EXISTS chat_message_join (
    chat_id INTEGER REFERENCES chat (ROWID) ON DELETE CASCADE,
    message_id INTEGER REFERENCES message (ROWID) ON DELETE CASCADE,
    PRIMARY KEY (chat_id, message_id)
);
CREATE TABLE IF NOT EXISTS chat_handle_join (
    chat_id INTEGER REFERENCES chat (ROWID) ON DELETE CASCADE,
    handle_id INTEGER REFERENCES handle (ROWID) ON DELETE CASCADE,
    UNIQUE (chat_id, handle_id)
);
";

/// Create the corpus tables (used by fixtures and the test suite)
pub fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

/// SQL expression normalizing `<alias>.date` to Apple-epoch nanoseconds
pub fn date_nanos_expr(alias: &str) -> String {
    format!(
        "(CASE WHEN {a}.date > -{limit} AND {a}.date < {limit} THEN {a}.date * {nanos} ELSE {a}.date END)",
        a = alias,
        limit = LEGACY_SECONDS_LIMIT,
        nanos = NANOS_PER_SEC
    )
}

/// Convert a raw `message.date` value to UTC
pub fn apple_time_to_utc(raw: i64) -> Option<DateTime<Utc>> {
    if raw.abs() < LEGACY_SECONDS_LIMIT {
        return DateTime::from_timestamp(raw.checked_add(APPLE_EPOCH_OFFSET_SECS)?, 0);
    }
    apple_nanos_to_utc(raw)
}

/// Convert a value already normalized by [`date_nanos_expr`] to UTC
pub fn apple_nanos_to_utc(nanos: i64) -> Option<DateTime<Utc>> {
    let secs = nanos.div_euclid(NANOS_PER_SEC);
    let subsec = nanos.rem_euclid(NANOS_PER_SEC) as u32;
    DateTime::from_timestamp(secs.checked_add(APPLE_EPOCH_OFFSET_SECS)?, subsec)
}

/// Convert a UTC instant to Apple-epoch nanoseconds
pub fn utc_to_apple_nanos(instant: DateTime<Utc>) -> i64 {
    let secs = instant.timestamp() - APPLE_EPOCH_OFFSET_SECS;
    secs.saturating_mul(NANOS_PER_SEC).saturating_add(i64::from(instant.timestamp_subsec_nanos()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_apple_epoch_zero() {
        let instant = apple_time_to_utc(0).unwrap();
        assert_eq!(instant, Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_nanosecond_roundtrip() {
        let instant = Utc.with_ymd_and_hms(2024, 6, 15, 18, 30, 5).unwrap();
        let raw = utc_to_apple_nanos(instant);
        assert!(raw > LEGACY_SECONDS_LIMIT);
        assert_eq!(apple_time_to_utc(raw), Some(instant));
    }

    #[test]
    fn test_legacy_seconds() {
        let instant = Utc.with_ymd_and_hms(2012, 3, 4, 5, 6, 7).unwrap();
        let raw_secs = instant.timestamp() - APPLE_EPOCH_OFFSET_SECS;
        assert_eq!(apple_time_to_utc(raw_secs), Some(instant));
    }

    #[test]
    fn test_legacy_limit_scales_without_overflow() {
        assert_eq!(LEGACY_SECONDS_LIMIT, 9_223_372_036);
        assert!((LEGACY_SECONDS_LIMIT - 1).checked_mul(NANOS_PER_SEC).is_some());
        assert!(LEGACY_SECONDS_LIMIT.checked_mul(NANOS_PER_SEC).is_none());
    }

    #[test]
    fn test_date_expr_stays_integer_near_limit() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        let raws = [LEGACY_SECONDS_LIMIT - 1, LEGACY_SECONDS_LIMIT, 50_000_000_000, -50_000_000_000];
        for raw in raws {
            conn.execute(
                "INSERT INTO message (guid, date) VALUES (?1, ?2)",
                rusqlite::params![format!("m{}", raw), raw],
            )
            .unwrap();
        }
        let sql = format!("SELECT {} FROM message m ORDER BY m.ROWID", date_nanos_expr("m"));
        let mut stmt = conn.prepare(&sql).unwrap();
        let values: Vec<i64> =
            stmt.query_map([], |r| r.get(0)).unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(values[0], (LEGACY_SECONDS_LIMIT - 1) * NANOS_PER_SEC);
        assert_eq!(&values[1..], &[LEGACY_SECONDS_LIMIT, 50_000_000_000, -50_000_000_000]);
        assert!(values.iter().all(|v| apple_nanos_to_utc(*v).is_some()));
    }

    #[test]
    fn test_date_expr_mentions_alias() {
        let expr = date_nanos_expr("m");
        assert!(expr.contains("m.date * 1000000000"));
    }

    #[test]
    fn test_create_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        create_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'", [], |r| r.get(0))
            .unwrap();
        assert!(count >= 5);
    }
}
