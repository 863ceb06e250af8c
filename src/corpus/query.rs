//! SQL rendering for compiled filters.
//!
//! Every predicate becomes a chat-level condition. Content and participant predicates use
//! `EXISTS` subqueries so a conversation matches when at least one of its in-scope messages
//! (or handles) matches; rows are never multiplied by the join.
//!
//! Parameters are positional (`?`) and pushed in the order they appear in the SQL text.

use rusqlite::types::Value;

use super::schema::{date_nanos_expr, utc_to_apple_nanos};
use crate::filters::{CompiledFilter, Predicate};
use crate::models::DateRange;

/// Display name with the chat identifier as fallback
pub const NAME_EXPR: &str = "COALESCE(NULLIF(c.display_name, ''), c.chat_identifier, '')";

/// A rendered statement with its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Escape `%`, `_` and `\` and wrap in `%...%` for `LIKE ... ESCAPE '\'`
pub fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// `AND` clauses restricting message alias `alias` to the date range
fn scope_clause(alias: &str, scope: &DateRange, params: &mut Vec<Value>) -> String {
    let mut clause = String::new();
    let date = date_nanos_expr(alias);
    if let Some(start) = scope.start_instant() {
        clause.push_str(&format!(" AND {} >= ?", date));
        params.push(Value::Integer(utc_to_apple_nanos(start)));
    }
    if let Some(end) = scope.end_instant_exclusive() {
        clause.push_str(&format!(" AND {} < ?", date));
        params.push(Value::Integer(utc_to_apple_nanos(end)));
    }
    clause
}

fn content_exists(text: &str, scope: &DateRange, params: &mut Vec<Value>) -> String {
    params.push(Value::Text(like_pattern(text)));
    let mut sql = String::from(
        "EXISTS (SELECT 1 FROM chat_message_join pj JOIN message pm ON pm.ROWID = pj.message_id \
         WHERE pj.chat_id = c.ROWID AND pm.text LIKE ? ESCAPE '\\'",
    );
    // LIKE parameter precedes the scope parameters in the text
    sql.push_str(&scope_clause("pm", scope, params));
    sql.push(')');
    sql
}

fn render_predicate(predicate: &Predicate, scope: &DateRange, params: &mut Vec<Value>) -> String {
    match predicate {
        Predicate::Conversation(chat_id) => {
            params.push(Value::Integer(*chat_id));
            "c.ROWID = ?".to_string()
        }
        Predicate::NameContains(text) => {
            params.push(Value::Text(like_pattern(text)));
            format!("{} LIKE ? ESCAPE '\\'", NAME_EXPR)
        }
        Predicate::ContentContains(text) => content_exists(text, scope, params),
        Predicate::NameOrContent(text) => {
            params.push(Value::Text(like_pattern(text)));
            let name = format!("{} LIKE ? ESCAPE '\\'", NAME_EXPR);
            let content = content_exists(text, scope, params);
            format!("({} OR {})", name, content)
        }
        Predicate::ParticipantAny(names) => {
            let alternatives: Vec<String> = names
                .iter()
                .map(|name| {
                    params.push(Value::Text(like_pattern(name)));
                    "ph.id LIKE ? ESCAPE '\\'".to_string()
                })
                .collect();
            format!(
                "EXISTS (SELECT 1 FROM chat_handle_join pch JOIN handle ph ON ph.ROWID = pch.handle_id \
                 WHERE pch.chat_id = c.ROWID AND ({}))",
                alternatives.join(" OR ")
            )
        }
    }
}

/// Candidate conversations for a filter: `(chat_id, name, last_date)`, newest first.
///
/// A conversation without any message inside the scope has no `last_date` and is not a
/// candidate.
pub fn candidate_query(filter: &CompiledFilter) -> SqlQuery {
    let mut params = Vec::new();
    let scope = scope_clause("lm", &filter.scope, &mut params);
    let last_date = format!(
        "(SELECT MAX({}) FROM chat_message_join lj JOIN message lm ON lm.ROWID = lj.message_id \
         WHERE lj.chat_id = c.ROWID{})",
        date_nanos_expr("lm"),
        scope
    );

    let conditions: Vec<String> = filter
        .predicates
        .iter()
        .map(|p| render_predicate(p, &filter.scope, &mut params))
        .collect();
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT chat_id, name, last_date FROM (\
         SELECT c.ROWID AS chat_id, {} AS name, {} AS last_date FROM chat c{}\
         ) WHERE last_date IS NOT NULL ORDER BY last_date DESC, chat_id ASC",
        NAME_EXPR, last_date, where_clause
    );
    SqlQuery { sql, params }
}

/// Messages of one conversation inside the scope, oldest first
pub fn messages_query(chat_id: i64, scope: &DateRange) -> SqlQuery {
    let mut params = vec![Value::Integer(chat_id)];
    let scope = scope_clause("m", scope, &mut params);
    let date = date_nanos_expr("m");
    let sql = format!(
        "SELECT COALESCE(m.text, ''), m.date, h.id, COALESCE(m.is_from_me, 0) \
         FROM chat_message_join j JOIN message m ON m.ROWID = j.message_id \
         LEFT JOIN handle h ON h.ROWID = m.handle_id \
         WHERE j.chat_id = ?{} AND m.date IS NOT NULL ORDER BY {} ASC, m.ROWID ASC",
        scope, date
    );
    SqlQuery { sql, params }
}

/// Distinct participant handles of one conversation, sorted
pub const PARTICIPANTS_SQL: &str = "SELECT DISTINCT h.id FROM chat_handle_join ch \
     JOIN handle h ON h.ROWID = ch.handle_id WHERE ch.chat_id = ?1 ORDER BY h.id ASC";
