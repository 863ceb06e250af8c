//! Conversation aggregation over the message corpus.
//!
//! # Error Handling Strategy
//!
//! - **Query errors**: a failing candidate query fails the whole search before any record
//!   is produced
//! - **Per-conversation errors**: a conversation whose rows cannot be loaded is yielded as an
//!   `Err` item and ends the sequence; records already yielded stay valid
//! - **Row-level problems**: out-of-range timestamps are skipped with a warning by the corpus
//!
//! Records are grouped by `chat_id` only. Two chats named "Roadtrip" are two records.

use anyhow::{Context, Result};
use log::debug;
use rayon::prelude::*;

use crate::corpus::{Candidate, SqliteCorpus};
use crate::filters::CompiledFilter;
use crate::models::{ConversationRecord, DateRange, MessageUnit};

/// Per-conversation message counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStats {
    pub message_count: usize,
    pub link_message_count: usize,
}

/// Count messages and link-bearing messages
pub fn summarize(units: &[MessageUnit]) -> MessageStats {
    MessageStats {
        message_count: units.len(),
        link_message_count: units.par_iter().filter(|unit| unit.has_link).count(),
    }
}

/// Build the record for one candidate, or `None` when `links_only` drops it
///
/// Statistics cover only the messages inside `scope`.
pub fn build_record(
    corpus: &SqliteCorpus,
    candidate: &Candidate,
    scope: &DateRange,
    links_only: bool,
) -> Result<Option<ConversationRecord>> {
    let units = corpus
        .messages(candidate.chat_id, scope)
        .with_context(|| format!("Failed to aggregate conversation {}", candidate.chat_id))?;
    let stats = summarize(&units);
    if links_only && stats.link_message_count == 0 {
        debug!("Skipping chat {}: no links in scope", candidate.chat_id);
        return Ok(None);
    }

    let participants = corpus.participants(candidate.chat_id)?;
    Ok(Some(ConversationRecord {
        chat_id: candidate.chat_id,
        display_name: candidate.display_name.clone(),
        participant_count: participants.len(),
        message_count: stats.message_count,
        link_message_count: stats.link_message_count,
        last_message_at: candidate.last_activity,
        participants,
    }))
}

/// Lazily aggregated search results, most recently active first.
///
/// Each call to `next` loads and aggregates one conversation, so a caller that writes every
/// record out before pulling the next one streams as it computes.
pub struct Conversations<'a> {
    corpus: &'a SqliteCorpus,
    scope: DateRange,
    links_only: bool,
    pending: std::vec::IntoIter<Candidate>,
    failed: bool,
}

impl<'a> Conversations<'a> {
    /// Run the candidate query; aggregation happens as the iterator is pulled
    pub fn new(corpus: &'a SqliteCorpus, filter: &CompiledFilter) -> Result<Self> {
        let candidates = corpus.candidates(filter)?;
        Ok(Self {
            corpus,
            scope: filter.scope,
            links_only: filter.links_only,
            pending: candidates.into_iter(),
            failed: false,
        })
    }

    /// Candidates not yet pulled (an upper bound on remaining records)
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl Iterator for Conversations<'_> {
    type Item = Result<ConversationRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let candidate = self.pending.next()?;
            match build_record(self.corpus, &candidate, &self.scope, self.links_only) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Aggregate every matching conversation eagerly
pub fn search(corpus: &SqliteCorpus, filter: &CompiledFilter) -> Result<Vec<ConversationRecord>> {
    Conversations::new(corpus, filter)?.collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    use super::*;
    use crate::corpus::fixtures::TestCorpus;
    use crate::filters::compile;
    use crate::models::SearchRequest;

    const TRACK_A: &str = "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC";
    const ALBUM: &str = "https://open.spotify.com/album/1DFixLWuPkv3KT3TnV35m3";

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 30, 0).unwrap()
    }

    fn unit(text: &str, has_link: bool) -> MessageUnit {
        MessageUnit { text: text.to_string(), sent_at: ts(2024, 1, 1), sender: None, has_link }
    }

    fn corpus() -> SqliteCorpus {
        let corpus = TestCorpus::new();
        corpus.chat(10, "Roadtrip", &["alice@example.com", "bob@example.com"]);
        corpus.chat(77, "Roadtrip", &["carol@example.com"]);
        corpus.chat(3, "Book club", &["dave@example.com"]);
        corpus.message(10, Some("alice@example.com"), TRACK_A, ts(2024, 6, 1));
        corpus.message(10, None, ALBUM, ts(2024, 6, 3));
        corpus.message(10, None, "see you there", ts(2024, 8, 1));
        corpus.message(77, Some("carol@example.com"), "who's driving", ts(2024, 7, 4));
        corpus.message(3, Some("dave@example.com"), "chapter 3", ts(2024, 9, 9));
        corpus.into_corpus()
    }

    fn request(query: &str) -> SearchRequest {
        SearchRequest { query: Some(query.to_string()), ..Default::default() }
    }

    #[test]
    fn test_summarize_counts_links() {
        let stats = summarize(&[unit("a", true), unit("b", false), unit("c", true)]);
        assert_eq!(stats, MessageStats { message_count: 3, link_message_count: 2 });
        assert_eq!(summarize(&[]), MessageStats::default());
    }

    #[test]
    fn test_same_name_distinct_records() {
        let corpus = corpus();
        let records = search(&corpus, &compile(&request("Roadtrip")).unwrap()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].chat_id, 10);
        assert_eq!(records[0].participant_count, 2);
        assert_eq!(records[0].message_count, 3);
        assert_eq!(records[0].link_message_count, 2);
        assert_eq!(records[1].chat_id, 77);
        assert_eq!(records[1].participant_count, 1);
        assert_eq!(records[1].message_count, 1);
        assert_eq!(records[1].link_message_count, 0);
    }

    #[test]
    fn test_statistics_use_date_scope() {
        let corpus = corpus();
        let mut request = request("Roadtrip");
        request.date_range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 6, 1),
            NaiveDate::from_ymd_opt(2024, 6, 30),
        );
        let records = search(&corpus, &compile(&request).unwrap()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message_count, 2);
        assert_eq!(records[0].last_message_at, ts(2024, 6, 3));
    }

    #[test]
    fn test_links_only_drops_linkless_conversations() {
        let corpus = corpus();
        let mut request = request("Roadtrip");
        request.links_only = true;
        let records = search(&corpus, &compile(&request).unwrap()).unwrap();
        let ids: Vec<i64> = records.iter().map(|r| r.chat_id).collect();
        assert_eq!(ids, vec![10]);
    }

    #[test]
    fn test_iterator_is_lazy() {
        let corpus = corpus();
        let filter = compile(&SearchRequest {
            date_range: DateRange::new(NaiveDate::from_ymd_opt(2020, 1, 1), None),
            ..Default::default()
        })
        .unwrap();
        let mut conversations = Conversations::new(&corpus, &filter).unwrap();
        assert_eq!(conversations.remaining(), 3);
        let first = conversations.next().unwrap().unwrap();
        assert_eq!(first.chat_id, 3);
        assert_eq!(conversations.remaining(), 2);
        assert_eq!(conversations.count(), 2);
    }
}
