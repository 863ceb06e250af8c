//! Filter compiler: [`SearchRequest`] → [`CompiledFilter`].
//!
//! Validation happens here, before any corpus access, so a bad request surfaces as a
//! [`FilterError`] instead of a query execution error.
//!
//! # Composition
//!
//! - Date range, participant set and content substring are AND-ed together
//! - Participant names are OR-ed among themselves
//! - A free-text query that is the *only* filter matches display name OR message content;
//!   next to other filters it constrains the display name only

use chrono::NaiveDate;
use thiserror::Error;

use super::ast::{CompiledFilter, Predicate};
use crate::models::{DateRange, SearchRequest};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("No filters given: set a query, date range, participant or content filter")]
    NoFilters,
    #[error("Invalid date range: end {end} is before start {start}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
}

fn validate_range(range: &DateRange) -> Result<(), FilterError> {
    if let (Some(start), Some(end)) = (range.start, range.end)
        && end < start
    {
        return Err(FilterError::InvalidDateRange { start, end });
    }
    Ok(())
}

/// Compile a search request into predicates over the corpus
pub fn compile(request: &SearchRequest) -> Result<CompiledFilter, FilterError> {
    if !request.has_filters() {
        return Err(FilterError::NoFilters);
    }
    validate_range(&request.date_range)?;

    let mut filter = CompiledFilter::new(request.date_range);
    filter.links_only = request.links_only;

    let participants: Vec<String> =
        request.participant_names().into_iter().map(str::to_string).collect();
    let contains = request.contains_text();
    let query = request.query_text();

    let query_is_only_filter =
        participants.is_empty() && contains.is_none() && request.date_range.is_empty();

    if let Some(query) = query {
        if query_is_only_filter {
            filter.add_predicate(Predicate::NameOrContent(query.to_string()));
        } else {
            filter.add_predicate(Predicate::NameContains(query.to_string()));
        }
    }
    if !participants.is_empty() {
        filter.add_predicate(Predicate::ParticipantAny(participants));
    }
    if let Some(contains) = contains {
        filter.add_predicate(Predicate::ContentContains(contains.to_string()));
    }

    Ok(filter)
}

/// Compile the filter used to collect one selected conversation's messages for synthesis
pub fn compile_scoped(chat_id: i64, range: DateRange) -> Result<CompiledFilter, FilterError> {
    validate_range(&range)?;
    let mut filter = CompiledFilter::new(range);
    filter.add_predicate(Predicate::Conversation(chat_id));
    Ok(filter)
}
