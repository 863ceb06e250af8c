use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive calendar-day range. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// True when both bounds are set and the end precedes the start
    pub fn is_inverted(&self) -> bool {
        matches!((self.start, self.end), (Some(start), Some(end)) if end < start)
    }

    /// Lower bound (inclusive) as a UTC instant at midnight
    pub fn start_instant(&self) -> Option<DateTime<Utc>> {
        self.start.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc())
    }

    /// Upper bound as an exclusive UTC instant: midnight of the day after `end`
    pub fn end_instant_exclusive(&self) -> Option<DateTime<Utc>> {
        self.end
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let after_start = self.start_instant().is_none_or(|start| instant >= start);
        let before_end = self.end_instant_exclusive().is_none_or(|end| instant < end);
        after_start && before_end
    }
}

/// A structured search over the message corpus.
///
/// At least one of `query`, `date_range`, `participants`, `contains` must be set for the
/// request to be issued. `links_only` narrows the output but is not a filter on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, flatten)]
    pub date_range: DateRange,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(default)]
    pub links_only: bool,
    #[serde(default)]
    pub stream: bool,
}

impl SearchRequest {
    /// Trimmed free-text query, `None` when blank
    pub fn query_text(&self) -> Option<&str> {
        non_blank(self.query.as_deref())
    }

    /// Trimmed content substring, `None` when blank
    pub fn contains_text(&self) -> Option<&str> {
        non_blank(self.contains.as_deref())
    }

    /// Participant names with blanks dropped
    pub fn participant_names(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.trim()).filter(|p| !p.is_empty()).collect()
    }

    pub fn has_filters(&self) -> bool {
        self.query_text().is_some()
            || self.contains_text().is_some()
            || !self.participant_names().is_empty()
            || !self.date_range.is_empty()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
