use crate::models::DateRange;

/// A single condition a conversation must satisfy.
///
/// Predicates are evaluated at conversation level: content predicates hold when at least one
/// message of the conversation inside the date-range scope matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Exactly this conversation identity
    Conversation(i64),
    /// Display name contains the text (case-insensitive)
    NameContains(String),
    /// Some in-scope message contains the text (case-insensitive)
    ContentContains(String),
    /// Bare text query: display name OR some in-scope message contains the text
    NameOrContent(String),
    /// Some participant handle contains any of the names (same-field OR)
    ParticipantAny(Vec<String>),
}

/// Conjunction of predicates plus the message scope used for matching and statistics
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledFilter {
    pub predicates: Vec<Predicate>,
    pub scope: DateRange,
    pub links_only: bool,
}

impl CompiledFilter {
    pub fn new(scope: DateRange) -> Self {
        Self { predicates: Vec::new(), scope, links_only: false }
    }

    pub fn add_predicate(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    /// True when nothing constrains the corpus at all
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty() && self.scope.is_empty()
    }
}
