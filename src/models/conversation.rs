use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregated view of one conversation.
///
/// `chat_id` is the identity. `display_name` is not unique: two group chats can both be
/// called "Roadtrip" and they stay two records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub chat_id: i64,
    pub display_name: String,
    pub participant_count: usize,
    pub message_count: usize,
    pub link_message_count: usize,
    pub last_message_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,
}

/// One message loaded from the corpus. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUnit {
    pub text: String,
    pub sent_at: DateTime<Utc>,
    /// Handle of the sender; `None` for messages sent by the corpus owner
    pub sender: Option<String>,
    pub has_link: bool,
}
