use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted chat message. Immutable once stored; ids are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub author: String,
    pub channel: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
