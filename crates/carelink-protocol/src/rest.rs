//! REST row representations for the remote message store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{DeliveryState, Message, MessageId, ReadState};

/// A persisted row in the remote `messages` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub content: String,
    pub author: String,
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: ReadState,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seen_at: Option<DateTime<Utc>>,
}

impl MessageRow {
    /// Map a persisted row into a confirmed domain message.
    pub fn into_message(self) -> Message {
        Message {
            id: MessageId::new(self.id),
            author: self.author,
            body: self.content,
            created_at: self.created_at,
            delivery: DeliveryState::Confirmed,
            read_state: self.status,
        }
    }
}

/// Insert payload for a new message. Generated fields (id, created_at)
/// come back on the returned representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessageRow {
    pub content: String,
    pub author: String,
    pub conversation_id: String,
    pub status: ReadState,
}

impl NewMessageRow {
    pub fn new(
        content: impl Into<String>,
        author: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            author: author.into(),
            conversation_id: conversation_id.into(),
            status: ReadState::NotSeen,
        }
    }
}
