//! Client-side message domain types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix for client-generated provisional ids. Server-assigned ids never
/// carry it, so a provisional id can never collide with a persisted one.
const PROVISIONAL_PREFIX: &str = "local-";

/// Opaque message identifier.
///
/// Server-assigned once a message is persisted; a locally generated
/// provisional id stands in while a send is in flight.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap a server-assigned id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh provisional id for a not-yet-persisted message.
    pub fn provisional() -> Self {
        Self(format!("{PROVISIONAL_PREFIX}{}", Uuid::new_v4()))
    }

    /// Whether this id was generated locally and is awaiting a server id.
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Delivery lifecycle of a message in the session log.
///
/// `Pending -> Confirmed` and `Pending -> Failed` are the only transitions;
/// both end states are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    /// Optimistically appended, remote write still in flight.
    Pending,
    /// Persisted remotely with a server-assigned id.
    Confirmed,
    /// The remote write failed; eligible for manual retry.
    Failed { reason: String },
}

impl DeliveryState {
    pub fn is_pending(&self) -> bool {
        matches!(self, DeliveryState::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DeliveryState::Failed { .. })
    }
}

/// Read-receipt status stored on the server row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadState {
    NotSeen,
    Delivered,
    Seen,
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::NotSeen
    }
}

/// A single chat message as held in the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub delivery: DeliveryState,
    #[serde(default)]
    pub read_state: ReadState,
}

impl Message {
    /// Create an optimistic pending entry with a provisional id.
    pub fn pending(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: MessageId::provisional(),
            author: author.into(),
            body: body.into(),
            created_at: Utc::now(),
            delivery: DeliveryState::Pending,
            read_state: ReadState::NotSeen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisional_ids_are_unique_and_flagged() {
        let a = MessageId::provisional();
        let b = MessageId::provisional();
        assert_ne!(a, b);
        assert!(a.is_provisional());
        assert!(!MessageId::new("42").is_provisional());
    }

    #[test]
    fn read_state_uses_snake_case_on_the_wire() {
        let json = serde_json::to_string(&ReadState::NotSeen).unwrap();
        assert_eq!(json, "\"not_seen\"");
        let back: ReadState = serde_json::from_str("\"seen\"").unwrap();
        assert_eq!(back, ReadState::Seen);
    }

    #[test]
    fn pending_message_starts_in_pending_state() {
        let msg = Message::pending("alice", "hello");
        assert!(msg.delivery.is_pending());
        assert!(msg.id.is_provisional());
    }
}
