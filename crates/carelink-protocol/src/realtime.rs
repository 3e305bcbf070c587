//! Realtime feed frames.
//!
//! The remote service pushes row changes over a Phoenix-style channel
//! protocol: the client joins a topic scoped to the `messages` table, keeps
//! the socket alive with heartbeats, and receives one `postgres_changes`
//! frame per row change.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::rest::MessageRow;

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_CHANGES: &str = "postgres_changes";

/// Topic reserved for heartbeat frames.
pub const HEARTBEAT_TOPIC: &str = "phoenix";

/// One frame on the realtime socket, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl RealtimeFrame {
    /// Build the join frame for a table-change subscription.
    pub fn join(
        topic: &str,
        table: &str,
        filter: Option<&str>,
        access_token: &str,
        reference: u64,
    ) -> Self {
        let mut change = json!({
            "event": "*",
            "schema": "public",
            "table": table,
        });
        if let Some(filter) = filter {
            change["filter"] = Value::String(filter.to_string());
        }
        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload: json!({
                "config": { "postgres_changes": [change] },
                "access_token": access_token,
            }),
            reference: Some(reference.to_string()),
        }
    }

    /// Build a heartbeat frame.
    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: HEARTBEAT_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    /// Status of a `phx_reply` frame, if this is one.
    pub fn reply_status(&self) -> Option<&str> {
        if self.event != EVENT_REPLY {
            return None;
        }
        self.payload.get("status").and_then(Value::as_str)
    }

    /// Decode a row-change event, if this frame carries one.
    pub fn change(&self) -> Option<ChangeEvent> {
        if self.event != EVENT_CHANGES {
            return None;
        }
        let data = self.payload.get("data")?;
        serde_json::from_value(data.clone()).ok()
    }
}

/// Kind of row change carried by a `postgres_changes` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A decoded row change.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Option<MessageRow>,
}
