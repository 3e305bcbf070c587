//! Shared protocol types for the Carelink realtime messaging client.
//!
//! Wire representations (REST rows, realtime frames) and the client-side
//! message domain types live here so the store client and the realtime
//! channel agree on one encoding.

pub mod message;
pub mod realtime;
pub mod rest;

pub use message::{DeliveryState, Message, MessageId, ReadState};
pub use realtime::{ChangeEvent, ChangeKind, RealtimeFrame};
pub use rest::{MessageRow, NewMessageRow};
