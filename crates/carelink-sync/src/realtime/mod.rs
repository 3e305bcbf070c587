//! Live subscription feed from the remote service.
//!
//! The feed runs as a background task that dials the realtime websocket,
//! joins the conversation topic, and forwards decoded row changes to the
//! consumer in arrival order. Transient connection loss is handled by a
//! silent reconnect loop; delivery across reconnects is at-least-once, so
//! consumers dedupe by id.

mod channel;
mod error;

pub use self::channel::{RealtimeChannel, RemoteEvent, SubscriptionHandle};
pub use self::error::ChannelError;
