//! Realtime messaging core for the Carelink client.
//!
//! Three pieces, leaf-first:
//! - [`store`]: REST client for persisting and fetching messages.
//! - [`realtime`]: live feed of row changes with silent reconnection.
//! - [`session`]: the chat session controller owning the ordered log.
//!
//! The presentation layer renders snapshots from
//! [`session::ChatSession::current_log`] and re-renders when the watch
//! channel it exposes changes; it never touches the wire directly.

pub mod realtime;
pub mod session;
pub mod settings;
pub mod store;

pub use carelink_protocol as protocol;

pub use realtime::{ChannelError, RealtimeChannel, RemoteEvent, SubscriptionHandle};
pub use session::{ChatSession, SessionConfig, SessionError};
pub use settings::{Settings, SettingsError};
pub use store::{MessageBackend, StoreClient, StoreError, StoreResult};
