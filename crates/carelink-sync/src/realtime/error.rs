//! Realtime feed error types.

use thiserror::Error;

/// Terminal subscription failures. After one of these the feed task exits
/// and the session has to be re-opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The endpoint rejected the handshake or stayed unreachable.
    #[error("realtime connection failed: {0}")]
    Connect(String),

    /// The server sent a frame that violates the channel protocol.
    #[error("realtime protocol error: {0}")]
    Protocol(String),

    /// Credentials were rejected when joining the topic.
    #[error("realtime credentials rejected")]
    Unauthorized,
}
