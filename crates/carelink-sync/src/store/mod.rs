//! Remote message store access.

mod client;
mod error;

use async_trait::async_trait;
use carelink_protocol::{Message, MessageId};

pub use self::client::StoreClient;
pub use self::error::{StoreError, StoreResult};

/// Capability the session controller needs from the remote store.
///
/// Implemented by [`StoreClient`] and by in-memory doubles in tests, so the
/// controller is constructed with an explicit service handle rather than a
/// global client.
#[async_trait]
pub trait MessageBackend: Send + Sync {
    /// Persist one message; resolves to the confirmed message carrying its
    /// server-assigned id and timestamp.
    async fn send(&self, body: &str) -> StoreResult<Message>;

    /// Most recent messages for the conversation, oldest first. An empty
    /// history is an empty vector, not an error.
    async fn fetch_recent(&self, limit: usize) -> StoreResult<Vec<Message>>;

    /// Record that the given messages reached this client.
    async fn mark_delivered(&self, ids: &[MessageId]) -> StoreResult<()>;
}

#[async_trait]
impl MessageBackend for StoreClient {
    async fn send(&self, body: &str) -> StoreResult<Message> {
        StoreClient::send(self, body).await
    }

    async fn fetch_recent(&self, limit: usize) -> StoreResult<Vec<Message>> {
        StoreClient::fetch_recent(self, limit).await
    }

    async fn mark_delivered(&self, ids: &[MessageId]) -> StoreResult<()> {
        StoreClient::mark_delivered(self, ids).await
    }
}
