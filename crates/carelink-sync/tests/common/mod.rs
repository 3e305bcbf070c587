//! Test doubles and helpers shared by the session tests.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::timeout;

use carelink_protocol::{DeliveryState, Message, MessageId, ReadState};
use carelink_sync::store::{MessageBackend, StoreError, StoreResult};

/// In-memory stand-in for the remote message store.
///
/// Server ids are assigned as `srv-1`, `srv-2`, ... in send order. Sends can
/// be gated (to hold a send in flight) or switched to failing.
pub struct FakeBackend {
    history: Vec<Message>,
    sent: StdMutex<Vec<Message>>,
    delivered: StdMutex<Vec<MessageId>>,
    counter: AtomicU64,
    fail_sends: AtomicBool,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Self::with_history(Vec::new())
    }

    pub fn with_history(history: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            history,
            sent: StdMutex::new(Vec::new()),
            delivered: StdMutex::new(Vec::new()),
            counter: AtomicU64::new(0),
            fail_sends: AtomicBool::new(false),
            gate: Mutex::new(None),
        })
    }

    /// Make subsequent sends fail with a service error.
    pub fn set_failing(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::SeqCst);
    }

    /// Hold the next send until the returned sender fires.
    pub async fn gate_next_send(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().await = Some(rx);
        tx
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Ids acknowledged as delivered, in acknowledgement order.
    pub fn delivered_ids(&self) -> Vec<MessageId> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBackend for FakeBackend {
    async fn send(&self, body: &str) -> StoreResult<Message> {
        let gate = self.gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(StoreError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let message = Message {
            id: MessageId::from(format!("srv-{n}")),
            author: "alice".to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            delivery: DeliveryState::Confirmed,
            read_state: ReadState::NotSeen,
        };
        self.sent.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn fetch_recent(&self, limit: usize) -> StoreResult<Vec<Message>> {
        Ok(self.history.iter().take(limit).cloned().collect())
    }

    async fn mark_delivered(&self, ids: &[MessageId]) -> StoreResult<()> {
        self.delivered.lock().unwrap().extend_from_slice(ids);
        Ok(())
    }
}

/// A confirmed message as the feed would deliver it.
pub fn confirmed(id: &str, at_secs: i64, author: &str, body: &str) -> Message {
    Message {
        id: MessageId::from(id),
        author: author.to_string(),
        body: body.to_string(),
        created_at: Utc.timestamp_opt(at_secs, 0).unwrap(),
        delivery: DeliveryState::Confirmed,
        read_state: ReadState::NotSeen,
    }
}

/// Wait until the watched log satisfies the predicate, with a test timeout.
pub async fn wait_for_log<F>(rx: &mut watch::Receiver<Vec<Message>>, pred: F) -> Vec<Message>
where
    F: FnMut(&Vec<Message>) -> bool,
{
    timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for log state")
        .expect("log watch closed")
        .clone()
}
