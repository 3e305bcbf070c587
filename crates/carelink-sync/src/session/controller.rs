//! Chat session controller.
//!
//! Owns the session log for one conversation. Every mutation — submit
//! commands, send completions, feed events — goes through one event loop,
//! so no two log mutations ever run concurrently. The presentation layer
//! observes the log through a watch channel instead of being called back.

use std::sync::Arc;

use log::warn;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use carelink_protocol::{Message, MessageId, ReadState};

use super::log::SessionLog;
use crate::realtime::{ChannelError, RemoteEvent, SubscriptionHandle};
use crate::store::{MessageBackend, StoreResult};

/// Buffered commands between the session handle and its event loop.
const COMMAND_BUFFER_SIZE: usize = 64;

/// Session-level failures surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Bad local input; the log is untouched.
    #[error("message body is empty")]
    EmptyBody,

    /// The id does not name a failed entry.
    #[error("message is not eligible for retry: {0}")]
    NotRetryable(MessageId),

    /// The event loop is gone; the session must be re-opened.
    #[error("session is closed")]
    Closed,

    /// The realtime feed failed terminally.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Per-session parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Author stamped on outgoing messages; also used to tell own messages
    /// from incoming ones.
    pub author: String,
    /// History entries fetched when the session starts.
    pub history_limit: usize,
}

enum Command {
    Submit {
        body: String,
        ack: oneshot::Sender<MessageId>,
    },
    Retry {
        id: MessageId,
        ack: oneshot::Sender<Result<(), SessionError>>,
    },
    SendResolved {
        provisional: MessageId,
        result: StoreResult<Message>,
    },
    UnseenIds {
        ack: oneshot::Sender<Vec<MessageId>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a running chat session.
pub struct ChatSession {
    command_tx: mpsc::Sender<Command>,
    log_rx: watch::Receiver<Vec<Message>>,
    error_rx: watch::Receiver<Option<SessionError>>,
    subscription: Option<SubscriptionHandle>,
    task: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Start a session: seed the log with recent history, then serve
    /// commands and feed events until shutdown.
    ///
    /// A history fetch failure is logged and the session starts empty; the
    /// feed still delivers from here on.
    pub async fn start(
        backend: Arc<dyn MessageBackend>,
        config: SessionConfig,
        feed: mpsc::Receiver<RemoteEvent>,
        subscription: Option<SubscriptionHandle>,
    ) -> Self {
        let mut log = SessionLog::new();
        match backend.fetch_recent(config.history_limit).await {
            Ok(history) => log.seed(history),
            Err(err) => warn!("failed to load conversation history: {err}"),
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let (log_tx, log_rx) = watch::channel(log.snapshot());
        let (error_tx, error_rx) = watch::channel(None);

        let state = EventLoop {
            log,
            backend,
            author: config.author,
            command_rx,
            feed,
            log_tx,
            error_tx,
            loop_tx: command_tx.clone(),
        };
        let task = tokio::spawn(event_loop(state));

        Self {
            command_tx,
            log_rx,
            error_rx,
            subscription,
            task: Some(task),
        }
    }

    /// Validate and submit a message.
    ///
    /// Returns the provisional id once the pending entry is in the log; the
    /// Confirmed/Failed transition arrives later on the log watch.
    pub async fn submit(&self, body: &str) -> Result<MessageId, SessionError> {
        // Trimmed once here; the pending entry must carry the exact body the
        // store persists, or the feed-echo correlation misses it.
        let body = body.trim();
        if body.is_empty() {
            return Err(SessionError::EmptyBody);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Submit {
                body: body.to_string(),
                ack: ack_tx,
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        ack_rx.await.map_err(|_| SessionError::Closed)
    }

    /// Re-submit a failed entry in place.
    pub async fn retry(&self, id: MessageId) -> Result<(), SessionError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Retry { id, ack: ack_tx })
            .await
            .map_err(|_| SessionError::Closed)?;
        ack_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Read-only snapshot of the ordered log.
    pub fn current_log(&self) -> Vec<Message> {
        self.log_rx.borrow().clone()
    }

    /// Watch for log changes (push, not pull).
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.log_rx.clone()
    }

    /// Watch for session-level errors, e.g. a terminal feed failure.
    pub fn errors(&self) -> watch::Receiver<Option<SessionError>> {
        self.error_rx.clone()
    }

    /// Confirmed incoming messages not yet marked seen, for read receipts.
    pub async fn unseen_ids(&self) -> Result<Vec<MessageId>, SessionError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.command_tx
            .send(Command::UnseenIds { ack: ack_tx })
            .await
            .map_err(|_| SessionError::Closed)?;
        ack_rx.await.map_err(|_| SessionError::Closed)
    }

    /// Close the feed and stop the event loop. After return, no further log
    /// mutation happens.
    pub async fn shutdown(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close().await;
        }
        if let Some(task) = self.task.take() {
            let (ack_tx, ack_rx) = oneshot::channel();
            if self
                .command_tx
                .send(Command::Shutdown { ack: ack_tx })
                .await
                .is_ok()
            {
                let _ = ack_rx.await;
            }
            if let Err(err) = task.await {
                warn!("session event loop ended abnormally: {err}");
            }
        }
    }
}

impl Drop for ChatSession {
    // A session dropped without shutdown must not keep mutating in the
    // background.
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct EventLoop {
    log: SessionLog,
    backend: Arc<dyn MessageBackend>,
    author: String,
    command_rx: mpsc::Receiver<Command>,
    feed: mpsc::Receiver<RemoteEvent>,
    log_tx: watch::Sender<Vec<Message>>,
    error_tx: watch::Sender<Option<SessionError>>,
    loop_tx: mpsc::Sender<Command>,
}

async fn event_loop(mut state: EventLoop) {
    let mut feed_open = true;
    loop {
        tokio::select! {
            command = state.command_rx.recv() => {
                match command {
                    Some(command) => {
                        if state.handle_command(command) {
                            return;
                        }
                    }
                    // Command channel closed.
                    None => return,
                }
            }
            event = state.feed.recv(), if feed_open => {
                match event {
                    Some(event) => state.handle_remote(event),
                    None => feed_open = false,
                }
            }
        }
    }
}

impl EventLoop {
    /// Apply one command; returns true on shutdown.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Submit { body, ack } => {
                let provisional = self.log.append_pending(&self.author, &body);
                self.publish();
                self.spawn_send(provisional.clone(), body);
                let _ = ack.send(provisional);
            }
            Command::Retry { id, ack } => match self.log.mark_retrying(&id) {
                Some(body) => {
                    self.publish();
                    self.spawn_send(id, body);
                    let _ = ack.send(Ok(()));
                }
                None => {
                    let _ = ack.send(Err(SessionError::NotRetryable(id)));
                }
            },
            Command::SendResolved {
                provisional,
                result,
            } => {
                match result {
                    Ok(message) => {
                        self.log.confirm(&provisional, message);
                    }
                    Err(err) => {
                        warn!("send failed for {provisional}: {err}");
                        self.log.fail(&provisional, &err.to_string());
                    }
                }
                self.publish();
            }
            Command::UnseenIds { ack } => {
                let _ = ack.send(self.log.unseen_from(&self.author));
            }
            Command::Shutdown { ack } => {
                let _ = ack.send(());
                return true;
            }
        }
        false
    }

    fn handle_remote(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::Inserted(message) => {
                let incoming =
                    message.author != self.author && message.read_state == ReadState::NotSeen;
                let id = message.id.clone();
                if self.log.apply_remote(message) {
                    if incoming {
                        self.spawn_mark_delivered(id);
                    }
                    self.publish();
                }
            }
            RemoteEvent::Updated(message) => {
                if self.log.apply_update(message) {
                    self.publish();
                }
            }
            RemoteEvent::Closed(err) => {
                warn!("realtime feed terminated: {err}");
                let _ = self.error_tx.send(Some(SessionError::Channel(err)));
            }
        }
    }

    /// Run the remote write off the loop; its completion comes back through
    /// the same command queue as every other mutation.
    fn spawn_send(&self, provisional: MessageId, body: String) {
        let backend = Arc::clone(&self.backend);
        let tx = self.loop_tx.clone();
        tokio::spawn(async move {
            let result = backend.send(&body).await;
            let _ = tx
                .send(Command::SendResolved {
                    provisional,
                    result,
                })
                .await;
        });
    }

    /// Acknowledge receipt of an incoming message. Runs off the loop; a
    /// failure only logs, the entry stays in the log either way.
    fn spawn_mark_delivered(&self, id: MessageId) {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            if let Err(err) = backend.mark_delivered(&[id.clone()]).await {
                warn!("failed to mark {id} delivered: {err}");
            }
        });
    }

    fn publish(&self) {
        let _ = self.log_tx.send(self.log.snapshot());
    }
}
