//! Background feed task and its subscription handle.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use carelink_protocol::realtime::{EVENT_ERROR, RealtimeFrame};
use carelink_protocol::{ChangeKind, Message};

use super::error::ChannelError;
use crate::settings::Settings;

/// Buffered events between the feed task and the consumer.
const EVENT_BUFFER_SIZE: usize = 256;

/// Step size of the linear reconnect backoff.
const BACKOFF_STEP_MS: u64 = 250;

/// Consecutive connect failures before the feed gives up.
const MAX_CONNECT_FAILURES: u32 = 10;

/// One event delivered by the subscription feed.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    /// A newly persisted message.
    Inserted(Message),
    /// An update to an existing row (read-state transitions).
    Updated(Message),
    /// Terminal failure; no further events follow.
    Closed(ChannelError),
}

/// Connection parameters captured once at open time.
#[derive(Debug, Clone)]
struct FeedConfig {
    url: String,
    topic: String,
    table: String,
    filter: String,
    access_token: String,
    heartbeat: Duration,
    max_backoff: Duration,
}

impl FeedConfig {
    fn from_settings(settings: &Settings) -> Self {
        Self {
            url: settings.realtime_url(),
            topic: settings.topic(),
            table: settings.table.clone(),
            filter: settings.change_filter(),
            access_token: settings.access_token.clone(),
            heartbeat: Duration::from_secs(settings.realtime.heartbeat_secs),
            max_backoff: Duration::from_millis(settings.realtime.max_backoff_ms),
        }
    }
}

/// Entry point for opening the live feed.
pub struct RealtimeChannel;

impl RealtimeChannel {
    /// Open the live feed for the configured conversation.
    ///
    /// Events arrive on the returned receiver in arrival order, at most one
    /// per pushed frame. Redelivery after a reconnect is possible.
    pub fn open(settings: &Settings) -> (SubscriptionHandle, mpsc::Receiver<RemoteEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = FeedConfig::from_settings(settings);
        let task = tokio::spawn(run_feed(config, event_tx, shutdown_rx));
        (
            SubscriptionHandle {
                shutdown: shutdown_tx,
                task: Some(task),
            },
            event_rx,
        )
    }
}

/// An active feed registration.
///
/// Closing stops delivery; `close` waits for the feed task to finish, so no
/// event can arrive after it returns. Dropping the handle aborts the task.
pub struct SubscriptionHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Close the feed. Idempotent; a second call is a no-op.
    pub async fn close(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _ = self.shutdown.send(true);
        if let Err(err) = task.await {
            warn!("realtime feed task ended abnormally: {err}");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown.send(true);
            task.abort();
        }
    }
}

/// Why a single socket session ended.
enum FeedExit {
    Shutdown,
    ConsumerGone,
    Terminal(ChannelError),
    Reconnect(String),
}

/// What to do after one incoming frame.
enum FrameOutcome {
    Continue,
    ConsumerGone,
    Terminal(ChannelError),
}

async fn run_feed(
    config: FeedConfig,
    events: mpsc::Sender<RemoteEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures: u32 = 0;
    loop {
        if *shutdown.borrow() {
            return;
        }
        match connect_async(config.url.as_str()).await {
            Ok((socket, _)) => {
                failures = 0;
                match drive_socket(&config, socket, &events, &mut shutdown).await {
                    FeedExit::Shutdown => return,
                    FeedExit::ConsumerGone => {
                        debug!("realtime consumer dropped; stopping feed");
                        return;
                    }
                    FeedExit::Terminal(err) => {
                        warn!("realtime feed closed: {err}");
                        let _ = events.send(RemoteEvent::Closed(err)).await;
                        return;
                    }
                    FeedExit::Reconnect(reason) => {
                        debug!("realtime connection lost ({reason}); reconnecting");
                    }
                }
            }
            Err(err) => {
                if let Some(terminal) = classify_connect_error(&err) {
                    warn!("realtime connect rejected: {err}");
                    let _ = events.send(RemoteEvent::Closed(terminal)).await;
                    return;
                }
                failures += 1;
                if failures >= MAX_CONNECT_FAILURES {
                    warn!("realtime endpoint unreachable after {failures} attempts");
                    let _ = events
                        .send(RemoteEvent::Closed(ChannelError::Connect(err.to_string())))
                        .await;
                    return;
                }
                debug!("realtime connect failed: {err}");
            }
        }

        let backoff = reconnect_backoff(failures.max(1), config.max_backoff);
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// Linear backoff capped at the configured maximum.
fn reconnect_backoff(attempts: u32, max: Duration) -> Duration {
    let step = Duration::from_millis(u64::from(attempts.min(1_000)) * BACKOFF_STEP_MS);
    step.min(max)
}

/// A handshake the endpoint itself rejects is permanent; refused, reset or
/// timed-out connections are retried.
fn classify_connect_error(err: &WsError) -> Option<ChannelError> {
    let WsError::Http(response) = err else {
        return None;
    };
    let status = response.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        Some(ChannelError::Unauthorized)
    } else if status.is_client_error() {
        Some(ChannelError::Connect(format!(
            "handshake rejected with status {status}"
        )))
    } else {
        None
    }
}

async fn drive_socket<S>(
    config: &FeedConfig,
    mut socket: WebSocketStream<S>,
    events: &mpsc::Sender<RemoteEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> FeedExit
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut reference: u64 = 1;
    let join = RealtimeFrame::join(
        &config.topic,
        &config.table,
        Some(&config.filter),
        &config.access_token,
        reference,
    );
    let text = match serde_json::to_string(&join) {
        Ok(text) => text,
        Err(err) => return FeedExit::Terminal(ChannelError::Protocol(err.to_string())),
    };
    if let Err(err) = socket.send(WsMessage::text(text)).await {
        return FeedExit::Reconnect(err.to_string());
    }
    info!("joined realtime topic {}", config.topic);

    let mut heartbeat = tokio::time::interval(config.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = socket.close(None).await;
                    return FeedExit::Shutdown;
                }
            }
            _ = heartbeat.tick() => {
                reference += 1;
                let frame = RealtimeFrame::heartbeat(reference);
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => return FeedExit::Terminal(ChannelError::Protocol(err.to_string())),
                };
                if let Err(err) = socket.send(WsMessage::text(text)).await {
                    return FeedExit::Reconnect(err.to_string());
                }
            }
            next = socket.next() => {
                let message = match next {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => return FeedExit::Reconnect(err.to_string()),
                    None => return FeedExit::Reconnect("socket closed".to_string()),
                };
                match message {
                    WsMessage::Text(text) => match handle_frame(text.as_str(), events).await {
                        FrameOutcome::Continue => {}
                        FrameOutcome::ConsumerGone => {
                            let _ = socket.close(None).await;
                            return FeedExit::ConsumerGone;
                        }
                        FrameOutcome::Terminal(err) => {
                            let _ = socket.close(None).await;
                            return FeedExit::Terminal(err);
                        }
                    },
                    WsMessage::Ping(payload) => {
                        if let Err(err) = socket.send(WsMessage::Pong(payload)).await {
                            return FeedExit::Reconnect(err.to_string());
                        }
                    }
                    WsMessage::Close(_) => {
                        return FeedExit::Reconnect("server closed the socket".to_string());
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Decode one frame and forward any row change it carries.
async fn handle_frame(text: &str, events: &mpsc::Sender<RemoteEvent>) -> FrameOutcome {
    let frame: RealtimeFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!("ignoring undecodable realtime frame: {err}");
            return FrameOutcome::Continue;
        }
    };

    if frame.event == EVENT_ERROR {
        return FrameOutcome::Terminal(ChannelError::Protocol(format!(
            "channel errored on topic {}",
            frame.topic
        )));
    }

    if let Some(status) = frame.reply_status() {
        if status != "ok" {
            // Join rejections mean revoked or invalid credentials.
            return FrameOutcome::Terminal(ChannelError::Unauthorized);
        }
        return FrameOutcome::Continue;
    }

    let Some(change) = frame.change() else {
        return FrameOutcome::Continue;
    };
    let Some(record) = change.record else {
        return FrameOutcome::Continue;
    };

    let message = record.into_message();
    let event = match change.kind {
        ChangeKind::Insert => RemoteEvent::Inserted(message),
        ChangeKind::Update => RemoteEvent::Updated(message),
        // Deletions are not part of the session log contract.
        ChangeKind::Delete => return FrameOutcome::Continue,
    };

    if events.send(event).await.is_err() {
        return FrameOutcome::ConsumerGone;
    }
    FrameOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RealtimeSettings;

    fn test_settings() -> Settings {
        Settings {
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: "anon-key".to_string(),
            access_token: "user-token".to_string(),
            conversation_id: "conv-1".to_string(),
            author: "alice".to_string(),
            table: "messages".to_string(),
            http_timeout_secs: 5,
            history_limit: 100,
            realtime: RealtimeSettings {
                heartbeat_secs: 25,
                max_backoff_ms: 50,
            },
        }
    }

    fn insert_frame(id: &str, body: &str) -> String {
        format!(
            r#"{{"topic":"realtime:public:messages","event":"postgres_changes","payload":{{"data":{{"type":"INSERT","record":{{"id":"{id}","content":"{body}","author":"dr-lee","conversation_id":"conv-1","created_at":"2026-01-05T10:00:00Z","status":"not_seen"}}}}}}}}"#
        )
    }

    #[tokio::test]
    async fn insert_frames_are_forwarded_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        for (id, body) in [("msg-1", "first"), ("msg-2", "second")] {
            let outcome = handle_frame(&insert_frame(id, body), &tx).await;
            assert!(matches!(outcome, FrameOutcome::Continue));
        }

        for expected in ["msg-1", "msg-2"] {
            match rx.recv().await.unwrap() {
                RemoteEvent::Inserted(msg) => assert_eq!(msg.id.as_str(), expected),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn join_rejection_is_terminal() {
        let (tx, _rx) = mpsc::channel(8);
        let reply = r#"{"topic":"realtime:public:messages","event":"phx_reply","payload":{"status":"error","response":{"reason":"invalid token"}}}"#;
        let outcome = handle_frame(reply, &tx).await;
        assert!(matches!(
            outcome,
            FrameOutcome::Terminal(ChannelError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn dropped_consumer_stops_the_feed() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let outcome = handle_frame(&insert_frame("msg-1", "hello"), &tx).await;
        assert!(matches!(outcome, FrameOutcome::ConsumerGone));
    }

    #[tokio::test]
    async fn undecodable_frames_are_skipped() {
        let (tx, mut rx) = mpsc::channel(8);
        let outcome = handle_frame("not json at all", &tx).await;
        assert!(matches!(outcome, FrameOutcome::Continue));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unreachable_endpoint_surfaces_a_terminal_close() {
        let (mut handle, mut rx) = RealtimeChannel::open(&test_settings());
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no terminal event before timeout")
            .expect("feed ended without a terminal event");
        match event {
            RemoteEvent::Closed(ChannelError::Connect(_)) => {}
            other => panic!("unexpected event: {other:?}"),
        }
        handle.close().await;
    }

    #[test]
    fn rejected_handshakes_are_classified_as_permanent() {
        use tokio_tungstenite::tungstenite::http::Response;

        let forbidden = WsError::Http(Response::builder().status(403).body(None).unwrap());
        assert_eq!(
            classify_connect_error(&forbidden),
            Some(ChannelError::Unauthorized)
        );

        let not_found = WsError::Http(Response::builder().status(404).body(None).unwrap());
        assert!(matches!(
            classify_connect_error(&not_found),
            Some(ChannelError::Connect(_))
        ));

        let unavailable = WsError::Http(Response::builder().status(503).body(None).unwrap());
        assert_eq!(classify_connect_error(&unavailable), None);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut handle, _rx) = RealtimeChannel::open(&test_settings());
        handle.close().await;
        assert!(handle.is_closed());
        handle.close().await;
        assert!(handle.is_closed());
    }

    #[test]
    fn backoff_grows_linearly_and_caps() {
        let max = Duration::from_millis(1_000);
        assert_eq!(reconnect_backoff(1, max), Duration::from_millis(250));
        assert_eq!(reconnect_backoff(3, max), Duration::from_millis(750));
        assert_eq!(reconnect_backoff(50, max), max);
    }
}
