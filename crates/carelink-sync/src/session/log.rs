//! Ordered message log for one conversation.

use carelink_protocol::{DeliveryState, Message, MessageId, ReadState};

/// Window within which a remote insert may be the echo of an in-flight send.
const CORRELATION_WINDOW_SECS: i64 = 10;

/// The session's message log.
///
/// Append-only from the consumer's perspective: entries transition
/// `Pending -> Confirmed`/`Failed` in place and nothing is ever edited
/// otherwise. Ordering is by `created_at` with the id as tie-break. Identity
/// is the resolved server id; while a send is in flight, a correlation check
/// on author, body and timestamp keeps the feed echo from rendering twice.
#[derive(Debug, Default)]
pub struct SessionLog {
    entries: Vec<Message>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the log with fetched history, skipping ids already present.
    pub fn seed(&mut self, history: Vec<Message>) {
        for message in history {
            if !self.contains(&message.id) {
                self.entries.push(message);
            }
        }
        self.resort();
    }

    /// Append an optimistic pending entry and return its provisional id.
    pub fn append_pending(&mut self, author: &str, body: &str) -> MessageId {
        let message = Message::pending(author, body);
        let id = message.id.clone();
        self.entries.push(message);
        self.resort();
        id
    }

    /// Resolve a pending entry with the persisted message.
    ///
    /// If the server id already landed through the feed, the provisional
    /// entry is discarded instead of inserting a second confirmed copy.
    pub fn confirm(&mut self, provisional: &MessageId, persisted: Message) -> bool {
        if self.contains(&persisted.id) {
            return self.remove(provisional);
        }
        match self.position(provisional) {
            Some(index) => self.entries[index] = persisted,
            None => self.entries.push(persisted),
        }
        self.resort();
        true
    }

    /// Transition a pending entry to `Failed`.
    pub fn fail(&mut self, provisional: &MessageId, reason: &str) -> bool {
        let Some(index) = self.position(provisional) else {
            return false;
        };
        self.entries[index].delivery = DeliveryState::Failed {
            reason: reason.to_string(),
        };
        true
    }

    /// Put a failed entry back to `Pending` for a manual retry and return
    /// its body. `None` if the id is unknown or the entry is not failed.
    pub fn mark_retrying(&mut self, id: &MessageId) -> Option<String> {
        let index = self.position(id)?;
        if !self.entries[index].delivery.is_failed() {
            return None;
        }
        self.entries[index].delivery = DeliveryState::Pending;
        Some(self.entries[index].body.clone())
    }

    /// Insert a message delivered by the feed.
    ///
    /// No-op when the id is already present or when the message correlates
    /// with an in-flight send; returns whether the log changed.
    pub fn apply_remote(&mut self, message: Message) -> bool {
        if self.contains(&message.id) || self.correlates_with_pending(&message) {
            return false;
        }
        self.entries.push(message);
        self.resort();
        true
    }

    /// Merge a row update (read-state transition) into an existing entry.
    /// Updates never insert; unknown ids are ignored.
    pub fn apply_update(&mut self, message: Message) -> bool {
        let Some(index) = self.position(&message.id) else {
            return false;
        };
        let entry = &mut self.entries[index];
        if entry.read_state == message.read_state {
            return false;
        }
        entry.read_state = message.read_state;
        true
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.position(id).is_some()
    }

    /// Ids of confirmed entries not yet marked seen, from someone else.
    pub fn unseen_from(&self, own_author: &str) -> Vec<MessageId> {
        self.entries
            .iter()
            .filter(|entry| {
                entry.author != own_author
                    && entry.read_state != ReadState::Seen
                    && matches!(entry.delivery, DeliveryState::Confirmed)
            })
            .map(|entry| entry.id.clone())
            .collect()
    }

    /// Cloned ordered view for rendering.
    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.id == id)
    }

    fn remove(&mut self, id: &MessageId) -> bool {
        match self.position(id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    fn correlates_with_pending(&self, message: &Message) -> bool {
        self.entries.iter().any(|entry| {
            entry.delivery.is_pending()
                && entry.author == message.author
                && entry.body == message.body
                && (entry.created_at - message.created_at)
                    .num_seconds()
                    .abs()
                    <= CORRELATION_WINDOW_SECS
        })
    }

    fn resort(&mut self) {
        self.entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
    }
}
