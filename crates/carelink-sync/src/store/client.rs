//! HTTP client for the remote message store.

use chrono::Utc;
use log::debug;
use reqwest::Client;
use serde_json::json;

use carelink_protocol::{Message, MessageId, MessageRow, NewMessageRow, ReadState};

use super::error::{StoreError, StoreResult};
use crate::settings::Settings;

/// Client for the message table of the remote store.
///
/// One remote write per [`StoreClient::send`]; reads never mutate.
#[derive(Debug, Clone)]
pub struct StoreClient {
    client: Client,
    rest_url: String,
    api_key: String,
    access_token: String,
    conversation_id: String,
    author: String,
}

impl StoreClient {
    /// Create a client from settings.
    pub fn new(settings: &Settings) -> StoreResult<Self> {
        let client = Client::builder().timeout(settings.http_timeout()).build()?;
        Ok(Self {
            client,
            rest_url: settings.rest_url(),
            api_key: settings.api_key.clone(),
            access_token: settings.access_token.clone(),
            conversation_id: settings.conversation_id.clone(),
            author: settings.author.clone(),
        })
    }

    /// Persist one message and return the confirmed representation with the
    /// server-assigned id and timestamp.
    pub async fn send(&self, body: &str) -> StoreResult<Message> {
        let body = body.trim();
        if body.is_empty() {
            return Err(StoreError::EmptyBody);
        }

        let row = NewMessageRow::new(body, &self.author, &self.conversation_id);
        debug!("persisting message to {}", self.rest_url);
        let response = self
            .client
            .post(&self.rest_url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.access_token)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;

        let mut rows: Vec<MessageRow> = Self::handle_response(response).await?;
        match rows.pop() {
            Some(row) => Ok(row.into_message()),
            None => Err(StoreError::Decode(
                "insert returned no representation".to_string(),
            )),
        }
    }

    /// Fetch the conversation history, oldest first. An empty conversation
    /// yields an empty vector.
    pub async fn fetch_recent(&self, limit: usize) -> StoreResult<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .get(&self.rest_url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.access_token)
            .query(&[
                ("conversation_id", format!("eq.{}", self.conversation_id)),
                ("order", "created_at.asc".to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        let rows: Vec<MessageRow> = Self::handle_response(response).await?;
        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }

    /// Mark the given messages as seen.
    pub async fn mark_seen(&self, ids: &[MessageId]) -> StoreResult<()> {
        self.patch_read_state(
            ids,
            json!({
                "status": ReadState::Seen,
                "seen_at": Utc::now(),
            }),
        )
        .await
    }

    /// Mark the given messages as delivered to this client.
    pub async fn mark_delivered(&self, ids: &[MessageId]) -> StoreResult<()> {
        self.patch_read_state(
            ids,
            json!({
                "status": ReadState::Delivered,
                "delivered_at": Utc::now(),
            }),
        )
        .await
    }

    async fn patch_read_state(
        &self,
        ids: &[MessageId],
        update: serde_json::Value,
    ) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let filter = format!(
            "in.({})",
            ids.iter()
                .map(MessageId::as_str)
                .collect::<Vec<_>>()
                .join(",")
        );
        let response = self
            .client
            .patch(&self.rest_url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.access_token)
            .query(&[("id", filter.as_str())])
            .json(&update)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> StoreResult<T> {
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| StoreError::Decode(err.to_string()))
    }

    async fn api_error(response: reqwest::Response) -> StoreError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        StoreError::Api { status, message }
    }
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
                max_backoff_ms: 10_000,
            },
        }
    }

    #[tokio::test]
    async fn empty_body_is_rejected_before_any_io() {
        let client = StoreClient::new(&test_settings()).unwrap();
        let err = client.send("   ").await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn fetch_recent_zero_is_empty_not_an_error() {
        let client = StoreClient::new(&test_settings()).unwrap();
        let messages = client.fetch_recent(0).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn mark_seen_with_no_ids_is_a_no_op() {
        let client = StoreClient::new(&test_settings()).unwrap();
        client.mark_seen(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn mark_delivered_with_no_ids_is_a_no_op() {
        let client = StoreClient::new(&test_settings()).unwrap();
        client.mark_delivered(&[]).await.unwrap();
    }
}
