//! HTTP client: open the `/chat` event stream and call the conversation store endpoints.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use thiserror::Error;

use crate::config::Config;
use crate::messages::{ChatRequest, ConversationSummary, HistoryMessage, QuickAction};
use crate::transcript::Turn;

/// Raw response body chunks as they arrive over the network.
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// Transport-level failure.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    #[error("{0}")]
    Transport(String),
}

/// Everything the session needs from the backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send a chat message and return the raw event-stream body.
    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, ClientError>;

    /// Conversations in server order (most recently updated first).
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError>;

    async fn delete_conversation(&self, id: &str) -> Result<(), ClientError>;

    /// Stored turns of one conversation, oldest first.
    async fn fetch_messages(&self, id: &str) -> Result<Vec<Turn>, ClientError>;

    async fn quick_actions(&self) -> Result<Vec<QuickAction>, ClientError>;

    /// Whether the backend is reachable and answering 2xx.
    async fn health(&self) -> bool;
}

/// reqwest-backed [`ChatBackend`].
#[derive(Clone)]
pub struct Client {
    api_base: String,
    idle_timeout: Option<Duration>,
    http: reqwest::Client,
}

impl Client {
    /// `api_base` is the full endpoint root, e.g. `http://127.0.0.1:8000/api`.
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            idle_timeout: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut client = Self::new(config.api_base());
        client.idle_timeout = config.idle_timeout();
        client
    }

    /// Bound every chunk read of a chat stream by `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = check_status(self.http.get(self.url(path)).send().await?).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Fail a chunk read that takes longer than `timeout`; the stream ends after that.
fn with_idle_timeout(source: ByteStream, timeout: Duration) -> ByteStream {
    stream::unfold(Some(source), move |source| async move {
        let mut source = source?;
        match tokio::time::timeout(timeout, source.next()).await {
            Ok(Some(item)) => Some((item, Some(source))),
            Ok(None) => None,
            Err(_) => Some((Err(ClientError::IdleTimeout(timeout)), None)),
        }
    })
    .boxed()
}

/// Convert stored rows into turns, skipping roles the transcript has no place for.
pub fn turns_from_history(rows: Vec<HistoryMessage>) -> Vec<Turn> {
    rows.into_iter()
        .filter_map(|row| {
            let turn = Turn::from_history(row);
            if turn.is_none() {
                tracing::debug!("skipping history row with non-chat role");
            }
            turn
        })
        .collect()
}

#[async_trait]
impl ChatBackend for Client {
    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, ClientError> {
        let response = self
            .http
            .post(self.url("/chat"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: ByteStream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from))
            .boxed();
        Ok(match self.idle_timeout {
            Some(timeout) => with_idle_timeout(body, timeout),
            None => body,
        })
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        self.get_json("/conversations").await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ClientError> {
        let path = format!("/conversations/{id}");
        check_status(self.http.delete(self.url(&path)).send().await?).await?;
        Ok(())
    }

    async fn fetch_messages(&self, id: &str) -> Result<Vec<Turn>, ClientError> {
        let rows: Vec<HistoryMessage> = self.get_json(&format!("/conversations/{id}/messages")).await?;
        Ok(turns_from_history(rows))
    }

    async fn quick_actions(&self) -> Result<Vec<QuickAction>, ClientError> {
        self.get_json("/quick-actions").await
    }

    async fn health(&self) -> bool {
        match self
            .http
            .get(self.url("/health"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "health check failed");
                false
            }
        }
    }
}
