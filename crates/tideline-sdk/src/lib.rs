//! Asynchronous client for the tideline message server.
//!
//! The sync engine only ever talks to a [`MessageSource`]; [`MessageClient`]
//! is the HTTP implementation and [`InMemoryMessageSource`] the in-process
//! one used by tests and offline runs.

mod entities;
pub mod memory;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tideline_proto::{Cursor, FetchQuery, Message, NewMessage};
use tracing::debug;

pub use entities::decode_entities;
pub use memory::InMemoryMessageSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
}

/// Where messages come from. Implementations make no promise about the order
/// of a returned batch.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch_messages(&self, query: FetchQuery) -> Result<Vec<Message>, SourceError>;

    async fn create_message(&self, message: NewMessage) -> Result<Message, SourceError>;
}

#[derive(Clone)]
pub struct MessageClient {
    http: Client,
    base_url: url::Url,
    token: Option<String>,
}

impl MessageClient {
    pub fn new(base_url: &str) -> Result<Self, SourceError> {
        let mut base_url = url::Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &url::Url {
        &self.base_url
    }

    pub async fn list_messages(&self, query: FetchQuery) -> Result<Vec<Message>, SourceError> {
        let url = self.base_url.join("messages")?;
        let params = query_params(&query);
        debug!(target: "tideline::sdk", %url, ?params, "fetching messages");
        let mut req = self.http.get(url).query(&params);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let messages: Vec<Message> = read_json(req.send().await?).await?;
        Ok(messages.into_iter().map(decode_message).collect())
    }

    pub async fn post_message(&self, message: &NewMessage) -> Result<Message, SourceError> {
        let url = self.base_url.join("messages")?;
        let mut req = self.http.post(url).json(message);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let created: Message = read_json(req.send().await?).await?;
        Ok(decode_message(created))
    }
}

#[async_trait]
impl MessageSource for MessageClient {
    async fn fetch_messages(&self, query: FetchQuery) -> Result<Vec<Message>, SourceError> {
        self.list_messages(query).await
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, SourceError> {
        self.post_message(&message).await
    }
}

fn query_params(query: &FetchQuery) -> Vec<(&'static str, String)> {
    let mut params = Vec::with_capacity(2);
    match query.cursor {
        Cursor::Latest => {}
        Cursor::Before(ts) => {
            params.push(("before", ts.to_rfc3339_opts(SecondsFormat::Millis, true)))
        }
        Cursor::After(ts) => {
            params.push(("after", ts.to_rfc3339_opts(SecondsFormat::Millis, true)))
        }
    }
    if let Some(limit) = query.limit {
        params.push(("limit", limit.to_string()));
    }
    params
}

async fn read_json<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, SourceError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(SourceError::UnexpectedStatus { status, body });
    }
    let bytes = res.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn decode_message(message: Message) -> Message {
    Message {
        body: decode_entities(&message.body),
        author: decode_entities(&message.author),
        ..message
    }
}
