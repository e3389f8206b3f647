//! Shared message definitions for the tideline client and its message server.
//! Kept in a dedicated crate so the HTTP client, the sync engine and test
//! doubles agree on one wire shape and one page-size contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of messages a single page holds. A backward fetch that returns
/// fewer than this many messages means the server has no older history.
pub const PAGE_SIZE: usize = 50;

/// Server-assigned message identifier.
pub type MessageId = String;

/// Timestamp used as a pagination cursor.
pub type Timestamp = DateTime<Utc>;

/// A single chat message. Immutable once the server has assigned `id` and
/// `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub author: String,
    #[serde(rename = "message")]
    pub body: String,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
}

/// Payload for creating a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(rename = "message")]
    pub body: String,
    pub author: String,
}

impl NewMessage {
    pub fn new(body: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            author: author.into(),
        }
    }
}

/// Where a fetch starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// The most recent page.
    Latest,
    /// Messages created strictly before the timestamp.
    Before(Timestamp),
    /// Messages created strictly after the timestamp.
    After(Timestamp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchQuery {
    pub cursor: Cursor,
    pub limit: Option<usize>,
}

impl FetchQuery {
    pub fn latest() -> Self {
        Self {
            cursor: Cursor::Latest,
            limit: None,
        }
    }

    pub fn before(ts: Timestamp) -> Self {
        Self {
            cursor: Cursor::Before(ts),
            limit: None,
        }
    }

    pub fn after(ts: Timestamp) -> Self {
        Self {
            cursor: Cursor::After(ts),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Page size the server applies when no explicit limit is sent.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(PAGE_SIZE)
    }
}
