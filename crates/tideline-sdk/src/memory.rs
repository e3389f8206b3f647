use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tideline_proto::{Cursor, FetchQuery, Message, NewMessage, Timestamp};
use tokio::sync::Mutex;

use crate::{MessageSource, SourceError};

#[derive(Default)]
struct Inner {
    /// Ascending by `created_at`.
    messages: Vec<Message>,
    next_id: u64,
    fail_fetches: usize,
    fail_creates: usize,
    queries: Vec<FetchQuery>,
}

/// In-memory message server for tests and offline runs.
///
/// Pages are returned newest-first, the way the real server answers, so
/// callers cannot lean on batch order.
#[derive(Default)]
pub struct InMemoryMessageSource {
    inner: Mutex<Inner>,
    latency: Option<Duration>,
}

impl InMemoryMessageSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delays every request by `latency` before it is answered.
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::default(),
            latency: Some(latency),
        })
    }

    /// Stores an already-formed message, as if another participant posted it.
    pub async fn insert(&self, message: Message) {
        let mut guard = self.inner.lock().await;
        let pos = guard
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        guard.messages.insert(pos, message);
    }

    pub async fn insert_all(&self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.insert(message).await;
        }
    }

    /// The next `count` fetches fail with a 503.
    pub async fn fail_fetches(&self, count: usize) {
        self.inner.lock().await.fail_fetches = count;
    }

    /// The next `count` creates fail with a 503.
    pub async fn fail_creates(&self, count: usize) {
        self.inner.lock().await.fail_creates = count;
    }

    /// Every fetch query received so far, in arrival order.
    pub async fn queries(&self) -> Vec<FetchQuery> {
        self.inner.lock().await.queries.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn injected_failure() -> SourceError {
    SourceError::UnexpectedStatus {
        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        body: "injected failure".into(),
    }
}

fn page(messages: &[Message], query: &FetchQuery) -> Vec<Message> {
    let limit = query.effective_limit();
    let window: &[Message] = match query.cursor {
        Cursor::Latest => {
            let start = messages.len().saturating_sub(limit);
            &messages[start..]
        }
        Cursor::Before(ts) => {
            let end = messages.partition_point(|m| m.created_at < ts);
            &messages[end.saturating_sub(limit)..end]
        }
        Cursor::After(ts) => {
            let start = messages.partition_point(|m| m.created_at <= ts);
            let end = (start + limit).min(messages.len());
            &messages[start..end]
        }
    };
    window.iter().rev().cloned().collect()
}

#[async_trait]
impl MessageSource for InMemoryMessageSource {
    async fn fetch_messages(&self, query: FetchQuery) -> Result<Vec<Message>, SourceError> {
        self.simulate_latency().await;
        let mut guard = self.inner.lock().await;
        guard.queries.push(query);
        if guard.fail_fetches > 0 {
            guard.fail_fetches -= 1;
            return Err(injected_failure());
        }
        Ok(page(&guard.messages, &query))
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, SourceError> {
        self.simulate_latency().await;
        let mut guard = self.inner.lock().await;
        if guard.fail_creates > 0 {
            guard.fail_creates -= 1;
            return Err(injected_failure());
        }
        guard.next_id += 1;
        let created_at = next_timestamp(guard.messages.last().map(|m| m.created_at));
        let created = Message {
            id: format!("mem-{}", guard.next_id),
            author: message.author,
            body: message.body,
            created_at,
        };
        guard.messages.push(created.clone());
        Ok(created)
    }
}

/// Server clock that never runs backwards relative to stored history.
fn next_timestamp(last: Option<Timestamp>) -> Timestamp {
    let now = Utc::now();
    match last {
        Some(last) if last >= now => last + chrono::Duration::milliseconds(1),
        _ => now,
    }
}
