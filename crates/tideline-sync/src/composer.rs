use std::collections::VecDeque;

use tideline_proto::NewMessage;
use tracing::debug;

/// A submitted message together with the draft text it was taken from.
#[derive(Debug, Clone)]
struct Outgoing {
    message: NewMessage,
    draft: String,
}

/// Outgoing-message draft plus the submissions waiting on the server.
///
/// Creates are sent one at a time in submission order; the front of the
/// queue is the request in flight.
#[derive(Debug, Clone, Default)]
pub struct Composer {
    draft: String,
    outgoing: VecDeque<Outgoing>,
}

/// How a finished create left the composer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settled {
    /// The draft was cleared because it still held the sent text.
    pub cleared: bool,
    /// The next queued submission, now in flight.
    pub next: Option<NewMessage>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Submissions not yet settled, including the one in flight.
    pub fn queued(&self) -> usize {
        self.outgoing.len()
    }

    /// Queues the current draft as a message from `author`. Returns the
    /// message to send now, or `None` when the draft is blank after trimming
    /// or an earlier create is still outstanding.
    pub fn begin_submit(&mut self, author: &str) -> Option<NewMessage> {
        let body = self.draft.trim();
        if body.is_empty() {
            return None;
        }
        self.outgoing.push_back(Outgoing {
            message: NewMessage::new(body, author),
            draft: self.draft.clone(),
        });
        if self.outgoing.len() > 1 {
            debug!(target: "tideline::submit", queued = self.outgoing.len(), "submission queued behind create in flight");
            return None;
        }
        self.outgoing.front().map(|next| next.message.clone())
    }

    /// Settles the create in flight. On success the draft is cleared unless
    /// it was edited after submitting; on failure it is kept for a retry.
    /// Either way the next queued submission is released.
    pub fn finish_submit(&mut self, created: bool) -> Settled {
        let Some(sent) = self.outgoing.pop_front() else {
            return Settled::default();
        };
        let cleared = created && self.draft == sent.draft;
        if cleared {
            self.draft.clear();
        }
        Settled {
            cleared,
            next: self.outgoing.front().map(|next| next.message.clone()),
        }
    }
}
