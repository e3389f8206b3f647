use std::collections::HashSet;

use tideline_proto::{Message, Timestamp};
use tracing::warn;

use crate::viewport::TimelineChange;

/// Which end of the timeline a batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Prepend,
    Append,
}

/// Folds `incoming` into `existing` and returns the new timeline.
///
/// `incoming` may be unsorted and may repeat messages that are already known
/// (or repeat itself). It is stably sorted by `created_at`, stripped of known
/// ids, and spliced at the requested end. Equal timestamps keep arrival order
/// within the batch and never move ahead of an existing entry.
pub fn merge_batch(existing: &[Message], incoming: Vec<Message>, position: Position) -> Vec<Message> {
    match fold(existing, incoming, position) {
        Some((merged, _)) => merged,
        None => existing.to_vec(),
    }
}

/// `None` when nothing in `incoming` is new. The flag is set when the batch
/// had to be interleaved instead of spliced at one end.
fn fold(
    existing: &[Message],
    incoming: Vec<Message>,
    position: Position,
) -> Option<(Vec<Message>, bool)> {
    let fresh = fresh_entries(existing, incoming);
    if fresh.is_empty() {
        return None;
    }

    let fits = match (position, existing.first(), existing.last()) {
        (_, None, _) | (_, _, None) => true,
        (Position::Prepend, Some(first), _) => fresh
            .last()
            .is_some_and(|m| m.created_at < first.created_at),
        (Position::Append, _, Some(last)) => fresh
            .first()
            .is_some_and(|m| m.created_at >= last.created_at),
    };

    if !fits {
        warn!(
            target: "tideline::store",
            ?position,
            incoming = fresh.len(),
            "batch crosses the timeline boundary; interleaving"
        );
        return Some((interleave(existing, fresh), true));
    }

    let mut merged = Vec::with_capacity(existing.len() + fresh.len());
    match position {
        Position::Prepend => {
            merged.extend(fresh);
            merged.extend_from_slice(existing);
        }
        Position::Append => {
            merged.extend_from_slice(existing);
            merged.extend(fresh);
        }
    }
    Some((merged, false))
}

fn fresh_entries(existing: &[Message], mut incoming: Vec<Message>) -> Vec<Message> {
    let known: HashSet<&str> = existing.iter().map(|m| m.id.as_str()).collect();
    let mut batch_ids = HashSet::with_capacity(incoming.len());
    incoming.sort_by_key(|m| m.created_at);
    incoming.retain(|m| !known.contains(m.id.as_str()) && batch_ids.insert(m.id.clone()));
    incoming
}

/// Stable two-way merge; existing entries win ties.
fn interleave(existing: &[Message], fresh: Vec<Message>) -> Vec<Message> {
    let mut merged = Vec::with_capacity(existing.len() + fresh.len());
    let mut fresh = fresh.into_iter().peekable();
    for current in existing {
        while let Some(next) = fresh.next_if(|m| m.created_at < current.created_at) {
            merged.push(next);
        }
        merged.push(current.clone());
    }
    merged.extend(fresh);
    merged
}

/// The deduplicated, ascending sequence of messages known to a session.
#[derive(Debug, Clone, Default)]
pub struct TimelineStore {
    messages: Vec<Message>,
}

impl TimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn earliest_time(&self) -> Option<Timestamp> {
        self.messages.first().map(|m| m.created_at)
    }

    pub fn latest_time(&self) -> Option<Timestamp> {
        self.messages.last().map(|m| m.created_at)
    }

    /// Applies [`merge_batch`] and describes the result, or returns `None`
    /// when the batch held nothing new.
    pub fn merge(&mut self, incoming: Vec<Message>, position: Position) -> Option<TimelineChange> {
        let (merged, interleaved) = fold(&self.messages, incoming, position)?;
        let added = merged.len() - self.messages.len();
        self.messages = merged;
        Some(match (interleaved, position) {
            (true, _) => TimelineChange::Interleaved { added },
            (false, Position::Prepend) => TimelineChange::Prepended { added },
            (false, Position::Append) => TimelineChange::Appended { added },
        })
    }
}
