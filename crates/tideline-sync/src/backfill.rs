use tideline_proto::{FetchQuery, Timestamp};
use tracing::debug;

use crate::viewport::{ScrollAnchor, ScrollMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillState {
    Idle,
    /// A request is outstanding; the anchor was captured when it was issued.
    Loading { anchor: ScrollAnchor },
    /// The server has no older history. Terminal for the session.
    Exhausted,
}

/// Drives backward pagination. At most one request is outstanding; triggers
/// that arrive while loading are dropped rather than queued.
#[derive(Debug, Clone)]
pub struct BackfillController {
    state: BackfillState,
    page_size: usize,
}

impl BackfillController {
    pub fn new(page_size: usize) -> Self {
        Self {
            state: BackfillState::Idle,
            page_size,
        }
    }

    pub fn state(&self) -> BackfillState {
        self.state
    }

    pub fn has_more_older(&self) -> bool {
        !matches!(self.state, BackfillState::Exhausted)
    }

    pub fn in_flight(&self) -> bool {
        matches!(self.state, BackfillState::Loading { .. })
    }

    /// Handles a "near top" signal. Returns the query to issue, having
    /// recorded the scroll anchor first, or `None` when the trigger is a no-op.
    pub fn trigger(
        &mut self,
        earliest: Option<Timestamp>,
        metrics: ScrollMetrics,
    ) -> Option<FetchQuery> {
        match self.state {
            BackfillState::Idle => {}
            BackfillState::Loading { .. } => {
                debug!(target: "tideline::backfill", "trigger ignored; request in flight");
                return None;
            }
            BackfillState::Exhausted => {
                debug!(target: "tideline::backfill", "trigger ignored; history exhausted");
                return None;
            }
        }
        let before = earliest?;
        self.state = BackfillState::Loading {
            anchor: ScrollAnchor::capture(metrics),
        };
        debug!(target: "tideline::backfill", %before, page_size = self.page_size, "requesting older messages");
        Some(FetchQuery::before(before).with_limit(self.page_size))
    }

    /// Content of `height` was rendered below the fold while loading.
    pub fn note_appended(&mut self, height: u32) {
        if let BackfillState::Loading { anchor } = &mut self.state {
            anchor.rebase(height);
        }
    }

    /// Completes a successful fetch that returned `received` messages and
    /// hands back the anchor recorded when it was issued.
    pub fn finish(&mut self, received: usize) -> Option<ScrollAnchor> {
        let anchor = match self.state {
            BackfillState::Loading { anchor } => Some(anchor),
            _ => None,
        };
        self.state = if received < self.page_size {
            BackfillState::Exhausted
        } else {
            BackfillState::Idle
        };
        debug!(target: "tideline::backfill", received, state = ?self.state, "backfill finished");
        anchor
    }

    /// A failed fetch returns to idle so the next trigger retries. Failure
    /// is never read as exhaustion.
    pub fn fail(&mut self) {
        if self.in_flight() {
            self.state = BackfillState::Idle;
        }
    }
}
