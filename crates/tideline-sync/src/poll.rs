use tideline_proto::{FetchQuery, Timestamp};
use tracing::debug;

/// Forward polling. Requests are serialized: a timer tick that lands while a
/// poll is outstanding is skipped, and an explicit request is remembered and
/// replayed once the outstanding poll completes.
#[derive(Debug, Clone)]
pub struct PollController {
    enabled: bool,
    in_flight: bool,
    rerun: bool,
    page_size: usize,
}

impl PollController {
    pub fn new(page_size: usize) -> Self {
        Self {
            enabled: false,
            in_flight: false,
            rerun: false,
            page_size,
        }
    }

    /// Called once the initial load has settled. Returns `true` when an
    /// explicit poll was requested before that and should run now.
    pub fn enable(&mut self) -> bool {
        self.enabled = true;
        std::mem::take(&mut self.rerun)
    }

    /// Timer path. Nothing to poll against until a message is known.
    pub fn tick(&mut self, latest: Option<Timestamp>) -> Option<FetchQuery> {
        if !self.enabled {
            return None;
        }
        if self.in_flight {
            debug!(target: "tideline::poll", "tick skipped; previous poll outstanding");
            return None;
        }
        let latest = latest?;
        self.in_flight = true;
        Some(FetchQuery::after(latest).with_limit(self.page_size))
    }

    /// Immediate poll outside the timer, e.g. after a submission. With an
    /// empty timeline the newest page is requested instead.
    pub fn request_now(&mut self, latest: Option<Timestamp>) -> Option<FetchQuery> {
        if !self.enabled || self.in_flight {
            self.rerun = true;
            return None;
        }
        self.in_flight = true;
        let query = match latest {
            Some(latest) => FetchQuery::after(latest),
            None => FetchQuery::latest(),
        };
        Some(query.with_limit(self.page_size))
    }

    /// Completes the outstanding poll. `received` is `None` on failure.
    /// Returns `true` when another poll should be issued right away: a
    /// request was queued meanwhile, or a full page suggests more is waiting.
    pub fn finish(&mut self, received: Option<usize>) -> bool {
        self.in_flight = false;
        let queued = std::mem::take(&mut self.rerun);
        match received {
            Some(n) => queued || n >= self.page_size,
            None => false,
        }
    }
}
