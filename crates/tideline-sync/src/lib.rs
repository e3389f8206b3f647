//! Timeline synchronization for a shared chat room.
//!
//! Three acquisition paths feed one [`TimelineStore`]: the initial load,
//! backward pagination ([`BackfillController`]) and forward polling
//! ([`PollController`]). All of them fold results in through
//! [`merge_batch`], so completions may arrive in any order and the timeline
//! stays sorted and duplicate-free. A [`Session`] owns the store and drives
//! the controllers from a single tokio task.

pub mod backfill;
pub mod composer;
pub mod error;
pub mod poll;
pub mod session;
pub mod store;
pub mod viewport;

pub use backfill::{BackfillController, BackfillState};
pub use composer::{Composer, Settled};
pub use error::{FetchPhase, SessionClosed, SyncError};
pub use poll::PollController;
pub use session::{Session, SessionConfig, SessionEvent, SessionHandle, DEFAULT_POLL_INTERVAL};
pub use store::{merge_batch, Position, TimelineStore};
pub use viewport::{NullViewport, ScrollAnchor, ScrollMetrics, TimelineChange, Viewport};
