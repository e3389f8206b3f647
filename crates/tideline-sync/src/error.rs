use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tideline_sdk::SourceError;

/// Which acquisition path a failed fetch belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    InitialLoad,
    Backfill,
    Poll,
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchPhase::InitialLoad => "initial load",
            FetchPhase::Backfill => "backfill",
            FetchPhase::Poll => "poll",
        })
    }
}

/// Transient failures surfaced to the user as notifications. None of them
/// removes displayed messages.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("{phase} fetch failed: {source}")]
    FetchFailed {
        phase: FetchPhase,
        #[source]
        source: Arc<SourceError>,
    },
    #[error("submission failed: {source}")]
    SubmissionFailed {
        #[source]
        source: Arc<SourceError>,
    },
}

impl SyncError {
    pub fn fetch(phase: FetchPhase, source: SourceError) -> Self {
        SyncError::FetchFailed {
            phase,
            source: Arc::new(source),
        }
    }

    pub fn submission(source: SourceError) -> Self {
        SyncError::SubmissionFailed {
            source: Arc::new(source),
        }
    }
}

/// Returned by [`crate::SessionHandle`] calls once the session task is gone.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("session closed")]
pub struct SessionClosed;
