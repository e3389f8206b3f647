use std::io;

use thiserror::Error;
use tideline_sdk::SourceError;
use tideline_sync::SessionClosed;

use crate::telemetry::logging::InitError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("message server error: {0}")]
    Source(#[from] SourceError),
    #[error("{0}")]
    Session(#[from] SessionClosed),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("logging initialization failed: {0}")]
    Logging(#[from] InitError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
