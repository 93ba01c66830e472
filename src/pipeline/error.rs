//! Pipeline-specific error types.

use crate::codec::FrameSpecError;
use crate::pipeline::id::ConnectionId;
use thiserror::Error;

/// Errors raised while opening or driving connections.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Timer period {period_ms} ms is below the minimum of {min_ms} ms")]
    InvalidTimerPeriod { period_ms: u64, min_ms: u64 },

    #[error("Frame spec error: {0}")]
    FrameSpec(#[from] FrameSpecError),

    #[error("Endpoint '{0}' already has an open connection")]
    EndpointInUse(String),

    #[error("Connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    #[error("Connection {0} worker panicked")]
    WorkerPanicked(ConnectionId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
