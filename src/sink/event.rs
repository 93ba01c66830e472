//! Structured channel for asynchronous sink outcomes.
//!
//! Every event is also logged exactly once, at the point it is emitted.
//! The channel is bounded; when the host does not drain it, events are
//! dropped from the channel but still logged.

use crate::pipeline::id::ConnectionId;
use crate::sink::SinkError;
use crossbeam_channel::{bounded, Receiver, Sender};

/// Channel capacity for sink events.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// An accepted asynchronous call failed in the sink.
    Failed {
        sink: String,
        connection: ConnectionId,
        op: &'static str,
        error: SinkError,
    },
    /// An asynchronous call (or one of its records) was refused before queuing.
    Rejected {
        sink: String,
        connection: ConnectionId,
        op: &'static str,
        error: SinkError,
    },
    /// Work still queued when the drain deadline passed.
    Abandoned { sink: String, count: usize },
}

/// Sending side of the sink event channel.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<Sender<SinkEvent>>,
}

impl EventSink {
    /// Create a connected pair.
    pub fn new() -> (Self, Receiver<SinkEvent>) {
        let (tx, rx) = bounded(EVENT_CHANNEL_CAPACITY);
        (Self { tx: Some(tx) }, rx)
    }

    /// Events are only logged.
    pub fn log_only() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SinkEvent) {
        match &event {
            SinkEvent::Failed {
                sink,
                connection,
                op,
                error,
            } => tracing::warn!(
                sink = %sink,
                connection = %connection,
                op,
                kind = error.kind(),
                "async sink call failed: {}",
                error
            ),
            SinkEvent::Rejected {
                sink,
                connection,
                op,
                error,
            } => tracing::warn!(
                sink = %sink,
                connection = %connection,
                op,
                kind = error.kind(),
                "async sink call rejected: {}",
                error
            ),
            SinkEvent::Abandoned { sink, count } => tracing::warn!(
                sink = %sink,
                kind = "abandoned",
                count,
                "drain deadline passed, abandoning queued sink calls"
            ),
        }
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(event);
        }
    }
}
