//! Thread boundary between connection workers and the host.
//!
//! Each connection worker owns a command receiver and a clone of the
//! runtime's message sender. The host feeds bytes through a
//! [`super::ConnectionHandle`] and drains results from a [`PipelineBridge`].

use crate::codec::DecoderStats;
use crate::hooks::{DispatchStats, ReceiveSignal};
use crate::message::Message;
use crate::pipeline::id::ConnectionId;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Commands sent from the host to one connection worker.
#[derive(Debug, Clone)]
pub enum PipelineCommand {
    /// Raw bytes read from the transport.
    Feed(Vec<u8>),
    /// Run `on_stop` and exit.
    Stop,
}

/// Messages sent from connection workers to the host.
#[derive(Debug, Clone)]
pub enum PipelineMessage {
    /// A connection worker is up and `on_start` has run.
    Started {
        connection: ConnectionId,
        endpoint: String,
    },

    /// A frame went through `on_receive`. Discarded messages carry no values.
    Dispatched {
        message: Arc<Message>,
        signal: ReceiveSignal,
    },

    /// Bytes a hook asked to write back to the transport.
    Outbound {
        connection: ConnectionId,
        bytes: Vec<u8>,
    },

    /// The connection finished and `on_stop` has run.
    Stopped {
        connection: ConnectionId,
        stats: ConnectionStats,
    },
}

/// Counters for one connection, reported when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub decoder: DecoderStats,
    pub dispatch: DispatchStats,
    pub outbound_frames: u64,
    /// Messages the host did not drain in time.
    pub dropped_messages: u64,
}

/// Channel capacity for messages (workers → host).
const MSG_CHANNEL_CAPACITY: usize = 10_000;

/// Host-side receiver for everything the connection workers publish.
pub struct PipelineBridge {
    pub msg_rx: Receiver<PipelineMessage>,
}

impl PipelineBridge {
    /// Create a new bridge and the sender the workers share.
    pub fn new() -> (Self, Sender<PipelineMessage>) {
        let (msg_tx, msg_rx) = bounded(MSG_CHANNEL_CAPACITY);
        (Self { msg_rx }, msg_tx)
    }

    /// Drain all pending messages.
    pub fn drain(&self) -> Vec<PipelineMessage> {
        self.msg_rx.try_iter().collect()
    }

    /// Try to receive a single message without blocking.
    pub fn try_recv(&self) -> Option<PipelineMessage> {
        self.msg_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<PipelineMessage> {
        self.msg_rx.recv_timeout(timeout).ok()
    }
}
