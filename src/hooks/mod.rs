//! User hooks and the context they run in.
//!
//! A [`Hook`] is invoked by the connection's [`Dispatcher`] for each
//! lifecycle event:
//!
//! - `on_start` once, before the first frame
//! - `on_receive` once per validated frame
//! - `on_timer` once per timer tick
//! - `on_stop` exactly once, also when the connection ends abnormally
//!
//! Native hooks implement the trait directly; scripts are wrapped by
//! [`crate::scripting::ScriptHook`].

pub mod dispatcher;

pub use dispatcher::{DispatchStats, Dispatcher, LifecycleState, DEFAULT_STOP_GRACE};

use crate::codec::{EncodeError, FrameLayout};
use crate::message::Message;
use crate::pipeline::id::ConnectionId;
use crate::sink::{SinkError, SinkGateway, SinkRequest, SinkResponse};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// What the dispatcher does with the values `on_receive` added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveSignal {
    /// Added values are kept and forwarded.
    Accept,
    /// Added values are dropped. The raw frame is still forwarded.
    Discard,
}

impl From<bool> for ReceiveSignal {
    fn from(accept: bool) -> Self {
        if accept {
            ReceiveSignal::Accept
        } else {
            ReceiveSignal::Discard
        }
    }
}

/// A fault raised by a hook.
#[derive(Error, Debug)]
pub enum HookError {
    #[error("script error: {0}")]
    Script(String),

    #[error("on_receive must return a bool, got {0}")]
    InvalidReturn(String),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

/// Lifecycle callbacks for one connection.
///
/// Every method runs on the connection's worker thread, never concurrently
/// with another method of the same instance.
pub trait Hook: Send {
    fn on_start(&mut self, _ctx: &mut HookContext) -> Result<(), HookError> {
        Ok(())
    }

    fn on_receive(
        &mut self,
        message: &mut Message,
        ctx: &mut HookContext,
    ) -> Result<ReceiveSignal, HookError>;

    /// `elapsed_ms` is the time since the connection's pipeline started.
    fn on_timer(&mut self, _elapsed_ms: u64, _ctx: &mut HookContext) -> Result<(), HookError> {
        Ok(())
    }

    fn on_stop(&mut self, _ctx: &mut HookContext) -> Result<(), HookError> {
        Ok(())
    }
}

/// Accepts every frame without deriving values.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Hook for AcceptAll {
    fn on_receive(
        &mut self,
        _message: &mut Message,
        _ctx: &mut HookContext,
    ) -> Result<ReceiveSignal, HookError> {
        Ok(ReceiveSignal::Accept)
    }
}

/// Everything a hook may touch besides the message.
#[derive(Debug)]
pub struct HookContext {
    connection: ConnectionId,
    gateway: SinkGateway,
    layout: Option<Arc<FrameLayout>>,
    deadline: Option<Instant>,
    outbound: Vec<Vec<u8>>,
}

impl HookContext {
    pub fn new(connection: ConnectionId, gateway: SinkGateway) -> Self {
        Self {
            connection,
            gateway,
            layout: None,
            deadline: None,
            outbound: Vec::new(),
        }
    }

    /// Layout used by [`HookContext::encode_frame`].
    pub fn with_layout(mut self, layout: Arc<FrameLayout>) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    pub fn gateway(&self) -> &SinkGateway {
        &self.gateway
    }

    pub fn layout(&self) -> Option<&Arc<FrameLayout>> {
        self.layout.as_ref()
    }

    /// Hard limit for synchronous sink calls, set while `on_stop` runs.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Timeout for the next synchronous sink call.
    pub fn call_timeout(&self) -> Duration {
        let configured = self.gateway.config().call_timeout;
        match self.deadline {
            Some(deadline) => configured.min(deadline.saturating_duration_since(Instant::now())),
            None => configured,
        }
    }

    /// Blocking sink call, bounded by [`HookContext::call_timeout`].
    pub fn call(&self, sink: &str, request: SinkRequest) -> Result<SinkResponse, SinkError> {
        self.gateway
            .call_with_timeout(self.connection, sink, request, self.call_timeout())
    }

    /// Fire-and-forget sink call.
    pub fn submit(&self, sink: &str, request: SinkRequest) -> bool {
        self.gateway.submit(self.connection, sink, request)
    }

    /// Queue bytes to be written back to the transport.
    pub fn send(&mut self, bytes: impl Into<Vec<u8>>) {
        self.outbound.push(bytes.into());
    }

    /// Build a frame with the connection's layout.
    pub fn encode_frame(&self, header: &[u8], payload: &[u8]) -> Result<Vec<u8>, HookError> {
        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| HookError::Failed("no frame layout available".to_string()))?;
        layout
            .encode(header, payload)
            .map_err(|e: EncodeError| HookError::Failed(e.to_string()))
    }

    pub(crate) fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbound)
    }

    /// Copy sharing the same connection, sinks and deadline, with an empty
    /// outbound queue. Hand it back with [`HookContext::absorb`].
    pub(crate) fn detached(&self) -> HookContext {
        HookContext {
            connection: self.connection,
            gateway: self.gateway.clone(),
            layout: self.layout.clone(),
            deadline: self.deadline,
            outbound: Vec::new(),
        }
    }

    pub(crate) fn absorb(&mut self, mut other: HookContext) {
        self.outbound.append(&mut other.outbound);
    }
}
