//! Per-connection hook dispatcher.
//!
//! Drives one [`Hook`] instance through
//! `Created → Started → Running → Stopping → Stopped`. Every hook call goes
//! through one guard: an error return or a panic is logged with the
//! connection id and hook name, counted, and treated as
//! [`ReceiveSignal::Discard`]. A faulty hook never takes the dispatcher down.

use crate::hooks::{Hook, HookContext, HookError, ReceiveSignal};
use crate::message::Message;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

/// Default grace period for synchronous calls made from `on_stop`.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Started,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub accepted: u64,
    pub discarded: u64,
    pub ticks: u64,
    pub hook_faults: u64,
}

pub struct Dispatcher {
    hook: Box<dyn Hook>,
    ctx: HookContext,
    state: LifecycleState,
    stats: DispatchStats,
    stop_grace: Duration,
}

impl Dispatcher {
    pub fn new(hook: Box<dyn Hook>, ctx: HookContext) -> Self {
        Self {
            hook,
            ctx,
            state: LifecycleState::Created,
            stats: DispatchStats::default(),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn context(&self) -> &HookContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut HookContext {
        &mut self.ctx
    }

    /// Run `on_start` and enter `Running`. No-op unless `Created`.
    pub fn start(&mut self) {
        if self.state != LifecycleState::Created {
            return;
        }
        self.state = LifecycleState::Started;
        tracing::debug!(connection = %self.ctx.connection_id(), "hooks starting");
        self.guard("on_start", |hook, ctx| hook.on_start(ctx));
        self.state = LifecycleState::Running;
    }

    /// Dispatch one message. Returns `None` when not running.
    ///
    /// On `Discard` (or a fault) the values added by the hook are removed.
    pub fn receive(&mut self, message: &mut Message) -> Option<ReceiveSignal> {
        if self.state != LifecycleState::Running {
            return None;
        }
        let signal = self
            .guard("on_receive", |hook, ctx| hook.on_receive(message, ctx))
            .unwrap_or(ReceiveSignal::Discard);
        match signal {
            ReceiveSignal::Accept => self.stats.accepted += 1,
            ReceiveSignal::Discard => {
                message.clear_values();
                self.stats.discarded += 1;
            }
        }
        Some(signal)
    }

    /// Dispatch one timer tick. Returns false when not running.
    pub fn tick(&mut self, elapsed_ms: u64) -> bool {
        if self.state != LifecycleState::Running {
            return false;
        }
        self.stats.ticks += 1;
        self.guard("on_timer", |hook, ctx| hook.on_timer(elapsed_ms, ctx));
        true
    }

    /// Run `on_stop` with the grace deadline set. Runs at most once.
    pub fn stop(&mut self) {
        match self.state {
            LifecycleState::Stopping | LifecycleState::Stopped => return,
            LifecycleState::Created => {
                self.state = LifecycleState::Stopped;
                return;
            }
            LifecycleState::Started | LifecycleState::Running => {}
        }
        self.state = LifecycleState::Stopping;
        self.ctx.set_deadline(Some(Instant::now() + self.stop_grace));
        self.guard("on_stop", |hook, ctx| hook.on_stop(ctx));
        self.ctx.set_deadline(None);
        self.state = LifecycleState::Stopped;
        tracing::debug!(
            connection = %self.ctx.connection_id(),
            accepted = self.stats.accepted,
            discarded = self.stats.discarded,
            faults = self.stats.hook_faults,
            "hooks stopped"
        );
    }

    fn guard<T>(
        &mut self,
        hook_name: &'static str,
        call: impl FnOnce(&mut dyn Hook, &mut HookContext) -> Result<T, HookError>,
    ) -> Option<T> {
        let hook = &mut *self.hook;
        let ctx = &mut self.ctx;
        let error = match std::panic::catch_unwind(AssertUnwindSafe(|| call(hook, ctx))) {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(err)) => err,
            Err(payload) => HookError::Panicked(panic_message(payload.as_ref())),
        };
        self.stats.hook_faults += 1;
        tracing::error!(
            connection = %self.ctx.connection_id(),
            hook = hook_name,
            kind = "hook_fault",
            "hook fault: {}",
            error
        );
        None
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if !matches!(self.state, LifecycleState::Stopped | LifecycleState::Created) {
            tracing::warn!(
                connection = %self.ctx.connection_id(),
                "dispatcher dropped while {:?}, running on_stop",
                self.state
            );
            self.stop();
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connection", &self.ctx.connection_id())
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
