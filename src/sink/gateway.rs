//! Sink gateway: one worker thread and FIFO queue per registered sink.
//!
//! Calls to one sink execute in the order they were enqueued. Calls to
//! different sinks run in parallel on their own workers.
//!
//! # Shutdown
//!
//! [`SinkGateway::shutdown`] stops accepting work, lets each worker drain its
//! queue until the drain deadline and abandons what is left. Abandoned work
//! is reported once per sink as [`SinkEvent::Abandoned`].

use crate::pipeline::id::ConnectionId;
use crate::sink::batch::{apply_batch_mode, BatchMode};
use crate::sink::event::{EventSink, SinkEvent};
use crate::sink::{SinkClient, SinkError, SinkRequest, SinkResponse};
use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError,
};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Default bound for a synchronous call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default time queued work may keep running after shutdown.
pub const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_millis(3000);
/// Default per-sink queue capacity.
pub const DEFAULT_SINK_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct SinkGatewayConfig {
    pub call_timeout: Duration,
    pub drain_deadline: Duration,
    pub queue_capacity: usize,
    pub batch_mode: BatchMode,
}

impl Default for SinkGatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            drain_deadline: DEFAULT_DRAIN_DEADLINE,
            queue_capacity: DEFAULT_SINK_QUEUE_CAPACITY,
            batch_mode: BatchMode::default(),
        }
    }
}

struct Call {
    connection: ConnectionId,
    request: SinkRequest,
    reply: Option<Sender<Result<SinkResponse, SinkError>>>,
    /// Set by a synchronous caller that gave up waiting.
    cancelled: Option<Arc<AtomicBool>>,
}

impl Call {
    fn is_cancelled(&self) -> bool {
        self.cancelled
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

enum Job {
    Call(Call),
    /// Last job a worker sees; sent by shutdown.
    Stop,
}

struct Inner {
    config: SinkGatewayConfig,
    queues: HashMap<String, Sender<Job>>,
    events: EventSink,
    closed: AtomicBool,
    drain_deadline: Arc<OnceLock<Instant>>,
    exits: Mutex<Option<Receiver<String>>>,
}

/// Cloneable handle to the sink workers.
#[derive(Clone)]
pub struct SinkGateway {
    inner: Arc<Inner>,
}

/// Registers sinks and starts their workers.
pub struct SinkGatewayBuilder {
    config: SinkGatewayConfig,
    events: EventSink,
    clients: Vec<(String, Box<dyn SinkClient>)>,
}

impl SinkGatewayBuilder {
    pub fn new(config: SinkGatewayConfig) -> Self {
        Self {
            config,
            events: EventSink::log_only(),
            clients: Vec::new(),
        }
    }

    pub fn events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn sink(mut self, name: impl Into<String>, client: impl SinkClient + 'static) -> Self {
        self.clients.push((name.into(), Box::new(client)));
        self
    }

    pub fn boxed_sink(mut self, name: impl Into<String>, client: Box<dyn SinkClient>) -> Self {
        self.clients.push((name.into(), client));
        self
    }

    /// Spawn one worker per sink.
    pub fn build(self) -> std::io::Result<SinkGateway> {
        let drain_deadline = Arc::new(OnceLock::new());
        let (exit_tx, exit_rx) = bounded(self.clients.len().max(1));
        let mut queues = HashMap::new();

        for (name, client) in self.clients {
            let (tx, rx) = bounded(self.config.queue_capacity.max(1));
            let worker = SinkWorker {
                name: name.clone(),
                client,
                rx,
                events: self.events.clone(),
                drain_deadline: drain_deadline.clone(),
            };
            let exit_tx = exit_tx.clone();
            std::thread::Builder::new()
                .name(format!("sink-{name}"))
                .spawn(move || {
                    let name = worker.run();
                    let _ = exit_tx.send(name);
                })?;
            tracing::debug!(sink = %name, "sink worker started");
            queues.insert(name, tx);
        }

        Ok(SinkGateway {
            inner: Arc::new(Inner {
                config: self.config,
                queues,
                events: self.events,
                closed: AtomicBool::new(false),
                drain_deadline,
                exits: Mutex::new(Some(exit_rx)),
            }),
        })
    }
}

impl SinkGateway {
    /// A gateway without sinks; every call fails with `UnknownSink`.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Inner {
                config: SinkGatewayConfig::default(),
                queues: HashMap::new(),
                events: EventSink::log_only(),
                closed: AtomicBool::new(false),
                drain_deadline: Arc::new(OnceLock::new()),
                exits: Mutex::new(None),
            }),
        }
    }

    pub fn builder(config: SinkGatewayConfig) -> SinkGatewayBuilder {
        SinkGatewayBuilder::new(config)
    }

    pub fn config(&self) -> &SinkGatewayConfig {
        &self.inner.config
    }

    pub fn has_sink(&self, sink: &str) -> bool {
        self.inner.queues.contains_key(sink)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Synchronous call bounded by the configured call timeout.
    pub fn call(
        &self,
        connection: ConnectionId,
        sink: &str,
        request: SinkRequest,
    ) -> Result<SinkResponse, SinkError> {
        self.call_with_timeout(connection, sink, request, self.inner.config.call_timeout)
    }

    /// Synchronous call bounded by `timeout`.
    ///
    /// A batch request whose records are all gone after validation returns
    /// an empty response without calling the sink.
    ///
    /// A call that times out while still queued is cancelled and never
    /// reaches the client. One the worker already started runs to
    /// completion; its reply is discarded.
    pub fn call_with_timeout(
        &self,
        connection: ConnectionId,
        sink: &str,
        request: SinkRequest,
        timeout: Duration,
    ) -> Result<SinkResponse, SinkError> {
        let op = request.op();
        let result = self.call_inner(connection, sink, request, timeout);
        if let Err(err) = &result {
            tracing::warn!(
                sink,
                connection = %connection,
                op,
                kind = err.kind(),
                "sink call failed: {}",
                err
            );
        }
        result
    }

    fn call_inner(
        &self,
        connection: ConnectionId,
        sink: &str,
        request: SinkRequest,
        timeout: Duration,
    ) -> Result<SinkResponse, SinkError> {
        let queue = self.queue(sink)?;
        request.validate()?;
        let (request, skipped) = apply_batch_mode(request, self.inner.config.batch_mode)?;
        for err in &skipped {
            tracing::warn!(sink, connection = %connection, kind = err.kind(), "record skipped: {}", err);
        }
        let Some(request) = request else {
            return Ok(SinkResponse::ok());
        };

        let deadline = Instant::now() + timeout;
        let timed_out = || SinkError::Timeout {
            sink: sink.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        };
        let (reply_tx, reply_rx) = bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        queue
            .send_timeout(
                Job::Call(Call {
                    connection,
                    request,
                    reply: Some(reply_tx),
                    cancelled: Some(cancelled.clone()),
                }),
                timeout,
            )
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => timed_out(),
                SendTimeoutError::Disconnected(_) => SinkError::Closed,
            })?;
        reply_rx.recv_deadline(deadline).map_err(|e| match e {
            RecvTimeoutError::Timeout => {
                cancelled.store(true, Ordering::Release);
                timed_out()
            }
            RecvTimeoutError::Disconnected => SinkError::Closed,
        })?
    }

    /// Asynchronous call. Returns whether the call was queued.
    ///
    /// Refusals and later failures are reported through the event channel
    /// only. An empty batch is accepted without calling the sink.
    pub fn submit(&self, connection: ConnectionId, sink: &str, request: SinkRequest) -> bool {
        let op = request.op();
        let reject = |error: SinkError| {
            self.inner.events.emit(SinkEvent::Rejected {
                sink: sink.to_string(),
                connection,
                op,
                error,
            });
            false
        };

        let queue = match self.queue(sink) {
            Ok(queue) => queue,
            Err(e) => return reject(e),
        };
        if let Err(e) = request.validate() {
            return reject(e);
        }
        let (request, skipped) = match apply_batch_mode(request, self.inner.config.batch_mode) {
            Ok(prepared) => prepared,
            Err(e) => return reject(e),
        };
        let nothing_skipped = skipped.is_empty();
        for err in skipped {
            reject(err);
        }
        let Some(request) = request else {
            return nothing_skipped;
        };

        match queue.try_send(Job::Call(Call {
            connection,
            request,
            reply: None,
            cancelled: None,
        })) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => reject(SinkError::QueueFull(sink.to_string())),
            Err(TrySendError::Disconnected(_)) => reject(SinkError::Closed),
        }
    }

    /// Stop accepting calls and drain the queues until the drain deadline.
    ///
    /// Idempotent. Blocks for at most the drain deadline.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let deadline = Instant::now() + self.inner.config.drain_deadline;
        let _ = self.inner.drain_deadline.set(deadline);
        tracing::debug!(sinks = self.inner.queues.len(), "sink gateway shutting down");

        for (name, queue) in &self.inner.queues {
            if queue.send_deadline(Job::Stop, deadline).is_err() {
                tracing::warn!(sink = %name, "sink queue still full at drain deadline");
            }
        }

        let exits = self.inner.exits.lock().ok().and_then(|mut guard| guard.take());
        let Some(exits) = exits else {
            return;
        };
        let mut running = self.inner.queues.len();
        while running > 0 {
            match exits.recv_deadline(deadline) {
                Ok(name) => {
                    tracing::debug!(sink = %name, "sink worker stopped");
                    running -= 1;
                }
                Err(_) => {
                    tracing::warn!(
                        busy = running,
                        "sink workers still busy after drain deadline, detaching"
                    );
                    break;
                }
            }
        }
    }
}

impl std::fmt::Debug for SinkGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut sinks: Vec<_> = self.inner.queues.keys().collect();
        sinks.sort();
        f.debug_struct("SinkGateway")
            .field("sinks", &sinks)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SinkGateway {
    fn queue(&self, sink: &str) -> Result<&Sender<Job>, SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        self.inner
            .queues
            .get(sink)
            .ok_or_else(|| SinkError::UnknownSink(sink.to_string()))
    }
}

struct SinkWorker {
    name: String,
    client: Box<dyn SinkClient>,
    rx: Receiver<Job>,
    events: EventSink,
    drain_deadline: Arc<OnceLock<Instant>>,
}

impl SinkWorker {
    fn run(mut self) -> String {
        let mut abandoned = 0usize;
        while let Ok(job) = self.rx.recv() {
            match job {
                Job::Call(call) if call.is_cancelled() => {
                    tracing::debug!(
                        sink = %self.name,
                        op = call.request.op(),
                        "skipping call its caller gave up on"
                    );
                }
                Job::Call(call) => {
                    if self.past_deadline() {
                        abandoned += 1;
                        if let Some(reply) = call.reply {
                            let _ = reply.send(Err(SinkError::Closed));
                        }
                    } else {
                        self.execute(call);
                    }
                }
                Job::Stop => break,
            }
        }
        if abandoned > 0 {
            self.events.emit(SinkEvent::Abandoned {
                sink: self.name.clone(),
                count: abandoned,
            });
        }
        self.client.close();
        self.name
    }

    fn past_deadline(&self) -> bool {
        self.drain_deadline
            .get()
            .is_some_and(|deadline| Instant::now() >= *deadline)
    }

    fn execute(&mut self, call: Call) {
        let op = call.request.op();
        let client = &mut self.client;
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| client.call(&call.request)))
            .unwrap_or_else(|_| {
                Err(SinkError::Failed {
                    sink: self.name.clone(),
                    message: "client panicked".to_string(),
                })
            });

        match call.reply {
            Some(reply) => {
                if reply.send(result).is_err() {
                    tracing::debug!(sink = %self.name, op, "caller stopped waiting for reply");
                }
            }
            None => {
                if let Err(error) = result {
                    self.events.emit(SinkEvent::Failed {
                        sink: self.name.clone(),
                        connection: call.connection,
                        op,
                        error,
                    });
                }
            }
        }
    }
}
