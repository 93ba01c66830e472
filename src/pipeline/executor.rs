//! Connection runtime.
//!
//! [`Runtime::open`] spawns one worker thread per connection. The worker owns
//! the connection's decoder, dispatcher and timer, and waits on its command
//! channel and timer tick at once, so hook calls for one connection are
//! strictly serialized while different connections run in parallel.

use crate::codec::{Frame, FrameDecoder, FrameLayout};
use crate::error::{Result, ResultExt};
use crate::hooks::{Dispatcher, Hook, HookContext, DEFAULT_STOP_GRACE};
use crate::message::Message;
use crate::pipeline::bridge::{ConnectionStats, PipelineBridge, PipelineCommand, PipelineMessage};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{ConnectionId, ConnectionIdPolicy, ConnectionIds};
use crate::sink::SinkGateway;
use crate::timer::{TimerScheduler, DEFAULT_TIMER_PERIOD};
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default capacity of each connection's command queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Settings shared by every connection a runtime opens.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub layout: Arc<FrameLayout>,
    pub timer_period: Duration,
    pub stop_grace: Duration,
    pub queue_capacity: usize,
    pub id_policy: ConnectionIdPolicy,
}

impl RuntimeConfig {
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout: Arc::new(layout),
            timer_period: DEFAULT_TIMER_PERIOD,
            stop_grace: DEFAULT_STOP_GRACE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            id_policy: ConnectionIdPolicy::default(),
        }
    }
}

/// Creates the hook instance for a newly opened connection.
pub trait HookFactory: Send + Sync {
    fn create(&self, connection: ConnectionId) -> Result<Box<dyn Hook>>;
}

impl<F> HookFactory for F
where
    F: Fn(ConnectionId) -> Result<Box<dyn Hook>> + Send + Sync,
{
    fn create(&self, connection: ConnectionId) -> Result<Box<dyn Hook>> {
        self(connection)
    }
}

type OpenEndpoints = Arc<Mutex<HashSet<String>>>;

pub struct Runtime {
    config: RuntimeConfig,
    gateway: SinkGateway,
    hooks: Box<dyn HookFactory>,
    ids: ConnectionIds,
    open_endpoints: OpenEndpoints,
    msg_tx: Sender<PipelineMessage>,
}

impl Runtime {
    pub fn new(
        config: RuntimeConfig,
        gateway: SinkGateway,
        hooks: impl HookFactory + 'static,
    ) -> (Self, PipelineBridge) {
        let (bridge, msg_tx) = PipelineBridge::new();
        let runtime = Self {
            ids: ConnectionIds::new(config.id_policy),
            config,
            gateway,
            hooks: Box::new(hooks),
            open_endpoints: Arc::default(),
            msg_tx,
        };
        (runtime, bridge)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn gateway(&self) -> &SinkGateway {
        &self.gateway
    }

    /// Open a connection to `endpoint` and start its worker.
    ///
    /// With [`ConnectionIdPolicy::ReusePerEndpoint`] an endpoint may only
    /// have one open connection at a time, since both would share an id.
    pub fn open(&mut self, endpoint: &str) -> Result<ConnectionHandle> {
        let reuse = self.config.id_policy == ConnectionIdPolicy::ReusePerEndpoint;
        if reuse && self.is_open(endpoint) {
            return Err(PipelineError::EndpointInUse(endpoint.to_string()).into());
        }

        let id = self.ids.assign(endpoint);
        let hook = self
            .hooks
            .create(id)
            .with_context(|| format!("creating hook for connection {id}"))?;
        let started = Instant::now();
        let timer = TimerScheduler::new(self.config.timer_period, started)?;
        let ctx = HookContext::new(id, self.gateway.clone()).with_layout(self.config.layout.clone());
        let (cmd_tx, cmd_rx) = bounded(self.config.queue_capacity.max(1));

        let worker = ConnectionWorker {
            id,
            endpoint: endpoint.to_string(),
            decoder: FrameDecoder::new(self.config.layout.clone()).with_connection(id),
            dispatcher: Dispatcher::new(hook, ctx).with_stop_grace(self.config.stop_grace),
            timer,
            started,
            sequence: 0,
            outbound_frames: 0,
            dropped_messages: 0,
            cmd_rx,
            msg_tx: self.msg_tx.clone(),
        };
        let thread = std::thread::Builder::new()
            .name(format!("conn-{id}"))
            .spawn(move || worker.run())
            .map_err(PipelineError::Io)?;

        let release = if reuse {
            if let Ok(mut open) = self.open_endpoints.lock() {
                open.insert(endpoint.to_string());
            }
            Some(self.open_endpoints.clone())
        } else {
            None
        };

        tracing::info!(connection = %id, endpoint, "connection opened");
        Ok(ConnectionHandle {
            id,
            endpoint: endpoint.to_string(),
            cmd_tx,
            thread: Some(thread),
            release,
        })
    }

    /// Stop accepting sink work and drain what is queued.
    ///
    /// Close connections first so their `on_stop` calls reach the sinks.
    pub fn shutdown(&self) {
        self.gateway.shutdown();
    }

    fn is_open(&self, endpoint: &str) -> bool {
        self.open_endpoints
            .lock()
            .map(|open| open.contains(endpoint))
            .unwrap_or(false)
    }
}

/// Host-side handle to one connection.
///
/// Dropping the handle stops the connection and waits for `on_stop`.
pub struct ConnectionHandle {
    id: ConnectionId,
    endpoint: String,
    cmd_tx: Sender<PipelineCommand>,
    thread: Option<JoinHandle<ConnectionStats>>,
    release: Option<OpenEndpoints>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Hand bytes read from the transport to the worker.
    ///
    /// Blocks while the connection's queue is full.
    pub fn feed(&self, bytes: &[u8]) -> PipelineResult<()> {
        self.cmd_tx
            .send(PipelineCommand::Feed(bytes.to_vec()))
            .map_err(|_| PipelineError::ConnectionClosed(self.id))
    }

    /// Stop the connection, run `on_stop` and return its counters.
    pub fn close(mut self) -> PipelineResult<ConnectionStats> {
        self.finish()
    }

    fn finish(&mut self) -> PipelineResult<ConnectionStats> {
        let Some(thread) = self.thread.take() else {
            return Err(PipelineError::ConnectionClosed(self.id));
        };
        let _ = self.cmd_tx.send(PipelineCommand::Stop);
        let joined = thread.join();
        if let Some(open) = self.release.take() {
            if let Ok(mut open) = open.lock() {
                open.remove(&self.endpoint);
            }
        }
        joined.map_err(|_| {
            tracing::error!(connection = %self.id, "connection worker panicked");
            PipelineError::WorkerPanicked(self.id)
        })
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.finish();
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

struct ConnectionWorker {
    id: ConnectionId,
    endpoint: String,
    decoder: FrameDecoder,
    dispatcher: Dispatcher,
    timer: TimerScheduler,
    started: Instant,
    sequence: u64,
    outbound_frames: u64,
    dropped_messages: u64,
    cmd_rx: Receiver<PipelineCommand>,
    msg_tx: Sender<PipelineMessage>,
}

impl ConnectionWorker {
    fn run(mut self) -> ConnectionStats {
        tracing::debug!(connection = %self.id, endpoint = %self.endpoint, "worker started");
        self.dispatcher.start();
        self.publish(PipelineMessage::Started {
            connection: self.id,
            endpoint: self.endpoint.clone(),
        });
        self.flush_outbound();

        let cmd_rx = self.cmd_rx.clone();
        let ticks = self.timer.receiver().clone();
        loop {
            select! {
                recv(cmd_rx) -> cmd => match cmd {
                    Ok(PipelineCommand::Feed(bytes)) => self.handle_bytes(&bytes),
                    Ok(PipelineCommand::Stop) | Err(_) => break,
                },
                recv(ticks) -> tick => {
                    if tick.is_ok() {
                        self.handle_tick();
                    }
                }
            }
        }

        self.dispatcher.stop();
        self.flush_outbound();
        let stats = self.stats();
        tracing::info!(
            connection = %self.id,
            frames = stats.decoder.frames,
            framing_errors = stats.decoder.framing_errors,
            checksum_errors = stats.decoder.checksum_errors,
            hook_faults = stats.dispatch.hook_faults,
            "connection closed"
        );
        self.publish(PipelineMessage::Stopped {
            connection: self.id,
            stats,
        });
        stats
    }

    fn handle_bytes(&mut self, bytes: &[u8]) {
        let frames: Vec<Frame> = self.decoder.feed(bytes).collect();
        for frame in frames {
            let timestamp_us = self.started.elapsed().as_micros() as u64;
            let mut message = Message::new(frame, self.id, timestamp_us, self.sequence);
            self.sequence += 1;
            if let Some(signal) = self.dispatcher.receive(&mut message) {
                self.publish(PipelineMessage::Dispatched {
                    message: Arc::new(message),
                    signal,
                });
            }
            self.flush_outbound();
        }
    }

    // The tick's own instant is when it was scheduled; a slow hook delays
    // delivery, so elapsed time is read at delivery.
    fn handle_tick(&mut self) {
        if let Some(elapsed_ms) = self.timer.elapsed_now() {
            self.dispatcher.tick(elapsed_ms);
            self.flush_outbound();
        }
    }

    fn flush_outbound(&mut self) {
        for bytes in self.dispatcher.context_mut().take_outbound() {
            self.outbound_frames += 1;
            self.publish(PipelineMessage::Outbound {
                connection: self.id,
                bytes,
            });
        }
    }

    fn publish(&mut self, msg: PipelineMessage) {
        match self.msg_tx.try_send(msg) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_messages += 1;
                if self.dropped_messages == 1 {
                    tracing::warn!(connection = %self.id, "host is not draining, dropping messages");
                }
            }
        }
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            decoder: self.decoder.stats(),
            dispatch: self.dispatcher.stats(),
            outbound_frames: self.outbound_frames,
            dropped_messages: self.dropped_messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FrameSpec, LengthField};
    use crate::hooks::{AcceptAll, HookError, ReceiveSignal};

    fn config() -> RuntimeConfig {
        let spec = FrameSpec {
            prefix: vec![0x5A],
            length_field: LengthField::Fixed { size: 2 },
            ..FrameSpec::default()
        };
        RuntimeConfig::new(spec.compile().unwrap())
    }

    fn accept_all(_: ConnectionId) -> Result<Box<dyn Hook>> {
        Ok(Box::new(AcceptAll))
    }

    struct Echo;

    impl Hook for Echo {
        fn on_receive(
            &mut self,
            message: &mut Message,
            ctx: &mut HookContext,
        ) -> std::result::Result<ReceiveSignal, HookError> {
            let reply = ctx.encode_frame(&[], message.payload())?;
            ctx.send(reply);
            Ok(ReceiveSignal::Accept)
        }
    }

    #[test]
    fn test_frames_reach_host_in_order() {
        let (mut runtime, bridge) = Runtime::new(config(), SinkGateway::empty(), accept_all);
        let conn = runtime.open("serial:/dev/ttyUSB0").unwrap();
        conn.feed(&[0x5A, 1, 2, 0x5A]).unwrap();
        conn.feed(&[3, 4]).unwrap();
        let stats = conn.close().unwrap();
        assert_eq!(stats.decoder.frames, 2);
        assert_eq!(stats.dispatch.accepted, 2);

        let payloads: Vec<Vec<u8>> = bridge
            .drain()
            .into_iter()
            .filter_map(|msg| match msg {
                PipelineMessage::Dispatched { message, .. } => Some(message.payload().to_vec()),
                _ => None,
            })
            .collect();
        assert_eq!(payloads, vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_outbound_is_published() {
        let factory = |_: ConnectionId| -> Result<Box<dyn Hook>> { Ok(Box::new(Echo)) };
        let (mut runtime, bridge) = Runtime::new(config(), SinkGateway::empty(), factory);
        let conn = runtime.open("tcp:10.0.0.2:502").unwrap();
        conn.feed(&[0x5A, 9, 8]).unwrap();
        let stats = conn.close().unwrap();
        assert_eq!(stats.outbound_frames, 1);
        assert!(bridge.drain().iter().any(|msg| matches!(
            msg,
            PipelineMessage::Outbound { bytes, .. } if bytes == &[0x5A, 9, 8]
        )));
    }

    #[test]
    fn test_reuse_policy_rejects_second_open() {
        let mut cfg = config();
        cfg.id_policy = ConnectionIdPolicy::ReusePerEndpoint;
        let (mut runtime, _bridge) = Runtime::new(cfg, SinkGateway::empty(), accept_all);

        let first = runtime.open("tcp:a").unwrap();
        assert!(runtime.open("tcp:a").is_err());
        let id = first.id();
        first.close().unwrap();

        let again = runtime.open("tcp:a").unwrap();
        assert_eq!(again.id(), id);
    }

    #[test]
    fn test_fresh_policy_allocates_new_ids() {
        let (mut runtime, _bridge) = Runtime::new(config(), SinkGateway::empty(), accept_all);
        let a = runtime.open("tcp:a").unwrap();
        let b = runtime.open("tcp:a").unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_short_timer_period_rejected() {
        let mut cfg = config();
        cfg.timer_period = Duration::from_millis(1);
        let (mut runtime, _bridge) = Runtime::new(cfg, SinkGateway::empty(), accept_all);
        assert!(runtime.open("tcp:a").is_err());
    }
}
