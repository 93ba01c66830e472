//! Connection runtime.
//!
//! Bytes from a transport flow through one worker per connection:
//!
//! ```text
//! host ──Feed──► [FrameDecoder] ──Frame──► [Dispatcher/Hook] ──► PipelineBridge
//!                                              │   ▲
//!                                   sink calls │   │ on_timer
//!                                              ▼   │
//!                                       [SinkGateway] [TimerScheduler]
//! ```
//!
//! # Design
//!
//! - **One thread per connection**: hook calls for a connection never overlap.
//! - **Bounded channels**: feeding blocks when a connection falls behind.
//! - **Faults stay local**: a failing hook is logged and counted, never fatal.

pub mod bridge;
pub mod error;
pub mod executor;
pub mod id;

pub use bridge::{ConnectionStats, PipelineBridge, PipelineCommand, PipelineMessage};
pub use error::{PipelineError, PipelineResult};
pub use executor::{ConnectionHandle, HookFactory, Runtime, RuntimeConfig, DEFAULT_QUEUE_CAPACITY};
pub use id::{ConnectionId, ConnectionIdPolicy, ConnectionIds};
