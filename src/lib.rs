//! # framehook: frame decoding and hook dispatch for IoT byte streams
//!
//! Devices on serial lines, TCP sockets or radio links speak small binary
//! (or line-based) protocols. framehook turns such a byte stream into
//! validated frames and hands each one to user code.
//!
//! ## Architecture
//!
//! - **Codec**: a declarative [`codec::FrameSpec`] compiles into a
//!   [`codec::FrameLayout`]; a [`codec::FrameDecoder`] per connection
//!   reassembles frames from arbitrary chunks and resynchronizes on errors
//! - **Hooks**: [`hooks::Hook`] callbacks (`on_start`, `on_receive`,
//!   `on_timer`, `on_stop`) run through a fault-isolating
//!   [`hooks::Dispatcher`]; Rhai scripts plug in via [`scripting::ScriptHook`]
//! - **Sinks**: a [`sink::SinkGateway`] runs one worker per external system
//!   and offers blocking and fire-and-forget calls
//! - **Runtime**: [`pipeline::Runtime`] gives every connection its own
//!   worker thread; crossbeam channels carry bytes in and results out
//!
//! ## Example
//!
//! ```ignore
//! use framehook::{config::ProjectConfig, hooks::AcceptAll, pipeline::Runtime, sink::SinkGateway};
//!
//! let project = ProjectConfig::load("pms5003.toml")?;
//! let gateway = SinkGateway::builder(project.gateway_config()).build()?;
//! let (mut runtime, bridge) = Runtime::new(project.runtime_config()?, gateway, |_| {
//!     Ok(Box::new(AcceptAll) as Box<dyn framehook::hooks::Hook>)
//! });
//!
//! let conn = runtime.open("serial:/dev/ttyUSB0")?;
//! conn.feed(&bytes_from_uart)?;
//! for msg in bridge.drain() {
//!     println!("{:?}", msg);
//! }
//! conn.close()?;
//! runtime.shutdown();
//! ```

pub mod codec;
pub mod config;
pub mod decode;
pub mod error;
pub mod hooks;
pub mod message;
pub mod pipeline;
pub mod scripting;
pub mod sink;
pub mod timer;

// Re-export commonly used types
pub use codec::{Frame, FrameDecoder, FrameLayout, FrameSpec};
pub use config::ProjectConfig;
pub use error::{FrameHookError, Result};
pub use hooks::{Hook, HookContext, ReceiveSignal};
pub use message::{Message, Value};
pub use pipeline::{ConnectionHandle, ConnectionId, PipelineBridge, PipelineMessage, Runtime};
pub use scripting::{ScriptEngine, ScriptHook, ScriptHookFactory};
pub use sink::{SinkClient, SinkGateway, SinkRequest, SinkResponse};
