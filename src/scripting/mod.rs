//! Rhai hook scripts
//!
//! A hook script defines any of these functions; missing ones are skipped:
//!
//! - `on_start()`
//! - `on_receive(msg)` - must return `true` (accept) or `false` (discard)
//! - `on_timer(elapsed_ms)`
//! - `on_stop()`
//!
//! Top-level statements run once, right before `on_start`. Every function
//! is called with `this` bound to a per-connection object map, which is the
//! place to keep state between calls.
//!
//! ## Message
//!
//! - `msg.payload`, `msg.header`, `msg.raw` - blobs
//! - `msg.connection_id`, `msg.sequence`, `msg.timestamp` (microseconds)
//! - `msg.add_int_value(key, v)`, `msg.add_float_value(key, v)`,
//!   `msg.add_string_value(key, v)`, `msg.get_value(key)`, `msg.values_json()`
//!
//! ## Decoding
//!
//! - `read_u8(blob, offset)`, `read_i8(blob, offset)`
//! - `read_{u16,i16,u32,i32,f32,f64}_{be,le}(blob, offset)`
//! - `to_hex(blob)`, `from_hex(text)`
//!
//! ## Transport
//!
//! - `send(blob)`, `encode_frame(header, payload)`, `send_frame(header, payload)`
//! - `connection_id()`, `now_ms()`, `now_us()`, `now_ns()`
//!
//! ## Sinks
//!
//! Plain names block and throw on failure; `_async` names return whether
//! the call was queued.
//!
//! - `http_request(method, url, headers, body)`, `http_post(url, body)`,
//!   `http_get(url)`, `http_request_async(..)`, `http_post_async(..)`
//! - `kv_connect(address [, password])`, `kv_disconnect()`, `kv_set(key, value)`,
//!   `kv_set_async(..)`, `kv_get(key)`
//! - `influx_write(url, token, line)`, `timescale_write(dsn, table, row)` and
//!   their `_async` forms
//! - `new_batch()` with `push(record)`, `len()`, `clear()`, and
//!   `flush_http(url)` or `flush_http(method, url, headers)` (one request,
//!   records joined by newlines), `flush_kv(key)`, `flush_influx(url, token)`,
//!   `flush_timescale(dsn, table)` plus `_async` forms. Flushing always
//!   leaves the batch empty.
//!
//! ## Math
//!
//! - `round_to(x, digits)`, `clamp(x, min, max)`
//! - `bit_and`, `bit_or`, `bit_xor`, `bit_shl`, `bit_shr`, `bit_test(value, bit)`
//!
//! ## Example
//!
//! ```rhai
//! fn on_start() {
//!     this.count = 0;
//!     this.batch = new_batch();
//! }
//!
//! fn on_receive(msg) {
//!     let pm25 = read_u16_be(msg.payload, 2);
//!     msg.add_int_value("pm2_5", pm25);
//!     this.count += 1;
//!     this.batch.push(`air,conn=${msg.connection_id} pm2_5=${pm25}i`);
//!     true
//! }
//!
//! fn on_timer(elapsed_ms) {
//!     this.batch.flush_influx_async("http://localhost:8086/write?db=iot", "");
//! }
//! ```

mod engine;
mod hook;

pub use engine::{ScriptContext, ScriptEngine, ScriptMessage, SharedScriptContext};
pub use hook::ScriptHook;

use crate::error::{Result, ResultExt};
use crate::hooks::Hook;
use crate::pipeline::{ConnectionId, HookFactory};
use rhai::AST;
use std::path::Path;
use std::sync::Arc;

/// Hook functions a script may define, with their parameter counts.
const HOOK_FUNCTIONS: [(&str, usize); 4] = [
    ("on_start", 0),
    ("on_receive", 1),
    ("on_timer", 1),
    ("on_stop", 0),
];

/// A compiled hook script, shared by every connection that runs it
#[derive(Clone)]
pub struct CompiledScript {
    ast: Arc<AST>,
    source: Arc<str>,
    name: String,
    defined: Vec<&'static str>,
}

impl CompiledScript {
    pub(crate) fn new(name: &str, source: &str, ast: AST) -> Self {
        let mut defined = Vec::new();
        for (hook, arity) in HOOK_FUNCTIONS {
            let mut found = ast.iter_functions().filter(|f| f.name == hook).peekable();
            if found.peek().is_none() {
                continue;
            }
            if found.any(|f| f.params.len() == arity) {
                defined.push(hook);
            } else {
                tracing::warn!(
                    script = name,
                    "{} must take {} parameter(s), it will not be called",
                    hook,
                    arity
                );
            }
        }
        tracing::debug!(script = name, hooks = ?defined, "script compiled");
        Self {
            ast: Arc::new(ast),
            source: source.into(),
            name: name.to_string(),
            defined,
        }
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }

    /// Get the source code of this script
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Get the name of this script
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the script defines hook function `name` with the right arity.
    pub fn defines(&self, name: &str) -> bool {
        self.defined.contains(&name)
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("name", &self.name)
            .field("hooks", &self.defined)
            .finish()
    }
}

/// Creates one [`ScriptHook`] per connection from a compiled script.
#[derive(Debug, Clone)]
pub struct ScriptHookFactory {
    script: CompiledScript,
}

impl ScriptHookFactory {
    pub fn new(script: CompiledScript) -> Self {
        Self { script }
    }

    /// Compile the script at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        ScriptEngine::new()
            .compile_file(path)
            .context("loading hook script")
            .map(Self::new)
    }

    pub fn script(&self) -> &CompiledScript {
        &self.script
    }
}

impl HookFactory for ScriptHookFactory {
    fn create(&self, connection: ConnectionId) -> Result<Box<dyn Hook>> {
        tracing::debug!(connection = %connection, script = %self.script.name, "creating script hook");
        Ok(Box::new(ScriptHook::new(self.script.clone())))
    }
}
