//! Rhai Script Engine Implementation
//!
//! This module configures the Rhai engine that runs hook scripts: safety
//! limits, math helpers, binary decode helpers, the `Message` and `Batch`
//! types, and the transport and sink functions.
//!
//! Functions that talk to the outside world read the [`ScriptContext`],
//! which holds the hook context of the call in progress. Outside a hook
//! call they raise a script error.

use crate::decode::{self, Endian};
use crate::error::{FrameHookError, Result};
use crate::hooks::HookContext;
use crate::message::{Message, Value};
use crate::scripting::CompiledScript;
use crate::sink::{
    PendingBatch, SinkRequest, SinkResponse, HTTP_SINK, INFLUX_SINK, KV_SINK, TIMESCALE_SINK,
};
use rhai::{Blob, Dynamic, Engine, EvalAltResult, Map};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

type ScriptResult<T> = std::result::Result<T, Box<EvalAltResult>>;

/// Shared script context that can be accessed from within Rhai scripts.
/// Bound before each hook call and read via registered functions.
#[derive(Debug, Default)]
pub struct ScriptContext {
    hook: Option<HookContext>,
}

impl ScriptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.hook.is_some()
    }
}

/// Thread-safe shared script context
pub type SharedScriptContext = Arc<RwLock<ScriptContext>>;

/// Script-side handle to the message being dispatched.
///
/// The handle is emptied when `on_receive` returns, so a script that keeps
/// it around gets an error instead of touching a stale frame.
#[derive(Debug, Clone)]
pub struct ScriptMessage(Arc<Mutex<Option<Message>>>);

impl ScriptMessage {
    pub fn new(message: Message) -> Self {
        Self(Arc::new(Mutex::new(Some(message))))
    }

    /// Take the message back, leaving the handle empty.
    pub fn seal(&self) -> Option<Message> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Message) -> T) -> ScriptResult<T> {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let message = slot
            .as_mut()
            .ok_or("message is only available during on_receive")?;
        Ok(f(message))
    }
}

/// The engine used to compile and run hook scripts
pub struct ScriptEngine {
    /// The Rhai engine instance
    engine: Engine,
    /// Shared context for sink and transport access
    context: SharedScriptContext,
}

impl ScriptEngine {
    /// Create a new script engine with default configuration
    pub fn new() -> Self {
        let context = Arc::new(RwLock::new(ScriptContext::new()));
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine, context.clone());
        Self { engine, context }
    }

    /// Configure the Rhai engine with built-in functions and safety limits
    fn configure_engine(engine: &mut Engine, context: SharedScriptContext) {
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(100_000);
        engine.set_max_string_size(64 * 1024);
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(1_000);

        engine.on_print(|text| tracing::info!(target: "framehook::script", "{}", text));
        engine.on_debug(|text, _source, pos| {
            tracing::debug!(target: "framehook::script", "{:?}: {}", pos, text)
        });

        Self::register_math(engine);
        Self::register_decode(engine);
        Self::register_message(engine);
        Self::register_transport(engine, &context);
        Self::register_sinks(engine, &context);
    }

    /// Scaling and flag helpers for sensor readings. Rhai's own packages
    /// cover the rest of the arithmetic.
    fn register_math(engine: &mut Engine) {
        engine.register_fn("round_to", |x: f64, digits: i64| {
            let scale = 10f64.powi(digits.clamp(0, 15) as i32);
            (x * scale).round() / scale
        });
        engine.register_fn("clamp", |x: f64, min: f64, max: f64| x.clamp(min, max));
        engine.register_fn("clamp", |x: i64, min: i64, max: i64| x.clamp(min, max));

        engine.register_fn("bit_and", |a: i64, b: i64| a & b);
        engine.register_fn("bit_or", |a: i64, b: i64| a | b);
        engine.register_fn("bit_xor", |a: i64, b: i64| a ^ b);
        engine.register_fn("bit_shl", |a: i64, b: i64| a.wrapping_shl(b as u32));
        engine.register_fn("bit_shr", |a: i64, b: i64| a.wrapping_shr(b as u32));
        engine.register_fn("bit_test", |a: i64, bit: i64| {
            (0..64).contains(&bit) && a & (1 << bit) != 0
        });
    }

    /// `read_*` helpers over blobs. Offsets are 0-based; a read past the end
    /// raises a script error.
    fn register_decode(engine: &mut Engine) {
        use Endian::{Big, Little};

        engine.register_fn("read_u8", |b: &mut Blob, at: i64| {
            read_at(b, at, 1, decode::read_u8).map(i64::from)
        });
        engine.register_fn("read_i8", |b: &mut Blob, at: i64| {
            read_at(b, at, 1, decode::read_i8).map(i64::from)
        });
        engine.register_fn("read_u16_be", |b: &mut Blob, at: i64| {
            read_at(b, at, 2, |b, o| decode::read_u16(b, o, Big)).map(i64::from)
        });
        engine.register_fn("read_u16_le", |b: &mut Blob, at: i64| {
            read_at(b, at, 2, |b, o| decode::read_u16(b, o, Little)).map(i64::from)
        });
        engine.register_fn("read_i16_be", |b: &mut Blob, at: i64| {
            read_at(b, at, 2, |b, o| decode::read_i16(b, o, Big)).map(i64::from)
        });
        engine.register_fn("read_i16_le", |b: &mut Blob, at: i64| {
            read_at(b, at, 2, |b, o| decode::read_i16(b, o, Little)).map(i64::from)
        });
        engine.register_fn("read_u32_be", |b: &mut Blob, at: i64| {
            read_at(b, at, 4, |b, o| decode::read_u32(b, o, Big)).map(i64::from)
        });
        engine.register_fn("read_u32_le", |b: &mut Blob, at: i64| {
            read_at(b, at, 4, |b, o| decode::read_u32(b, o, Little)).map(i64::from)
        });
        engine.register_fn("read_i32_be", |b: &mut Blob, at: i64| {
            read_at(b, at, 4, |b, o| decode::read_i32(b, o, Big)).map(i64::from)
        });
        engine.register_fn("read_i32_le", |b: &mut Blob, at: i64| {
            read_at(b, at, 4, |b, o| decode::read_i32(b, o, Little)).map(i64::from)
        });
        engine.register_fn("read_f32_be", |b: &mut Blob, at: i64| {
            read_at(b, at, 4, |b, o| decode::read_f32(b, o, Big)).map(f64::from)
        });
        engine.register_fn("read_f32_le", |b: &mut Blob, at: i64| {
            read_at(b, at, 4, |b, o| decode::read_f32(b, o, Little)).map(f64::from)
        });
        engine.register_fn("read_f64_be", |b: &mut Blob, at: i64| {
            read_at(b, at, 8, |b, o| decode::read_f64(b, o, Big))
        });
        engine.register_fn("read_f64_le", |b: &mut Blob, at: i64| {
            read_at(b, at, 8, |b, o| decode::read_f64(b, o, Little))
        });

        engine.register_fn("to_hex", |b: &mut Blob| hex::encode(b.as_slice()));
        engine.register_fn("from_hex", |text: &str| -> ScriptResult<Blob> {
            hex::decode(text.trim()).map_err(|e| format!("invalid hex '{text}': {e}").into())
        });
    }

    fn register_message(engine: &mut Engine) {
        engine
            .register_type_with_name::<ScriptMessage>("Message")
            .register_get("payload", |m: &mut ScriptMessage| {
                m.with(|msg| msg.payload().to_vec())
            })
            .register_get("header", |m: &mut ScriptMessage| {
                m.with(|msg| msg.frame().header().to_vec())
            })
            .register_get("raw", |m: &mut ScriptMessage| m.with(|msg| msg.frame().raw().to_vec()))
            .register_get("connection_id", |m: &mut ScriptMessage| {
                m.with(|msg| msg.connection_id().0 as i64)
            })
            .register_get("timestamp", |m: &mut ScriptMessage| {
                m.with(|msg| msg.timestamp_us() as i64)
            })
            .register_get("sequence", |m: &mut ScriptMessage| {
                m.with(|msg| msg.sequence() as i64)
            })
            .register_fn("add_int_value", |m: &mut ScriptMessage, key: &str, v: i64| {
                m.with(|msg| msg.add_int_value(key, v))
            })
            .register_fn("add_float_value", |m: &mut ScriptMessage, key: &str, v: f64| {
                m.with(|msg| msg.add_float_value(key, v))
            })
            .register_fn(
                "add_string_value",
                |m: &mut ScriptMessage, key: &str, v: &str| m.with(|msg| msg.add_string_value(key, v)),
            )
            .register_fn("get_value", |m: &mut ScriptMessage, key: &str| {
                m.with(|msg| msg.get_value(key).map(value_to_dynamic).unwrap_or(Dynamic::UNIT))
            })
            .register_fn("values_json", |m: &mut ScriptMessage| {
                m.with(|msg| msg.values_json().to_string())
            });

        engine
            .register_type_with_name::<PendingBatch>("Batch")
            .register_fn("new_batch", PendingBatch::new)
            .register_fn("push", |b: &mut PendingBatch, record: &str| b.push(record))
            .register_fn("len", |b: &mut PendingBatch| b.len() as i64)
            .register_fn("is_empty", |b: &mut PendingBatch| b.is_empty())
            .register_fn("clear", |b: &mut PendingBatch| b.flush(drop));
    }

    fn register_transport(engine: &mut Engine, context: &SharedScriptContext) {
        engine.register_fn("now_ms", || chrono::Utc::now().timestamp_millis());
        engine.register_fn("now_us", || chrono::Utc::now().timestamp_micros());
        engine.register_fn("now_ns", || {
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        });

        {
            let ctx = context.clone();
            engine.register_fn("connection_id", move || -> ScriptResult<i64> {
                with_hook(&ctx, |hook| hook.connection_id().0 as i64)
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn("send", move |bytes: Blob| -> ScriptResult<()> {
                with_hook_mut(&ctx, |hook| hook.send(bytes))
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn(
                "encode_frame",
                move |header: Blob, payload: Blob| -> ScriptResult<Blob> {
                    with_hook(&ctx, |hook| hook.encode_frame(&header, &payload))?
                        .map_err(|e| e.to_string().into())
                },
            );
        }
        {
            let ctx = context.clone();
            engine.register_fn(
                "send_frame",
                move |header: Blob, payload: Blob| -> ScriptResult<()> {
                    let sent = with_hook_mut(&ctx, |hook| {
                        hook.encode_frame(&header, &payload)
                            .map(|frame| hook.send(frame))
                    })?;
                    sent.map_err(|e| e.to_string().into())
                },
            );
        }
    }

    /// Sink functions. Plain names block up to the call timeout and raise a
    /// script error on failure; `_async` names queue the call and return
    /// whether it was accepted.
    fn register_sinks(engine: &mut Engine, context: &SharedScriptContext) {
        // HTTP
        {
            let ctx = context.clone();
            engine.register_fn(
                "http_request",
                move |method: &str, url: &str, headers: Map, body: &str| {
                    call_sync(&ctx, HTTP_SINK, http(method, url, headers, body)).map(response_map)
                },
            );
        }
        {
            let ctx = context.clone();
            engine.register_fn("http_post", move |url: &str, body: &str| {
                call_sync(&ctx, HTTP_SINK, http("POST", url, Map::new(), body)).map(response_map)
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn("http_get", move |url: &str| {
                call_sync(&ctx, HTTP_SINK, http("GET", url, Map::new(), "")).map(response_map)
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn(
                "http_request_async",
                move |method: &str, url: &str, headers: Map, body: &str| {
                    call_async(&ctx, HTTP_SINK, http(method, url, headers, body))
                },
            );
        }
        {
            let ctx = context.clone();
            engine.register_fn("http_post_async", move |url: &str, body: &str| {
                call_async(&ctx, HTTP_SINK, http("POST", url, Map::new(), body))
            });
        }

        {
            let ctx = context.clone();
            engine.register_fn(
                "flush_http",
                move |batch: &mut PendingBatch, url: &str| -> ScriptResult<Map> {
                    batch
                        .flush(|records| {
                            call_sync(&ctx, HTTP_SINK, http_batch("POST", url, Map::new(), records))
                        })
                        .map(response_map)
                },
            );
        }
        {
            let ctx = context.clone();
            engine.register_fn(
                "flush_http",
                move |batch: &mut PendingBatch, method: &str, url: &str, headers: Map| {
                    batch
                        .flush(|records| {
                            call_sync(&ctx, HTTP_SINK, http_batch(method, url, headers, records))
                        })
                        .map(response_map)
                },
            );
        }
        {
            let ctx = context.clone();
            engine.register_fn("flush_http_async", move |batch: &mut PendingBatch, url: &str| {
                batch.flush(|records| {
                    call_async(&ctx, HTTP_SINK, http_batch("POST", url, Map::new(), records))
                })
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn(
                "flush_http_async",
                move |batch: &mut PendingBatch, method: &str, url: &str, headers: Map| {
                    batch.flush(|records| {
                        call_async(&ctx, HTTP_SINK, http_batch(method, url, headers, records))
                    })
                },
            );
        }

        // Key-value store
        {
            let ctx = context.clone();
            engine.register_fn("kv_connect", move |address: &str| -> ScriptResult<()> {
                let request = SinkRequest::KvConnect {
                    address: address.to_string(),
                    password: None,
                };
                call_sync(&ctx, KV_SINK, request).map(|_| ())
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn(
                "kv_connect",
                move |address: &str, password: &str| -> ScriptResult<()> {
                    let request = SinkRequest::KvConnect {
                        address: address.to_string(),
                        password: non_empty(password),
                    };
                    call_sync(&ctx, KV_SINK, request).map(|_| ())
                },
            );
        }
        {
            let ctx = context.clone();
            engine.register_fn("kv_disconnect", move || -> ScriptResult<()> {
                call_sync(&ctx, KV_SINK, SinkRequest::KvDisconnect).map(|_| ())
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn("kv_set", move |key: &str, value: &str| -> ScriptResult<()> {
                call_sync(&ctx, KV_SINK, kv_set(key, value)).map(|_| ())
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn("kv_set_async", move |key: &str, value: &str| {
                call_async(&ctx, KV_SINK, kv_set(key, value))
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn("kv_get", move |key: &str| -> ScriptResult<Dynamic> {
                let request = SinkRequest::KvGet {
                    key: key.to_string(),
                };
                let response = call_sync(&ctx, KV_SINK, request)?;
                Ok(response.body.map(Dynamic::from).unwrap_or(Dynamic::UNIT))
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn(
                "flush_kv",
                move |batch: &mut PendingBatch, key: &str| -> ScriptResult<()> {
                    batch
                        .flush(|records| call_sync(&ctx, KV_SINK, kv_push(key, records)))
                        .map(|_| ())
                },
            );
        }
        {
            let ctx = context.clone();
            engine.register_fn("flush_kv_async", move |batch: &mut PendingBatch, key: &str| {
                batch.flush(|records| call_async(&ctx, KV_SINK, kv_push(key, records)))
            });
        }

        // InfluxDB
        {
            let ctx = context.clone();
            engine.register_fn(
                "influx_write",
                move |url: &str, token: &str, record: &str| -> ScriptResult<()> {
                    let request = influx(url, token, vec![record.to_string()]);
                    call_sync(&ctx, INFLUX_SINK, request).map(|_| ())
                },
            );
        }
        {
            let ctx = context.clone();
            engine.register_fn(
                "influx_write_async",
                move |url: &str, token: &str, record: &str| {
                    call_async(&ctx, INFLUX_SINK, influx(url, token, vec![record.to_string()]))
                },
            );
        }
        {
            let ctx = context.clone();
            engine.register_fn(
                "flush_influx",
                move |batch: &mut PendingBatch, url: &str, token: &str| -> ScriptResult<()> {
                    batch
                        .flush(|records| call_sync(&ctx, INFLUX_SINK, influx(url, token, records)))
                        .map(|_| ())
                },
            );
        }
        {
            let ctx = context.clone();
            engine.register_fn(
                "flush_influx_async",
                move |batch: &mut PendingBatch, url: &str, token: &str| {
                    batch.flush(|records| call_async(&ctx, INFLUX_SINK, influx(url, token, records)))
                },
            );
        }

        // TimescaleDB
        {
            let ctx = context.clone();
            engine.register_fn(
                "timescale_write",
                move |dsn: &str, table: &str, record: &str| -> ScriptResult<()> {
                    let request = timescale(dsn, table, vec![record.to_string()]);
                    call_sync(&ctx, TIMESCALE_SINK, request).map(|_| ())
                },
            );
        }
        {
            let ctx = context.clone();
            engine.register_fn(
                "timescale_write_async",
                move |dsn: &str, table: &str, record: &str| {
                    let request = timescale(dsn, table, vec![record.to_string()]);
                    call_async(&ctx, TIMESCALE_SINK, request)
                },
            );
        }
        {
            let ctx = context.clone();
            engine.register_fn(
                "flush_timescale",
                move |batch: &mut PendingBatch, dsn: &str, table: &str| -> ScriptResult<()> {
                    batch
                        .flush(|records| {
                            call_sync(&ctx, TIMESCALE_SINK, timescale(dsn, table, records))
                        })
                        .map(|_| ())
                },
            );
        }
        {
            let ctx = context.clone();
            engine.register_fn(
                "flush_timescale_async",
                move |batch: &mut PendingBatch, dsn: &str, table: &str| {
                    batch.flush(|records| {
                        call_async(&ctx, TIMESCALE_SINK, timescale(dsn, table, records))
                    })
                },
            );
        }
    }

    /// Compile a script
    pub fn compile(&self, name: &str, source: &str) -> Result<CompiledScript> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| FrameHookError::Script(format!("{name}: {e}")))?;
        Ok(CompiledScript::new(name, source, ast))
    }

    /// Compile a script file, named after its file stem
    pub fn compile_file(&self, path: &Path) -> Result<CompiledScript> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            FrameHookError::from(e).with_context(format!("reading script {}", path.display()))
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script".to_string());
        self.compile(&name, &source)
    }

    /// Validate a script without executing it
    pub fn validate(&self, source: &str) -> Result<()> {
        self.engine
            .compile(source)
            .map(|_| ())
            .map_err(|e| FrameHookError::Script(format!("Validation error: {}", e)))
    }

    /// Make `hook` visible to sink and transport functions.
    pub(crate) fn bind(&self, hook: HookContext) {
        let mut context = self.context.write().unwrap_or_else(|e| e.into_inner());
        context.hook = Some(hook);
    }

    /// Unbind the hook context and move what the script queued into `into`.
    pub(crate) fn unbind_into(&self, into: &mut HookContext) {
        let mut context = self.context.write().unwrap_or_else(|e| e.into_inner());
        if let Some(hook) = context.hook.take() {
            into.absorb(hook);
        }
    }

    /// Get a reference to the underlying Rhai engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get a reference to the shared context
    pub fn context(&self) -> &SharedScriptContext {
        &self.context
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field(
                "bound",
                &self.context.read().map(|c| c.is_bound()).unwrap_or(false),
            )
            .finish()
    }
}

fn read_at<T>(
    bytes: &[u8],
    offset: i64,
    width: usize,
    read: impl FnOnce(&[u8], usize) -> Option<T>,
) -> ScriptResult<T> {
    usize::try_from(offset)
        .ok()
        .and_then(|at| read(bytes, at))
        .ok_or_else(|| {
            format!(
                "cannot read {width} bytes at offset {offset} from {} bytes",
                bytes.len()
            )
            .into()
        })
}

fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Int(v) => Dynamic::from_int(*v),
        Value::Float(v) => Dynamic::from_float(*v),
        Value::Text(v) => Dynamic::from(v.clone()),
    }
}

fn with_hook<T>(ctx: &SharedScriptContext, f: impl FnOnce(&HookContext) -> T) -> ScriptResult<T> {
    let context = ctx.read().unwrap_or_else(|e| e.into_inner());
    let hook = context
        .hook
        .as_ref()
        .ok_or("only available while a hook is running")?;
    Ok(f(hook))
}

fn with_hook_mut<T>(
    ctx: &SharedScriptContext,
    f: impl FnOnce(&mut HookContext) -> T,
) -> ScriptResult<T> {
    let mut context = ctx.write().unwrap_or_else(|e| e.into_inner());
    let hook = context
        .hook
        .as_mut()
        .ok_or("only available while a hook is running")?;
    Ok(f(hook))
}

fn call_sync(ctx: &SharedScriptContext, sink: &str, request: SinkRequest) -> ScriptResult<SinkResponse> {
    with_hook(ctx, |hook| hook.call(sink, request))?.map_err(|e| e.to_string().into())
}

fn call_async(ctx: &SharedScriptContext, sink: &str, request: SinkRequest) -> bool {
    with_hook(ctx, |hook| hook.submit(sink, request)).unwrap_or(false)
}

fn response_map(response: SinkResponse) -> Map {
    let mut map = Map::new();
    map.insert("status".into(), Dynamic::from_int(i64::from(response.status)));
    map.insert(
        "body".into(),
        response.body.map(Dynamic::from).unwrap_or(Dynamic::UNIT),
    );
    map
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

fn http(method: &str, url: &str, headers: Map, body: &str) -> SinkRequest {
    SinkRequest::Http {
        method: method.to_ascii_uppercase(),
        url: url.to_string(),
        headers: headers
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: body.to_string(),
    }
}

fn http_batch(method: &str, url: &str, headers: Map, records: Vec<String>) -> SinkRequest {
    SinkRequest::HttpBatch {
        method: method.to_ascii_uppercase(),
        url: url.to_string(),
        headers: headers
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        records,
    }
}

fn kv_set(key: &str, value: &str) -> SinkRequest {
    SinkRequest::KvSet {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn kv_push(key: &str, records: Vec<String>) -> SinkRequest {
    SinkRequest::KvPush {
        key: key.to_string(),
        records,
    }
}

fn influx(url: &str, token: &str, records: Vec<String>) -> SinkRequest {
    SinkRequest::InfluxWrite {
        url: url.to_string(),
        token: non_empty(token),
        records,
    }
}

fn timescale(dsn: &str, table: &str, records: Vec<String>) -> SinkRequest {
    SinkRequest::TimescaleWrite {
        dsn: dsn.to_string(),
        table: table.to_string(),
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval<T: Clone + Send + Sync + 'static>(engine: &ScriptEngine, script: &str) -> T {
        engine.engine().eval::<T>(script).unwrap()
    }

    #[test]
    fn test_math_functions() {
        let engine = ScriptEngine::new();
        assert_eq!(eval::<f64>(&engine, "clamp(150.0, 0.0, 100.0)"), 100.0);
        assert_eq!(eval::<i64>(&engine, "clamp(-4, 0, 1000)"), 0);
        assert_eq!(eval::<f64>(&engine, "round_to(3.14159, 2)"), 3.14);
        assert_eq!(eval::<i64>(&engine, "bit_and(0xF0, 0x3C)"), 0x30);
        assert_eq!(eval::<i64>(&engine, "bit_shr(0x1C00, 8)"), 0x1C);
        assert!(eval::<bool>(&engine, "bit_test(0b0100, 2)"));
        assert!(!eval::<bool>(&engine, "bit_test(0b0100, 64)"));
    }

    #[test]
    fn test_decode_helpers() {
        let engine = ScriptEngine::new();
        assert_eq!(eval::<i64>(&engine, "read_u16_be(from_hex(\"0102\"), 0)"), 0x0102);
        assert_eq!(eval::<i64>(&engine, "read_u16_le(from_hex(\"0102\"), 0)"), 0x0201);
        assert_eq!(eval::<i64>(&engine, "read_i8(from_hex(\"00ff\"), 1)"), -1);
        assert_eq!(
            eval::<i64>(&engine, "read_u32_be(from_hex(\"aa00000100\"), 1)"),
            0x0000_0100
        );
        assert_eq!(
            eval::<f64>(&engine, "read_f32_le(from_hex(\"0000c03f\"), 0)"),
            1.5
        );
        assert_eq!(eval::<String>(&engine, "to_hex(from_hex(\"BEEF\"))"), "beef");
    }

    #[test]
    fn test_read_past_end_raises() {
        let engine = ScriptEngine::new();
        let err = engine
            .engine()
            .eval::<i64>("read_u16_be(from_hex(\"01\"), 0)")
            .unwrap_err();
        assert!(err.to_string().contains("offset 0"));
        assert!(engine
            .engine()
            .eval::<i64>("read_u8(from_hex(\"01\"), -1)")
            .is_err());
    }

    #[test]
    fn test_batch_type() {
        let engine = ScriptEngine::new();
        let len: i64 = eval(
            &engine,
            r#"
            let b = new_batch();
            b.push("m v=1");
            b.push("m v=2");
            let n = b.len();
            b.clear();
            n * 10 + b.len()
            "#,
        );
        assert_eq!(len, 20);
    }

    #[test]
    fn test_sink_functions_need_a_hook() {
        let engine = ScriptEngine::new();
        assert!(engine.engine().eval::<()>("kv_set(\"k\", \"v\")").is_err());
        assert!(!eval::<bool>(&engine, "kv_set_async(\"k\", \"v\")"));
        assert!(engine.engine().eval::<()>("send(from_hex(\"00\"))").is_err());
    }

    #[test]
    fn test_validation() {
        let engine = ScriptEngine::new();
        assert!(engine.validate("fn on_receive(msg) { true }").is_ok());
        assert!(engine.validate("fn on_receive(msg) { ").is_err());
    }
}
