//! [`Hook`] implementation backed by a compiled Rhai script.

use crate::hooks::{Hook, HookContext, HookError, ReceiveSignal};
use crate::message::Message;
use crate::scripting::{CompiledScript, ScriptEngine, ScriptMessage};
use rhai::{CallFnOptions, Dynamic, FuncArgs, Map, Scope};

/// One connection's script instance.
///
/// Owns its engine, scope and `this` map, so instances on different
/// connections share nothing but the compiled AST.
pub struct ScriptHook {
    engine: ScriptEngine,
    script: CompiledScript,
    scope: Scope<'static>,
    state: Dynamic,
}

impl ScriptHook {
    pub fn new(script: CompiledScript) -> Self {
        Self {
            engine: ScriptEngine::new(),
            script,
            scope: Scope::new(),
            state: Dynamic::from_map(Map::new()),
        }
    }

    pub fn script(&self) -> &CompiledScript {
        &self.script
    }

    /// The `this` map scripts keep their state in.
    pub fn state(&self) -> &Dynamic {
        &self.state
    }

    fn call(
        &mut self,
        ctx: &mut HookContext,
        name: &str,
        args: impl FuncArgs,
    ) -> Result<Dynamic, HookError> {
        self.engine.bind(ctx.detached());
        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(&mut self.state);
        let result = self.engine.engine().call_fn_with_options::<Dynamic>(
            options,
            &mut self.scope,
            self.script.ast(),
            name,
            args,
        );
        self.engine.unbind_into(ctx);
        result.map_err(|e| HookError::Script(e.to_string()))
    }
}

impl Hook for ScriptHook {
    fn on_start(&mut self, ctx: &mut HookContext) -> Result<(), HookError> {
        self.engine.bind(ctx.detached());
        let result = self
            .engine
            .engine()
            .run_ast_with_scope(&mut self.scope, self.script.ast());
        self.engine.unbind_into(ctx);
        result.map_err(|e| HookError::Script(e.to_string()))?;

        if self.script.defines("on_start") {
            self.call(ctx, "on_start", ())?;
        }
        Ok(())
    }

    fn on_receive(
        &mut self,
        message: &mut Message,
        ctx: &mut HookContext,
    ) -> Result<ReceiveSignal, HookError> {
        if !self.script.defines("on_receive") {
            return Ok(ReceiveSignal::Accept);
        }
        let handle = ScriptMessage::new(message.clone());
        let result = self.call(ctx, "on_receive", (handle.clone(),));
        if let Some(updated) = handle.seal() {
            *message = updated;
        }
        result?
            .as_bool()
            .map(ReceiveSignal::from)
            .map_err(|found| HookError::InvalidReturn(found.to_string()))
    }

    fn on_timer(&mut self, elapsed_ms: u64, ctx: &mut HookContext) -> Result<(), HookError> {
        if self.script.defines("on_timer") {
            let elapsed = i64::try_from(elapsed_ms).unwrap_or(i64::MAX);
            self.call(ctx, "on_timer", (elapsed,))?;
        }
        Ok(())
    }

    fn on_stop(&mut self, ctx: &mut HookContext) -> Result<(), HookError> {
        if self.script.defines("on_stop") {
            self.call(ctx, "on_stop", ())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ScriptHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHook")
            .field("script", &self.script.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FrameDecoder, FrameSpec, LengthField};
    use crate::pipeline::ConnectionId;
    use crate::sink::{LoggingSinkClient, SinkGateway, SinkGatewayConfig, KV_SINK};
    use std::sync::Arc;

    fn hook(source: &str) -> ScriptHook {
        let script = ScriptEngine::new().compile("test", source).unwrap();
        ScriptHook::new(script)
    }

    fn message(payload: &[u8]) -> Message {
        let spec = FrameSpec {
            prefix: vec![0x42, 0x4D],
            length_field: LengthField::Fixed {
                size: payload.len(),
            },
            ..FrameSpec::default()
        };
        let layout = Arc::new(spec.compile().unwrap());
        let wire = layout.encode(&[], payload).unwrap();
        let frame = FrameDecoder::new(layout).feed(&wire).next().unwrap();
        Message::new(frame, ConnectionId(3), 1_000, 0)
    }

    fn ctx() -> HookContext {
        HookContext::new(ConnectionId(3), SinkGateway::empty())
    }

    #[test]
    fn test_receive_adds_values() {
        let mut hook = hook(
            r#"
            fn on_receive(msg) {
                msg.add_int_value("pm2_5", read_u16_be(msg.payload, 0));
                msg.add_float_value("ratio", 0.5);
                msg.add_string_value("conn", `${msg.connection_id}`);
                true
            }
            "#,
        );
        let mut msg = message(&[0x00, 0x23]);
        let signal = hook.on_receive(&mut msg, &mut ctx()).unwrap();
        assert_eq!(signal, ReceiveSignal::Accept);
        assert_eq!(msg.get_value("pm2_5").and_then(|v| v.as_int()), Some(0x23));
        assert_eq!(msg.get_value("conn").and_then(|v| v.as_str()), Some("3"));
    }

    #[test]
    fn test_missing_hooks_are_skipped() {
        let mut hook = hook("let unused = 1;");
        let mut ctx = ctx();
        hook.on_start(&mut ctx).unwrap();
        assert_eq!(
            hook.on_receive(&mut message(&[1]), &mut ctx).unwrap(),
            ReceiveSignal::Accept
        );
        hook.on_timer(100, &mut ctx).unwrap();
        hook.on_stop(&mut ctx).unwrap();
    }

    #[test]
    fn test_non_bool_return_is_an_error() {
        let mut hook = hook("fn on_receive(msg) { 42 }");
        let err = hook.on_receive(&mut message(&[1]), &mut ctx()).unwrap_err();
        assert!(matches!(err, HookError::InvalidReturn(_)));
    }

    #[test]
    fn test_state_persists_across_calls() {
        let mut hook = hook(
            r#"
            fn on_start() { this.count = 0; }
            fn on_receive(msg) {
                this.count += 1;
                msg.add_int_value("count", this.count);
                this.count % 2 == 1
            }
            "#,
        );
        let mut ctx = ctx();
        hook.on_start(&mut ctx).unwrap();
        let mut first = message(&[1]);
        let mut second = message(&[2]);
        assert_eq!(hook.on_receive(&mut first, &mut ctx).unwrap(), ReceiveSignal::Accept);
        assert_eq!(hook.on_receive(&mut second, &mut ctx).unwrap(), ReceiveSignal::Discard);
        assert_eq!(second.get_value("count").and_then(|v| v.as_int()), Some(2));
    }

    #[test]
    fn test_retained_message_handle_is_sealed() {
        let mut hook = hook(
            r#"
            fn on_receive(msg) { this.kept = msg; true }
            fn on_timer(ms) { this.kept.add_int_value("late", 1); }
            "#,
        );
        let mut ctx = ctx();
        hook.on_receive(&mut message(&[1]), &mut ctx).unwrap();
        assert!(matches!(
            hook.on_timer(100, &mut ctx),
            Err(HookError::Script(_))
        ));
    }

    #[test]
    fn test_send_reaches_outbound() {
        let mut hook = hook(
            r#"
            fn on_timer(ms) {
                send(from_hex("0d0a"));
            }
            "#,
        );
        let mut ctx = ctx();
        hook.on_timer(100, &mut ctx).unwrap();
        assert_eq!(ctx.take_outbound(), vec![vec![0x0D, 0x0A]]);
    }

    #[test]
    fn test_sync_kv_calls() {
        let gateway = SinkGateway::builder(SinkGatewayConfig::default())
            .sink(KV_SINK, LoggingSinkClient::new(KV_SINK))
            .build()
            .unwrap();
        let mut ctx = HookContext::new(ConnectionId(3), gateway.clone());
        let mut hook = hook(
            r#"
            fn on_start() {
                kv_connect("redis://localhost:6379");
                kv_set("last", "7");
            }
            fn on_receive(msg) {
                msg.add_string_value("last", kv_get("last"));
                true
            }
            "#,
        );
        hook.on_start(&mut ctx).unwrap();
        let mut msg = message(&[1]);
        hook.on_receive(&mut msg, &mut ctx).unwrap();
        assert_eq!(msg.get_value("last").and_then(|v| v.as_str()), Some("7"));
        gateway.shutdown();
    }
}
