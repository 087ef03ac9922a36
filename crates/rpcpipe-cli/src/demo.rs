//! Demo handlers served by `rpcpipe serve-stdio` and `rpcpipe serve-socket`.

use anyhow::anyhow;
use serde_json::{json, Value};

use rpcpipe::{HandlerRegistry, Params, StopHandle};

/// Methods installed by [`register_demo_handlers`].
pub const DEMO_METHODS: &[(&str, &str)] = &[
    ("hello", "Return a greeting"),
    ("echo", "Return params.message"),
    ("close", "Stop the server after answering"),
];

/// Install `hello`, `echo` and `close`. `close` raises `stop` after it
/// returns its answer, so the serving loop exits at its next checkpoint.
pub fn register_demo_handlers(registry: &HandlerRegistry, stop: StopHandle) {
    registry.register_fn("hello", |_| Ok(json!("Hello World!")));
    registry.register_fn("echo", echo);
    registry.register_fn("close", move |_| {
        tracing::info!("close requested");
        stop.stop();
        Ok(json!("close"))
    });
}

fn echo(params: Option<Params>) -> anyhow::Result<Value> {
    params
        .as_ref()
        .and_then(|p| p.get("message"))
        .cloned()
        .ok_or_else(|| anyhow!("Invalid params: missing 'message'"))
}
