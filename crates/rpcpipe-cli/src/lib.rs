//! rpcpipe-cli: command line host for the rpcpipe transports.
//!
//! Serves the demo handlers over stdio or a Unix socket, sends one-off
//! requests, launches configured server subprocesses and offers an
//! interactive socket client.

pub mod config;
pub mod demo;
pub mod repl;

use anyhow::Context;
use rpcpipe::Params;

/// Socket path used when none is given on the command line.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/mcp.sock";

/// Parse optional params text from the command line. Params must be a JSON
/// object; an empty string means no params.
pub fn parse_params(text: Option<&str>) -> anyhow::Result<Option<Params>> {
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };

    let value: serde_json::Value =
        serde_json::from_str(text).with_context(|| format!("invalid params JSON: {text}"))?;
    match value {
        serde_json::Value::Object(map) => Ok(Some(map)),
        serde_json::Value::Null => Ok(None),
        other => anyhow::bail!("params must be a JSON object, got {other}"),
    }
}
