//! Stdio transport: serves requests read from one input stream and writes
//! responses to one output stream.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout};
use tokio::task::JoinHandle;

use crate::protocol::{Dispatcher, FailurePolicy, HandlerRegistry};
use crate::supervise::supervise;
use crate::types::error_codes::PARSE_ERROR;
use crate::types::{ErrorObject, Request, Response, RpcError, RpcResult};

use super::framing::{self, JsonDecoder};
use super::shutdown::StopHandle;
use super::Server;

/// Server over an already-open reader/writer pair, usually inherited stdio.
///
/// One background task decodes one JSON value, dispatches it and writes one
/// response line, in arrival order. Handler failures are reported as
/// `InternalError` with a `"Method deal failed: "` prefix.
pub struct StdioServer<R, W> {
    io: Mutex<Option<(R, W)>>,
    task: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Dispatcher,
    shutdown: StopHandle,
}

impl StdioServer<Stdin, Stdout> {
    /// Serve the process's own stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StdioServer<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_registry(reader, writer, HandlerRegistry::new())
    }

    pub fn with_registry(reader: R, writer: W, registry: HandlerRegistry) -> Self {
        Self {
            io: Mutex::new(Some((reader, writer))),
            task: Mutex::new(None),
            dispatcher: Dispatcher::new(registry, FailurePolicy::QualifiedInternal),
            shutdown: StopHandle::new(),
        }
    }

    /// Wait until the reader task has exited, which happens after stop once
    /// the response in progress has been written.
    pub async fn join(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[async_trait]
impl<R, W> Server for StdioServer<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn registry(&self) -> &HandlerRegistry {
        self.dispatcher.registry()
    }

    fn start(&self) -> RpcResult<()> {
        let taken = self.io.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some((reader, writer)) = taken else {
            return Ok(());
        };

        tracing::info!("Stdio transport started");
        let task = supervise(
            "stdio-server",
            handle_messages(reader, writer, self.dispatcher.clone(), self.shutdown.clone()),
        );
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(())
    }

    fn stop(&self) -> RpcResult<()> {
        self.shutdown.stop();
        Ok(())
    }

    async fn wait(&self) {
        self.shutdown.stopped().await;
    }

    fn stop_handle(&self) -> StopHandle {
        self.shutdown.clone()
    }
}

/// Reader loop. The stop signal is checked once per iteration, so a task
/// blocked in a read reacts only after that read returns.
async fn handle_messages<R, W>(reader: R, mut writer: W, dispatcher: Dispatcher, shutdown: StopHandle)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut decoder = JsonDecoder::new(reader);

    loop {
        if shutdown.is_stopped() {
            break;
        }

        let request: Request = match decoder.next().await {
            Ok(Some(request)) => request,
            Ok(None) => {
                // End of input is not an error: keep the task alive until the
                // host stops the server, without spinning on the closed stream.
                tracing::info!("EOF on input stream, waiting for stop");
                shutdown.stopped().await;
                break;
            }
            Err(RpcError::Io(e)) => {
                tracing::warn!("Input stream failed: {e}");
                break;
            }
            Err(e) => {
                // Kept off the wire: the peer never sees parse failures.
                let response = Response::failure(
                    None,
                    ErrorObject::new(PARSE_ERROR, format!("Parse Error: {e}")),
                );
                tracing::warn!(error = ?response.error, "Dropping undecodable input");
                continue;
            }
        };

        let response = dispatcher.dispatch(request).await;
        if let Err(e) = framing::write_message(&mut writer, &response).await {
            tracing::warn!("Failed to write response: {e}");
            break;
        }
    }

    tracing::info!("Stdio transport stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn register_handler_before_start() {
        let (reader, _peer_in) = duplex(64);
        let (writer, _peer_out) = duplex(64);
        let server = StdioServer::new(reader, writer);
        server.register_handler("test_method", crate::protocol::handler_fn(|_| Ok(json!("ok"))));
        assert!(server.registry().contains("test_method"));
    }

    #[tokio::test]
    async fn stop_unblocks_wait_without_input() {
        let (reader, _peer_in) = duplex(64);
        let (writer, _peer_out) = duplex(64);
        let server = StdioServer::new(reader, writer);
        server.start().unwrap();
        server.start().unwrap();

        server.stop().unwrap();
        server.stop().unwrap();
        tokio::time::timeout(Duration::from_secs(1), server.wait())
            .await
            .expect("wait should return after stop");
    }

    #[tokio::test]
    async fn garbage_input_is_not_answered() {
        let (reader, mut peer_in) = duplex(1024);
        let (writer, peer_out) = duplex(1024);
        let server = StdioServer::new(reader, writer);
        server.registry().register_fn("ping", |_| Ok(json!("pong")));
        server.start().unwrap();

        peer_in
            .write_all(b"this is not json\n{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":5}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(peer_out).lines();
        let line = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let response: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, Some(5));
        assert_eq!(response.result, Some(json!("pong")));
        server.stop().unwrap();
    }
}
