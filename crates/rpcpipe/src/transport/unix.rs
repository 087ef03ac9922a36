//! Unix domain socket transport: one listener, many concurrent connections.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use crate::protocol::{Dispatcher, FailurePolicy, HandlerRegistry};
use crate::supervise::supervise;
use crate::types::{Request, RpcError, RpcResult};

use super::framing::{self, JsonDecoder};
use super::shutdown::StopHandle;
use super::Server;

/// Socket file mode: any local user may connect.
const SOCKET_MODE: u32 = 0o666;

/// Pause after a failed accept so a persistent failure does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// How long a stopping accept loop waits for open connections to reach
/// their next checkpoint. Idle connections are left behind.
const CONNECTION_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Last connection failure, kept for diagnostics only.
type LastError = Arc<Mutex<Option<String>>>;

/// Server bound to a filesystem socket path.
///
/// Each accepted connection gets its own task that handles requests strictly
/// in order; separate connections run independently. Handler failures are
/// reported as `ParseError` carrying the bare failure description.
pub struct UnixServer {
    socket_path: PathBuf,
    dispatcher: Dispatcher,
    shutdown: StopHandle,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    last_error: LastError,
}

impl UnixServer {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self::with_registry(socket_path, HandlerRegistry::new())
    }

    pub fn with_registry(socket_path: impl AsRef<Path>, registry: HandlerRegistry) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            dispatcher: Dispatcher::new(registry, FailurePolicy::VerbatimParse),
            shutdown: StopHandle::new(),
            accept_task: Mutex::new(None),
            last_error: Arc::default(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Most recent connection failure, if any. Best effort.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait until the accept loop has exited and the listener is closed.
    /// Returns at once if the server was never started.
    pub async fn join(&self) {
        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn bind(&self) -> RpcResult<UnixListener> {
        let path = &self.socket_path;
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!("Removed stale socket {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(RpcError::StaleSocket {
                    path: path.clone(),
                    source,
                })
            }
        }

        let listener = UnixListener::bind(path).map_err(|source| RpcError::Bind {
            path: path.clone(),
            source,
        })?;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE)).map_err(
            |source| RpcError::Permissions {
                path: path.clone(),
                source,
            },
        )?;

        Ok(listener)
    }
}

#[async_trait]
impl Server for UnixServer {
    fn registry(&self) -> &HandlerRegistry {
        self.dispatcher.registry()
    }

    fn start(&self) -> RpcResult<()> {
        let mut accept_task = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if accept_task.is_some() {
            return Ok(());
        }

        let listener = self.bind()?;
        tracing::info!("Unix transport listening on {}", self.socket_path.display());

        *accept_task = Some(supervise(
            "unix-accept",
            accept_connections(
                listener,
                self.socket_path.clone(),
                self.dispatcher.clone(),
                self.shutdown.clone(),
                Arc::clone(&self.last_error),
            ),
        ));
        Ok(())
    }

    /// Raise the stop signal, which closes the listener. Open connections
    /// finish at their next read boundary.
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

async fn accept_connections(
    listener: UnixListener,
    socket_path: PathBuf,
    dispatcher: Dispatcher,
    shutdown: StopHandle,
    last_error: LastError,
) {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown.stopped() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    connections.retain(|task| !task.is_finished());
                    connections.push(supervise(
                        "unix-connection",
                        handle_connection(
                            stream,
                            dispatcher.clone(),
                            shutdown.clone(),
                            Arc::clone(&last_error),
                        ),
                    ));
                }
                Err(e) => {
                    tracing::warn!("accept error: {e}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }

    // Leave the socket file: the path may already belong to a newer server.
    drop(listener);
    tracing::debug!("Listener on {} closed", socket_path.display());
    // Lets a response that raced the stop signal reach its peer.
    connections.retain(|task| !task.is_finished());
    if !connections.is_empty() {
        let drained = tokio::time::timeout(
            CONNECTION_DRAIN_GRACE,
            futures::future::join_all(connections),
        )
        .await;
        if drained.is_err() {
            tracing::debug!("Leaving idle connections open after stop");
        }
    }

    tracing::info!("Unix transport stopped");
}

/// Per-connection loop: check stop, decode one request, dispatch, answer.
async fn handle_connection(
    stream: UnixStream,
    dispatcher: Dispatcher,
    shutdown: StopHandle,
    last_error: LastError,
) {
    let (reader, mut writer) = stream.into_split();
    let mut decoder = JsonDecoder::new(reader);

    loop {
        if shutdown.is_stopped() {
            break;
        }

        let request: Request = match decoder.next().await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                record(&last_error, e);
                break;
            }
        };

        let response = dispatcher.dispatch(request).await;
        if let Err(e) = framing::write_message(&mut writer, &response).await {
            record(&last_error, e);
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        record(&last_error, e.into());
    }
}

fn record(last_error: &LastError, err: RpcError) {
    if err.is_closed() {
        return;
    }
    tracing::warn!("connection error: {err}");
    *last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
}
