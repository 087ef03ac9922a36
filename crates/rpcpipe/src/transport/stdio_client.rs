//! Stdio client: talks to a server over a reader/writer pair, typically the
//! pipes of a child process.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::supervise::supervise;
use crate::types::{
    is_closed_io, Params, Request, Response, RpcError, RpcResult, DEFAULT_REQUEST_ID,
};

use super::framing;
use super::Client;

/// How long `receive_response` waits before giving up.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the stdio transport.
///
/// Every request carries correlation id 1. A background task reads response
/// lines into a single-slot queue; a response that arrives after a receive
/// timed out stays queued and is returned by the next receive. Callers must
/// therefore keep at most one request in flight.
pub struct StdioClient<W> {
    writer: Mutex<W>,
    responses: Mutex<mpsc::Receiver<Response>>,
    errors: Mutex<mpsc::Receiver<RpcError>>,
    reader: JoinHandle<()>,
    timeout: Duration,
}

impl<W> StdioClient<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap the server's output (`reader`) and input (`writer`) and start
    /// the background reader. Must be called inside a tokio runtime.
    pub fn new<R>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (response_tx, responses) = mpsc::channel(1);
        let (error_tx, errors) = mpsc::channel(1);
        let reader = supervise("stdio-client-reader", read_responses(reader, response_tx, error_tx));

        Self {
            writer: Mutex::new(writer),
            responses: Mutex::new(responses),
            errors: Mutex::new(errors),
            reader,
            timeout: RESPONSE_TIMEOUT,
        }
    }

    /// Override the receive deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Write one request line. Concurrent senders never interleave bytes.
    pub async fn send_request(&self, method: &str, params: Option<Params>) -> RpcResult<()> {
        let request = Request::new(DEFAULT_REQUEST_ID, method, params);
        let mut writer = self.writer.lock().await;
        framing::write_message(&mut *writer, &request).await
    }

    /// Wait for the next response, a reader failure, or the deadline.
    pub async fn receive_response(&self) -> RpcResult<Response> {
        let mut responses = self.responses.lock().await;
        let mut errors = self.errors.lock().await;

        tokio::select! {
            biased;
            response = responses.recv() => match response {
                Some(response) => Ok(response),
                None => Err(errors.try_recv().unwrap_or(RpcError::Closed)),
            },
            Some(err) = errors.recv() => Err(err),
            _ = tokio::time::sleep(self.timeout) => Err(RpcError::Timeout),
        }
    }

    /// Close the writer and stop the background reader.
    pub async fn close(&self) -> RpcResult<()> {
        self.reader.abort();
        let mut writer = self.writer.lock().await;
        match writer.shutdown().await {
            Err(e) if !is_closed_io(&e) => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<W> Client for StdioClient<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_request(&mut self, method: &str, params: Option<Params>) -> RpcResult<()> {
        StdioClient::send_request(self, method, params).await
    }

    async fn receive_response(&mut self) -> RpcResult<Option<Response>> {
        StdioClient::receive_response(self).await.map(Some)
    }

    async fn close(&mut self) -> RpcResult<()> {
        StdioClient::close(self).await
    }
}

impl<W> Drop for StdioClient<W> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Line-oriented reader. Blank lines are skipped; the first undecodable line
/// or read failure is reported once and ends the task. End of input closes
/// both queues.
async fn read_responses<R>(
    reader: R,
    responses: mpsc::Sender<Response>,
    errors: mpsc::Sender<RpcError>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("Server output closed");
                return;
            }
            Err(e) => {
                let _ = errors.send(RpcError::Io(e)).await;
                return;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match framing::parse_message::<Response>(&line) {
            Ok(response) => {
                if responses.send(response).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("Failed to decode response: {e}");
                let _ = errors.send(e).await;
                return;
            }
        }
    }
}
