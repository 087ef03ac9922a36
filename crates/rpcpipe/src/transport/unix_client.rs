//! Unix socket client: one connection reused for the client's lifetime.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::types::{is_closed_io, Params, Request, Response, RpcError, RpcResult, DEFAULT_REQUEST_ID};

use super::framing::{self, JsonDecoder};
use super::Client;

/// Client for the Unix socket transport.
///
/// Methods take `&mut self`, so one client serves one caller at a time; share
/// it behind a lock to use it from several tasks.
#[derive(Debug)]
pub struct UnixClient {
    socket_path: PathBuf,
    decoder: JsonDecoder<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl UnixClient {
    /// Dial the server once.
    pub async fn connect(socket_path: impl AsRef<Path>) -> RpcResult<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&socket_path)
            .await
            .map_err(|source| RpcError::Connect {
                path: socket_path.clone(),
                source,
            })?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            socket_path,
            decoder: JsonDecoder::new(reader),
            writer,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send with the default correlation id.
    pub async fn send_request(&mut self, method: &str, params: Option<Params>) -> RpcResult<()> {
        self.send_request_with_id(DEFAULT_REQUEST_ID, method, params)
            .await
    }

    pub async fn send_request_with_id(
        &mut self,
        id: i64,
        method: &str,
        params: Option<Params>,
    ) -> RpcResult<()> {
        let request = Request::new(id, method, params);
        tracing::trace!("Sending request: {method} (id={id})");
        framing::write_message(&mut self.writer, &request).await
    }

    /// Decode one response. `Ok(None)` when the server closed the connection.
    pub async fn receive_response(&mut self) -> RpcResult<Option<Response>> {
        match self.decoder.next::<Response>().await {
            Ok(response) => Ok(response),
            Err(e) if e.is_closed() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Shut down the write side; the server sees end of stream.
    pub async fn close(&mut self) -> RpcResult<()> {
        match self.writer.shutdown().await {
            Err(e) if !is_closed_io(&e) => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Client for UnixClient {
    async fn send_request(&mut self, method: &str, params: Option<Params>) -> RpcResult<()> {
        UnixClient::send_request(self, method, params).await
    }

    async fn receive_response(&mut self) -> RpcResult<Option<Response>> {
        UnixClient::receive_response(self).await
    }

    async fn close(&mut self) -> RpcResult<()> {
        UnixClient::close(self).await
    }
}
