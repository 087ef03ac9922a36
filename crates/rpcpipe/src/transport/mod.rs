//! Transport layer: framing plus the stdio and Unix socket variants.
//!
//! Both variants share the message model and the [`Dispatcher`]; they differ
//! in framing, in how many peers they serve, and in how handler failures are
//! reported (see [`FailurePolicy`]).
//!
//! [`Dispatcher`]: crate::protocol::Dispatcher
//! [`FailurePolicy`]: crate::protocol::FailurePolicy

use async_trait::async_trait;

use crate::protocol::{Handler, HandlerRegistry};
use crate::types::{Params, Response, RpcResult};

pub mod framing;
pub mod shutdown;
pub mod stdio;
pub mod stdio_client;
#[cfg(unix)]
pub mod unix;
#[cfg(unix)]
pub mod unix_client;

pub use shutdown::StopHandle;
pub use stdio::StdioServer;
pub use stdio_client::{StdioClient, RESPONSE_TIMEOUT};
#[cfg(unix)]
pub use unix::UnixServer;
#[cfg(unix)]
pub use unix_client::UnixClient;

/// Lifecycle surface every server exposes to its host.
///
/// `start` spawns background tasks and must be called from within a tokio
/// runtime.
#[async_trait]
pub trait Server: Send + Sync {
    fn registry(&self) -> &HandlerRegistry;

    /// Register or replace a handler. Allowed before and after `start`.
    fn register_handler<H>(&self, method: &str, handler: H)
    where
        H: Handler + 'static,
        Self: Sized,
    {
        self.registry().register(method, handler);
    }

    /// Launch the background tasks. Calling it again is a no-op.
    fn start(&self) -> RpcResult<()>;

    /// Raise the stop signal. Calling it again is a no-op.
    fn stop(&self) -> RpcResult<()>;

    /// Block until the stop signal has been raised.
    async fn wait(&self);

    fn stop_handle(&self) -> StopHandle;
}

/// One request, one correlated response.
///
/// Implementations support a single in-flight request at a time.
#[async_trait]
pub trait Client: Send {
    async fn send_request(&mut self, method: &str, params: Option<Params>) -> RpcResult<()>;

    /// `Ok(None)` means the peer closed the stream without answering.
    async fn receive_response(&mut self) -> RpcResult<Option<Response>>;

    async fn close(&mut self) -> RpcResult<()>;

    async fn call(&mut self, method: &str, params: Option<Params>) -> RpcResult<Option<Response>> {
        self.send_request(method, params).await?;
        self.receive_response().await
    }
}
