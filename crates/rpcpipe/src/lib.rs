//! rpcpipe — invoke named operations in another process over JSON-RPC.
//!
//! Two transports share one message model and one dispatch engine:
//!
//! - [`StdioServer`] / [`StdioClient`] over an inherited reader/writer pair,
//! - [`UnixServer`] / [`UnixClient`] over a persistent Unix domain socket.
//!
//! Every background task runs under [`supervise`], so a panicking handler
//! ends only the task that was running it.

pub mod protocol;
pub mod supervise;
pub mod transport;
pub mod types;

pub use protocol::{handler_async, handler_fn, Dispatcher, FailurePolicy, Handler, HandlerRegistry};
pub use supervise::supervise;
pub use transport::{Client, Server, StdioClient, StdioServer, StopHandle};
#[cfg(unix)]
pub use transport::{UnixClient, UnixServer};
pub use types::{ErrorObject, Params, Request, Response, RpcError, RpcResult};
