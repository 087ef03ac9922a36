//! Handler registry and JSON-RPC dispatch.

pub mod handler;
pub mod registry;

pub use handler::{Dispatcher, FailurePolicy};
pub use registry::{handler_async, handler_fn, AsyncFnHandler, FnHandler, Handler, HandlerRegistry};
