//! Error types and JSON-RPC error codes.

use std::path::PathBuf;

use super::message::ErrorObject;

/// Standard JSON-RPC 2.0 error codes.
///
/// `INVALID_REQUEST` and `INVALID_PARAMS` are reserved; the dispatch engine
/// itself never emits them.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Local failures raised by transports and clients.
///
/// Remote failures never surface here: they arrive as an [`ErrorObject`]
/// inside a decoded response.
#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    #[error("failed to remove stale socket {path}: {source}")]
    StaleSocket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create socket {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set socket permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to socket {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Decode(String),

    #[error("stream ended in the middle of a message")]
    UnexpectedEof,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("stream closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    pub fn code(&self) -> i32 {
        use error_codes::*;
        match self {
            RpcError::Decode(_) | RpcError::UnexpectedEof | RpcError::Json(_) => PARSE_ERROR,
            _ => INTERNAL_ERROR,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject::new(self.code(), self.to_string())
    }

    /// Whether this is a clean end of stream rather than a failure.
    pub fn is_closed(&self) -> bool {
        match self {
            RpcError::Closed => true,
            RpcError::Io(e) => is_closed_io(e),
            _ => false,
        }
    }
}

/// I/O failures that only mean the peer went away.
pub fn is_closed_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::NotConnected
    )
}

pub type RpcResult<T> = Result<T, RpcError>;
