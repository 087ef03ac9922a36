//! Main request dispatcher: turns a decoded request into a response.

use crate::types::error_codes::{INTERNAL_ERROR, METHOD_NOT_FOUND, PARSE_ERROR};
use crate::types::{ErrorObject, Request, Response};

use super::registry::HandlerRegistry;

/// How a failing handler is reported back to the peer.
///
/// The two server transports disagree here and both behaviours are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// `InternalError` with the description prefixed by `"Method deal failed: "`.
    /// Used by the stream transport.
    QualifiedInternal,
    /// `ParseError` carrying the bare description. Used by the socket transport.
    VerbatimParse,
}

impl FailurePolicy {
    pub fn error_for(self, failure: &anyhow::Error) -> ErrorObject {
        match self {
            FailurePolicy::QualifiedInternal => {
                ErrorObject::new(INTERNAL_ERROR, format!("Method deal failed: {failure:#}"))
            }
            FailurePolicy::VerbatimParse => ErrorObject::new(PARSE_ERROR, format!("{failure:#}")),
        }
    }
}

/// Routes requests to registered handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: HandlerRegistry,
    policy: FailurePolicy,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry, policy: FailurePolicy) -> Self {
        Self { registry, policy }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Produce the response for `request`.
    ///
    /// A missing method or a failing handler becomes an error payload; this
    /// never fails at the transport level and never retries.
    pub async fn dispatch(&self, request: Request) -> Response {
        let mut response = Response::to(Some(request.id));

        let Some(handler) = self.registry.lookup(&request.method) else {
            tracing::debug!(id = request.id, method = %request.method, "method not found");
            response.error = Some(ErrorObject::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ));
            return response;
        };

        tracing::debug!(id = request.id, method = %request.method, "dispatching request");
        match handler.call(request.params).await {
            Ok(value) => response.result = Some(value),
            Err(failure) => {
                tracing::debug!(method = %request.method, "handler failed: {failure:#}");
                response.error = Some(self.policy.error_for(&failure));
            }
        }

        response
    }
}
