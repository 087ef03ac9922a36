//! Handler registration and lookup.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::types::Params;

/// A registered operation.
///
/// Handlers are stateless with respect to the engine: they get the request
/// params and return a result value or a failure description.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, params: Option<Params>) -> anyhow::Result<Value>;
}

/// Adapter for synchronous closures.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(Option<Params>) -> anyhow::Result<Value> + Send + Sync,
{
    async fn call(&self, params: Option<Params>) -> anyhow::Result<Value> {
        (self.0)(params)
    }
}

/// Adapter for closures returning a future.
pub struct AsyncFnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for AsyncFnHandler<F>
where
    F: Fn(Option<Params>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn call(&self, params: Option<Params>) -> anyhow::Result<Value> {
        (self.0)(params).await
    }
}

pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(Option<Params>) -> anyhow::Result<Value> + Send + Sync,
{
    FnHandler(f)
}

pub fn handler_async<F, Fut>(f: F) -> AsyncFnHandler<F>
where
    F: Fn(Option<Params>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    AsyncFnHandler(f)
}

/// Method name to handler map shared between a server and its tasks.
///
/// Lookups take the read side of the lock so concurrent dispatches never
/// serialise against each other; registration takes the write side. The lock
/// is never held while a handler runs.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn Handler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the handler for `method`. Last registration wins.
    pub fn register<H>(&self, method: impl Into<String>, handler: H)
    where
        H: Handler + 'static,
    {
        let method = method.into();
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.insert(method.clone(), Arc::new(handler)).is_some() {
            tracing::debug!("Replaced handler for {method}");
        }
    }

    pub fn register_fn<F>(&self, method: impl Into<String>, f: F)
    where
        F: Fn(Option<Params>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(method, handler_fn(f));
    }

    /// Exact, case-sensitive lookup.
    pub fn lookup(&self, method: &str) -> Option<Arc<dyn Handler>> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(method).cloned()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.lookup(method).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut methods: Vec<_> = handlers.keys().collect();
        methods.sort();
        f.debug_struct("HandlerRegistry")
            .field("methods", &methods)
            .finish()
    }
}
