use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use super::discover::RouteMethod;
use crate::model::DomainModel;
use crate::storage::StoragePool;

/// Terminal element of a route chain.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, req: Request) -> Response;
}

/// What a handler factory gets to build its handler with.
#[derive(Clone)]
pub struct HandlerParams {
    pub route: String,
    pub method: RouteMethod,
    pub model: Arc<dyn DomainModel>,
    pub storage: Arc<StoragePool>,
}

pub type HandlerFactory =
    Arc<dyn Fn(&HandlerParams) -> anyhow::Result<Arc<dyn RouteHandler>> + Send + Sync>;

/// Explicit `(path, method)` → handler factory registrations.
///
/// The route tree decides which routes exist; this table decides what serves them.
#[derive(Clone, Default)]
pub struct HandlerTable {
    entries: BTreeMap<(String, RouteMethod), HandlerFactory>,
    duplicates: Vec<(String, RouteMethod)>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A second registration for the same pair is kept as a
    /// duplicate and makes the next bind pass fail.
    pub fn register<F>(&mut self, path: &str, method: RouteMethod, factory: F) -> &mut Self
    where
        F: Fn(&HandlerParams) -> anyhow::Result<Arc<dyn RouteHandler>> + Send + Sync + 'static,
    {
        let key = (path.to_string(), method);
        if self.entries.contains_key(&key) {
            self.duplicates.push(key);
        } else {
            self.entries.insert(key, Arc::new(factory));
        }
        self
    }

    /// Register a ready-made handler shared by every bind pass.
    pub fn register_handler(
        &mut self,
        path: &str,
        method: RouteMethod,
        handler: Arc<dyn RouteHandler>,
    ) -> &mut Self {
        self.register(path, method, move |_| Ok(Arc::clone(&handler)))
    }

    pub fn factory(&self, path: &str, method: RouteMethod) -> Option<&HandlerFactory> {
        self.entries.get(&(path.to_string(), method))
    }

    pub fn duplicates(&self) -> &[(String, RouteMethod)] {
        &self.duplicates
    }

    pub fn keys(&self) -> impl Iterator<Item = (&str, RouteMethod)> {
        self.entries.keys().map(|(p, m)| (p.as_str(), *m))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> RouteHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn handle(&self, req: Request) -> Response {
        (self.0)(req).await
    }
}

/// Wrap an async closure as a [`RouteHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RouteHandler>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
