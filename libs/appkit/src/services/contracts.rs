use appkit_bootstrap::ServiceDecl;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::context::ServiceCtx;
use super::registry::ServiceError;
use crate::routing::BoundRoute;

/// A named, independently started unit such as an HTTP listener.
///
/// `load` runs while the application opens and is where a service reads its config and
/// binds its routes; `start` begins serving; `stop` must be safe to call on a stopped service.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn load(&self, ctx: &ServiceCtx) -> anyhow::Result<()>;

    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    fn is_started(&self) -> bool;

    /// Routes bound during `load`.
    fn routes(&self) -> Vec<BoundRoute> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any;
}

pub type ServiceFactory =
    Arc<dyn Fn(&ServiceDecl) -> anyhow::Result<Arc<dyn Service>> + Send + Sync>;

/// Service kind → factory.
#[derive(Clone, Default)]
pub struct ServiceCatalog {
    factories: HashMap<String, ServiceFactory>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: &str, factory: F) -> &mut Self
    where
        F: Fn(&ServiceDecl) -> anyhow::Result<Arc<dyn Service>> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(kind.to_string(), Arc::new(factory))
            .is_some()
        {
            tracing::warn!(kind, "service factory replaced");
        }
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn create(&self, decl: &ServiceDecl) -> Result<Arc<dyn Service>, ServiceError> {
        let factory = self
            .factories
            .get(&decl.kind)
            .ok_or_else(|| ServiceError::UnknownKind {
                name: decl.name.clone(),
                kind: decl.kind.clone(),
            })?;
        factory(decl).map_err(|source| ServiceError::Phase {
            name: decl.name.clone(),
            phase: "create",
            source,
        })
    }
}
