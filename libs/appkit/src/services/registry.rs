use appkit_bootstrap::ServiceDecl;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::context::ServiceDeps;
use super::contracts::{Service, ServiceCatalog};
use crate::access::AccessPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service '{name}' has unknown kind '{kind}'")]
    UnknownKind { name: String, kind: String },
    #[error("service '{name}' failed to {phase}: {source:#}")]
    Phase {
        name: String,
        phase: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Loaded services in declaration order, each with the grant table it bound into.
#[derive(Default)]
pub struct ServiceRegistry {
    services: Vec<Arc<dyn Service>>,
    policies: BTreeMap<String, Arc<AccessPolicy>>,
}

impl ServiceRegistry {
    /// Create and load every declared service, in order. The first failure aborts.
    pub async fn load(
        decls: &[ServiceDecl],
        catalog: &ServiceCatalog,
        deps: &ServiceDeps,
    ) -> Result<Self, ServiceError> {
        let mut services = Vec::with_capacity(decls.len());
        let mut policies = BTreeMap::new();
        for decl in decls {
            let service = catalog.create(decl)?;
            let ctx = deps.for_service(decl);
            service
                .load(&ctx)
                .await
                .map_err(|source| ServiceError::Phase {
                    name: decl.name.clone(),
                    phase: "load",
                    source,
                })?;
            tracing::info!(service = %decl.name, kind = %decl.kind, "service loaded");
            policies.insert(decl.name.clone(), ctx.access_policy());
            services.push(service);
        }
        Ok(Self { services, policies })
    }

    /// Start in declaration order; stops at the first failure.
    pub async fn start_all(&self, cancel: &CancellationToken) -> Result<(), ServiceError> {
        for service in &self.services {
            service
                .start(cancel.child_token())
                .await
                .map_err(|source| ServiceError::Phase {
                    name: service.name().to_string(),
                    phase: "start",
                    source,
                })?;
            tracing::info!(service = %service.name(), "service started");
        }
        Ok(())
    }

    /// Stop started services in reverse order. Every service gets its stop call;
    /// the first failure is returned after the others were attempted.
    pub async fn stop_all(&self, cancel: &CancellationToken) -> Result<(), ServiceError> {
        let mut first = None;
        for service in self.services.iter().rev() {
            if !service.is_started() {
                continue;
            }
            match service.stop(cancel.clone()).await {
                Ok(()) => tracing::info!(service = %service.name(), "service stopped"),
                Err(source) => {
                    tracing::warn!(service = %service.name(), error = %source, "service stop failed");
                    first.get_or_insert(ServiceError::Phase {
                        name: service.name().to_string(),
                        phase: "stop",
                        source,
                    });
                }
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.iter().find(|s| s.name() == name).cloned()
    }

    pub fn access_policy(&self, name: &str) -> Option<Arc<AccessPolicy>> {
        self.policies.get(name).cloned()
    }

    /// Grant tables by service name.
    pub fn access_policies(&self) -> &BTreeMap<String, Arc<AccessPolicy>> {
        &self.policies
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Service>> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Grant;
    use crate::model::NullModel;
    use crate::services::context::{FsCertificateLoader, ServiceCtx};
    use crate::storage::StoragePool;
    use appkit_bootstrap::LogRelay;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: String,
        journal: Journal,
        started: AtomicBool,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn step(&self, phase: &'static str) -> anyhow::Result<()> {
            self.journal.lock().push(format!("{phase}:{}", self.name));
            if self.fail_on == Some(phase) {
                anyhow::bail!("{phase} exploded");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Service for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn load(&self, ctx: &ServiceCtx) -> anyhow::Result<()> {
            assert_eq!(ctx.name, self.name);
            ctx.access_policy().grant(&self.name, "/shared", "GET");
            self.step("load")
        }

        async fn start(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
            self.step("start")?;
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
            self.started.store(false, Ordering::SeqCst);
            self.step("stop")
        }

        fn is_started(&self) -> bool {
            self.started.load(Ordering::SeqCst)
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn deps() -> ServiceDeps {
        ServiceDeps {
            root: std::env::temp_dir(),
            model: Arc::new(NullModel),
            storage: Arc::new(StoragePool::empty()),
            certificates: Arc::new(FsCertificateLoader::new(std::env::temp_dir())),
            log_sink: Arc::new(LogRelay::new()),
        }
    }

    fn catalog(journal: &Journal, fail: Option<(&'static str, &'static str)>) -> ServiceCatalog {
        let journal = journal.clone();
        let mut catalog = ServiceCatalog::new();
        catalog.register("recorder", move |decl| {
            let fail_on = fail.filter(|(name, _)| *name == decl.name).map(|(_, p)| p);
            Ok(Arc::new(Recorder {
                name: decl.name.clone(),
                journal: journal.clone(),
                started: AtomicBool::new(false),
                fail_on,
            }) as Arc<dyn Service>)
        });
        catalog
    }

    fn decl(name: &str) -> ServiceDecl {
        ServiceDecl {
            name: name.into(),
            kind: "recorder".into(),
            config: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn lifecycle_follows_declaration_order() {
        let journal = Journal::default();
        let registry = ServiceRegistry::load(&[decl("a"), decl("b")], &catalog(&journal, None), &deps())
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        registry.start_all(&cancel).await.unwrap();
        registry.stop_all(&cancel).await.unwrap();
        // Stopping again only touches started services.
        registry.stop_all(&cancel).await.unwrap();

        assert_eq!(
            *journal.lock(),
            vec!["load:a", "load:b", "start:a", "start:b", "stop:b", "stop:a"]
        );
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn each_service_binds_into_its_own_grant_table() {
        let journal = Journal::default();
        let registry = ServiceRegistry::load(&[decl("a"), decl("b")], &catalog(&journal, None), &deps())
            .await
            .unwrap();

        let a = registry.access_policy("a").unwrap();
        let b = registry.access_policy("b").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.grants(), vec![Grant::new("a", "/shared", "GET")]);
        assert_eq!(b.grants(), vec![Grant::new("b", "/shared", "GET")]);
        assert!(!a.is_allowed(&["b"], "/shared", "GET"));
        assert!(!b.is_allowed(&["a"], "/shared", "GET"));
        assert_eq!(
            registry.access_policies().keys().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert!(registry.access_policy("c").is_none());
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let journal = Journal::default();
        let mut bad = decl("x");
        bad.kind = "smtp".into();

        let err = ServiceRegistry::load(&[bad], &catalog(&journal, None), &deps())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::UnknownKind { .. }));
    }

    #[tokio::test]
    async fn stop_failures_do_not_skip_other_services() {
        let journal = Journal::default();
        let registry = ServiceRegistry::load(
            &[decl("a"), decl("b")],
            &catalog(&journal, Some(("b", "stop"))),
            &deps(),
        )
        .await
        .unwrap();
        let cancel = CancellationToken::new();
        registry.start_all(&cancel).await.unwrap();

        let err = registry.stop_all(&cancel).await.unwrap_err();

        assert!(err.to_string().contains("'b' failed to stop"), "{err}");
        assert!(journal.lock().contains(&"stop:a".to_string()));
    }

    #[tokio::test]
    async fn load_failure_names_the_service() {
        let journal = Journal::default();
        let err = ServiceRegistry::load(
            &[decl("a"), decl("b")],
            &catalog(&journal, Some(("a", "load"))),
            &deps(),
        )
        .await
        .err()
        .unwrap();

        assert!(err.to_string().contains("'a' failed to load"), "{err}");
        assert_eq!(*journal.lock(), vec!["load:a"]);
    }
}
