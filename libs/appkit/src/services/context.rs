use anyhow::Context as _;
use appkit_bootstrap::{LogSink, ServiceDecl};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::access::AccessPolicy;
use crate::model::DomainModel;
use crate::storage::StoragePool;

/// PEM-encoded key and certificate chain.
#[derive(Clone)]
pub struct CertPair {
    pub key_pem: Vec<u8>,
    pub cert_pem: Vec<u8>,
}

impl std::fmt::Debug for CertPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertPair")
            .field("key_pem", &"<redacted>")
            .field("cert_pem_len", &self.cert_pem.len())
            .finish()
    }
}

pub trait CertificateLoader: Send + Sync {
    fn load(&self, key: &str, cert: &str) -> anyhow::Result<CertPair>;
}

/// Reads key and certificate files; relative paths resolve against the application root.
#[derive(Debug, Clone)]
pub struct FsCertificateLoader {
    root: PathBuf,
}

impl FsCertificateLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, p: &str) -> PathBuf {
        let path = Path::new(p);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl CertificateLoader for FsCertificateLoader {
    fn load(&self, key: &str, cert: &str) -> anyhow::Result<CertPair> {
        let key_path = self.resolve(key);
        let cert_path = self.resolve(cert);
        let key_pem = std::fs::read(&key_path)
            .with_context(|| format!("failed to read key '{}'", key_path.display()))?;
        let cert_pem = std::fs::read(&cert_path)
            .with_context(|| format!("failed to read certificate '{}'", cert_path.display()))?;
        Ok(CertPair { key_pem, cert_pem })
    }
}

/// Orchestrator-owned state handed to every service.
#[derive(Clone)]
pub struct ServiceDeps {
    pub root: PathBuf,
    pub model: Arc<dyn DomainModel>,
    pub storage: Arc<StoragePool>,
    pub certificates: Arc<dyn CertificateLoader>,
    pub log_sink: Arc<dyn LogSink>,
}

impl ServiceDeps {
    /// Context for one declared service. Each call gets an empty grant table of its own,
    /// so access declared in one route tree never admits callers into another.
    pub fn for_service(&self, decl: &ServiceDecl) -> ServiceCtx {
        ServiceCtx {
            name: decl.name.clone(),
            kind: decl.kind.clone(),
            config: decl.config.clone(),
            access_policy: Arc::new(AccessPolicy::new()),
            deps: self.clone(),
        }
    }
}

/// What one service sees while loading.
#[derive(Clone)]
pub struct ServiceCtx {
    pub name: String,
    pub kind: String,
    config: serde_json::Value,
    access_policy: Arc<AccessPolicy>,
    deps: ServiceDeps,
}

impl ServiceCtx {
    /// Typed view of the service's own config section.
    pub fn config<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_value(self.config.clone())
            .with_context(|| format!("invalid config for service '{}'", self.name))
    }

    pub fn raw_config(&self) -> &serde_json::Value {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.deps.root
    }

    pub fn model(&self) -> Arc<dyn DomainModel> {
        Arc::clone(&self.deps.model)
    }

    pub fn storage(&self) -> Arc<StoragePool> {
        Arc::clone(&self.deps.storage)
    }

    /// Grant table of this service alone.
    pub fn access_policy(&self) -> Arc<AccessPolicy> {
        Arc::clone(&self.access_policy)
    }

    pub fn certificates(&self) -> Arc<dyn CertificateLoader> {
        Arc::clone(&self.deps.certificates)
    }

    pub fn log_sink(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.deps.log_sink)
    }
}
