//! Application lifecycle: an ordered open sequence and its mirror-image close.
//!
//! Open:  places → logger → storage → model → services (routes bound) → start.
//! Close: stop → unload services → model → storage → logger → places.
//!
//! A failed open is rolled back with a full close, so callers only ever observe an
//! application that is either completely open or completely closed.

use anyhow::Context as _;
use appkit_bootstrap::{
    ApplicationConfig, ConfigTree, DatabasesConfig, FileSink, LogConfig, LogRelay, LogSink,
    DEFAULT_PLACES,
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::access::AccessPolicy;
use crate::model::{DomainModel, NullModel};
use crate::services::{
    CertificateLoader, FsCertificateLoader, Service, ServiceCatalog, ServiceDeps, ServiceRegistry,
};
use crate::storage::StoragePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    LoadPlaces,
    OpenLogger,
    OpenStorage,
    OpenModel,
    LoadServices,
    StartServices,
    StopServices,
    UnloadServices,
    CloseModel,
    CloseStorage,
    CloseLogger,
    UnloadPlaces,
}

pub const OPEN_STEPS: [Step; 6] = [
    Step::LoadPlaces,
    Step::OpenLogger,
    Step::OpenStorage,
    Step::OpenModel,
    Step::LoadServices,
    Step::StartServices,
];

pub const CLOSE_STEPS: [Step; 6] = [
    Step::StopServices,
    Step::UnloadServices,
    Step::CloseModel,
    Step::CloseStorage,
    Step::CloseLogger,
    Step::UnloadPlaces,
];

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::LoadPlaces => "load places",
            Step::OpenLogger => "open logger",
            Step::OpenStorage => "open storage",
            Step::OpenModel => "open model",
            Step::LoadServices => "load services",
            Step::StartServices => "start services",
            Step::StopServices => "stop services",
            Step::UnloadServices => "unload services",
            Step::CloseModel => "close model",
            Step::CloseStorage => "close storage",
            Step::CloseLogger => "close logger",
            Step::UnloadPlaces => "unload places",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Application is already open")]
    AlreadyOpen,
    #[error("{step} failed: {source:#}")]
    Step {
        step: Step,
        #[source]
        source: anyhow::Error,
    },
    #[error("{step} did not finish within {timeout:?}")]
    StepTimeout { step: Step, timeout: Duration },
}

impl AppError {
    pub fn step(&self) -> Option<Step> {
        match self {
            AppError::AlreadyOpen => None,
            AppError::Step { step, .. } | AppError::StepTimeout { step, .. } => Some(*step),
        }
    }
}

/// Which subsystem handles are currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleSnapshot {
    pub config: bool,
    pub logger: bool,
    pub storage: bool,
    pub model: bool,
    /// Grant tables, one per loaded service.
    pub access_policies: bool,
    pub services: bool,
}

impl HandleSnapshot {
    pub fn all_present(&self) -> bool {
        self.config
            && self.logger
            && self.storage
            && self.model
            && self.access_policies
            && self.services
    }

    pub fn all_absent(&self) -> bool {
        !(self.config
            || self.logger
            || self.storage
            || self.model
            || self.access_policies
            || self.services)
    }
}

#[derive(Default)]
struct Handles {
    config: Option<Arc<ConfigTree>>,
    logger: Option<Arc<FileSink>>,
    storage: Option<Arc<StoragePool>>,
    model: Option<Arc<dyn DomainModel>>,
    access_policies: Option<BTreeMap<String, Arc<AccessPolicy>>>,
    services: Option<ServiceRegistry>,
    cancel: Option<CancellationToken>,
}

/// Root aggregate. Owned by the process entry point; `&mut self` keeps open and close sequential.
pub struct Application {
    root: PathBuf,
    places: Vec<String>,
    step_timeout: Option<Duration>,
    model: Arc<dyn DomainModel>,
    catalog: ServiceCatalog,
    relay: Arc<LogRelay>,
    certificates: Arc<dyn CertificateLoader>,
    handles: Handles,
    is_open: bool,
}

pub struct AppBuilder {
    root: PathBuf,
    places: Vec<String>,
    step_timeout: Option<Duration>,
    model: Arc<dyn DomainModel>,
    catalog: ServiceCatalog,
    relay: Option<Arc<LogRelay>>,
    certificates: Option<Arc<dyn CertificateLoader>>,
}

impl AppBuilder {
    pub fn places<I, S>(mut self, places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.places = places.into_iter().map(Into::into).collect();
        self
    }

    /// Bound every step by `timeout`. Without it each step runs to completion.
    pub fn step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn model(mut self, model: Arc<dyn DomainModel>) -> Self {
        self.model = model;
        self
    }

    pub fn catalog(mut self, catalog: ServiceCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Relay the file sink is chained behind; usually the one fed by the tracing subscriber.
    pub fn relay(mut self, relay: Arc<LogRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn certificates(mut self, loader: Arc<dyn CertificateLoader>) -> Self {
        self.certificates = Some(loader);
        self
    }

    pub fn build(self) -> Application {
        let certificates = self
            .certificates
            .unwrap_or_else(|| Arc::new(FsCertificateLoader::new(self.root.clone())));
        Application {
            root: self.root,
            places: self.places,
            step_timeout: self.step_timeout,
            model: self.model,
            catalog: self.catalog,
            relay: self.relay.unwrap_or_default(),
            certificates,
            handles: Handles::default(),
            is_open: false,
        }
    }
}

impl Application {
    pub fn builder(root: impl Into<PathBuf>) -> AppBuilder {
        AppBuilder {
            root: root.into(),
            places: DEFAULT_PLACES.iter().map(|p| p.to_string()).collect(),
            step_timeout: None,
            model: Arc::new(NullModel),
            catalog: ServiceCatalog::new(),
            relay: None,
            certificates: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn handles(&self) -> HandleSnapshot {
        HandleSnapshot {
            config: self.handles.config.is_some(),
            logger: self.handles.logger.is_some(),
            storage: self.handles.storage.is_some(),
            model: self.handles.model.is_some(),
            access_policies: self.handles.access_policies.is_some(),
            services: self.handles.services.is_some(),
        }
    }

    pub fn config(&self) -> Option<&ConfigTree> {
        self.handles.config.as_deref()
    }

    /// Grant table the named service bound its routes into.
    pub fn access_policy(&self, service: &str) -> Option<Arc<AccessPolicy>> {
        self.handles.access_policies.as_ref()?.get(service).cloned()
    }

    pub fn access_policies(&self) -> Option<&BTreeMap<String, Arc<AccessPolicy>>> {
        self.handles.access_policies.as_ref()
    }

    pub fn storage(&self) -> Option<Arc<StoragePool>> {
        self.handles.storage.clone()
    }

    pub fn services(&self) -> Option<&ServiceRegistry> {
        self.handles.services.as_ref()
    }

    pub fn service(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.handles.services.as_ref()?.get(name)
    }

    pub fn relay(&self) -> Arc<LogRelay> {
        Arc::clone(&self.relay)
    }

    /// Run every open step in order. Fails without side effects when already open;
    /// any other failure closes whatever was opened before returning the error.
    pub async fn open(&mut self) -> Result<(), AppError> {
        if self.is_open {
            return Err(AppError::AlreadyOpen);
        }

        tracing::info!(log_kind = "system", root = %self.root.display(), "Opening application");
        for step in OPEN_STEPS {
            if let Err(err) = self.run_step(step).await {
                tracing::error!(log_kind = "system", %step, error = %err, "Open failed, rolling back");
                if let Err(rollback) = self.teardown().await {
                    tracing::error!(error = %rollback, "Rollback after failed open was incomplete");
                }
                return Err(err);
            }
        }

        self.is_open = true;
        debug_assert!(self.handles().all_present());
        tracing::info!(log_kind = "system", "Application is open");
        Ok(())
    }

    /// Run every close step. Closing a closed application succeeds without doing anything.
    /// Step failures are logged and do not stop later steps; the first one is returned.
    pub async fn close(&mut self) -> Result<(), AppError> {
        if !self.is_open {
            return Ok(());
        }

        tracing::info!(log_kind = "system", "Closing application");
        let result = self.teardown().await;
        self.is_open = false;
        debug_assert!(self.handles().all_absent());
        match &result {
            Ok(()) => tracing::info!("Application is closed"),
            Err(e) => tracing::error!(error = %e, "Application closed with errors"),
        }
        result
    }

    async fn teardown(&mut self) -> Result<(), AppError> {
        let mut first = None;
        for step in CLOSE_STEPS {
            if let Err(err) = self.run_step(step).await {
                tracing::error!(%step, error = %err, "Close step failed, continuing");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    async fn run_step(&mut self, step: Step) -> Result<(), AppError> {
        tracing::info!(%step, "{step}...");
        let timeout = self.step_timeout;
        let fut = self.exec(step);
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| AppError::StepTimeout {
                    step,
                    timeout: limit,
                })?,
            None => fut.await,
        };
        result.map_err(|source| AppError::Step { step, source })?;
        tracing::debug!(%step, "{step} is complete");
        Ok(())
    }

    async fn exec(&mut self, step: Step) -> anyhow::Result<()> {
        match step {
            Step::LoadPlaces => {
                let tree = ConfigTree::load(&self.root, self.places.as_slice())?;
                self.handles.config = Some(Arc::new(tree));
            }
            Step::OpenLogger => {
                let cfg: LogConfig = self.require_config()?.extract_or_default("config.log")?;
                let sink = FileSink::open(&cfg, &self.root)
                    .with_context(|| format!("cannot open log file under '{}'", cfg.dir))?;
                self.relay.set_next(Some(sink.clone() as Arc<dyn LogSink>));
                self.handles.logger = Some(sink);
            }
            Step::OpenStorage => {
                let dbs: DatabasesConfig =
                    self.require_config()?.extract_or_default("config.databases")?;
                self.handles.storage = Some(Arc::new(StoragePool::open(&dbs)?));
            }
            Step::OpenModel => {
                let storage = self.require_storage()?;
                self.model
                    .open(storage)
                    .await
                    .with_context(|| format!("model '{}'", self.model.name()))?;
                self.handles.model = Some(Arc::clone(&self.model));
            }
            Step::LoadServices => {
                let app: ApplicationConfig =
                    self.require_config()?.extract_or_default("config.application")?;
                // Every service gets a fresh grant table on every open.
                let deps = ServiceDeps {
                    root: self.root.clone(),
                    model: self.handles.model.clone().context("model is not open")?,
                    storage: self.require_storage()?,
                    certificates: Arc::clone(&self.certificates),
                    log_sink: Arc::clone(&self.relay) as Arc<dyn LogSink>,
                };
                let registry =
                    ServiceRegistry::load(&app.service_decls(), &self.catalog, &deps).await?;
                self.handles.access_policies = Some(registry.access_policies().clone());
                self.handles.services = Some(registry);
            }
            Step::StartServices => {
                let cancel = CancellationToken::new();
                self.handles.cancel = Some(cancel.clone());
                self.handles
                    .services
                    .as_ref()
                    .context("services are not loaded")?
                    .start_all(&cancel)
                    .await?;
            }
            Step::StopServices => {
                let cancel = self.handles.cancel.take().unwrap_or_default();
                cancel.cancel();
                if let Some(services) = &self.handles.services {
                    services.stop_all(&cancel).await?;
                }
            }
            Step::UnloadServices => {
                self.handles.services = None;
                self.handles.access_policies = None;
            }
            Step::CloseModel => {
                if let Some(model) = self.handles.model.take() {
                    model.close().await?;
                }
            }
            Step::CloseStorage => {
                if let Some(storage) = self.handles.storage.take() {
                    storage.close().await;
                }
            }
            Step::CloseLogger => {
                if let Some(sink) = self.handles.logger.take() {
                    self.relay.set_next(None);
                    sink.close().await?;
                }
            }
            Step::UnloadPlaces => {
                self.handles.config = None;
            }
        }
        Ok(())
    }

    fn require_config(&self) -> anyhow::Result<Arc<ConfigTree>> {
        self.handles.config.clone().context("config is not loaded")
    }

    fn require_storage(&self) -> anyhow::Result<Arc<StoragePool>> {
        self.handles.storage.clone().context("storage is not open")
    }
}
