use anyhow::Context as _;
use appkit::access::{default_on_forbidden, AnonymousResolver, IdentityResolver, OnForbidden};
use appkit::routing::{bind, BindContext, BoundRoute, HandlerTable};
use appkit::services::{Service, ServiceCatalog, ServiceCtx};
use appkit_bootstrap::LogSink;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::body::Body;
use axum::handler::HandlerWithoutStateExt;
use axum::http::{Request, Response};
use axum::middleware::from_fn_with_state;
use axum::Router;
use parking_lot::Mutex;
use rustls::ServerConfig;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::HttpServiceConfig;
use crate::middleware::{access_log, identity, request_id};
use crate::tls::{self, TlsListener};
use crate::web;

/// Bound on draining open connections once a stop was requested.
const STOP_GRACE: Duration = Duration::from_secs(10);

struct Running {
    addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The `http` service: one listener serving the routes of one route tree.
pub struct HttpService {
    name: String,
    handlers: Arc<HandlerTable>,
    identity: Arc<dyn IdentityResolver>,
    on_forbidden: OnForbidden,
    config: ArcSwap<HttpServiceConfig>,
    router: Mutex<Option<Router>>,
    routes: Mutex<Vec<BoundRoute>>,
    tls: Mutex<Option<Arc<ServerConfig>>>,
    running: Mutex<Option<Running>>,
    // Serializes start/stop; `running` alone cannot be held across awaits.
    transition: tokio::sync::Mutex<()>,
}

impl HttpService {
    pub fn new(
        name: impl Into<String>,
        handlers: Arc<HandlerTable>,
        identity: Arc<dyn IdentityResolver>,
        on_forbidden: OnForbidden,
    ) -> Self {
        Self {
            name: name.into(),
            handlers,
            identity,
            on_forbidden,
            config: ArcSwap::from_pointee(HttpServiceConfig::default()),
            router: Mutex::new(None),
            routes: Mutex::new(Vec::new()),
            tls: Mutex::new(None),
            running: Mutex::new(None),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> HttpServiceConfig {
        (**self.config.load()).clone()
    }

    /// Address the listener is bound to while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.addr)
    }

    pub fn is_tls(&self) -> bool {
        self.tls.lock().is_some()
    }

    /// The fully layered router built by `load`.
    pub fn router(&self) -> Option<Router> {
        self.router.lock().clone()
    }

    fn load_tls(&self, ctx: &ServiceCtx, cfg: &HttpServiceConfig) -> anyhow::Result<()> {
        let Some((key, cert)) = cfg.tls_files() else {
            return Ok(());
        };
        match ctx.certificates().load(key, cert) {
            Ok(pair) => {
                let config = tls::server_config(&pair)
                    .with_context(|| format!("invalid TLS material for service '{}'", self.name))?;
                *self.tls.lock() = Some(config);
            }
            Err(e) => {
                tracing::warn!(service = %self.name, error = %e, "certificates unavailable, serving plain HTTP");
            }
        }
        Ok(())
    }
}

/// Request id → trace span → access log → timeout → body limit → identity → routes → static → 404.
pub fn assemble_router(
    routes: Router,
    cfg: &HttpServiceConfig,
    static_dir: &Path,
    resolver: Arc<dyn IdentityResolver>,
    sink: Arc<dyn LogSink>,
) -> Router {
    let static_files = ServeDir::new(static_dir)
        .call_fallback_on_method_not_allowed(true)
        .fallback(web::not_found.into_service());
    let x_request_id = request_id::header();

    routes
        .method_not_allowed_fallback(web::not_found)
        .fallback_service(static_files)
        .layer(from_fn_with_state(resolver, identity::resolve_caller))
        .layer(RequestBodyLimitLayer::new(cfg.body_limit_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(cfg.request_timeout_sec)))
        .layer(from_fn_with_state(sink, access_log::access_log))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<Body>| {
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        uri = %req.uri().path(),
                        request_id = %request_id::of(req),
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |res: &Response<Body>, latency: Duration, span: &tracing::Span| {
                        span.record("status", res.status().as_u16());
                        span.record("latency_ms", latency.as_millis() as u64);
                    },
                ),
        )
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, request_id::MakeReqId))
}

#[async_trait]
impl Service for HttpService {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "HTTP listener for a route tree"
    }

    async fn load(&self, ctx: &ServiceCtx) -> anyhow::Result<()> {
        let cfg: HttpServiceConfig = ctx.config()?;
        let route_root = ctx.root().join(cfg.routes_dir(&self.name));
        let bind_ctx = BindContext {
            policy: ctx.access_policy(),
            on_forbidden: Arc::clone(&self.on_forbidden),
            model: ctx.model(),
            storage: ctx.storage(),
        };

        self.load_tls(ctx, &cfg)?;
        let (routes, bound) = bind(Router::new(), &route_root, &self.handlers, &bind_ctx)
            .with_context(|| format!("binding routes of '{}'", route_root.display()))?;

        let router = assemble_router(
            routes,
            &cfg,
            &ctx.root().join(&cfg.static_dir),
            Arc::clone(&self.identity),
            ctx.log_sink(),
        );
        tracing::info!(service = %self.name, routes = bound.len(), "http routes bound");

        *self.router.lock() = Some(router);
        *self.routes.lock() = bound;
        self.config.store(Arc::new(cfg));
        Ok(())
    }

    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let _transition = self.transition.lock().await;
        if self.running.lock().is_some() {
            anyhow::bail!("Service is already started");
        }
        let router = self.router().context("service is not loaded")?;
        let cfg = self.config();

        let listener = tokio::net::TcpListener::bind(cfg.bind_addr())
            .await
            .with_context(|| format!("failed to bind {}", cfg.bind_addr()))?;
        let addr = listener.local_addr()?;

        let token = cancel.child_token();
        let shutdown = token.clone().cancelled_owned();
        let name = self.name.clone();
        let tls = self.tls.lock().clone();
        let task = match tls {
            Some(config) => {
                let listener = TlsListener::new(listener, config)?;
                tracing::info!(service = %name, %addr, "HTTPS server bound");
                tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, router)
                        .with_graceful_shutdown(shutdown)
                        .await
                    {
                        tracing::error!(service = %name, error = %e, "HTTPS server failed");
                    }
                })
            }
            None => {
                tracing::info!(service = %name, %addr, "HTTP server bound");
                tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, router)
                        .with_graceful_shutdown(shutdown)
                        .await
                    {
                        tracing::error!(service = %name, error = %e, "HTTP server failed");
                    }
                })
            }
        };

        *self.running.lock() = Some(Running {
            addr,
            cancel: token,
            task,
        });
        Ok(())
    }

    async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        let _transition = self.transition.lock().await;
        let Some(running) = self.running.lock().take() else {
            return Ok(());
        };

        running.cancel.cancel();
        let abort = running.task.abort_handle();
        match tokio::time::timeout(STOP_GRACE, running.task).await {
            Ok(_) => tracing::info!(service = %self.name, "HTTP server shut down gracefully"),
            Err(_) => {
                abort.abort();
                tracing::warn!(service = %self.name, "HTTP server did not drain in time, aborted");
            }
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.running.lock().is_some()
    }

    fn routes(&self) -> Vec<BoundRoute> {
        self.routes.lock().clone()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Creates [`HttpService`] instances for `kind: http` entries.
///
/// Each declared service serves its own route tree, so handler tables are kept per
/// service name. Services without a table of their own fall back to the default one.
#[derive(Clone)]
pub struct HttpServiceFactory {
    handlers: Arc<HandlerTable>,
    per_service: BTreeMap<String, Arc<HandlerTable>>,
    identity: Arc<dyn IdentityResolver>,
    on_forbidden: OnForbidden,
}

impl HttpServiceFactory {
    pub const KIND: &'static str = "http";

    pub fn new(handlers: HandlerTable) -> Self {
        Self {
            handlers: Arc::new(handlers),
            per_service: BTreeMap::new(),
            identity: Arc::new(AnonymousResolver),
            on_forbidden: default_on_forbidden(),
        }
    }

    /// Handlers for the service declared as `name` only.
    pub fn with_service_handlers(mut self, name: impl Into<String>, handlers: HandlerTable) -> Self {
        self.per_service.insert(name.into(), Arc::new(handlers));
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_on_forbidden(mut self, on_forbidden: OnForbidden) -> Self {
        self.on_forbidden = on_forbidden;
        self
    }

    /// Table the service declared as `name` binds against.
    pub fn handlers_for(&self, name: &str) -> Arc<HandlerTable> {
        Arc::clone(self.per_service.get(name).unwrap_or(&self.handlers))
    }

    pub fn create(&self, name: &str) -> HttpService {
        HttpService::new(
            name,
            self.handlers_for(name),
            Arc::clone(&self.identity),
            Arc::clone(&self.on_forbidden),
        )
    }

    pub fn register(self, catalog: &mut ServiceCatalog) {
        catalog.register(Self::KIND, move |decl| {
            Ok(Arc::new(self.create(&decl.name)) as Arc<dyn Service>)
        });
    }
}
