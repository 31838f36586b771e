//! Turns a route tree plus a handler table into router entries and access grants.

use axum::extract::Request;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{on, MethodRouter};
use axum::Router;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::discover::{discover, DiscoverError, RouteDescriptor, RouteMethod};
use super::handler::{HandlerParams, HandlerTable, RouteHandler};
use super::validation::{self, RuleSet, RuleSetError};
use crate::access::gate::{self, GateState};
use crate::access::{AccessDeclaration, AccessPolicy, OnForbidden};
use crate::model::DomainModel;
use crate::storage::StoragePool;

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error(transparent)]
    Discover(#[from] DiscoverError),
    #[error("no handler registered for {method} {path}")]
    MissingHandler { path: String, method: RouteMethod },
    #[error("route {method} {path} is declared more than once")]
    DuplicateRoute { path: String, method: RouteMethod },
    #[error("handler for {method} {path} is registered more than once")]
    DuplicateHandler { path: String, method: RouteMethod },
    #[error("route path '{path}' has unsupported segment '{segment}'")]
    InvalidPath { path: String, segment: String },
    #[error("failed to build handler for {method} {path}: {source:#}")]
    Handler {
        path: String,
        method: RouteMethod,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to read route artifact '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid access declaration '{}': {source}", path.display())]
    Access {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid validation ruleset '{}': {source}", path.display())]
    Rules {
        path: PathBuf,
        #[source]
        source: RuleSetError,
    },
}

/// Shared inputs of one bind pass.
#[derive(Clone)]
pub struct BindContext {
    pub policy: Arc<AccessPolicy>,
    pub on_forbidden: OnForbidden,
    pub model: Arc<dyn DomainModel>,
    pub storage: Arc<StoragePool>,
}

/// Summary of one registered route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundRoute {
    pub path: String,
    pub method: RouteMethod,
    pub access: bool,
    pub rules: bool,
}

impl fmt::Display for BoundRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "method:{:<7}, access:{}, rules:{}, url:{}",
            self.method.as_str(),
            if self.access { "SET" } else { "   " },
            if self.rules { "SET" } else { "   " },
            self.path
        )
    }
}

struct ResolvedRoute {
    descriptor: RouteDescriptor,
    handler: Arc<dyn RouteHandler>,
    declaration: Option<AccessDeclaration>,
    rules: Option<Arc<RuleSet>>,
}

/// Bind every route found under `route_root` onto `router`.
///
/// All routes are resolved first (handlers built, artifacts parsed, duplicates checked).
/// Grants are registered and routes added only once the whole tree resolved, so a failed
/// pass leaves neither grants nor routes behind.
pub fn bind(
    router: Router,
    route_root: &Path,
    table: &HandlerTable,
    ctx: &BindContext,
) -> Result<(Router, Vec<BoundRoute>), BindError> {
    if let Some((path, method)) = table.duplicates().first() {
        return Err(BindError::DuplicateHandler {
            path: path.clone(),
            method: *method,
        });
    }

    let descriptors = discover(route_root)?;
    let resolved = resolve_all(descriptors, table, ctx)?;

    let bound_keys: HashSet<(&str, RouteMethod)> = resolved
        .iter()
        .map(|r| (r.descriptor.path.as_str(), r.descriptor.method))
        .collect();
    for (path, method) in table.keys() {
        if !bound_keys.contains(&(path, method)) {
            tracing::warn!(%method, path, root = %route_root.display(), "handler has no route in the tree");
        }
    }

    let mut by_path: BTreeMap<String, MethodRouter> = BTreeMap::new();
    let mut bound = Vec::with_capacity(resolved.len());
    for route in resolved {
        let path = route.descriptor.path.clone();
        let method = route.descriptor.method;
        let summary = BoundRoute {
            path: path.clone(),
            method,
            access: route.declaration.is_some(),
            rules: route.rules.is_some(),
        };

        let chain = build_chain(route, ctx);
        let merged = match by_path.remove(&path) {
            Some(existing) => existing.merge(chain),
            None => chain,
        };
        by_path.insert(path, merged);

        tracing::info!("{summary}");
        bound.push(summary);
    }

    let router = by_path
        .into_iter()
        .fold(router, |router, (path, chain)| router.route(&path, chain));
    Ok((router, bound))
}

fn resolve_all(
    descriptors: Vec<RouteDescriptor>,
    table: &HandlerTable,
    ctx: &BindContext,
) -> Result<Vec<ResolvedRoute>, BindError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        let path = descriptor.path.clone();
        let method = descriptor.method;

        if !seen.insert((path.clone(), method)) {
            return Err(BindError::DuplicateRoute { path, method });
        }
        if let Some(segment) = path
            .split('/')
            .find(|s| s.starts_with(':') || s.starts_with('*'))
        {
            return Err(BindError::InvalidPath {
                segment: segment.to_string(),
                path,
            });
        }

        let factory = table
            .factory(&path, method)
            .ok_or_else(|| BindError::MissingHandler {
                path: path.clone(),
                method,
            })?;
        let params = HandlerParams {
            route: path.clone(),
            method,
            model: Arc::clone(&ctx.model),
            storage: Arc::clone(&ctx.storage),
        };
        let handler = factory(&params).map_err(|source| BindError::Handler {
            path: path.clone(),
            method,
            source,
        })?;

        let declaration = read_artifact(&descriptor.artifact, AccessDeclaration::FILE_NAME)?
            .map(|(file, raw)| {
                AccessDeclaration::from_yaml(&raw)
                    .map_err(|source| BindError::Access { path: file, source })
            })
            .transpose()?;
        let rules = read_artifact(&descriptor.artifact, RuleSet::FILE_NAME)?
            .map(|(file, raw)| {
                RuleSet::from_yaml(&raw)
                    .map(Arc::new)
                    .map_err(|source| BindError::Rules { path: file, source })
            })
            .transpose()?;

        out.push(ResolvedRoute {
            descriptor,
            handler,
            declaration,
            rules,
        });
    }
    Ok(out)
}

/// Sibling artifact inside a method directory; marker files carry none.
fn read_artifact(artifact: &Path, name: &str) -> Result<Option<(PathBuf, String)>, BindError> {
    if !artifact.is_dir() {
        return Ok(None);
    }
    let file = artifact.join(name);
    if !file.is_file() {
        return Ok(None);
    }
    match std::fs::read_to_string(&file) {
        Ok(raw) => Ok(Some((file, raw))),
        Err(source) => Err(BindError::Read { path: file, source }),
    }
}

/// `[gate?, rules?, responder?, handler]`, outermost first.
fn build_chain(route: ResolvedRoute, ctx: &BindContext) -> MethodRouter {
    let method = route.descriptor.method;
    let handler = route.handler;
    let mut chain = on(method.method_filter(), move |req: Request| {
        let handler = Arc::clone(&handler);
        async move { handler.handle(req).await }
    });

    if let Some(rules) = route.rules {
        chain = chain
            .layer(from_fn(validation::respond))
            .layer(from_fn_with_state(rules, validation::collect));
    }

    if let Some(gate) =
        ctx.policy
            .bind_route(route.declaration.as_ref(), &route.descriptor.path, method.as_str())
    {
        let state = GateState {
            gate,
            on_forbidden: Arc::clone(&ctx.on_forbidden),
        };
        chain = chain.layer(from_fn_with_state(state, gate::enforce));
    }

    chain
}
