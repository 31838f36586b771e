use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::declaration::AccessDeclaration;
use super::gate::AccessGate;
use super::identity::GUESTS_ROLE;

/// `(role, resource, operation)` recorded as permitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Grant {
    pub role: String,
    pub resource: String,
    pub operation: String,
}

impl Grant {
    pub fn new(
        role: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            resource: resource.into(),
            operation: operation.into(),
        }
    }
}

/// The allow/deny capability behind [`AccessPolicy`].
pub trait RbacEngine: Send + Sync {
    /// Record a grant. Adding an existing grant changes nothing.
    fn add(&self, grant: Grant);
    fn can(&self, role: &str, resource: &str, operation: &str) -> bool;
    fn grants(&self) -> Vec<Grant>;
}

// resource -> operation -> roles
type GrantIndex = HashMap<String, HashMap<String, HashSet<String>>>;

/// Default engine: a copy-on-write grant index.
///
/// Writes only happen while routes are bound; request handling reads a snapshot without locking.
#[derive(Default)]
pub struct GrantTable {
    index: ArcSwap<GrantIndex>,
}

impl RbacEngine for GrantTable {
    fn add(&self, grant: Grant) {
        self.index.rcu(|current| {
            if current
                .get(&grant.resource)
                .and_then(|ops| ops.get(&grant.operation))
                .is_some_and(|roles| roles.contains(&grant.role))
            {
                return Arc::clone(current);
            }
            let mut next = GrantIndex::clone(current);
            next.entry(grant.resource.clone())
                .or_default()
                .entry(grant.operation.clone())
                .or_default()
                .insert(grant.role.clone());
            Arc::new(next)
        });
    }

    fn can(&self, role: &str, resource: &str, operation: &str) -> bool {
        self.index
            .load()
            .get(resource)
            .and_then(|ops| ops.get(operation))
            .is_some_and(|roles| roles.contains(role))
    }

    fn grants(&self) -> Vec<Grant> {
        let index = self.index.load();
        let mut out: Vec<Grant> = index
            .iter()
            .flat_map(|(resource, ops)| {
                ops.iter().flat_map(move |(operation, roles)| {
                    roles
                        .iter()
                        .map(move |role| Grant::new(role, resource, operation))
                })
            })
            .collect();
        out.sort();
        out
    }
}

/// Accumulates grants and answers allow/deny questions for role sets.
pub struct AccessPolicy {
    engine: Arc<dyn RbacEngine>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::with_engine(Arc::new(GrantTable::default()))
    }
}

impl AccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(engine: Arc<dyn RbacEngine>) -> Self {
        Self { engine }
    }

    pub fn grant(&self, role: &str, resource: &str, operation: &str) {
        self.engine.add(Grant::new(role, resource, operation));
    }

    /// True iff any of `roles` was granted `(resource, operation)`.
    /// Roles are checked in the given order and the first match wins.
    pub fn is_allowed<S: AsRef<str>>(&self, roles: &[S], resource: &str, operation: &str) -> bool {
        roles
            .iter()
            .any(|role| self.engine.can(role.as_ref(), resource, operation))
    }

    /// Build the gate for a route.
    ///
    /// No declaration means no gate: the route is open to everyone. Otherwise every
    /// declared group (and `guests` when `guests: true`) is granted `(resource, operation)`.
    pub fn bind_route(
        self: &Arc<Self>,
        declaration: Option<&AccessDeclaration>,
        resource: &str,
        operation: &str,
    ) -> Option<AccessGate> {
        let declaration = declaration?;

        for group in declaration.groups() {
            self.grant(group, resource, operation);
        }
        if declaration.allows_guests() {
            self.grant(GUESTS_ROLE, resource, operation);
        }

        Some(AccessGate::new(
            Arc::clone(self),
            resource,
            operation,
            declaration.open_to_authenticated(),
        ))
    }

    /// All grants, sorted.
    pub fn grants(&self) -> Vec<Grant> {
        self.engine.grants()
    }
}
