use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

use super::identity::Caller;
use super::policy::AccessPolicy;

/// What the host learns about a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub resource: String,
    pub operation: String,
    pub caller: Caller,
}

/// Host callback for a forbidden decision. The returned response ends the request.
pub type OnForbidden = Arc<dyn Fn(&Denial) -> Response + Send + Sync>;

/// `401 {"error":"forbidden"}`.
pub fn default_on_forbidden() -> OnForbidden {
    Arc::new(|denial: &Denial| {
        tracing::error!(
            resource = %denial.resource,
            operation = %denial.operation,
            caller = ?denial.caller,
            "access denied"
        );
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "forbidden" })),
        )
            .into_response()
    })
}

/// Per-route authorization check.
#[derive(Clone)]
pub struct AccessGate {
    policy: Arc<AccessPolicy>,
    resource: String,
    operation: String,
    open_to_authenticated: bool,
}

impl AccessGate {
    pub(crate) fn new(
        policy: Arc<AccessPolicy>,
        resource: &str,
        operation: &str,
        open_to_authenticated: bool,
    ) -> Self {
        Self {
            policy,
            resource: resource.to_string(),
            operation: operation.to_string(),
            open_to_authenticated,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn check(&self, caller: &Caller) -> bool {
        // Declared without groups: any logged-in identity passes, whatever its roles.
        if self.open_to_authenticated && caller.is_authenticated() {
            return true;
        }
        self.policy
            .is_allowed(&caller.roles(), &self.resource, &self.operation)
    }
}

#[derive(Clone)]
pub(crate) struct GateState {
    pub(crate) gate: AccessGate,
    pub(crate) on_forbidden: OnForbidden,
}

/// Middleware body: callers missing from extensions count as anonymous.
pub(crate) async fn enforce(State(state): State<GateState>, req: Request, next: Next) -> Response {
    let caller = req.extensions().get::<Caller>().cloned().unwrap_or_default();
    if state.gate.check(&caller) {
        return next.run(req).await;
    }
    (state.on_forbidden)(&Denial {
        resource: state.gate.resource.clone(),
        operation: state.gate.operation.clone(),
        caller,
    })
}
