use appkit::access::IdentityResolver;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

/// Resolves the caller once per request and stores it for the route gates.
pub async fn resolve_caller(
    State(resolver): State<Arc<dyn IdentityResolver>>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();
    let caller = resolver.resolve(&parts);
    parts.extensions.insert(caller);
    next.run(Request::from_parts(parts, body)).await
}
