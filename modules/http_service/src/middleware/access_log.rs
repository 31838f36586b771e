use appkit_bootstrap::{LogKind, LogSink};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use std::time::Instant;

use super::request_id;

/// One `access` line per request: `GET /news 200 3ms rid=<id>`.
pub async fn access_log(
    State(sink): State<Arc<dyn LogSink>>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let rid = request_id::of(&req).to_string();

    let res = next.run(req).await;

    sink.log(
        LogKind::Access,
        &format!(
            "{method} {uri} {} {}ms rid={rid}",
            res.status().as_u16(),
            started.elapsed().as_millis()
        ),
    );
    res
}
