use appkit::model::model_as;
use appkit::routing::{HandlerParams, HandlerTable, RequestInputs, RouteHandler, RouteMethod};
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

use crate::model::{NewsModel, NewsStore};

/// Registers the handlers of the news route tree: `GET /`, `GET /news`, `POST /news/add`,
/// `DELETE /news/delete`.
pub fn register_handlers(table: &mut HandlerTable) {
    table
        .register("/", RouteMethod::Get, |_| Ok(Arc::new(Home) as Arc<dyn RouteHandler>))
        .register("/news", RouteMethod::Get, |p| {
            Ok(Arc::new(ListNews(store(p)?)) as Arc<dyn RouteHandler>)
        })
        .register("/news/add", RouteMethod::Post, |p| {
            Ok(Arc::new(AddNews(store(p)?)) as Arc<dyn RouteHandler>)
        })
        .register("/news/delete", RouteMethod::Delete, |p| {
            Ok(Arc::new(DeleteNews(store(p)?)) as Arc<dyn RouteHandler>)
        });
}

fn store(params: &HandlerParams) -> anyhow::Result<Arc<NewsStore>> {
    model_as::<NewsModel>(params.model.as_ref())
        .map(NewsModel::store)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "{} {} needs the news model, got '{}'",
                params.method,
                params.route,
                params.model.name()
            )
        })
}

/// Inputs recorded by the validation layer, or parsed here for routes without rules.
async fn inputs(req: Request) -> Result<RequestInputs, Response> {
    if let Some(inputs) = req.extensions().get::<RequestInputs>() {
        return Ok(inputs.clone());
    }
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST.into_response())?;
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    Ok(RequestInputs::parse(parts.uri.query(), content_type, &bytes))
}

struct Home;

#[async_trait]
impl RouteHandler for Home {
    async fn handle(&self, _req: Request) -> Response {
        "Home page".into_response()
    }
}

/// All items, or the one named by `id` (`null` when unknown).
struct ListNews(Arc<NewsStore>);

#[async_trait]
impl RouteHandler for ListNews {
    async fn handle(&self, req: Request) -> Response {
        let inputs = match inputs(req).await {
            Ok(i) => i,
            Err(res) => return res,
        };
        match inputs.get_str("id") {
            Some(id) => Json(self.0.get(id)).into_response(),
            None => Json(self.0.all()).into_response(),
        }
    }
}

struct AddNews(Arc<NewsStore>);

#[async_trait]
impl RouteHandler for AddNews {
    async fn handle(&self, req: Request) -> Response {
        let inputs = match inputs(req).await {
            Ok(i) => i,
            Err(res) => return res,
        };
        let (Some(id), Some(title)) = (inputs.get_str("id"), inputs.get_str("title")) else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        let item = self.0.put(id, title);
        tracing::debug!(id, "news item stored");
        Json(item).into_response()
    }
}

struct DeleteNews(Arc<NewsStore>);

#[async_trait]
impl RouteHandler for DeleteNews {
    async fn handle(&self, req: Request) -> Response {
        let inputs = match inputs(req).await {
            Ok(i) => i,
            Err(res) => return res,
        };
        let Some(id) = inputs.get_str("id") else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        Json(self.0.remove(id)).into_response()
    }
}
