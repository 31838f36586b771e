use appkit::access::{Caller, IdentityResolver};
use appkit::routing::{HandlerTable, RouteMethod};
use appkit::services::ServiceCatalog;
use appkit::{AppError, Application, Step};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_service::{HttpService, HttpServiceFactory};
use news_board::{register_handlers, NewsModel};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tower::ServiceExt;

/// `x-user: <id>` and optional `x-groups: a,b` mark an authenticated caller.
struct HeaderIdentity;

impl IdentityResolver for HeaderIdentity {
    fn resolve(&self, parts: &http::request::Parts) -> Caller {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());
        match header("x-user") {
            Some(id) => Caller::user(
                id,
                header("x-groups")
                    .map(|g| g.split(',').map(str::to_string).collect::<Vec<_>>())
                    .unwrap_or_default(),
            ),
            None => Caller::Anonymous,
        }
    }
}

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/app")
}

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}

/// Fixture copied into a temp dir so log files never land in the source tree.
fn app_root() -> TempDir {
    let tmp = tempfile::tempdir().unwrap();
    copy_dir(&fixture(), tmp.path());
    tmp
}

fn build(root: &Path, model: Arc<NewsModel>) -> Application {
    let mut handlers = HandlerTable::new();
    register_handlers(&mut handlers);
    let mut catalog = ServiceCatalog::new();
    HttpServiceFactory::new(handlers)
        .with_identity(Arc::new(HeaderIdentity))
        .register(&mut catalog);
    Application::builder(root)
        .model(model)
        .catalog(catalog)
        .build()
}

fn http(app: &Application) -> Arc<dyn appkit::Service> {
    app.service("http").expect("http service is loaded")
}

fn router(app: &Application) -> Router {
    let service = http(app);
    let http = service.as_any().downcast_ref::<HttpService>().unwrap();
    http.router().unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, String) {
    let res = router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn home_and_news_queries() {
    let tmp = app_root();
    let mut app = build(tmp.path(), Arc::new(NewsModel::seeded()));
    app.open().await.unwrap();
    let router = router(&app);

    assert_eq!(send(&router, get("/")).await, (StatusCode::OK, "Home page".to_string()));

    let (status, body) = send(&router, get("/news")).await;
    assert_eq!(status, StatusCode::OK);
    let news: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(news.as_object().unwrap().len(), 3);
    assert_eq!(news["a"]["title"], "aaa");
    assert_eq!(news["c"]["title"], "ccc");

    let (status, body) = send(&router, get("/news?id=b")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "title": "bbb" }));

    let (status, body) = send(&router, get("/news?id=cccccc")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "null");

    let (status, _) = send(&router, get("/news?id=")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.close().await.unwrap();
}

#[tokio::test]
async fn empty_group_declaration_admits_any_authenticated_caller() {
    let tmp = app_root();
    let model = Arc::new(NewsModel::seeded());
    let mut app = build(tmp.path(), model.clone());
    app.open().await.unwrap();
    let router = router(&app);

    let (status, body) = send(&router, json_request("DELETE", "/news/delete", json!({ "id": "a" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, r#"{"error":"forbidden"}"#);
    assert!(model.store().get("a").is_some());

    let mut req = json_request("DELETE", "/news/delete", json!({ "id": "a" }));
    req.headers_mut().insert("x-user", "bob".parse().unwrap());
    req.headers_mut().insert("x-groups", "readers".parse().unwrap());
    let (status, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "title": "aaa" }));
    assert!(model.store().get("a").is_none());

    // Undeclared routes stay open to anonymous callers.
    assert_eq!(send(&router, get("/news")).await.0, StatusCode::OK);

    app.close().await.unwrap();
}

#[tokio::test]
async fn invalid_add_never_reaches_the_model() {
    let tmp = app_root();
    let model = Arc::new(NewsModel::seeded());
    let mut app = build(tmp.path(), model.clone());
    app.open().await.unwrap();
    let router = router(&app);

    let (status, body) = send(&router, json_request("POST", "/news/add", json!({ "id": "d" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        json!({ "errors": [{ "title": "Invalid value" }] })
    );
    assert!(model.store().get("d").is_none());

    let (status, body) = send(
        &router,
        json_request("POST", "/news/add", json!({ "id": "d", "title": "ddd" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "title": "ddd" }));
    assert_eq!(model.store().get("d").unwrap().title, "ddd");

    app.close().await.unwrap();
}

#[tokio::test]
async fn unknown_urls_and_static_files() {
    let tmp = app_root();
    let mut app = build(tmp.path(), Arc::new(NewsModel::seeded()));
    app.open().await.unwrap();
    let router = router(&app);

    let (status, body) = send(&router, get("/robots.txt")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("User-agent"));

    let (status, body) = send(&router, get("/missing/page")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Can't find requested url:/missing/page");

    app.close().await.unwrap();
}

#[tokio::test]
async fn open_close_open_reproduces_routes_and_grants() {
    let tmp = app_root();
    let mut app = build(tmp.path(), Arc::new(NewsModel::seeded()));

    app.open().await.unwrap();
    let routes: BTreeSet<_> = http(&app)
        .routes()
        .into_iter()
        .map(|r| (r.path, r.method, r.access, r.rules))
        .collect();
    let grants = app.access_policy("http").unwrap().grants();
    let err = app.open().await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyOpen));
    app.close().await.unwrap();
    app.close().await.unwrap();

    app.open().await.unwrap();
    let again: BTreeSet<_> = http(&app)
        .routes()
        .into_iter()
        .map(|r| (r.path, r.method, r.access, r.rules))
        .collect();
    assert_eq!(routes, again);
    assert_eq!(grants, app.access_policy("http").unwrap().grants());
    app.close().await.unwrap();

    let expected: BTreeSet<_> = [
        ("/".to_string(), RouteMethod::Get, false, false),
        ("/news".to_string(), RouteMethod::Get, false, true),
        ("/news/add".to_string(), RouteMethod::Post, false, true),
        ("/news/delete".to_string(), RouteMethod::Delete, true, true),
    ]
    .into_iter()
    .collect();
    assert_eq!(routes, expected);
    assert!(app.handles().all_absent());
}

#[tokio::test]
async fn duplicate_route_artifacts_fail_open() {
    let tmp = app_root();
    fs::write(tmp.path().join("http/news/GET.route"), "").unwrap();
    let mut app = build(tmp.path(), Arc::new(NewsModel::seeded()));

    let err = app.open().await.unwrap_err();

    assert_eq!(err.step(), Some(Step::LoadServices));
    assert!(format!("{err}").contains("declared more than once"), "{err}");
    assert!(!app.is_open());
    assert!(app.handles().all_absent());
}

#[tokio::test]
async fn serves_real_sockets_and_logs_access_lines() {
    let tmp = app_root();
    let mut app = build(tmp.path(), Arc::new(NewsModel::seeded()));
    app.open().await.unwrap();

    let addr = {
        let service = http(&app);
        let http = service.as_any().downcast_ref::<HttpService>().unwrap();
        http.local_addr().unwrap()
    };
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /news?id=a HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with(r#"{"title":"aaa"}"#), "{response}");

    app.close().await.unwrap();

    let log = fs::read_to_string(tmp.path().join("logs/server.log")).unwrap();
    assert!(log.contains("GET /news?id=a 200"), "{log}");
    assert!(log.lines().any(|l| l.contains(" access ")), "{log}");
}
