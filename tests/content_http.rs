use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header::CONTENT_LENGTH};
use axum::response::Response;
use bytes::Bytes;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use teca::application::fallback::{
    ControllerLookup, ControllerResolution, LookupError, RegisteredRoute, RouteFallbackResolver,
};
use teca::infra::db::SqlContentStore;
use teca::infra::file_store::FileContentStore;
use teca::infra::http::{HttpState, StaticRouteTable, build_router};
use teca::infra::mirror::LocalCacheMirror;

/// Lookup double that records how often the router actually probes it.
struct CountingLookup {
    resolved: Vec<&'static str>,
    probes: AtomicUsize,
}

impl CountingLookup {
    fn new(resolved: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            resolved,
            probes: AtomicUsize::new(0),
        })
    }

    fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControllerLookup for CountingLookup {
    async fn resolve_controller(&self, name: &str) -> Result<ControllerResolution, LookupError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.resolved.contains(&name) {
            Ok(ControllerResolution::Resolved)
        } else {
            Ok(ControllerResolution::Absent)
        }
    }
}

fn fallback_with(lookup: Arc<CountingLookup>) -> Arc<RouteFallbackResolver> {
    let table = StaticRouteTable::new(vec![RegisteredRoute {
        pattern: "content/{*path}".to_string(),
        default_controller: "content".to_string(),
    }]);
    Arc::new(RouteFallbackResolver::new(lookup, Arc::new(table), "content"))
}

async fn sql_state(lookup: Arc<CountingLookup>) -> HttpState {
    let pool = SqlContentStore::connect("sqlite::memory:", 1)
        .await
        .expect("pool should connect");
    let store = SqlContentStore::new(pool, "cms_content", "localhost").expect("store should build");
    store.ensure_schema().await.expect("schema should apply");
    let store = Arc::new(store);

    HttpState {
        store: store.clone(),
        history: Some(store.clone()),
        db: Some(store),
        fallback: fallback_with(lookup),
        content_route: "content".to_string(),
        default_host: "localhost".to_string(),
    }
}

fn file_state(root: &TempDir, lookup: Arc<CountingLookup>) -> HttpState {
    let store = FileContentStore::new(root.path(), "localhost").expect("store should build");
    HttpState {
        store: Arc::new(store),
        history: None,
        db: None,
        fallback: fallback_with(lookup),
        content_route: "content".to_string(),
        default_host: "localhost".to_string(),
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

fn put(uri: &str, body: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method(Method::PUT)
        .uri(uri)
        .body(Body::from(body))
        .expect("request should build")
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

async fn body_bytes(response: Response) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

#[tokio::test]
async fn put_returns_a_receipt_with_the_minted_version() {
    let app = build_router(sql_state(CountingLookup::new(vec![])).await);

    let response = send(&app, put("/content/pages/about.txt", b"hello")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let receipt = body_json(response).await;
    assert_eq!(receipt["path"], "/pages/about.txt");
    assert_eq!(receipt["host"], "localhost");
    assert_eq!(receipt["data_length"], 5);
    assert!(receipt["id"].is_string());
    assert!(receipt["modify_date"].is_string());
}

#[tokio::test]
async fn stored_content_round_trips_through_the_content_route() {
    let app = build_router(sql_state(CountingLookup::new(vec![])).await);
    send(&app, put("/content/pages/about.txt", b"hello")).await;

    let response = send(&app, get("/content/pages/about.txt")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").map(|v| v.as_bytes()),
        Some(b"text/plain".as_slice())
    );
    assert_eq!(body_bytes(response).await.as_ref(), b"hello");
}

#[tokio::test]
async fn missing_content_is_not_found() {
    let app = build_router(sql_state(CountingLookup::new(vec![])).await);

    let response = send(&app, get("/content/absent.txt")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(response).await.as_ref(), b"Content not found");
}

#[tokio::test]
async fn folder_requests_return_json_listings() {
    let app = build_router(sql_state(CountingLookup::new(vec![])).await);
    send(&app, put("/content/pages/about.txt", b"about")).await;
    send(&app, put("/content/pages/blog/first.txt", b"one")).await;

    let response = send(&app, get("/content/pages/")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let listing = body_json(response).await;
    assert_eq!(listing["path"], "/pages/");
    let items = listing["items"].as_array().expect("items array");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["path"], "/pages/blog/");
    assert_eq!(items[0]["folder"], true);
    assert_eq!(items[1]["path"], "/pages/about.txt");
    assert_eq!(items[1]["folder"], false);
    assert_eq!(items[1]["length"], 5);
}

#[tokio::test]
async fn the_content_root_lists_top_level_entries() {
    let app = build_router(sql_state(CountingLookup::new(vec![])).await);
    send(&app, put("/content/pages/about.txt", b"about")).await;
    send(&app, put("/content/index.html", b"<h1>home</h1>")).await;

    let response = send(&app, get("/content/")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let listing = body_json(response).await;
    assert_eq!(listing["path"], "/");
    let paths: Vec<&str> = listing["items"]
        .as_array()
        .expect("items array")
        .iter()
        .map(|item| item["path"].as_str().expect("path"))
        .collect();
    assert_eq!(paths, vec!["/pages/", "/index.html"]);
}

#[tokio::test]
async fn delete_removes_content_and_stays_idempotent() {
    let app = build_router(sql_state(CountingLookup::new(vec![])).await);
    send(&app, put("/content/pages/about.txt", b"about")).await;

    let response = send(&app, delete("/content/pages/about.txt")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app, get("/content/pages/about.txt")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, delete("/content/pages/about.txt")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn unmatched_routes_serve_stored_pages() {
    let app = build_router(sql_state(CountingLookup::new(vec![])).await);
    send(&app, put("/content/site/index.html", b"<h1>home</h1>")).await;

    let response = send(&app, get("/site/index.html")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").map(|v| v.as_bytes()),
        Some(b"text/html".as_slice())
    );
    assert_eq!(body_bytes(response).await.as_ref(), b"<h1>home</h1>");
}

#[tokio::test]
async fn resolvable_controllers_pass_through_to_not_found() {
    let app = build_router(sql_state(CountingLookup::new(vec!["api"])).await);
    // Content exists at the address, but the name resolves as a real
    // controller, so the fallback must not rewrite toward it.
    send(&app, put("/content/api/data.txt", b"secret")).await;

    let response = send(&app, get("/api/data.txt")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(response).await.as_ref(), b"Resource not found");
}

#[tokio::test]
async fn controller_probes_are_memoized_across_requests() {
    let lookup = CountingLookup::new(vec![]);
    let app = build_router(sql_state(Arc::clone(&lookup)).await);

    send(&app, get("/site/a")).await;
    send(&app, get("/site/b")).await;
    send(&app, get("/SITE/c")).await;
    assert_eq!(lookup.probe_count(), 1);

    send(&app, get("/other/a")).await;
    assert_eq!(lookup.probe_count(), 2);
}

#[tokio::test]
async fn folder_paths_are_never_served_as_pages() {
    let app = build_router(sql_state(CountingLookup::new(vec![])).await);
    send(&app, put("/content/site/page.txt", b"x")).await;

    let response = send(&app, get("/site/")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn history_is_listed_and_fetched_by_id() {
    let app = build_router(sql_state(CountingLookup::new(vec![])).await);
    send(&app, put("/content/notes/today.txt", b"v-one")).await;

    let response = send(&app, get("/content/notes/today.txt?history")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let entries = body_json(response).await;
    let entries = entries.as_array().expect("entries array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["path"], "/notes/today.txt");
    let id = entries[0]["id"].as_str().expect("version id").to_string();

    let response = send(&app, get(&format!("/content/notes/today.txt?history={id}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.as_ref(), b"v-one");

    let response = send(&app, get("/content/notes/today.txt?history=not-a-uuid")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn history_is_unavailable_on_the_file_backend() {
    let dir = TempDir::new().expect("temp dir");
    let app = build_router(file_state(&dir, CountingLookup::new(vec![])));
    send(&app, put("/content/notes/today.txt", b"v-one")).await;

    let response = send(&app, get("/content/notes/today.txt?history")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(response).await.as_ref(), b"History not available");
}

#[tokio::test]
async fn the_file_backend_serves_the_same_surface() {
    let dir = TempDir::new().expect("temp dir");
    let app = build_router(file_state(&dir, CountingLookup::new(vec![])));

    send(&app, put("/content/pages/about.txt", b"from disk")).await;
    let response = send(&app, get("/content/pages/about.txt")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.as_ref(), b"from disk");

    let response = send(&app, get("/pages/about.txt")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.as_ref(), b"from disk");
}

#[tokio::test]
async fn health_answers_no_content() {
    let app = build_router(sql_state(CountingLookup::new(vec![])).await);
    let response = send(&app, get("/_health")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn host_headers_partition_content() {
    let app = build_router(sql_state(CountingLookup::new(vec![])).await);

    let request = Request::builder()
        .method(Method::PUT)
        .uri("/content/shared.txt")
        .header("host", "alpha.example:8080")
        .body(Body::from(b"alpha".as_slice()))
        .expect("request should build");
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .method(Method::GET)
        .uri("/content/shared.txt")
        .header("host", "beta.example")
        .body(Body::empty())
        .expect("request should build");
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Same host, different case and port: the tree matches.
    let request = Request::builder()
        .method(Method::GET)
        .uri("/content/shared.txt")
        .header("host", "ALPHA.example")
        .body(Body::empty())
        .expect("request should build");
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.as_ref(), b"alpha");
}

#[tokio::test]
async fn mirrored_payloads_stream_with_a_length_header() {
    let lookup = CountingLookup::new(vec![]);
    let dir = TempDir::new().expect("temp dir");
    let mirror = LocalCacheMirror::new(dir.path(), "localhost").expect("mirror");

    let pool = SqlContentStore::connect("sqlite::memory:", 1)
        .await
        .expect("pool should connect");
    let store = SqlContentStore::new(pool, "cms_content", "localhost")
        .expect("store should build")
        .with_mirror(mirror);
    store.ensure_schema().await.expect("schema should apply");
    let store = Arc::new(store);
    let state = HttpState {
        store: store.clone(),
        history: Some(store.clone()),
        db: Some(store),
        fallback: fallback_with(lookup),
        content_route: "content".to_string(),
        default_host: "localhost".to_string(),
    };
    let app = build_router(state);

    send(&app, put("/content/media/clip.bin", b"streamed!")).await;
    let response = send(&app, get("/content/media/clip.bin")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_LENGTH).map(|v| v.as_bytes()),
        Some(b"9".as_slice())
    );
    assert_eq!(body_bytes(response).await.as_ref(), b"streamed!");

    // The mirrored artifact landed under the cache root.
    assert!(
        dir.path().join("localhost").join("media").join("clip.bin").is_file(),
        "mirror file should exist"
    );
}
