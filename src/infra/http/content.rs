use std::sync::Arc;

use async_stream::stream;
use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State},
    http::{
        HeaderMap, HeaderValue, Request, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE, HOST},
    },
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use bytes::Bytes;
use serde::Deserialize;
use tokio::{fs::File, io::AsyncReadExt};
use uuid::Uuid;

use teca_api_types::{ContentItem, ContentListing, HistoryEntry, SaveReceipt};

use crate::{
    application::{
        error::{AppError, HttpError},
        fallback::{FallbackDecision, RouteFallbackResolver, RouteValues},
        store::{ContentHistory, ContentStore},
    },
    domain::content::ContentRecord,
    infra::db::SqlContentStore,
};

use super::{
    db_health_response,
    middleware::{log_responses, set_request_context},
    store_error_to_http,
};

const STREAM_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<dyn ContentStore>,
    pub history: Option<Arc<dyn ContentHistory>>,
    pub db: Option<Arc<SqlContentStore>>,
    pub fallback: Arc<RouteFallbackResolver>,
    pub content_route: String,
    pub default_host: String,
}

pub fn build_router(state: HttpState) -> Router {
    let content_route = state.content_route.trim_matches('/').to_string();

    let content_routes = Router::new().route("/", get(list_root)).route(
        "/{*path}",
        get(get_content).put(put_content).delete(delete_content),
    );

    Router::new()
        .nest(&format!("/{content_route}"), content_routes)
        // Nesting maps the inner "/" to the bare prefix only; the trailing-slash
        // spelling of the nest root must be registered explicitly.
        .route(&format!("/{content_route}/"), get(list_root))
        .route("/_health", get(health))
        .fallback(serve_page)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HistoryQuery {
    history: Option<String>,
}

async fn get_content(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Response {
    const SOURCE: &str = "infra::http::content::get_content";

    let host = request_host(&headers, &state.default_host);
    let record = ContentRecord::new(host, leading_slash(&path));

    if let Some(history) = query.history.as_deref() {
        return match history {
            "" => list_history(&state, &record).await,
            id => fetch_history_payload(&state, record, id).await,
        };
    }

    if record.is_folder() {
        return folder_listing(&state, &record).await;
    }

    serve_leaf(&state, record, SOURCE).await
}

async fn list_root(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let host = request_host(&headers, &state.default_host);
    let record = ContentRecord::new(host, "/");
    folder_listing(&state, &record).await
}

async fn put_content(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    const SOURCE: &str = "infra::http::content::put_content";

    let host = request_host(&headers, &state.default_host);
    let mut record = ContentRecord::with_data(host, leading_slash(&path), body);

    match state.store.save(&mut record).await {
        Ok(()) => Json(save_receipt(&record)).into_response(),
        Err(err) => store_error_to_http(SOURCE, err).into_response(),
    }
}

async fn delete_content(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    const SOURCE: &str = "infra::http::content::delete_content";

    let host = request_host(&headers, &state.default_host);
    let record = ContentRecord::new(host, leading_slash(&path));

    match state.store.remove(&record).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_error_to_http(SOURCE, err).into_response(),
    }
}

async fn health(State(state): State<HttpState>) -> Response {
    match state.db.as_ref() {
        Some(db) => db_health_response(db.health_check().await),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Router fallback. The first path segment is treated as a controller-name
/// candidate; when the fallback engine rewrites it toward the content
/// controller, the full request path is served as a stored page.
async fn serve_page(State(state): State<HttpState>, request: Request<Body>) -> Response {
    const SOURCE: &str = "infra::http::content::serve_page";

    let uri = request.uri().clone();
    let raw_path = uri.path();
    let candidate = raw_path
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("")
        .to_string();

    let values = RouteValues {
        controller: candidate,
        action: String::new(),
    };
    match state.fallback.evaluate(&values).await {
        FallbackDecision::PassThrough => AppError::NotFound.into_response(),
        FallbackDecision::Rewrite(_) => {
            let host = request_host(request.headers(), &state.default_host);
            let record = ContentRecord::new(host, raw_path.to_string());
            if record.is_folder() {
                return AppError::NotFound.into_response();
            }
            serve_leaf(&state, record, SOURCE).await
        }
    }
}

async fn folder_listing(state: &HttpState, record: &ContentRecord) -> Response {
    const SOURCE: &str = "infra::http::content::folder_listing";

    match state.store.list(record).await {
        Ok(children) => {
            let items = children.iter().map(content_item).collect::<Vec<_>>();
            Json(ContentListing {
                path: record.path.clone(),
                items,
            })
            .into_response()
        }
        Err(err) => store_error_to_http(SOURCE, err).into_response(),
    }
}

/// Serve the bytes stored at a leaf path: stream from a local file handle
/// when the store can produce one, otherwise buffer the payload.
async fn serve_leaf(state: &HttpState, mut record: ContentRecord, source: &'static str) -> Response {
    match state.store.exists(&record).await {
        Ok(true) => {}
        Ok(false) => {
            return HttpError::new(
                source,
                StatusCode::NOT_FOUND,
                "Content not found",
                format!("no content at {}", record.path),
            )
            .into_response();
        }
        Err(err) => return store_error_to_http(source, err).into_response(),
    }

    if let Err(err) = state.store.retrieve(&mut record, false).await {
        return store_error_to_http(source, err).into_response();
    }

    match state.store.open(&record).await {
        Ok(Some(file)) => stream_file_response(&record.path, file, record.data_length),
        Ok(None) => {
            if let Err(err) = state.store.retrieve(&mut record, true).await {
                return store_error_to_http(source, err).into_response();
            }
            match record.data.clone() {
                Some(bytes) => build_content_response(&record.path, bytes),
                None => HttpError::new(
                    source,
                    StatusCode::NOT_FOUND,
                    "Content not found",
                    format!("no payload stored at {}", record.path),
                )
                .into_response(),
            }
        }
        Err(err) => store_error_to_http(source, err).into_response(),
    }
}

async fn list_history(state: &HttpState, record: &ContentRecord) -> Response {
    const SOURCE: &str = "infra::http::content::list_history";

    let Some(history) = state.history.as_ref() else {
        return history_unavailable(SOURCE);
    };

    match history.retrieve_history(record).await {
        Ok(versions) => {
            let entries = versions.iter().map(history_entry).collect::<Vec<_>>();
            Json(entries).into_response()
        }
        Err(err) => store_error_to_http(SOURCE, err).into_response(),
    }
}

async fn fetch_history_payload(state: &HttpState, mut record: ContentRecord, id: &str) -> Response {
    const SOURCE: &str = "infra::http::content::fetch_history_payload";

    let Some(history) = state.history.as_ref() else {
        return history_unavailable(SOURCE);
    };

    let Ok(data_id) = Uuid::parse_str(id) else {
        return HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Invalid input",
            format!("history id is not a uuid: {id}"),
        )
        .into_response();
    };

    record.data_id = Some(data_id);
    if let Err(err) = history.populate_history_data(&mut record).await {
        return store_error_to_http(SOURCE, err).into_response();
    }

    match record.data.clone() {
        Some(bytes) => build_content_response(&record.path, bytes),
        None => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Content not found",
            format!("no stored version {data_id} at {}", record.path),
        )
        .into_response(),
    }
}

fn history_unavailable(source: &'static str) -> Response {
    HttpError::new(
        source,
        StatusCode::NOT_FOUND,
        "History not available",
        "the configured backend does not keep version history",
    )
    .into_response()
}

fn request_host(headers: &HeaderMap, default_host: &str) -> String {
    let name = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(host_name)
        .unwrap_or("");
    if name.is_empty() {
        default_host.to_string()
    } else {
        name.to_ascii_lowercase()
    }
}

fn host_name(raw: &str) -> &str {
    if let Some(rest) = raw.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    raw.split(':').next().unwrap_or(raw)
}

fn leading_slash(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

fn stream_file_response(path: &str, file: File, length: Option<i64>) -> Response {
    let stream = stream! {
        let mut file = file;
        let mut buf = vec![0u8; STREAM_CHUNK_BYTES];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => yield Ok::<_, std::io::Error>(Bytes::copy_from_slice(&buf[..n])),
                Err(err) => {
                    yield Err(err);
                    break;
                }
            }
        }
    };

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Some(length) = length {
        if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
            headers.insert(CONTENT_LENGTH, value);
        }
    }

    response
}

fn build_content_response(path: &str, bytes: Bytes) -> Response {
    let mut response = Response::new(Body::from(bytes.clone()));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&bytes.len().to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }

    response
}

fn content_item(record: &ContentRecord) -> ContentItem {
    ContentItem {
        path: record.path.clone(),
        folder: record.is_folder(),
        length: record.data_length,
        create_date: record.create_date,
        modify_date: record.modify_date,
        create_by: record.create_by.clone(),
        modify_by: record.modify_by.clone(),
    }
}

fn history_entry(record: &ContentRecord) -> HistoryEntry {
    HistoryEntry {
        id: record.data_id,
        host: record.host.clone(),
        path: record.path.clone(),
        data_length: record.data_length,
        create_date: record.create_date,
        create_by: record.create_by.clone(),
    }
}

fn save_receipt(record: &ContentRecord) -> SaveReceipt {
    SaveReceipt {
        id: record.data_id,
        host: record.host.clone(),
        path: record.path.clone(),
        data_length: record.data_length,
        create_date: record.create_date,
        modify_date: record.modify_date,
    }
}
