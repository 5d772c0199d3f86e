//! Consul-compatible HTTP API over a [`LocalDirectory`]
//!
//! Endpoints:
//! - `PUT /v1/agent/service/register`
//! - `PUT /v1/agent/service/deregister/:id`
//! - `GET /v1/health/service/:name?passing&tag=&index=&wait=`
//! - `GET /v1/catalog/services`
//! - `GET /v1/status/leader`

use crate::common::{parse_duration, tracing_middleware::request_tracing_middleware};
use crate::directory::local::LocalDirectory;
use crate::directory::types::{QueryCursor, ServiceDescriptor};
use crate::directory::wire::{AgentServiceRegistration, HealthCheck, ServiceEntry, INDEX_HEADER};
use crate::directory::Directory;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Wait applied when a blocking query names no `wait`
const DEFAULT_WAIT: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct DirectoryState {
    pub directory: Arc<LocalDirectory>,
    pub advertise: String,
}

#[derive(Debug, Deserialize)]
struct HealthQuery {
    tag: Option<String>,
    index: Option<u64>,
    wait: Option<String>,
    /// Present as a bare flag; anything but "false" means healthy-only
    passing: Option<String>,
}

pub fn create_router(state: DirectoryState) -> Router {
    Router::new()
        .route("/v1/agent/service/register", put(register_service))
        .route("/v1/agent/service/deregister/:id", put(deregister_service))
        .route("/v1/health/service/:name", get(health_service))
        .route("/v1/catalog/services", get(catalog_services))
        .route("/v1/status/leader", get(status_leader))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

async fn register_service(
    State(state): State<DirectoryState>,
    Json(registration): Json<AgentServiceRegistration>,
) -> impl IntoResponse {
    let descriptor = match ServiceDescriptor::try_from(registration) {
        Ok(d) => d,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    match state.directory.register(&descriptor).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn deregister_service(
    State(state): State<DirectoryState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.directory.deregister(&id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn health_service(
    State(state): State<DirectoryState>,
    Path(name): Path<String>,
    Query(query): Query<HealthQuery>,
) -> impl IntoResponse {
    let wait = match query.wait.as_deref().map(parse_duration).transpose() {
        Ok(w) => w.unwrap_or(DEFAULT_WAIT),
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let cursor = query.index.map(QueryCursor::from_index);
    let tag = query.tag.as_deref().filter(|t| !t.is_empty());
    let passing_only = query.passing.as_deref() != Some("false");

    let (entries, cursor) = if passing_only {
        match state.directory.discover(&name, tag, cursor, wait).await {
            Ok(found) => (
                found
                    .instances
                    .iter()
                    .map(ServiceEntry::from)
                    .collect::<Vec<_>>(),
                found.cursor,
            ),
            Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        }
    } else {
        // Unfiltered view: report every instance with its real status
        let cursor = match state.directory.discover(&name, tag, cursor, wait).await {
            Ok(found) => found.cursor,
            Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        };
        let entries = state
            .directory
            .health_of(&name)
            .into_iter()
            .filter(|h| tag.map_or(true, |t| h.instance.tags.iter().any(|x| x == t)))
            .map(|h| {
                let mut entry = ServiceEntry::from(&h.instance);
                entry.checks = vec![HealthCheck {
                    service_id: h.instance.id.clone(),
                    status: h.status.as_str().to_string(),
                }];
                entry
            })
            .collect();
        (entries, cursor)
    };

    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&cursor.index().to_string()) {
        headers.insert(INDEX_HEADER, v);
    }
    (StatusCode::OK, headers, Json(entries)).into_response()
}

async fn catalog_services(State(state): State<DirectoryState>) -> impl IntoResponse {
    let services: serde_json::Map<String, serde_json::Value> = state
        .directory
        .services()
        .into_iter()
        .map(|(name, count)| (name, json!(count)))
        .collect();
    Json(services)
}

async fn status_leader(State(state): State<DirectoryState>) -> impl IntoResponse {
    Json(state.advertise.clone())
}
