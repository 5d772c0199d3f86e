//! HTTP surface of the gateway
//!
//! Bodies are form-encoded, answers are JSON. The resource routes
//! (`/records`, `/records/:id`) sit beside the older verb-style routes
//! (`/register`, `/query`, `/alterProfession`, `/delete`, `/queryList`),
//! which map onto the same dispatcher calls.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, Result, METRICS};
use crate::gateway::dispatcher::Dispatcher;
use crate::gateway::forms::{CategoryForm, CreateForm, IdForm};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::limit::RequestBodyLimitLayer;

#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    pub max_body_bytes: usize,
}

/// Error rendered as `{"error": kind, "message": ..., "fields": [...]}`
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.to_http_status();
        let mut body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        if let Error::Validation(violations) = &self.0 {
            body["fields"] = json!(violations);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Run a handler body, recording latency and outcome under `route`.
async fn measured<T, Fut>(route: &str, fut: Fut) -> ApiResult<T>
where
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let result = fut.await;
    METRICS.record_request(route, start.elapsed(), result.is_ok());
    result.map_err(|e| {
        METRICS.record_error(e.kind());
        ApiError(e)
    })
}

pub fn create_router(state: GatewayState) -> Router {
    let max_body = state.max_body_bytes;
    Router::new()
        .route("/records", post(create_record).get(list_records))
        .route(
            "/records/:id",
            get(fetch_record)
                .patch(update_record)
                .delete(delete_record),
        )
        .route("/register", post(legacy_register))
        .route("/query", post(legacy_query))
        .route("/alterProfession", post(legacy_alter))
        .route("/delete", post(legacy_delete))
        .route("/queryList", post(list_records).get(list_records))
        .route("/check", get(check))
        .route("/check/backend", get(check_backend))
        .route("/metrics", get(metrics))
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

async fn create_record(
    State(state): State<GatewayState>,
    Form(form): Form<CreateForm>,
) -> ApiResult<impl IntoResponse> {
    let id = measured("create", async {
        let fields = form.into_record(state.dispatcher.rules())?;
        state.dispatcher.register(fields).await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn list_records(State(state): State<GatewayState>) -> ApiResult<impl IntoResponse> {
    let records = measured("list", state.dispatcher.list_all()).await?;
    Ok(Json(records))
}

async fn fetch_record(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let record = measured("fetch", state.dispatcher.fetch(&id)).await?;
    Ok(Json(record))
}

async fn update_record(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Form(form): Form<CategoryForm>,
) -> ApiResult<impl IntoResponse> {
    let success = measured("update", async {
        let (id, category) = form.into_update(Some(id), state.dispatcher.rules())?;
        state.dispatcher.set_category(&id, &category).await
    })
    .await?;
    Ok(Json(json!({ "success": success })))
}

async fn delete_record(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let success = measured("delete", state.dispatcher.remove(&id)).await?;
    Ok(Json(json!({ "success": success })))
}

async fn legacy_register(
    State(state): State<GatewayState>,
    Form(form): Form<CreateForm>,
) -> ApiResult<impl IntoResponse> {
    create_record(State(state), Form(form)).await
}

async fn legacy_query(
    State(state): State<GatewayState>,
    Form(form): Form<IdForm>,
) -> ApiResult<impl IntoResponse> {
    let record = measured("fetch", async {
        let id = form.into_id()?;
        state.dispatcher.fetch(&id).await
    })
    .await?;
    Ok(Json(record))
}

async fn legacy_alter(
    State(state): State<GatewayState>,
    Form(form): Form<CategoryForm>,
) -> ApiResult<impl IntoResponse> {
    let success = measured("update", async {
        let (id, category) = form.into_update(None, state.dispatcher.rules())?;
        state.dispatcher.set_category(&id, &category).await
    })
    .await?;
    Ok(Json(json!({ "success": success })))
}

async fn legacy_delete(
    State(state): State<GatewayState>,
    Form(form): Form<IdForm>,
) -> ApiResult<impl IntoResponse> {
    let success = measured("delete", async {
        let id = form.into_id()?;
        state.dispatcher.remove(&id).await
    })
    .await?;
    Ok(Json(json!({ "success": success })))
}

/// Gateway liveness; answers whatever the backend's state
async fn check() -> impl IntoResponse {
    Json(json!({ "status": "passing" }))
}

async fn check_backend(State(state): State<GatewayState>) -> ApiResult<impl IntoResponse> {
    let serving = measured("check_backend", state.dispatcher.backend_serving()).await?;
    let backend = state.dispatcher.cached_instance().map(|i| i.id);
    Ok(Json(json!({ "serving": serving, "backend": backend })))
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.to_prometheus(),
    )
}
