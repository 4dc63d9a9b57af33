// Read-only HTTP API: health, Prometheus/JSON metrics, and CID/edge/search
// lookups against the embedded catalogue.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::contracts::{Catalogue, CidRecord};
use crate::http_types::ErrorResponse;
use crate::metrics::{self, HttpMetrics};
use crate::observability::{log_operation, Operation, OperationContext};
use crate::types::ValidatedTag;
use crate::types::ValidatedToken;

#[derive(Clone)]
pub struct AppState {
    catalogue: Arc<dyn Catalogue>,
    http_metrics: Arc<HttpMetrics>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct CidRecordJson {
    cid: String,
    present: bool,
    present_source: &'static str,
    present_reason: Option<String>,
    first_seen_ms: i64,
    last_seen_ms: i64,
    removed_at: Option<i64>,
    size: Option<i64>,
    mime: Option<String>,
    ext_guess: Option<String>,
    kind: Option<String>,
    confidence: Option<f64>,
    source: Option<String>,
    detector_version: Option<String>,
    last_crawled_ms: Option<i64>,
    error: Option<String>,
    updated_at: Option<i64>,
    is_directory: bool,
    expanded_at: Option<i64>,
    expand_error: Option<String>,
    expand_depth: i32,
    site_entry_path: Option<String>,
    site_entry_cid: Option<String>,
    site_entry_indexed_at: Option<i64>,
    crawl_attempts: i32,
    tags: crate::contracts::Tags,
}

impl From<CidRecord> for CidRecordJson {
    fn from(record: CidRecord) -> Self {
        Self {
            cid: record.cid,
            present: record.present,
            present_source: record.present_source.as_str(),
            present_reason: record.present_reason,
            first_seen_ms: record.first_seen_ms,
            last_seen_ms: record.last_seen_ms,
            removed_at: record.removed_at,
            size: record.size,
            mime: record.mime,
            ext_guess: record.ext_guess,
            kind: record.kind,
            confidence: record.confidence,
            source: record.source,
            detector_version: record.detector_version,
            last_crawled_ms: record.last_crawled_ms,
            error: record.error,
            updated_at: record.updated_at,
            is_directory: record.is_directory,
            expanded_at: record.expanded_at,
            expand_error: record.expand_error,
            expand_depth: record.expand_depth,
            site_entry_path: record.site_entry_path,
            site_entry_cid: record.site_entry_cid,
            site_entry_indexed_at: record.site_entry_indexed_at,
            crawl_attempts: record.crawl_attempts,
            tags: record.tags,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    /// Repeatable: `?token=pdf&token=report`.
    #[serde(default)]
    token: Vec<String>,
    tag: Option<String>,
    kind: Option<String>,
    mime: Option<String>,
    present: Option<bool>,
    source: Option<String>,
    present_source: Option<String>,
    is_directory: Option<bool>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    items: Vec<crate::contracts::SearchHit>,
    limit: usize,
    offset: usize,
    total: i64,
}

#[derive(Debug, Serialize)]
struct EdgesResponse {
    cids: Vec<String>,
}

pub fn create_server(catalogue: Arc<dyn Catalogue>) -> Router {
    let state = AppState {
        catalogue,
        http_metrics: Arc::new(HttpMetrics::new()),
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_prometheus))
        .route("/metrics/state", get(metrics_state))
        .route("/cid/:cid", get(get_cid))
        .route("/search", get(search))
        .route("/children/:cid", get(get_children))
        .route("/parents/:cid", get(get_parents))
        .with_state(state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn_with_state(state, track_duration)),
        )
}

async fn track_duration(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: Next,
) -> axum::response::Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    state
        .http_metrics
        .record(&method, &path, start.elapsed().as_millis() as u64);
    response
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    match metrics::render(state.catalogue.as_ref(), &state.http_metrics).await {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal_server_error(err.to_string())),
            )
                .into_response()
        }
    }
}

async fn metrics_state(State(state): State<AppState>) -> impl IntoResponse {
    match state.catalogue.metrics().await {
        Ok(metrics) => Json(metrics).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to load metrics state");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal_server_error(err.to_string())),
            )
                .into_response()
        }
    }
}

async fn get_cid(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> Result<Json<CidRecordJson>, (StatusCode, Json<ErrorResponse>)> {
    let ctx = OperationContext::new("http_get_cid");
    let result = state.catalogue.get(&cid).await;
    log_operation(
        &ctx,
        &Operation::HttpRequest {
            method: "GET".to_string(),
            path: "/cid/:cid".to_string(),
            status: if matches!(result, Ok(Some(_))) { 200 } else { 404 },
        },
        &result.as_ref().map(|_| ()).map_err(|e| anyhow::anyhow!("{e}")),
    );

    match result {
        Ok(Some(record)) => Ok(Json(record.into())),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::not_found(format!("no such cid: {cid}"))),
        )),
        Err(err) => {
            warn!(cid = %cid, error = %err, "failed to load cid");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal_server_error(err.to_string())),
            ))
        }
    }
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, Json<ErrorResponse>)> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let offset = params.offset.unwrap_or(0);

    let tokens: Vec<ValidatedToken> = params
        .token
        .iter()
        .filter_map(|t| ValidatedToken::new(t.clone()).ok())
        .collect();

    let filters = crate::contracts::SearchFilters {
        kind: params.kind.clone(),
        mime: params.mime.clone(),
        present: params.present,
        source: params.source.clone(),
        present_source: params.present_source.clone(),
        is_directory: params.is_directory,
    };

    let (items, total) = if let Some(tag) = params.tag.as_deref() {
        let tag = ValidatedTag::new(tag).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::bad_request(e.to_string())),
            )
        })?;
        let cids = state.catalogue.tag_matches(&tag).await.map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal_server_error(e.to_string())),
            )
        })?;
        let total = cids.len() as i64;
        let items = cids
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|cid| crate::contracts::SearchHit {
                cid,
                mime: None,
                content_class: None,
                matched_tokens: Vec::new(),
                score: 0.0,
                root_cid: None,
                path: None,
                path_mime_hint: None,
            })
            .collect();
        (items, total)
    } else {
        let page = state
            .catalogue
            .search(&tokens, &filters, limit, offset)
            .await
            .map_err(|e| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::internal_server_error(e.to_string())),
                )
            })?;
        (page.items, page.total)
    };

    Ok(Json(SearchResponse {
        total,
        items,
        limit,
        offset,
    }))
}

async fn get_children(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> Result<Json<EdgesResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .catalogue
        .children(&cid)
        .await
        .map(|cids| Json(EdgesResponse { cids }))
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal_server_error(e.to_string())),
            )
        })
}

async fn get_parents(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> Result<Json<EdgesResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .catalogue
        .parents(&cid)
        .await
        .map(|cids| Json(EdgesResponse { cids }))
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal_server_error(e.to_string())),
            )
        })
}
