//! Read-only REST query API plus a manual collector trigger.
//!
//! Everything under `/api/v1` except `/health` requires a bearer token
//! (`Authorization: Bearer <t>` or `?token=<t>`) when tokens are configured.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::StoreError;
use crate::ingest::CollectorScheduler;
use crate::models::{AnalysisResult, Impact, Severity, StoredItem, UnprocessedStats};
use crate::store::{AlertFilter, AnalysisFilter, NewsFilter, Page, Store};

#[derive(Clone)]
pub struct AppState {
    store: Store,
    scheduler: Option<Arc<CollectorScheduler>>,
    tokens: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(store: Store, scheduler: Option<Arc<CollectorScheduler>>, tokens: Vec<String>) -> Self {
        Self {
            store,
            scheduler,
            tokens: Arc::new(tokens.into_iter().filter(|t| !t.is_empty()).collect()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let public = Router::new().route("/health", get(health));

    let protected = Router::new()
        .route("/news", get(list_news))
        .route("/news/{id}", get(get_news))
        .route("/analysis", get(list_analyses))
        .route("/analysis/{id}", get(get_analysis))
        .route("/alerts", get(list_alerts))
        .route("/reports", get(list_reports))
        .route("/reports/latest", get(latest_report))
        .route("/reports/{id}", get(get_report))
        .route("/stocks/{symbol}/sentiment", get(stock_sentiment))
        .route("/scan", post(scan))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .nest("/api/v1", public.merge(protected))
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ------------------------------------------------------------
// Errors
// ------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid token".to_string(),
            ),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", m),
        };
        (status, Json(json!({ "error": { "code": code, "message": message } }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            other => {
                tracing::error!(error = %other, "store error in api");
                ApiError::Internal("storage error".to_string())
            }
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ------------------------------------------------------------
// Auth
// ------------------------------------------------------------

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn query_token(req: &Request) -> Option<&str> {
    req.uri()
        .query()?
        .split('&')
        .find_map(|kv| kv.strip_prefix("token="))
}

async fn require_token(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if state.tokens.is_empty() {
        return next.run(req).await;
    }
    let presented = bearer_token(&req).or_else(|| query_token(&req));
    match presented {
        Some(t) if state.tokens.iter().any(|k| k == t) => next.run(req).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}

// ------------------------------------------------------------
// Handlers
// ------------------------------------------------------------

#[derive(Serialize)]
struct Listing<T> {
    items: Vec<T>,
    total: u64,
    limit: u32,
    offset: u32,
}

fn listing<T>((items, total): (Vec<T>, u64), page: Page) -> Json<Listing<T>> {
    Json(Listing {
        items,
        total,
        limit: page.limit,
        offset: page.offset,
    })
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    unprocessed: Option<UnprocessedStats>,
    oldest_unprocessed_age_secs: Option<u64>,
}

async fn health(State(state): State<AppState>) -> Response {
    match state.store.unprocessed_stats().await {
        Ok(stats) => {
            let age = stats.oldest_age_secs(Utc::now());
            Json(Health {
                status: "ok",
                version: env!("CARGO_PKG_VERSION"),
                unprocessed: Some(stats),
                oldest_unprocessed_age_secs: Some(age),
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "health check: store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Health {
                    status: "degraded",
                    version: env!("CARGO_PKG_VERSION"),
                    unprocessed: None,
                    oldest_unprocessed_age_secs: None,
                }),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct NewsQuery {
    limit: Option<u32>,
    offset: Option<u32>,
    source: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
}

async fn list_news(
    State(state): State<AppState>,
    q: Result<Query<NewsQuery>, QueryRejection>,
) -> ApiResult<Listing<StoredItem>> {
    let Query(q) = q?;
    let page = Page::new(q.limit, q.offset);
    let filter = NewsFilter {
        source: q.source.filter(|s| !s.is_empty()),
        since: q.since,
        until: q.until,
    };
    Ok(listing(state.store.list_news(&filter, page).await?, page))
}

#[derive(Serialize)]
struct NewsDetail {
    #[serde(flatten)]
    item: StoredItem,
    analyses: Vec<AnalysisResult>,
}

async fn get_news(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<NewsDetail> {
    let item = state
        .store
        .get_news(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("news item {id} not found")))?;
    let analyses = state.store.analyses_for_news(&id).await?;
    Ok(Json(NewsDetail { item, analyses }))
}

#[derive(Deserialize)]
struct AnalysisQuery {
    limit: Option<u32>,
    offset: Option<u32>,
    impact: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
}

fn parse_impact(s: &str) -> Result<Impact, ApiError> {
    match s.to_ascii_lowercase().as_str() {
        "high" => Ok(Impact::High),
        "medium" => Ok(Impact::Medium),
        "low" => Ok(Impact::Low),
        other => Err(ApiError::BadRequest(format!("invalid impact: {other}"))),
    }
}

async fn list_analyses(
    State(state): State<AppState>,
    q: Result<Query<AnalysisQuery>, QueryRejection>,
) -> ApiResult<Listing<AnalysisResult>> {
    let Query(q) = q?;
    let page = Page::new(q.limit, q.offset);
    let filter = AnalysisFilter {
        impact: q.impact.as_deref().map(parse_impact).transpose()?,
        since: q.since,
        until: q.until,
    };
    Ok(listing(state.store.list_analyses(&filter, page).await?, page))
}

async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<AnalysisResult> {
    state
        .store
        .get_analysis(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("analysis {id} not found")))
}

#[derive(Deserialize)]
struct AlertQuery {
    limit: Option<u32>,
    offset: Option<u32>,
    severity: Option<String>,
}

async fn list_alerts(
    State(state): State<AppState>,
    q: Result<Query<AlertQuery>, QueryRejection>,
) -> ApiResult<Listing<crate::models::Alert>> {
    let Query(q) = q?;
    let page = Page::new(q.limit, q.offset);
    let severity = match q.severity.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("") => None,
        Some("high") => Some(Severity::High),
        Some("critical") => Some(Severity::Critical),
        Some(other) => return Err(ApiError::BadRequest(format!("invalid severity: {other}"))),
    };
    let filter = AlertFilter { severity };
    Ok(listing(state.store.list_alerts(&filter, page).await?, page))
}

#[derive(Deserialize)]
struct ReportQuery {
    limit: Option<u32>,
    offset: Option<u32>,
    #[serde(rename = "type")]
    report_type: Option<String>,
}

async fn list_reports(
    State(state): State<AppState>,
    q: Result<Query<ReportQuery>, QueryRejection>,
) -> ApiResult<Listing<crate::models::Report>> {
    let Query(q) = q?;
    let page = Page::new(q.limit, q.offset);
    let kind = q.report_type.as_deref().filter(|t| !t.is_empty());
    Ok(listing(state.store.list_reports(kind, page).await?, page))
}

async fn latest_report(State(state): State<AppState>) -> ApiResult<crate::models::Report> {
    state
        .store
        .latest_report()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no reports yet".to_string()))
}

async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<crate::models::Report> {
    state
        .store
        .get_report(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("report {id} not found")))
}

#[derive(Deserialize)]
struct SentimentQuery {
    hours: Option<u32>,
}

async fn stock_sentiment(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    q: Result<Query<SentimentQuery>, QueryRejection>,
) -> ApiResult<crate::models::StockSentiment> {
    let Query(q) = q?;
    let symbol = symbol.trim();
    if symbol.is_empty() || symbol.len() > 10 || !symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
        return Err(ApiError::BadRequest(format!("invalid symbol: {symbol}")));
    }
    let hours = q.hours.unwrap_or(24).clamp(1, 24 * 30);
    Ok(Json(state.store.stock_sentiment(symbol, hours).await?))
}

async fn scan(State(state): State<AppState>) -> ApiResult<crate::ingest::CycleReport> {
    let Some(scheduler) = state.scheduler.as_ref() else {
        return Err(ApiError::Unavailable("collector is not configured".to_string()));
    };
    Ok(Json(scheduler.run_once().await))
}
