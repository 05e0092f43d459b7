//! Axum JSON surface: cron trigger endpoints, manual refresh, and the
//! keyword registry API.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rankwatch_core::{Keyword, KeywordCategory, RankingObservation, Tracker};
use rankwatch_ingest::{IngestConfig, RefreshError, RunSummary, VolumeRunSummary};
use rankwatch_provider::RankProvider;
use rankwatch_storage::{KeywordUpdate, RankStore, StoreError};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::net::TcpListener;
use uuid::Uuid;

pub const CRATE_NAME: &str = "rankwatch-web";

const DEFAULT_HISTORY_DEPTH: usize = 30;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RankStore>,
    pub provider: Arc<dyn RankProvider>,
    pub ingest: IngestConfig,
    /// Shared secret for the cron trigger endpoints. `None` means
    /// unconfigured, which the guard reports as a server-side error.
    pub cron_secret: Option<String>,
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Authentication,
    Configuration(String),
    NotFound(String),
    Validation(String),
    Duplicate(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Authentication => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Configuration(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Duplicate(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKeyword => ApiError::Duplicate(err.to_string()),
            StoreError::TrackerNotFound(_) | StoreError::KeywordNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            StoreError::InvalidKeyword(_) => ApiError::Validation(err.to_string()),
            StoreError::Backend(_) => ApiError::Internal(err.into()),
        }
    }
}

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::KeywordNotFound(_) => ApiError::NotFound(err.to_string()),
            RefreshError::Store(store_err) => store_err.into(),
            RefreshError::Provider(_) => ApiError::Internal(err.into()),
        }
    }
}

// ── DTOs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CronRankingsResponse {
    success: bool,
    trackers_processed: usize,
    total_keywords: usize,
    total_rankings: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

impl From<RunSummary> for CronRankingsResponse {
    fn from(summary: RunSummary) -> Self {
        Self {
            success: true,
            trackers_processed: summary.trackers_processed,
            total_keywords: summary.total_keywords,
            total_rankings: summary.rankings_recorded,
            errors: summary.errors,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CronVolumeResponse {
    success: bool,
    trackers_processed: usize,
    total_keywords: usize,
    updated_keywords: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

impl From<VolumeRunSummary> for CronVolumeResponse {
    fn from(summary: VolumeRunSummary) -> Self {
        Self {
            success: true,
            trackers_processed: summary.trackers_processed,
            total_keywords: summary.total_keywords,
            updated_keywords: summary.updated_keywords,
            errors: summary.errors,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateTrackerBody {
    name: String,
    location: String,
    language: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddKeywordBody {
    keyword: String,
    category: Option<String>,
    target_url: Option<String>,
}

/// `None` = field absent (leave unchanged); `Some(None)` = explicit null
/// (clear the field).
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateKeywordBody {
    #[serde(default, deserialize_with = "double_option")]
    category: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    target_url: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshQuery {
    keyword_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Default)]
struct ListKeywordsQuery {
    history: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ObservationDto {
    run_id: Uuid,
    observed_at: DateTime<Utc>,
    position: Option<u32>,
    matched_url: Option<String>,
}

impl From<RankingObservation> for ObservationDto {
    fn from(obs: RankingObservation) -> Self {
        Self {
            run_id: obs.run_id,
            observed_at: obs.observed_at,
            position: obs.position,
            matched_url: obs.matched_url,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeywordWithHistory {
    id: Uuid,
    tracker_id: Uuid,
    keyword: String,
    target_url: Option<String>,
    category: Option<String>,
    search_volume: Option<i64>,
    volume_checked_at: Option<DateTime<Utc>>,
    current_position: Option<u32>,
    first_position: Option<u32>,
    /// Positive = improved since the first observation.
    movement: Option<i64>,
    history: Vec<ObservationDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    success: bool,
    position: Option<u32>,
    url: Option<String>,
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/cron/rankings", get(cron_rankings_handler))
        .route("/cron/search-volume", get(cron_volume_handler))
        .route("/api/rankings/refresh", post(refresh_handler))
        .route("/api/trackers", post(create_tracker_handler).get(list_trackers_handler))
        .route("/api/trackers/{id}/keywords", post(add_keyword_handler).get(list_keywords_handler))
        .route(
            "/api/keywords/{id}",
            patch(update_keyword_handler).delete(delete_keyword_handler),
        )
        .with_state(Arc::new(state))
}

pub async fn serve_from_env(state: AppState) -> anyhow::Result<()> {
    let port: u16 = std::env::var("RANKWATCH_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "serving rankwatch api");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

// ── Cron triggers ────────────────────────────────────────────────────────────

fn check_cron_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let secret = state
        .cron_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::Configuration("cron secret is not configured".into()))?;

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == secret => Ok(()),
        _ => Err(ApiError::Authentication),
    }
}

/// Daily ranking ingestion trigger. Partial failures still answer 200 with
/// the error list; only loading the tracker list is a hard failure.
async fn cron_rankings_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CronRankingsResponse>, ApiError> {
    check_cron_auth(&state, &headers)?;
    let summary =
        rankwatch_ingest::run_rankings_once(state.store.as_ref(), state.provider.as_ref(), &state.ingest)
            .await
            .map_err(ApiError::Internal)?;
    Ok(Json(summary.into()))
}

/// Monthly search-volume refresh trigger.
async fn cron_volume_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CronVolumeResponse>, ApiError> {
    check_cron_auth(&state, &headers)?;
    let summary =
        rankwatch_ingest::run_volume_once(state.store.as_ref(), state.provider.as_ref(), &state.ingest)
            .await
            .map_err(ApiError::Internal)?;
    Ok(Json(summary.into()))
}

// ── Manual refresh ───────────────────────────────────────────────────────────

/// Session authentication happens upstream of this service; the handler
/// assumes an already-authenticated caller.
async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RefreshQuery>,
) -> Result<Response, ApiError> {
    match query.keyword_id {
        Some(keyword_id) => {
            let matched = rankwatch_ingest::refresh_keyword(
                state.store.as_ref(),
                state.provider.as_ref(),
                &state.ingest,
                keyword_id,
            )
            .await?;
            Ok(Json(RefreshResponse {
                success: true,
                position: matched.position,
                url: matched.url,
            })
            .into_response())
        }
        None => {
            let summary = rankwatch_ingest::run_rankings_once(
                state.store.as_ref(),
                state.provider.as_ref(),
                &state.ingest,
            )
            .await
            .map_err(ApiError::Internal)?;
            Ok(Json(CronRankingsResponse::from(summary)).into_response())
        }
    }
}

// ── Keyword registry ─────────────────────────────────────────────────────────

async fn create_tracker_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTrackerBody>,
) -> Result<(StatusCode, Json<Tracker>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::Validation("tracker name is empty".into()));
    }
    let tracker = state
        .store
        .create_tracker(body.name.trim(), &body.location, &body.language)
        .await?;
    Ok((StatusCode::CREATED, Json(tracker)))
}

async fn list_trackers_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Tracker>>, ApiError> {
    Ok(Json(state.store.list_trackers().await?))
}

fn parse_category(value: &str) -> Result<KeywordCategory, ApiError> {
    value
        .parse::<KeywordCategory>()
        .map_err(|err| ApiError::Validation(err.to_string()))
}

async fn add_keyword_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(tracker_id): AxumPath<Uuid>,
    Json(body): Json<AddKeywordBody>,
) -> Result<(StatusCode, Json<Keyword>), ApiError> {
    let category = body.category.as_deref().map(parse_category).transpose()?;
    let keyword = state
        .store
        .add_keyword(tracker_id, &body.keyword, category, body.target_url)
        .await?;
    Ok((StatusCode::CREATED, Json(keyword)))
}

async fn list_keywords_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(tracker_id): AxumPath<Uuid>,
    Query(query): Query<ListKeywordsQuery>,
) -> Result<Json<Vec<KeywordWithHistory>>, ApiError> {
    if state.store.get_tracker(tracker_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("tracker not found: {tracker_id}")));
    }
    let depth = query.history.unwrap_or(DEFAULT_HISTORY_DEPTH).max(1);

    let keywords = state.store.list_keywords(tracker_id).await?;
    let mut out = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        let history = state.store.keyword_history(keyword.id, depth).await?;
        let first = state.store.first_observation(keyword.id).await?;

        let current_position = history.first().and_then(|o| o.position);
        let first_position = first.and_then(|o| o.position);
        let movement = match (first_position, current_position) {
            (Some(first), Some(current)) => Some(first as i64 - current as i64),
            _ => None,
        };

        out.push(KeywordWithHistory {
            id: keyword.id,
            tracker_id: keyword.tracker_id,
            keyword: keyword.text,
            target_url: keyword.target_url,
            category: keyword.category.map(|c| c.as_str().to_string()),
            search_volume: keyword.search_volume,
            volume_checked_at: keyword.volume_checked_at,
            current_position,
            first_position,
            movement,
            history: history.into_iter().map(ObservationDto::from).collect(),
        });
    }
    Ok(Json(out))
}

async fn update_keyword_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
    Json(body): Json<UpdateKeywordBody>,
) -> Result<Json<Keyword>, ApiError> {
    let category = match body.category {
        None => None,
        Some(None) => Some(None),
        Some(Some(value)) => Some(Some(parse_category(&value)?)),
    };
    let update = KeywordUpdate {
        category,
        target_url: body.target_url,
    };
    let keyword = state.store.update_keyword(id, update).await?;
    Ok(Json(keyword))
}

async fn delete_keyword_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_keyword(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
