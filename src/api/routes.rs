use crate::activity::{self, ActivityResult, DEFAULT_WINDOW_DAYS, InactiveMember};
use crate::coc::metrics::{self, CapitalMetrics, WarMetrics};
use crate::coc::{CocClient, normalize_tag};
use crate::collector::{self, RefreshSummary};
use crate::error::StoreError;
use crate::scheduler::AutoSnapshotController;
use crate::storage::history::ActivityHistoryEntry;
use crate::storage::transfer::ExportBundle;
use crate::storage::{Category, Settings, SettingsPatch, Snapshot, Storage, StorageUsage};
use anyhow::anyhow;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub struct ApiState {
    pub storage: Arc<Mutex<Storage>>,
    pub client: CocClient,
    pub snapshots: Arc<Mutex<AutoSnapshotController>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/snapshots/:category", get(snapshots))
        .route("/api/v1/snapshots/:category/latest", get(latest_snapshot))
        .route("/api/v1/activity/:tag", get(member_activity))
        .route("/api/v1/activity/:tag/history", get(member_history))
        .route("/api/v1/inactive", get(inactive_members))
        .route("/api/v1/settings", get(settings_get).put(settings_put))
        .route("/api/v1/export", get(export_bundle))
        .route("/api/v1/import", post(import_bundle))
        .route("/api/v1/data", axum::routing::delete(clear_data))
        .route("/api/v1/clans/:tag/refresh", post(refresh_clan))
        .route("/api/v1/war/metrics", get(war_metrics))
        .route("/api/v1/capital/metrics", get(capital_metrics))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    from: Option<i64>,
    to: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WindowQuery {
    days: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    usage: StorageUsage,
    last_snapshot_time: Option<i64>,
    auto_snapshot_running: bool,
    auto_snapshot_interval_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SnapshotsPayload {
    category: Category,
    count: usize,
    snapshots: Vec<Snapshot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InactivePayload {
    window_days: u32,
    count: usize,
    members: Vec<InactiveMember>,
}

async fn status(State(state): State<ApiState>) -> ApiResult<Json<StatusPayload>> {
    let (usage, last_snapshot_time) = {
        let storage = lock_storage(&state)?;
        (storage.usage()?, storage.get_settings().last_snapshot_time)
    };
    let (auto_snapshot_running, interval) = {
        let controller = lock_controller(&state)?;
        (controller.is_running(), controller.interval())
    };

    Ok(Json(StatusPayload {
        usage,
        last_snapshot_time,
        auto_snapshot_running,
        auto_snapshot_interval_seconds: interval.map(|every| every.as_secs()),
    }))
}

async fn snapshots(
    State(state): State<ApiState>,
    Path(category): Path<String>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<SnapshotsPayload>> {
    let category = parse_category(&category)?;
    let storage = lock_storage(&state)?;

    let snapshots = match (query.from, query.to) {
        (None, None) => storage.load_all(category),
        (from, to) => storage.by_time_range(
            category,
            from.unwrap_or(i64::MIN),
            to.unwrap_or(i64::MAX),
        ),
    };

    Ok(Json(SnapshotsPayload {
        category,
        count: snapshots.len(),
        snapshots,
    }))
}

async fn latest_snapshot(
    State(state): State<ApiState>,
    Path(category): Path<String>,
) -> ApiResult<Json<Snapshot>> {
    let category = parse_category(&category)?;
    let storage = lock_storage(&state)?;

    storage
        .latest(category)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No {category} snapshots stored yet")))
}

async fn member_activity(
    State(state): State<ApiState>,
    Path(tag): Path<String>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<ActivityResult>> {
    let storage = lock_storage(&state)?;
    let days = query.days.unwrap_or(DEFAULT_WINDOW_DAYS);

    Ok(Json(activity::compute_activity(&storage, &normalize_tag(&tag), days)))
}

async fn member_history(
    State(state): State<ApiState>,
    Path(tag): Path<String>,
) -> ApiResult<Json<Vec<ActivityHistoryEntry>>> {
    let storage = lock_storage(&state)?;
    Ok(Json(storage.activity_history(&normalize_tag(&tag))))
}

async fn inactive_members(
    State(state): State<ApiState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<InactivePayload>> {
    let storage = lock_storage(&state)?;
    let window_days = query
        .days
        .unwrap_or_else(|| storage.get_settings().inactivity_threshold_days);
    let members = activity::find_inactive_members(&storage, window_days);

    Ok(Json(InactivePayload {
        window_days,
        count: members.len(),
        members,
    }))
}

async fn settings_get(State(state): State<ApiState>) -> ApiResult<Json<Settings>> {
    let storage = lock_storage(&state)?;
    Ok(Json(storage.get_settings()))
}

async fn settings_put(
    State(state): State<ApiState>,
    Json(patch): Json<SettingsPatch>,
) -> ApiResult<Json<Settings>> {
    let saved = {
        let mut storage = lock_storage(&state)?;
        let mut settings = storage.get_settings();
        settings
            .apply(&patch)
            .map_err(|error| ApiError::BadRequest(error.to_string()))?;
        storage.save_settings(&settings)?;
        settings
    };

    let mut controller = lock_controller(&state)?;
    if controller.is_running() {
        controller.start_from_settings(Arc::clone(&state.storage));
    }

    Ok(Json(saved))
}

async fn export_bundle(State(state): State<ApiState>) -> ApiResult<Response> {
    let content = lock_storage(&state)?.export_json()?;
    let filename = format!("coc-dashboard-export-{}.json", Utc::now().timestamp_millis());

    let mut response = content.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))?,
    );

    Ok(response)
}

async fn import_bundle(
    State(state): State<ApiState>,
    Json(bundle): Json<ExportBundle>,
) -> ApiResult<Json<Value>> {
    let imported = lock_storage(&state)?.import_all(&bundle)?;
    Ok(Json(json!({ "imported": imported })))
}

async fn clear_data(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    lock_storage(&state)?.clear_all()?;
    Ok(Json(json!({ "cleared": true })))
}

async fn refresh_clan(
    State(state): State<ApiState>,
    Path(tag): Path<String>,
) -> ApiResult<Json<RefreshSummary>> {
    let fetched = state.client.comprehensive_clan_data(&tag).await;

    let mut storage = lock_storage(&state)?;
    let summary = collector::store_clan_refresh(&mut storage, &fetched);

    Ok(Json(summary))
}

async fn war_metrics(State(state): State<ApiState>) -> ApiResult<Json<WarMetrics>> {
    let latest = lock_storage(&state)?.latest(Category::War);

    latest
        .and_then(|snapshot| metrics::war_metrics(&snapshot.data))
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No active war snapshot stored".to_string()))
}

async fn capital_metrics(State(state): State<ApiState>) -> ApiResult<Json<CapitalMetrics>> {
    let latest = lock_storage(&state)?.latest(Category::Capital);

    latest
        .and_then(|snapshot| metrics::capital_metrics(&snapshot.data))
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No capital raid snapshot stored".to_string()))
}

fn parse_category(raw: &str) -> ApiResult<Category> {
    raw.parse::<Category>().map_err(ApiError::BadRequest)
}

fn lock_storage(state: &ApiState) -> ApiResult<MutexGuard<'_, Storage>> {
    state
        .storage
        .lock()
        .map_err(|_| ApiError::Internal(anyhow!("storage lock poisoned")))
}

fn lock_controller(state: &ApiState) -> ApiResult<MutexGuard<'_, AutoSnapshotController>> {
    state
        .snapshots
        .lock()
        .map_err(|_| ApiError::Internal(anyhow!("auto-snapshot lock poisoned")))
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Storage(StoreError),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value)
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        Self::Storage(value)
    }
}

impl From<axum::http::header::InvalidHeaderValue> for ApiError {
    fn from(value: axum::http::header::InvalidHeaderValue) -> Self {
        Self::Internal(value.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Storage(error @ StoreError::QuotaExceeded { .. }) => (
                StatusCode::INSUFFICIENT_STORAGE,
                Json(json!({ "error": error.to_string() })),
            )
                .into_response(),
            ApiError::Storage(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error.to_string() })),
            )
                .into_response(),
            ApiError::Internal(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error.to_string() })),
            )
                .into_response(),
        }
    }
}
