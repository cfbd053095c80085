//! Operational API (spec §4.11, §6): an `axum` router over the [`Engine`]
//! facade, grounded in `orbit-web`'s `Router::new().route(...)` idiom.
//! Handlers stay thin — deserialize, call the engine, serialize.
//!
//! Every route uses query params or JSON bodies, never a path parameter,
//! so there's no ambiguity between axum's `:name` and `{name}` extractor
//! syntax across versions.

pub mod error;

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ProviderMode};
use crate::credentials::CredentialSet;
use crate::engine::comparator::{ComparisonEntry, ComparisonResult, Suggestion};
use crate::engine::executor::ActionOutcome;
use crate::engine::facade::{Engine, StatusSnapshot};
use crate::provider::FileResource;

use error::{ApiError, ApiResult};

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/subfolders", get(subfolders_handler))
        .route("/scan", post(scan_handler))
        .route("/cancel", post(cancel_handler))
        .route("/delete", post(delete_handler))
        .route("/conflicts", get(conflicts_handler))
        .route("/conflicts/delete", post(conflicts_delete_handler))
        .route("/compare/start", post(compare_start_handler))
        .route("/compare/cancel", post(compare_cancel_handler))
        .route("/compare/status", get(compare_status_handler))
        .route("/compare/results", post(compare_results_handler))
        .route("/compare/execute", post(compare_execute_handler))
        .route("/compare/reset", post(compare_reset_handler))
        .route("/sync/start", post(sync_start_handler))
        .route("/export", get(export_handler))
        .route("/auth/exchange", post(auth_exchange_handler))
        .route("/auth/test", post(auth_test_handler))
        .route("/credentials", get(credentials_get_handler).post(credentials_post_handler))
        .route("/config", get(config_get_handler).post(config_post_handler))
        .with_state(engine)
}

async fn status_handler(State(engine): State<Arc<Engine>>) -> Json<StatusSnapshot> {
    Json(engine.status().await)
}

#[derive(Deserialize)]
struct SubfoldersQuery {
    #[serde(default)]
    path: String,
    mode: Option<ProviderMode>,
}

#[derive(Serialize)]
struct FileEntryDto {
    path: String,
    name: String,
    size: u64,
    mtime: f64,
}

impl From<&FileResource> for FileEntryDto {
    fn from(f: &FileResource) -> Self {
        Self { path: f.path.clone(), name: f.name.clone(), size: f.size, mtime: f.mtime }
    }
}

#[derive(Serialize)]
struct SubfoldersResponse {
    subfolders: Vec<FileEntryDto>,
}

async fn subfolders_handler(State(engine): State<Arc<Engine>>, Query(q): Query<SubfoldersQuery>) -> ApiResult<Json<SubfoldersResponse>> {
    let entries = engine.subfolders(&q.path, q.mode).await?;
    Ok(Json(SubfoldersResponse { subfolders: entries.iter().map(FileEntryDto::from).collect() }))
}

#[derive(Deserialize)]
struct ScanRequest {
    folder: String,
}

#[derive(Serialize)]
struct StartedResponse {
    status: &'static str,
}

async fn scan_handler(State(engine): State<Arc<Engine>>, Json(req): Json<ScanRequest>) -> ApiResult<Json<StartedResponse>> {
    engine.scan(&req.folder).await?;
    Ok(Json(StartedResponse { status: "started" }))
}

async fn cancel_handler(State(engine): State<Arc<Engine>>) -> Json<StartedResponse> {
    engine.request_cancel();
    Json(StartedResponse { status: "cancelled" })
}

#[derive(Serialize)]
struct OutcomesResponse {
    outcomes: Vec<ActionOutcome>,
}

async fn delete_handler(State(engine): State<Arc<Engine>>) -> ApiResult<Json<OutcomesResponse>> {
    let outcomes = engine.delete_empty_folders().await?;
    Ok(Json(OutcomesResponse { outcomes }))
}

#[derive(Serialize)]
struct ConflictsResponse {
    conflicts: Vec<FileEntryDto>,
}

async fn conflicts_handler(State(engine): State<Arc<Engine>>) -> Json<ConflictsResponse> {
    let conflicts = engine.conflicts().await;
    Json(ConflictsResponse { conflicts: conflicts.iter().map(FileEntryDto::from).collect() })
}

async fn conflicts_delete_handler(State(engine): State<Arc<Engine>>) -> ApiResult<Json<OutcomesResponse>> {
    let outcomes = engine.delete_conflicts().await?;
    Ok(Json(OutcomesResponse { outcomes }))
}

#[derive(Deserialize)]
struct CompareStartRequest {
    left_path: String,
    right_path: String,
    left_mode: ProviderMode,
    right_mode: ProviderMode,
}

async fn compare_start_handler(State(engine): State<Arc<Engine>>, Json(req): Json<CompareStartRequest>) -> ApiResult<Json<StartedResponse>> {
    engine.compare_start(req.left_path, req.right_path, req.left_mode, req.right_mode).await?;
    Ok(Json(StartedResponse { status: "started" }))
}

async fn compare_cancel_handler(State(engine): State<Arc<Engine>>) -> Json<StartedResponse> {
    engine.compare_cancel();
    Json(StartedResponse { status: "cancelled" })
}

#[derive(Serialize)]
struct CompareStatusResponse {
    comparing: bool,
}

async fn compare_status_handler(State(engine): State<Arc<Engine>>) -> Json<CompareStatusResponse> {
    Json(CompareStatusResponse { comparing: engine.compare_status().await })
}

#[derive(Serialize)]
struct ComparisonEntryDto {
    relative_path: String,
    left: Option<FileEntryDto>,
    right: Option<FileEntryDto>,
    suggestion: &'static str,
}

impl From<&ComparisonEntry> for ComparisonEntryDto {
    fn from(e: &ComparisonEntry) -> Self {
        Self {
            relative_path: e.relative_path.clone(),
            left: e.left.as_ref().map(FileEntryDto::from),
            right: e.right.as_ref().map(FileEntryDto::from),
            suggestion: suggestion_name(e.suggestion),
        }
    }
}

fn suggestion_name(s: Suggestion) -> &'static str {
    match s {
        Suggestion::MoveToRight => "move_to_right",
        Suggestion::DeleteFromLeft => "delete_from_left",
        Suggestion::ManualReview => "manual_review",
    }
}

#[derive(Serialize)]
struct ComparisonResultDto {
    only_in_left: Vec<ComparisonEntryDto>,
    only_in_right: Vec<ComparisonEntryDto>,
    size_mismatched: Vec<ComparisonEntryDto>,
}

impl From<&ComparisonResult> for ComparisonResultDto {
    fn from(r: &ComparisonResult) -> Self {
        Self {
            only_in_left: r.only_in_left.iter().map(ComparisonEntryDto::from).collect(),
            only_in_right: r.only_in_right.iter().map(ComparisonEntryDto::from).collect(),
            size_mismatched: r.size_mismatched.iter().map(ComparisonEntryDto::from).collect(),
        }
    }
}

async fn compare_results_handler(State(engine): State<Arc<Engine>>) -> ApiResult<Json<ComparisonResultDto>> {
    let results = engine
        .compare_results()
        .await
        .ok_or_else(|| ApiError(crate::error::MeridianError::Other("no comparison results available".to_string())))?;
    Ok(Json(ComparisonResultDto::from(&results)))
}

#[derive(Deserialize)]
struct CompareExecuteRequest {
    #[serde(default)]
    delete_indices: Vec<usize>,
    #[serde(default)]
    copy_indices: Vec<usize>,
}

async fn compare_execute_handler(State(engine): State<Arc<Engine>>, Json(req): Json<CompareExecuteRequest>) -> ApiResult<Json<OutcomesResponse>> {
    let outcomes = engine.compare_execute(req.delete_indices, req.copy_indices).await?;
    Ok(Json(OutcomesResponse { outcomes }))
}

async fn compare_reset_handler(State(engine): State<Arc<Engine>>) -> Json<StartedResponse> {
    engine.compare_reset().await;
    Json(StartedResponse { status: "success" })
}

#[derive(Deserialize)]
struct SyncStartRequest {
    folder: String,
}

async fn sync_start_handler(State(engine): State<Arc<Engine>>, Json(req): Json<SyncStartRequest>) -> ApiResult<Json<OutcomesResponse>> {
    let outcomes = engine.sync_start(&req.folder).await?;
    Ok(Json(OutcomesResponse { outcomes }))
}

#[derive(Deserialize)]
struct ExportQuery {
    #[serde(default = "default_export_format")]
    format: String,
}

fn default_export_format() -> String {
    "json".to_string()
}

async fn export_handler(State(engine): State<Arc<Engine>>, Query(q): Query<ExportQuery>) -> ApiResult<axum::response::Response> {
    use axum::http::header;
    use axum::response::IntoResponse;

    let empty_folders = engine.export_empty_folders().await?;

    if q.format == "csv" {
        let mut content = String::from("Path,Depth\n");
        for folder in &empty_folders {
            let depth = folder.matches('/').count();
            content.push_str(&format!("\"{folder}\",{depth}\n"));
        }
        Ok((
            [(header::CONTENT_TYPE, "text/csv"), (header::CONTENT_DISPOSITION, "attachment; filename=\"empty_folders.csv\"")],
            content,
        )
            .into_response())
    } else {
        let entries: Vec<_> = empty_folders
            .iter()
            .map(|f| serde_json::json!({ "path": f, "depth": f.matches('/').count() }))
            .collect();
        let body = serde_json::json!({ "total_empty_folders": empty_folders.len(), "empty_folders": entries });
        Ok((
            [(header::CONTENT_TYPE, "application/json"), (header::CONTENT_DISPOSITION, "attachment; filename=\"empty_folders.json\"")],
            Json(body),
        )
            .into_response())
    }
}

/// OAuth code exchange talks to each provider's real token endpoint with a
/// client secret — the external collaborator spec §1/§4.10 scope out. This
/// handler reports that explicitly rather than faking a token.
async fn auth_exchange_handler() -> ApiResult<Json<serde_json::Value>> {
    Err(ApiError(crate::error::MeridianError::Unsupported {
        provider: "oauth".to_string(),
        operation: "auth/exchange".to_string(),
    }))
}

#[derive(Deserialize)]
struct AuthTestRequest {
    mode: ProviderMode,
}

#[derive(Serialize)]
struct AuthTestResponse {
    status: &'static str,
    reachable: bool,
}

/// Builds the provider for `mode` from whatever credentials are already
/// stored and checks reachability with a lightweight `exists` call — the
/// local equivalent of `test_credentials`'s API round trip.
async fn auth_test_handler(State(engine): State<Arc<Engine>>, Json(req): Json<AuthTestRequest>) -> ApiResult<Json<AuthTestResponse>> {
    let reachable = engine.test_provider_reachability(req.mode).await?;
    Ok(Json(AuthTestResponse { status: "success", reachable }))
}

async fn credentials_get_handler(State(engine): State<Arc<Engine>>, Query(q): Query<SubfoldersQuery>) -> ApiResult<Json<CredentialSet>> {
    let provider = q.mode.map(provider_mode_key).unwrap_or("local");
    let creds = engine.load_credentials(provider).await?;
    Ok(Json(creds))
}

#[derive(Deserialize)]
struct CredentialsPostRequest {
    provider: String,
    #[serde(flatten)]
    credentials: CredentialSet,
}

async fn credentials_post_handler(State(engine): State<Arc<Engine>>, Json(req): Json<CredentialsPostRequest>) -> ApiResult<Json<StartedResponse>> {
    engine.save_credentials(&req.provider, &req.credentials).await?;
    Ok(Json(StartedResponse { status: "success" }))
}

fn provider_mode_key(mode: ProviderMode) -> &'static str {
    match mode {
        ProviderMode::Local => "local",
        ProviderMode::Dropbox => "dropbox",
        ProviderMode::Google => "gdrive",
        ProviderMode::S3 => "s3",
        ProviderMode::Sftp => "sftp",
    }
}

async fn config_get_handler(State(engine): State<Arc<Engine>>) -> Json<Config> {
    Json(engine.config_snapshot().await)
}

async fn config_post_handler(State(engine): State<Arc<Engine>>, Json(config): Json<Config>) -> ApiResult<Json<StartedResponse>> {
    engine.update_config(config).await?;
    Ok(Json(StartedResponse { status: "success" }))
}
