use std::path::PathBuf;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RunError;
use crate::models::load_matrix_definition;
use crate::orchestrator::RunStatus;
use crate::server::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    /// 服务端的矩阵配置路径，缺省用 `serve --config`
    pub config: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub run_id: String,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub file: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub file: Option<String>,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogFilesResponse {
    pub files: Vec<String>,
    /// 当前（或最近一次）运行的日志
    pub current: Option<String>,
}

/// 读取配置并开始一次运行
pub async fn start_run(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, ApiError> {
    let path = request
        .config
        .or_else(|| state.default_config.clone())
        .ok_or(ApiError::MissingConfig)?;
    let definition = load_matrix_definition(&path)
        .await
        .map_err(RunError::from)?;

    let run_id = state.controller.start(definition).await?;
    info!("▶️ 运行已开始: {} ({})", run_id, path.display());
    Ok(Json(StartResponse {
        run_id,
        log_file: state.controller.status().log_file,
    }))
}

pub async fn stop_run(State(state): State<AppState>) -> Result<Json<RunStatus>, ApiError> {
    state.controller.stop().await?;
    Ok(Json(state.controller.status()))
}

pub async fn run_status(State(state): State<AppState>) -> Json<RunStatus> {
    Json(state.controller.status())
}

pub async fn read_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let content = match &query.file {
        Some(name) => state.controller.read_log(name).await?,
        None => state.controller.logs().await?,
    };
    Ok(Json(LogsResponse {
        file: query.file.or_else(|| current_log(&state)),
        content,
    }))
}

pub async fn list_log_files(
    State(state): State<AppState>,
) -> Result<Json<LogFilesResponse>, ApiError> {
    let files = state.controller.list_log_files().await?;
    let current = current_log(&state).or_else(|| files.first().cloned());
    Ok(Json(LogFilesResponse { files, current }))
}

fn current_log(state: &AppState) -> Option<String> {
    state
        .controller
        .status()
        .log_file
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
}
