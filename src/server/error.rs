//! 控制接口的错误响应

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::RunError;

#[derive(Debug)]
pub enum ApiError {
    Run(RunError),
    /// 请求没有给出配置文件，服务启动时也没有默认配置
    MissingConfig,
}

impl From<RunError> for ApiError {
    fn from(err: RunError) -> Self {
        Self::Run(err)
    }
}

impl ApiError {
    /// 与 CLI 退出码同一套分类
    pub fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::Run(err @ RunError::Configuration(_)) => (StatusCode::BAD_REQUEST, err.to_string()),
            Self::Run(err @ RunError::Conflict { .. }) | Self::Run(err @ RunError::NotRunning) => {
                (StatusCode::CONFLICT, err.to_string())
            }
            Self::Run(err @ RunError::NotFound(_)) => (StatusCode::NOT_FOUND, err.to_string()),
            Self::Run(err @ RunError::ControllerUnavailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            Self::Run(err @ RunError::InternalFault(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            Self::MissingConfig => (
                StatusCode::BAD_REQUEST,
                "未指定配置文件 (请求体 config 字段或 serve --config)".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        let exit_code = match &self {
            Self::Run(err) => err.exit_code(),
            Self::MissingConfig => 2,
        };
        (status, Json(json!({ "error": message, "exit_code": exit_code }))).into_response()
    }
}
