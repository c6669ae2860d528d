//! HTTP 控制接口
//!
//! 把 `RunController` 的 start / stop / status / logs 暴露给外部调用方：
//!
//! | 方法 | 路径 | 说明 |
//! |---|---|---|
//! | POST | `/api/start` | `{"config": "path"}`，缺省用 `serve --config` |
//! | POST | `/api/stop` | 请求停止，返回最新状态 |
//! | GET | `/api/status` | 状态快照 |
//! | GET | `/api/logs?file=` | 当前运行或指定文件的日志 |
//! | GET | `/api/log-files` | 所有日志文件，最新的在前 |

pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::orchestrator::{RunController, RunState};

pub use error::ApiError;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub controller: RunController,
    pub default_config: Option<PathBuf>,
}

impl AppState {
    pub fn new(controller: RunController, default_config: Option<PathBuf>) -> Self {
        Self {
            controller,
            default_config,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/start", post(handlers::start_run))
        .route("/api/stop", post(handlers::stop_run))
        .route("/api/status", get(handlers::run_status))
        .route("/api/logs", get(handlers::read_logs))
        .route("/api/log-files", get(handlers::list_log_files))
        .with_state(state)
}

/// 监听直到 Ctrl-C；退出前停止在途运行并等待排空
pub async fn start_server(config: ServerConfig, state: AppState) -> Result<()> {
    let controller = state.controller.clone();
    let app = router(state).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 控制接口已启动: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(controller))
        .await?;
    Ok(())
}

async fn shutdown_signal(controller: RunController) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("监听 Ctrl-C 失败，服务将一直运行: {}", e);
        std::future::pending::<()>().await;
    }
    if controller.status().state != RunState::Running {
        return;
    }

    warn!("⏹️ 收到 Ctrl-C，等待在途单元结束...");
    if let Err(e) = controller.stop().await {
        warn!("停止请求失败: {}", e);
    }
    match controller.wait().await {
        Ok(status) => info!("🏁 运行结束: {:?}", status.state),
        Err(e) => warn!("等待运行结束失败: {}", e),
    }
}
