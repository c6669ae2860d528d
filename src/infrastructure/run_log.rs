//! 运行日志 - 基础设施层
//!
//! 每次运行一个只追加的日志文件；每写一行就 flush，
//! 这样并发读取方（`logs()`）能近实时看到进度。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: String,
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl RunLog {
    pub(crate) async fn open(
        run_id: String,
        path: PathBuf,
        mut file: File,
        started_at: DateTime<Local>,
    ) -> Result<Self, StoreError> {
        let header = format!(
            "{}\n质量评估运行日志 - {} (run_id: {})\n{}\n\n",
            "=".repeat(60),
            started_at.format("%Y-%m-%d %H:%M:%S"),
            run_id,
            "=".repeat(60)
        );
        file.write_all(header.as_bytes())
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        file.flush().await.map_err(|e| StoreError::io(&path, e))?;

        Ok(Self {
            run_id,
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }

    pub async fn info(&self, message: impl AsRef<str>) {
        info!("{}", message.as_ref());
        self.append("INFO", message.as_ref()).await;
    }

    pub async fn warn(&self, message: impl AsRef<str>) {
        warn!("{}", message.as_ref());
        self.append("WARN", message.as_ref()).await;
    }

    pub async fn error(&self, message: impl AsRef<str>) {
        error!("{}", message.as_ref());
        self.append("ERROR", message.as_ref()).await;
    }

    /// 写失败只记录到 tracing，不影响运行本身
    async fn append(&self, level: &str, message: &str) {
        let line = format!(
            "[{}] {:<5} {}\n",
            Local::now().format("%H:%M:%S%.3f"),
            level,
            message
        );
        let mut file = self.file.lock().await;
        if let Err(e) = file.write_all(line.as_bytes()).await {
            warn!("写入运行日志失败 ({}): {}", self.path.display(), e);
            return;
        }
        if let Err(e) = file.flush().await {
            warn!("刷新运行日志失败 ({}): {}", self.path.display(), e);
        }
    }
}
