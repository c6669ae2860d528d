//! 输出目录 - 基础设施层
//!
//! 目录布局：
//!
//! ```text
//! <base>/<recordings>/<feature>/<city>/<date_range>/<website>/<run_id>.json|.md
//! <base>/<comparisons>/<feature>/<city>/<date_range>/<run_id>.json|.md
//! <logs>/evaluation_<run_id>.log
//! ```
//!
//! 所有写入都是"新建"语义，已存在的文件一律拒绝覆盖；
//! 唯一的例外是显式的 `regenerate_comparison`。
//! 每个写入者持有互不相交的键，因此并发写入是安全的。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::Config;
use crate::error::StoreError;
use crate::infrastructure::run_log::RunLog;
use crate::models::{CellKey, ComparisonArtifact, GroupKey, RecordingFile};

const LOG_PREFIX: &str = "evaluation_";
const LOG_SUFFIX: &str = ".log";

#[derive(Debug, Clone)]
pub struct OutputStore {
    recordings: PathBuf,
    comparisons: PathBuf,
    logs: PathBuf,
}

impl OutputStore {
    pub fn new(
        base: impl AsRef<Path>,
        recording_dir: &str,
        comparison_dir: &str,
        logs_dir: impl Into<PathBuf>,
    ) -> Self {
        let base = base.as_ref();
        Self {
            recordings: base.join(recording_dir),
            comparisons: base.join(comparison_dir),
            logs: logs_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.output_base_dir,
            &config.text_recording_dir,
            &config.comparison_analysis_dir,
            config.logs_dir.clone(),
        )
    }

    pub fn recording_dir(&self, key: &CellKey) -> PathBuf {
        self.recordings
            .join(&key.feature)
            .join(&key.city)
            .join(&key.date_range)
            .join(&key.website)
    }

    pub fn comparison_dir(&self, key: &GroupKey) -> PathBuf {
        self.comparisons
            .join(&key.feature)
            .join(&key.city)
            .join(&key.date_range)
    }

    /// 写入单元录制（JSON + markdown），返回 JSON 路径
    pub async fn write_recording(&self, recording: &RecordingFile) -> Result<PathBuf, StoreError> {
        let dir = self.recording_dir(&recording.key);
        let json_path = dir.join(format!("{}.json", recording.run_id));
        let md_path = dir.join(format!("{}.md", recording.run_id));

        write_new(&json_path, serde_json::to_vec_pretty(recording)?).await?;
        write_new(&md_path, recording.to_markdown().into_bytes()).await?;
        Ok(json_path)
    }

    pub async fn read_recording(&self, key: &CellKey, run_id: &str) -> Result<RecordingFile, StoreError> {
        let path = self.recording_dir(key).join(format!("{}.json", run_id));
        let bytes = read_existing(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// 写入新的对比产物版本，返回 JSON 路径
    pub async fn write_comparison(&self, artifact: &ComparisonArtifact) -> Result<PathBuf, StoreError> {
        let (json_path, md_path) = self.comparison_paths(&artifact.group, &artifact.run_id);
        write_new(&json_path, serde_json::to_vec_pretty(artifact)?).await?;
        write_new(&md_path, artifact.to_markdown().into_bytes()).await?;
        Ok(json_path)
    }

    /// 显式重新生成：覆盖已存在的对比产物版本
    pub async fn regenerate_comparison(
        &self,
        artifact: &ComparisonArtifact,
    ) -> Result<PathBuf, StoreError> {
        let (json_path, md_path) = self.comparison_paths(&artifact.group, &artifact.run_id);
        if fs::metadata(&json_path).await.is_err() {
            return Err(StoreError::NotFound(json_path));
        }
        fs::write(&json_path, serde_json::to_vec_pretty(artifact)?)
            .await
            .map_err(|e| StoreError::io(&json_path, e))?;
        fs::write(&md_path, artifact.to_markdown())
            .await
            .map_err(|e| StoreError::io(&md_path, e))?;
        debug!("已重新生成对比产物: {}", json_path.display());
        Ok(json_path)
    }

    pub async fn read_comparison(
        &self,
        group: &GroupKey,
        run_id: &str,
    ) -> Result<ComparisonArtifact, StoreError> {
        let (json_path, _) = self.comparison_paths(group, run_id);
        let bytes = read_existing(&json_path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// 某个单元组已有的对比产物版本（run_id），按时间升序
    pub async fn comparison_versions(&self, group: &GroupKey) -> Result<Vec<String>, StoreError> {
        let dir = self.comparison_dir(group);
        let mut versions = list_names(&dir, "", ".json").await?;
        versions.sort();
        Ok(versions)
    }

    fn comparison_paths(&self, group: &GroupKey, run_id: &str) -> (PathBuf, PathBuf) {
        let dir = self.comparison_dir(group);
        (
            dir.join(format!("{}.json", run_id)),
            dir.join(format!("{}.md", run_id)),
        )
    }

    /// 以启动时间为键新建本次运行的日志文件
    ///
    /// 同一时间戳已有日志时追加序号，保证每次运行拿到独立的 run_id。
    pub async fn create_run_log(&self, started_at: DateTime<Local>) -> Result<RunLog, StoreError> {
        fs::create_dir_all(&self.logs)
            .await
            .map_err(|e| StoreError::io(&self.logs, e))?;

        let stamp = started_at.format("%Y%m%d_%H%M%S_%3f").to_string();
        let mut run_id = stamp.clone();
        let mut suffix = 1;
        loop {
            let path = self.log_path(&run_id);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return RunLog::open(run_id, path, file, started_at).await,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    run_id = format!("{}_{}", stamp, suffix);
                    suffix += 1;
                }
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
    }

    pub fn log_path(&self, run_id: &str) -> PathBuf {
        self.logs.join(format!("{}{}{}", LOG_PREFIX, run_id, LOG_SUFFIX))
    }

    /// 所有日志文件名，最新的在前
    pub async fn list_log_files(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = list_names(&self.logs, LOG_PREFIX, LOG_SUFFIX)
            .await?
            .into_iter()
            .map(|id| format!("{}{}{}", LOG_PREFIX, id, LOG_SUFFIX))
            .collect();
        names.sort_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// 读取日志文件内容，只接受 `list_log_files` 返回的文件名
    pub async fn read_log(&self, file_name: &str) -> Result<String, StoreError> {
        let path = self.logs.join(file_name);
        if file_name.contains(['/', '\\'])
            || !file_name.starts_with(LOG_PREFIX)
            || !file_name.ends_with(LOG_SUFFIX)
        {
            return Err(StoreError::NotFound(path));
        }
        let bytes = read_existing(&path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// 新建文件并写入，已存在时返回 `AlreadyExists`
async fn write_new(path: &Path, bytes: Vec<u8>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }

    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(StoreError::AlreadyExists(path.to_path_buf()))
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };

    file.write_all(&bytes)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    file.flush().await.map_err(|e| StoreError::io(path, e))?;
    debug!("已写入: {}", path.display());
    Ok(())
}

async fn read_existing(path: &Path) -> Result<Vec<u8>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StoreError::NotFound(path.to_path_buf()))
        }
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// 列出目录中符合前后缀的文件，返回去掉前后缀的部分；目录不存在视为空
async fn list_names(dir: &Path, prefix: &str, suffix: &str) -> Result<Vec<String>, StoreError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(stem) = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
        {
            names.push(stem.to_string());
        }
    }
    Ok(names)
}
