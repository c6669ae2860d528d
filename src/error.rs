//! 错误类型
//!
//! 按发生阶段划分：配置期（`ConfigError`）、单元执行期（`EvaluationError` / `CellError`）、
//! 落盘（`StoreError`）以及运行控制（`RunError`）。
//! 单元级错误只会落到单元状态上，不会向上冒泡成整次运行的失败。

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 配置错误：在任何单元执行之前就会中止
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML 解析失败（包括缺少必填字段、未知字段）
    #[error("TOML解析失败 ({path}): {source}")]
    ParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// 引用了未定义的网站 / 功能 / 城市 / 日期区间
    #[error("引用了未定义的{kind}: {key}")]
    UnknownReference { kind: &'static str, key: String },

    /// 启用列表中出现重复项
    #[error("{kind} 列表中存在重复项: {key}")]
    DuplicateReference { kind: &'static str, key: String },

    /// 某个维度没有启用任何项
    #[error("没有启用任何{0}")]
    EmptyDimension(&'static str),

    /// 键名不能作为路径组成部分
    #[error("{kind} 键名不合法: '{key}' (只允许字母、数字、'_'、'-')")]
    InvalidKey { kind: &'static str, key: String },

    /// 提示词为空
    #[error("功能 {feature} 的提示词为空{}", .website.as_deref().map(|w| format!(" (网站: {w})")).unwrap_or_default())]
    EmptyPrompt {
        feature: String,
        website: Option<String>,
    },

    /// 提示词模板中出现未知占位符
    #[error("功能 {feature} 的提示词包含未知占位符 {{{name}}}")]
    UnknownPlaceholder { feature: String, name: String },

    /// 网站缺少 URL
    #[error("网站 {0} 没有配置 URL")]
    MissingUrl(String),

    /// 日期区间无法解析（退房早于或等于入住、偏移为负、溢出）
    #[error("日期区间 {key} 无法解析: checkin_offset={checkin_offset}, checkout_offset={checkout_offset}")]
    UnresolvableDateRange {
        key: String,
        checkin_offset: i64,
        checkout_offset: i64,
    },

    /// 运行参数不合法
    #[error("运行参数 {field} 不合法: {reason}")]
    InvalidRunOption { field: &'static str, reason: String },
}

/// 外部评估能力返回的错误
///
/// `retryable = false` 表示结构性问题（提示词畸形、能力配置错误），不应再浪费重试。
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EvaluationError {
    pub retryable: bool,
    pub message: String,
}

impl EvaluationError {
    /// 可重试的瞬时错误（网络抖动、页面超时、反自动化拦截）
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    /// 结构性错误，立即终止该单元
    pub fn structural(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

/// 单元执行过程中的一次失败
#[derive(Debug, Clone, Error)]
pub enum CellError {
    #[error("瞬时错误: {0}")]
    Transient(String),

    #[error("结构性错误: {0}")]
    Structural(String),

    #[error("单次尝试超时 ({}s)", .0.as_secs())]
    Timeout(Duration),

    /// 运行已被停止，未再发起新的尝试
    #[error("运行已停止，未继续重试 (上次错误: {last})")]
    Cancelled { last: String },
}

impl CellError {
    /// 是否还值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, CellError::Transient(_) | CellError::Timeout(_))
    }
}

impl From<EvaluationError> for CellError {
    fn from(err: EvaluationError) -> Self {
        if err.retryable {
            CellError::Transient(err.message)
        } else {
            CellError::Structural(err.message)
        }
    }
}

/// 输出目录读写错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 只追加：同一路径已存在时拒绝写入
    #[error("文件已存在，拒绝覆盖: {0}")]
    AlreadyExists(PathBuf),

    #[error("文件不存在: {0}")]
    NotFound(PathBuf),

    #[error("JSON序列化失败: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// 运行控制错误
#[derive(Debug, Error)]
pub enum RunError {
    #[error("配置错误: {0}")]
    Configuration(#[from] ConfigError),

    /// 已有运行处于 Running 状态
    #[error("已有评估正在运行 (run_id: {run_id})")]
    Conflict { run_id: String },

    #[error("当前没有正在运行的评估")]
    NotRunning,

    /// 请求的日志或产物不存在
    #[error("文件不存在: {0}")]
    NotFound(String),

    /// 意料之外的内部缺陷
    #[error("内部错误: {0}")]
    InternalFault(String),

    #[error("运行控制器已退出")]
    ControllerUnavailable,
}

impl From<StoreError> for RunError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => RunError::NotFound(path.display().to_string()),
            other => RunError::InternalFault(other.to_string()),
        }
    }
}

impl RunError {
    /// CLI 退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Configuration(_) => 2,
            RunError::Conflict { .. } => 3,
            RunError::NotRunning => 4,
            RunError::NotFound(_)
            | RunError::InternalFault(_)
            | RunError::ControllerUnavailable => 1,
        }
    }
}
