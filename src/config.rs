use std::path::PathBuf;

/// 引擎部署配置（环境变量）
///
/// 只描述"在哪里跑、输出放哪里"，测试矩阵本身见 `models::matrix`。
#[derive(Clone, Debug)]
pub struct Config {
    /// 输出根目录
    pub output_base_dir: PathBuf,
    /// 录制结果子目录
    pub text_recording_dir: String,
    /// 对比分析子目录
    pub comparison_analysis_dir: String,
    /// 每次运行一个日志文件
    pub logs_dir: PathBuf,
    /// 浏览器调试端口，设置时连接已有浏览器，否则启动无头浏览器
    pub browser_debug_port: Option<u16>,
    /// 无头模式使用的浏览器可执行文件
    pub chrome_executable: Option<PathBuf>,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 交给模型的页面文本最大字符数
    pub page_text_limit: usize,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_base_dir: PathBuf::from("quality_evaluation_output"),
            text_recording_dir: "text_recordings".to_string(),
            comparison_analysis_dir: "comparison_analysis".to_string(),
            logs_dir: PathBuf::from("logs"),
            browser_debug_port: None,
            chrome_executable: None,
            verbose_logging: false,
            page_text_limit: 20_000,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            llm_temperature: 0.2,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            output_base_dir: std::env::var("OUTPUT_BASE_DIR").map(PathBuf::from).unwrap_or(default.output_base_dir),
            text_recording_dir: std::env::var("TEXT_RECORDING_DIR").unwrap_or(default.text_recording_dir),
            comparison_analysis_dir: std::env::var("COMPARISON_ANALYSIS_DIR").unwrap_or(default.comparison_analysis_dir),
            logs_dir: std::env::var("LOGS_DIR").map(PathBuf::from).unwrap_or(default.logs_dir),
            browser_debug_port: std::env::var("BROWSER_DEBUG_PORT").ok().and_then(|v| v.parse().ok()),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().map(PathBuf::from),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            page_text_limit: std::env::var("PAGE_TEXT_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.page_text_limit),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            llm_temperature: std::env::var("LLM_TEMPERATURE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_temperature),
        }
    }
}
