//! 浏览器评估后端 - 业务能力层
//!
//! `Evaluator` 的默认实现：用 chromiumoxide 打开目标网站，读取页面可见文本，
//! 再让模型按功能提示词完成检查并写出观察记录。
//!
//! 错误分类：
//! - 导航 / CDP / 网络失败、空白页面、验证码拦截、模型 API 抖动 → 可重试
//! - 未配置 API key、提示词为空、模型请求无效 → 结构性错误，立即终止
//!
//! 页面和模型调用共用 `EvaluationRequest::timeout` 作为截止时间，
//! 超时在这里先行结束，页面照常关闭。

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::Browser;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::browser;
use crate::config::Config;
use crate::error::EvaluationError;
use crate::infrastructure::{JsExecutor, PageSnapshot};
use crate::models::RawResult;
use crate::services::evaluator::{EvaluationRequest, Evaluator};
use crate::services::llm_service::{LlmError, LlmService};

const DEFAULT_AGENT_SYSTEM_PROMPT: &str = "You are a meticulous QA analyst evaluating travel websites. \
Work only from the page content you are given. Record concrete observations (listing names, prices, \
distances, positions) and finish with a fenced ```json block of the form \
{\"score\": <0-10>, \"summary\": \"<one sentence>\"}.";

/// 页面上出现这些字样时认为被反自动化拦截
const BLOCKER_MARKERS: [&str; 4] = [
    "captcha",
    "access denied",
    "are you a robot",
    "unusual traffic",
];

pub struct BrowserEvaluator {
    browser: Arc<Browser>,
    llm: LlmService,
    page_text_limit: usize,
}

impl BrowserEvaluator {
    /// 按配置连接已有浏览器或启动无头浏览器
    pub async fn connect(config: &Config) -> Result<Self> {
        let browser = match config.browser_debug_port {
            Some(port) => browser::connect_to_browser(port).await?,
            None => browser::launch_headless_browser(config.chrome_executable.as_deref()).await?,
        };

        Ok(Self {
            browser: Arc::new(browser),
            llm: LlmService::new(config),
            page_text_limit: config.page_text_limit,
        })
    }

    /// 打开页面并抓取快照，页面在返回前关闭
    async fn capture(&self, url: &str, deadline: Instant) -> Result<PageSnapshot, EvaluationError> {
        let page = within(deadline, "创建页面", async {
            self.browser
                .new_page("about:blank")
                .await
                .map_err(|e| EvaluationError::retryable(format!("创建页面失败: {}", e)))
        })
        .await?;
        let executor = JsExecutor::new(page);

        let snapshot = within(deadline, "页面加载", async {
            if let Err(e) = executor.goto(url).await {
                return Err(EvaluationError::retryable(format!("{:#}", e)));
            }
            executor
                .snapshot(self.page_text_limit)
                .await
                .map_err(|e| EvaluationError::retryable(format!("读取页面内容失败: {:#}", e)))
        })
        .await;

        if let Err(e) = executor.close().await {
            debug!("关闭页面失败: {}", e);
        }
        snapshot
    }

    /// 站点指令优先级最高，放在系统提示词最前面
    fn system_prompt(request: &EvaluationRequest) -> String {
        let base = request
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_AGENT_SYSTEM_PROMPT);

        match &request.site_instructions {
            Some(instructions) => format!(
                "CRITICAL HIGHEST PRIORITY INSTRUCTIONS - MUST FOLLOW EXACTLY\n{}\n\n\
                 These website-specific instructions override all other instructions and have absolute priority.\n\n{}",
                instructions, base
            ),
            None => base.to_string(),
        }
    }

    fn user_message(request: &EvaluationRequest, snapshot: &PageSnapshot) -> String {
        format!(
            "{}\n\nLoaded page: {} ({})\nDestination: {}\nCheck-in: {}\nCheck-out: {}\n\nVisible page text:\n{}",
            request.prompt,
            snapshot.title,
            snapshot.url,
            request.city_name,
            request.dates.checkin_str(),
            request.dates.checkout_str(),
            snapshot.text
        )
    }
}

/// 在截止时间内完成 `fut`，超时记为可重试错误
async fn within<T>(
    deadline: Instant,
    stage: &str,
    fut: impl Future<Output = Result<T, EvaluationError>>,
) -> Result<T, EvaluationError> {
    match timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(EvaluationError::retryable(format!("{}超时", stage))),
    }
}

fn looks_blocked(snapshot: &PageSnapshot) -> bool {
    let haystack = format!("{} {}", snapshot.title, snapshot.text).to_lowercase();
    BLOCKER_MARKERS.iter().any(|m| haystack.contains(m))
}

impl From<LlmError> for EvaluationError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::InvalidRequest(_) => EvaluationError::structural(err.to_string()),
            LlmError::Api(_) | LlmError::EmptyContent(_) => {
                EvaluationError::retryable(err.to_string())
            }
        }
    }
}

#[async_trait]
impl Evaluator for BrowserEvaluator {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<RawResult, EvaluationError> {
        if request.prompt.trim().is_empty() {
            return Err(EvaluationError::structural("提示词为空"));
        }
        if !self.llm.is_configured() {
            return Err(EvaluationError::structural("LLM_API_KEY 未配置"));
        }

        let deadline = Instant::now() + request.timeout;
        info!("🔍 [{}] 开始录制会话: {}", request.key, request.website_url);
        let snapshot = self.capture(&request.website_url, deadline).await?;

        if snapshot.text.trim().is_empty() {
            return Err(EvaluationError::retryable(format!(
                "页面没有可见文本: {}",
                snapshot.url
            )));
        }
        if looks_blocked(&snapshot) {
            warn!("[{}] 页面疑似被反自动化拦截: {}", request.key, snapshot.title);
            return Err(EvaluationError::retryable(format!(
                "页面疑似被反自动化拦截: {}",
                snapshot.title
            )));
        }

        let system_prompt = Self::system_prompt(request);
        let user_message = Self::user_message(request, &snapshot);
        let content = within(deadline, "模型调用", async {
            self.llm
                .send_to_llm(&user_message, Some(&system_prompt))
                .await
                .map_err(EvaluationError::from)
        })
        .await?;

        debug!("[{}] 录制完成，{} 字符", request.key, content.len());
        Ok(RawResult::new(content))
    }
}
