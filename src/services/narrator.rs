//! 对比分析叙述 - 业务能力层
//!
//! 在结构化对比产物之外，让模型基于全部录制结果写一段横向对比。
//! 叙述失败不影响产物本身。

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;
use crate::models::StayDates;
use crate::services::llm_service::LlmService;

const DEFAULT_COMPARISON_SYSTEM_PROMPT: &str = "You are a travel product quality evaluator. \
Compare the recorded sessions of several travel websites for the same feature check. \
Be specific, cite observations, and explicitly call out websites whose recording is missing.";

/// 单个网站的录制结果，缺失时 `content` 为空、`missing_reason` 给出原因
#[derive(Debug, Clone)]
pub struct NarrationInput {
    pub website: String,
    pub website_url: String,
    pub content: Option<String>,
    pub missing_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NarrationRequest {
    pub feature: String,
    pub city_name: String,
    pub dates: StayDates,
    /// 功能检查说明（填充后的模板）
    pub feature_checks: String,
    pub recordings: Vec<NarrationInput>,
    /// 对比分析的系统提示词，未配置时用默认值
    pub system_prompt: Option<String>,
}

#[async_trait]
pub trait ComparisonNarrator: Send + Sync {
    async fn narrate(&self, request: &NarrationRequest) -> Result<String>;
}

pub struct LlmNarrator {
    llm: LlmService,
}

impl LlmNarrator {
    pub fn new(config: &Config) -> Self {
        Self {
            llm: LlmService::new(config),
        }
    }
}

/// 构建对比提示词
pub fn build_comparison_prompt(request: &NarrationRequest) -> String {
    let mut website_results = Vec::new();
    for (i, rec) in request.recordings.iter().enumerate() {
        let n = i + 1;
        website_results.push(format!("Website {}: {} ({})", n, rec.website, rec.website_url));
        match (&rec.content, &rec.missing_reason) {
            (Some(content), _) => website_results.push(format!("Results {}: {}", n, content)),
            (None, reason) => website_results.push(format!(
                "Results {}: MISSING ({})",
                n,
                reason.as_deref().unwrap_or("no recording")
            )),
        }
        website_results.push(String::new());
    }

    format!(
        "Based on these detailed recording sessions that were produced by executing the following test request, evaluate and compare:\n\n\
         Feature: {}\nDestination: {}\nStay: {} to {}\n\nFeature checks:\n{}\n\n\
         Recording Results from executing the above checks:\n{}",
        title_case(&request.feature),
        request.city_name,
        request.dates.checkin_str(),
        request.dates.checkout_str(),
        request.feature_checks,
        website_results.join("\n")
    )
}

/// `relevance_of_top_listings` → `Relevance Of Top Listings`
fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl ComparisonNarrator for LlmNarrator {
    async fn narrate(&self, request: &NarrationRequest) -> Result<String> {
        if !self.llm.is_configured() {
            anyhow::bail!("LLM_API_KEY 未配置，跳过对比分析");
        }
        let prompt = build_comparison_prompt(request);
        let system_prompt = request
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_COMPARISON_SYSTEM_PROMPT);
        let text = self.llm.send_to_llm(&prompt, Some(system_prompt)).await?;
        Ok(text)
    }
}
