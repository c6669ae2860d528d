//! 评估能力接口 - 业务能力层
//!
//! 引擎唯一的慢速、非确定性依赖。具体后端（浏览器 + LLM、脚本化假实现……）
//! 都藏在 `Evaluator` 之后，单元执行器不关心是哪一个。

use std::time::Duration;

use async_trait::async_trait;

use crate::error::EvaluationError;
use crate::models::{CellKey, EvaluationCell, RawResult, StayDates};

/// 一次评估调用的全部输入
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub key: CellKey,
    pub website_url: String,
    /// 站点专属指令（最高优先级）
    pub site_instructions: Option<String>,
    pub city_name: String,
    pub dates: StayDates,
    /// 已填充好的完整提示词
    pub prompt: String,
    /// 浏览器代理的基础系统提示词，未配置时由后端决定
    pub system_prompt: Option<String>,
    /// 单次尝试的时间上限；执行器在外层同样强制，后端用它及时释放页面
    pub timeout: Duration,
}

impl EvaluationRequest {
    pub fn from_cell(cell: &EvaluationCell, timeout: Duration, system_prompt: Option<String>) -> Self {
        Self {
            key: cell.key.clone(),
            website_url: cell.website_url.clone(),
            site_instructions: cell.site_instructions.clone(),
            city_name: cell.city_name.clone(),
            dates: cell.dates,
            prompt: cell.prompt.clone(),
            system_prompt,
            timeout,
        }
    }
}

/// 外部评估能力：驱动一次浏览器会话并返回原始结果
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<RawResult, EvaluationError>;
}
