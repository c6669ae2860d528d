//! LLM 服务 - 业务能力层
//!
//! 只负责"把消息发给模型、拿回文本"，浏览器评估后端和对比分析都基于它。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型（兼容 OpenAI API 的服务）

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum LlmError {
    /// 请求本身有问题（参数非法等），重试没有意义
    #[error("LLM 请求无效: {0}")]
    InvalidRequest(String),

    #[error("LLM API 调用失败: {0}")]
    Api(String),

    #[error("LLM 返回内容为空 (模型: {0})")]
    EmptyContent(String),
}

impl From<OpenAIError> for LlmError {
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::InvalidArgument(msg) => LlmError::InvalidRequest(msg),
            other => LlmError::Api(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    configured: bool,
}

impl LlmService {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
            configured: !config.llm_api_key.trim().is_empty(),
        }
    }

    /// 是否配置了 API key
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// 通用的 LLM 调用
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    ///
    /// # 返回
    /// 去掉首尾空白的响应文本
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
    ) -> Result<String, LlmError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.len());

        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(2048u32)
            .build()?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            LlmError::from(e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| LlmError::EmptyContent(self.model_name.clone()))?;

        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(LlmError::EmptyContent(self.model_name.clone()));
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_without_api_key() {
        let service = LlmService::new(&Config::default());
        assert!(!service.is_configured());
        assert_eq!(service.model_name(), "gpt-4o");
    }

    #[test]
    fn test_invalid_argument_is_invalid_request() {
        let err = LlmError::from(OpenAIError::InvalidArgument("bad".to_string()));
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    /// 测试通用 LLM 调用（需要真实的 API key）
    #[tokio::test]
    #[ignore]
    async fn test_send_to_llm_simple() {
        let _ = tracing_subscriber::fmt::try_init();

        let service = LlmService::new(&Config::from_env());
        let response = service
            .send_to_llm("Reply with the single word: ok", Some("You are terse."))
            .await
            .unwrap();
        assert!(!response.is_empty());
    }
}
