//! JS 执行器 - 基础设施层
//!
//! 持有一个评估尝试专用的 Page，只暴露"导航 / 执行 JS / 读页面文本"的能力，
//! 不认识单元、网站或评分。

use anyhow::{Context, Result};
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 导航并等待页面加载完成
    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("导航到 {} 失败", url))?;
        self.page
            .wait_for_navigation()
            .await
            .with_context(|| format!("等待 {} 加载失败", url))?;
        debug!("页面已加载: {}", url);
        Ok(())
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 页面标题与可见文本（按字符数截断）
    pub async fn snapshot(&self, max_chars: usize) -> Result<PageSnapshot> {
        let snapshot: PageSnapshot = self
            .eval_as(
                r#"
                (() => ({
                    url: window.location.href,
                    title: document.title || "",
                    text: document.body ? document.body.innerText : ""
                }))()
                "#,
            )
            .await?;

        Ok(PageSnapshot {
            text: crate::utils::logging::truncate_text(&snapshot.text, max_chars),
            ..snapshot
        })
    }

    /// 关闭页面，释放浏览器标签
    pub async fn close(self) -> Result<()> {
        self.page.close().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub text: String,
}
