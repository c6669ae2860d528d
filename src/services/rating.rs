//! 评分提取 - 业务能力层
//!
//! 从原始结果中提取固定形状的 `RatingRecord`。提取规则可插拔；
//! 默认实现只认一种约定格式：
//!
//! ````text
//! ```json
//! {"score": 7.5, "summary": "Top listings match the destination"}
//! ```
//! ````
//!
//! `score` 取值 0..=10，超出范围视为无分数。没有 JSON 块时用第一行非空文本作为摘要。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::models::{RatingRecord, RawResult};
use crate::utils::truncate_text;

const SUMMARY_MAX_CHARS: usize = 280;

pub trait RatingExtractor: Send + Sync {
    fn extract(&self, raw: &RawResult) -> RatingRecord;
}

/// 读取 ```json 代码块中的 score / summary
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBlockExtractor;

impl JsonBlockExtractor {
    fn block_regex() -> &'static Regex {
        static BLOCK: OnceLock<Regex> = OnceLock::new();
        BLOCK.get_or_init(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").expect("static regex"))
    }

    fn first_line(content: &str) -> String {
        content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(|line| truncate_text(line, SUMMARY_MAX_CHARS))
            .unwrap_or_default()
    }
}

impl RatingExtractor for JsonBlockExtractor {
    fn extract(&self, raw: &RawResult) -> RatingRecord {
        // 取最后一个 JSON 块，结论通常在末尾
        let block = Self::block_regex()
            .captures_iter(&raw.content)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| serde_json::from_str::<JsonValue>(m.as_str()).ok())
            .last();

        let Some(block) = block else {
            debug!("原始结果中没有评分 JSON 块");
            return RatingRecord {
                score: None,
                summary: Self::first_line(&raw.content),
            };
        };

        let score = block
            .get("score")
            .and_then(JsonValue::as_f64)
            .filter(|s| (0.0..=10.0).contains(s));
        let summary = block
            .get("summary")
            .and_then(JsonValue::as_str)
            .map(|s| truncate_text(s.trim(), SUMMARY_MAX_CHARS))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Self::first_line(&raw.content));

        RatingRecord { score, summary }
    }
}
