//! 落盘产物：单元录制文件与对比分析文件

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::models::cell::{CellKey, CellStatus, EvaluationCell, GroupKey, StayDates};

/// 每个网站固定形状的评分记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    /// 0..=10，无法提取时为空
    pub score: Option<f64>,
    pub summary: String,
}

/// 单元录制文件（成功时保存原始结果，失败时保存错误记录）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingFile {
    pub run_id: String,
    pub key: CellKey,
    pub website_url: String,
    pub dates: StayDates,
    pub status: CellStatus,
    pub attempts: u32,
    pub prompt: String,
    pub content: Option<String>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Local>,
}

impl RecordingFile {
    pub fn from_cell(run_id: &str, cell: &EvaluationCell) -> Self {
        Self {
            run_id: run_id.to_string(),
            key: cell.key.clone(),
            website_url: cell.website_url.clone(),
            dates: cell.dates,
            status: cell.status,
            attempts: cell.attempts,
            prompt: cell.prompt.clone(),
            content: cell.result.as_ref().map(|r| r.content.clone()),
            error: cell.error.clone(),
            recorded_at: Local::now(),
        }
    }

    /// 人类可读的 markdown 版本
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {} — {}", self.key.website, self.key.feature);
        let _ = writeln!(out);
        let _ = writeln!(out, "- URL: {}", self.website_url);
        let _ = writeln!(out, "- 城市: {}", self.key.city);
        let _ = writeln!(
            out,
            "- 日期: {} → {}",
            self.dates.checkin_str(),
            self.dates.checkout_str()
        );
        let _ = writeln!(out, "- 状态: {:?}", self.status);
        let _ = writeln!(out, "- 尝试次数: {}", self.attempts);
        let _ = writeln!(out);
        match (&self.content, &self.error) {
            (Some(content), _) => {
                let _ = writeln!(out, "{}", content);
            }
            (None, Some(error)) => {
                let _ = writeln!(out, "❌ Error: {}", error);
            }
            (None, None) => {}
        }
        out
    }
}

/// 对比产物中单个网站的条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntryOutcome {
    Rated { rating: RatingRecord },
    /// 显式缺失标记：失败、未调度或无法读取
    Missing { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebsiteEntry {
    pub website: String,
    pub attempts: u32,
    #[serde(flatten)]
    pub outcome: EntryOutcome,
}

impl WebsiteEntry {
    pub fn is_missing(&self) -> bool {
        matches!(self.outcome, EntryOutcome::Missing { .. })
    }

    pub fn score(&self) -> Option<f64> {
        match &self.outcome {
            EntryOutcome::Rated { rating } => rating.score,
            EntryOutcome::Missing { .. } => None,
        }
    }
}

/// 组级统计，只来自成功的单元
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub rated: usize,
    pub missing: usize,
    /// 每个网站的分数（无分数或缺失的网站不出现）
    pub scores: BTreeMap<String, f64>,
    pub mean_score: Option<f64>,
    pub best_website: Option<String>,
}

impl GroupStats {
    pub fn from_entries(entries: &[WebsiteEntry]) -> Self {
        let mut stats = GroupStats::default();
        for entry in entries {
            if entry.is_missing() {
                stats.missing += 1;
                continue;
            }
            stats.rated += 1;
            if let Some(score) = entry.score() {
                stats.scores.insert(entry.website.clone(), score);
            }
        }

        if !stats.scores.is_empty() {
            let total: f64 = stats.scores.values().sum();
            stats.mean_score = Some(total / stats.scores.len() as f64);
            stats.best_website = stats
                .scores
                .iter()
                .fold(None::<(&String, f64)>, |best, (site, &score)| match best {
                    Some((_, top)) if top >= score => best,
                    _ => Some((site, score)),
                })
                .map(|(site, _)| site.clone());
        }
        stats
    }
}

/// 一个单元组的对比分析产物
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonArtifact {
    pub run_id: String,
    pub group: GroupKey,
    pub city_name: String,
    pub dates: StayDates,
    pub feature_checks: String,
    pub generated_at: DateTime<Local>,
    /// 与启用网站集合一一对应
    pub entries: Vec<WebsiteEntry>,
    pub stats: GroupStats,
    pub narrative: Option<String>,
}

impl ComparisonArtifact {
    pub fn entry(&self, website: &str) -> Option<&WebsiteEntry> {
        self.entries.iter().find(|e| e.website == website)
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "# {} — {} ({} → {})",
            self.group.feature.replace('_', " "),
            self.city_name,
            self.dates.checkin_str(),
            self.dates.checkout_str()
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "运行: {}", self.run_id);
        let _ = writeln!(out);
        let _ = writeln!(out, "| 网站 | 分数 | 摘要 |");
        let _ = writeln!(out, "|---|---|---|");
        for entry in &self.entries {
            match &entry.outcome {
                EntryOutcome::Rated { rating } => {
                    let score = rating
                        .score
                        .map(|s| format!("{:.1}", s))
                        .unwrap_or_else(|| "-".to_string());
                    let _ = writeln!(
                        out,
                        "| {} | {} | {} |",
                        entry.website,
                        score,
                        rating.summary.replace('|', "/").replace('\n', " ")
                    );
                }
                EntryOutcome::Missing { reason } => {
                    let _ = writeln!(
                        out,
                        "| {} | MISSING | {} |",
                        entry.website,
                        reason.replace('|', "/").replace('\n', " ")
                    );
                }
            }
        }
        let _ = writeln!(out);
        match self.stats.mean_score {
            Some(mean) => {
                let _ = writeln!(
                    out,
                    "平均分: {:.2} (基于 {} 个网站)",
                    mean,
                    self.stats.scores.len()
                );
            }
            None => {
                let _ = writeln!(out, "平均分: -");
            }
        }
        if let Some(best) = &self.stats.best_website {
            let _ = writeln!(out, "最佳: {}", best);
        }
        if let Some(narrative) = &self.narrative {
            let _ = writeln!(out);
            let _ = writeln!(out, "## 对比分析");
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", narrative);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rated(site: &str, score: Option<f64>) -> WebsiteEntry {
        WebsiteEntry {
            website: site.to_string(),
            attempts: 1,
            outcome: EntryOutcome::Rated {
                rating: RatingRecord {
                    score,
                    summary: "ok".to_string(),
                },
            },
        }
    }

    fn missing(site: &str) -> WebsiteEntry {
        WebsiteEntry {
            website: site.to_string(),
            attempts: 3,
            outcome: EntryOutcome::Missing {
                reason: "exhausted".to_string(),
            },
        }
    }

    #[test]
    fn test_stats_exclude_missing_entries() {
        let stats = GroupStats::from_entries(&[rated("a", Some(8.0)), missing("b"), rated("c", Some(6.0))]);
        assert_eq!(stats.rated, 2);
        assert_eq!(stats.missing, 1);
        assert_eq!(stats.mean_score, Some(7.0));
        assert_eq!(stats.best_website.as_deref(), Some("a"));
    }

    #[test]
    fn test_stats_without_scores() {
        let stats = GroupStats::from_entries(&[rated("a", None), missing("b")]);
        assert_eq!(stats.rated, 1);
        assert_eq!(stats.mean_score, None);
        assert_eq!(stats.best_website, None);
    }

    #[test]
    fn test_entry_serializes_outcome_tag() {
        let json = serde_json::to_value(missing("b")).unwrap();
        assert_eq!(json["outcome"], "missing");
        assert_eq!(json["website"], "b");
        let back: WebsiteEntry = serde_json::from_value(json).unwrap();
        assert!(back.is_missing());
    }
}
