//! 结果聚合器 - 编排层
//!
//! 单元组全部成员进入终态后，把每个网站的结果归一成评分记录，写出对比产物。
//!
//! - 启用网站集合中的每个网站都有一个条目，失败或未调度的网站用显式的缺失标记
//! - 组级统计只来自成功的单元
//! - 叙述分析可选，失败、超时或运行停止时只记日志，产物照常写出

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::infrastructure::{OutputStore, RunLog};
use crate::models::{
    CellGroup, CellStatus, ComparisonArtifact, EntryOutcome, EvaluationCell, GroupKey, GroupStats,
    RawResult, RecordingFile, StayDates, WebsiteEntry,
};
use crate::models::matrix::DEFAULT_NARRATION_TIMEOUT;
use crate::services::{ComparisonNarrator, NarrationInput, NarrationRequest, RatingExtractor};
use crate::workflow::cell_executor::cancelled;

const NEVER_SCHEDULED: &str = "未执行（运行在该单元开始前停止）";

/// 单个网站的证据：来自内存中的单元，或来自已落盘的录制文件
#[derive(Debug, Clone)]
struct Evidence {
    website: String,
    website_url: String,
    attempts: u32,
    content: Option<String>,
    missing_reason: Option<String>,
}

impl Evidence {
    fn from_cell(website: &str, cell: Option<&EvaluationCell>) -> Self {
        let Some(cell) = cell else {
            return Self::missing(website, NEVER_SCHEDULED.to_string());
        };
        let (content, missing_reason) = match (cell.status, &cell.result) {
            (CellStatus::Succeeded, Some(raw)) => (Some(raw.content.clone()), None),
            (CellStatus::FailedTerminal, _) => (
                None,
                Some(cell.error.clone().unwrap_or_else(|| "失败".to_string())),
            ),
            _ => (None, Some(NEVER_SCHEDULED.to_string())),
        };
        Self {
            website: website.to_string(),
            website_url: cell.website_url.clone(),
            attempts: cell.attempts,
            content,
            missing_reason,
        }
    }

    fn from_recording(website: &str, recording: RecordingFile) -> Self {
        let (content, missing_reason) = match (recording.status, recording.content) {
            (CellStatus::Succeeded, Some(content)) => (Some(content), None),
            _ => (
                None,
                Some(recording.error.unwrap_or_else(|| "失败".to_string())),
            ),
        };
        Self {
            website: website.to_string(),
            website_url: recording.website_url,
            attempts: recording.attempts,
            content,
            missing_reason,
        }
    }

    fn missing(website: &str, reason: String) -> Self {
        Self {
            website: website.to_string(),
            website_url: String::new(),
            attempts: 0,
            content: None,
            missing_reason: Some(reason),
        }
    }
}

pub struct Aggregator {
    store: OutputStore,
    extractor: Arc<dyn RatingExtractor>,
    narrator: Option<Arc<dyn ComparisonNarrator>>,
    comparison_system: Option<String>,
    narration_timeout: Duration,
}

impl Aggregator {
    pub fn new(
        store: OutputStore,
        extractor: Arc<dyn RatingExtractor>,
        narrator: Option<Arc<dyn ComparisonNarrator>>,
        comparison_system: Option<String>,
    ) -> Self {
        Self {
            store,
            extractor,
            narrator,
            comparison_system,
            narration_timeout: DEFAULT_NARRATION_TIMEOUT,
        }
    }

    pub fn with_narration_timeout(mut self, timeout: Duration) -> Self {
        self.narration_timeout = timeout;
        self
    }

    /// 为一个就绪的单元组生成并写出新的对比产物版本
    ///
    /// 停止标志置位后不再等待对比分析，产物不带叙述。
    pub async fn aggregate(
        &self,
        log: &RunLog,
        group: &CellGroup,
        members: &[EvaluationCell],
        cancel: watch::Receiver<bool>,
    ) -> Result<PathBuf, StoreError> {
        let evidence: Vec<Evidence> = group
            .websites
            .iter()
            .map(|website| {
                let cell = members.iter().find(|c| &c.key.website == website);
                Evidence::from_cell(website, cell)
            })
            .collect();

        let mut artifact = self.build_artifact(
            log.run_id(),
            &group.key,
            &group.city_name,
            group.dates,
            &group.feature_checks,
            &evidence,
        );
        artifact.narrative = self.narrate(&artifact, &evidence, Some(cancel)).await;

        let path = self.store.write_comparison(&artifact).await?;
        log.info(format!(
            "📑 [{}] 对比产物已生成 ({} 个有结果, {} 个缺失): {}",
            group.key,
            artifact.stats.rated,
            artifact.stats.missing,
            path.display()
        ))
        .await;
        Ok(path)
    }

    /// 从某次运行的录制文件重新生成对比产物，覆盖该版本
    ///
    /// 网站集合取自已有的产物，保证与当初启用的集合一致。
    pub async fn regenerate(
        &self,
        group: &GroupKey,
        run_id: &str,
    ) -> Result<ComparisonArtifact, StoreError> {
        let existing = self.store.read_comparison(group, run_id).await?;

        let mut evidence = Vec::with_capacity(existing.entries.len());
        for entry in &existing.entries {
            let key = group.cell(&entry.website);
            match self.store.read_recording(&key, run_id).await {
                Ok(recording) => evidence.push(Evidence::from_recording(&entry.website, recording)),
                Err(e) => {
                    warn!("[{}] 读取录制失败: {}", key, e);
                    evidence.push(Evidence::missing(&entry.website, format!("录制文件无法读取: {}", e)));
                }
            }
        }

        let mut artifact = self.build_artifact(
            run_id,
            group,
            &existing.city_name,
            existing.dates,
            &existing.feature_checks,
            &evidence,
        );
        artifact.narrative = self.narrate(&artifact, &evidence, None).await;

        self.store.regenerate_comparison(&artifact).await?;
        Ok(artifact)
    }

    fn build_artifact(
        &self,
        run_id: &str,
        group: &GroupKey,
        city_name: &str,
        dates: StayDates,
        feature_checks: &str,
        evidence: &[Evidence],
    ) -> ComparisonArtifact {
        let entries: Vec<WebsiteEntry> = evidence
            .iter()
            .map(|e| {
                let outcome = match (&e.content, &e.missing_reason) {
                    (Some(content), _) => EntryOutcome::Rated {
                        rating: self.extractor.extract(&RawResult::new(content.clone())),
                    },
                    (None, reason) => EntryOutcome::Missing {
                        reason: reason.clone().unwrap_or_else(|| NEVER_SCHEDULED.to_string()),
                    },
                };
                WebsiteEntry {
                    website: e.website.clone(),
                    attempts: e.attempts,
                    outcome,
                }
            })
            .collect();

        ComparisonArtifact {
            run_id: run_id.to_string(),
            group: group.clone(),
            city_name: city_name.to_string(),
            dates,
            feature_checks: feature_checks.to_string(),
            generated_at: Local::now(),
            stats: GroupStats::from_entries(&entries),
            entries,
            narrative: None,
        }
    }

    async fn narrate(
        &self,
        artifact: &ComparisonArtifact,
        evidence: &[Evidence],
        cancel: Option<watch::Receiver<bool>>,
    ) -> Option<String> {
        let narrator = self.narrator.as_ref()?;
        if artifact.stats.rated == 0 {
            debug!("[{}] 没有成功的录制，跳过对比分析", artifact.group);
            return None;
        }
        if cancel.as_ref().is_some_and(|c| *c.borrow()) {
            info!("[{}] 运行已停止，跳过对比分析", artifact.group);
            return None;
        }

        let request = NarrationRequest {
            feature: artifact.group.feature.clone(),
            city_name: artifact.city_name.clone(),
            dates: artifact.dates,
            feature_checks: artifact.feature_checks.clone(),
            recordings: evidence
                .iter()
                .map(|e| NarrationInput {
                    website: e.website.clone(),
                    website_url: e.website_url.clone(),
                    content: e.content.clone(),
                    missing_reason: e.missing_reason.clone(),
                })
                .collect(),
            system_prompt: self.comparison_system.clone(),
        };

        let call = tokio::time::timeout(self.narration_timeout, narrator.narrate(&request));
        let outcome = match cancel {
            Some(mut cancel) => tokio::select! {
                outcome = call => outcome,
                _ = cancelled(&mut cancel) => {
                    info!("[{}] 运行已停止，放弃对比分析", artifact.group);
                    return None;
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                warn!("[{}] 对比分析失败: {:#}", artifact.group, e);
                None
            }
            Err(_) => {
                warn!(
                    "[{}] 对比分析超时 ({})",
                    artifact.group,
                    humantime::format_duration(self.narration_timeout)
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use crate::models::CellKey;
    use crate::services::JsonBlockExtractor;

    struct FailingNarrator;

    /// 永远不返回的模型调用，记录被调用次数
    #[derive(Default)]
    struct HangingNarrator {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ComparisonNarrator for HangingNarrator {
        async fn narrate(&self, _request: &NarrationRequest) -> anyhow::Result<String> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[async_trait]
    impl ComparisonNarrator for FailingNarrator {
        async fn narrate(&self, _request: &NarrationRequest) -> anyhow::Result<String> {
            anyhow::bail!("model unavailable")
        }
    }

    fn dates() -> StayDates {
        StayDates {
            checkin: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            checkout: NaiveDate::from_ymd_opt(2026, 10, 21).unwrap(),
        }
    }

    fn group() -> CellGroup {
        CellGroup {
            key: GroupKey {
                feature: "relevance_of_top_listings".to_string(),
                city: "tokyo".to_string(),
                date_range: "next_day_one_night".to_string(),
            },
            city_name: "Tokyo".to_string(),
            dates: dates(),
            feature_checks: "Search hotels in Tokyo".to_string(),
            websites: vec!["agoda".to_string(), "booking_com".to_string(), "expedia".to_string()],
            members: vec![0, 1, 2],
        }
    }

    fn cell(website: &str, status: CellStatus, attempts: u32, content: Option<&str>) -> EvaluationCell {
        EvaluationCell {
            index: 1,
            key: CellKey {
                feature: "relevance_of_top_listings".to_string(),
                city: "tokyo".to_string(),
                date_range: "next_day_one_night".to_string(),
                website: website.to_string(),
            },
            city_name: "Tokyo".to_string(),
            website_url: format!("https://{}.example", website),
            site_instructions: None,
            dates: dates(),
            prompt: "p".to_string(),
            status,
            attempts,
            result: content.map(RawResult::new),
            error: match status {
                CellStatus::FailedTerminal => Some("已尝试 3 次仍失败: 502".to_string()),
                _ => None,
            },
        }
    }

    #[tokio::test]
    async fn test_every_enabled_website_is_represented() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path(), "recordings", "comparisons", dir.path().join("logs"));
        let log = store.create_run_log(Local::now()).await.unwrap();
        let aggregator = Aggregator::new(store.clone(), Arc::new(JsonBlockExtractor), Some(Arc::new(FailingNarrator)), None);

        let members = vec![
            cell("agoda", CellStatus::Succeeded, 1, Some("```json\n{\"score\": 6, \"summary\": \"ok\"}\n```")),
            cell("booking_com", CellStatus::FailedTerminal, 3, None),
            cell("expedia", CellStatus::Pending, 0, None),
        ];
        let (_stop, cancel) = watch::channel(false);
        aggregator.aggregate(&log, &group(), &members, cancel).await.unwrap();

        let artifact = store.read_comparison(&group().key, log.run_id()).await.unwrap();
        let websites: Vec<&str> = artifact.entries.iter().map(|e| e.website.as_str()).collect();
        assert_eq!(websites, vec!["agoda", "booking_com", "expedia"]);
        assert!(!artifact.entry("agoda").unwrap().is_missing());
        assert!(artifact.entry("booking_com").unwrap().is_missing());
        assert!(artifact.entry("expedia").unwrap().is_missing());
        assert_eq!(artifact.stats.mean_score, Some(6.0));
        assert_eq!(artifact.stats.missing, 2);
        assert_eq!(artifact.narrative, None);
        assert_eq!(artifact.entry("booking_com").unwrap().attempts, 3);
    }

    fn rated_members() -> Vec<EvaluationCell> {
        vec![
            cell("agoda", CellStatus::Succeeded, 1, Some("```json\n{\"score\": 6, \"summary\": \"ok\"}\n```")),
            cell("booking_com", CellStatus::Succeeded, 1, Some("```json\n{\"score\": 8, \"summary\": \"ok\"}\n```")),
            cell("expedia", CellStatus::FailedTerminal, 3, None),
        ]
    }

    #[tokio::test]
    async fn test_stalled_narration_times_out() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path(), "recordings", "comparisons", dir.path().join("logs"));
        let log = store.create_run_log(Local::now()).await.unwrap();
        let narrator = Arc::new(HangingNarrator::default());
        let aggregator = Aggregator::new(store.clone(), Arc::new(JsonBlockExtractor), Some(narrator.clone()), None)
            .with_narration_timeout(Duration::from_millis(50));

        let (_stop, cancel) = watch::channel(false);
        let written = tokio::time::timeout(
            Duration::from_secs(5),
            aggregator.aggregate(&log, &group(), &rated_members(), cancel),
        )
        .await
        .expect("aggregation must not wait for a stalled narrator");
        assert!(written.is_ok());

        let artifact = store.read_comparison(&group().key, log.run_id()).await.unwrap();
        assert_eq!(artifact.narrative, None);
        assert_eq!(artifact.stats.rated, 2);
        assert_eq!(narrator.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_abandons_pending_narration() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path(), "recordings", "comparisons", dir.path().join("logs"));
        let log = store.create_run_log(Local::now()).await.unwrap();
        let narrator = Arc::new(HangingNarrator::default());
        let aggregator = Arc::new(Aggregator::new(
            store.clone(),
            Arc::new(JsonBlockExtractor),
            Some(narrator.clone()),
            None,
        ));

        let (stop, cancel) = watch::channel(false);
        let task = {
            let aggregator = aggregator.clone();
            let log = log.clone();
            tokio::spawn(async move { aggregator.aggregate(&log, &group(), &rated_members(), cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.send_replace(true);

        let written = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("stop must release the aggregation")
            .unwrap();
        assert!(written.is_ok());
        let artifact = store.read_comparison(&group().key, log.run_id()).await.unwrap();
        assert_eq!(artifact.narrative, None);

        // 已停止时不再发起新的对比分析
        let (_stop, stopped) = watch::channel(true);
        let other = store.create_run_log(Local::now()).await.unwrap();
        aggregator.aggregate(&other, &group(), &rated_members(), stopped).await.unwrap();
        assert_eq!(narrator.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
