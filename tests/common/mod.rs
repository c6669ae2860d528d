#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use travel_quality_eval::models::{parse_matrix_definition, MatrixDefinition, RawResult};
use travel_quality_eval::services::{
    ComparisonNarrator, EvaluationRequest, Evaluator, JsonBlockExtractor, NarrationRequest,
};
use travel_quality_eval::{EvaluationError, OutputStore, RunController, RunStatus};

/// 按网站脚本化的评估能力，脚本用完后一律返回成功
#[derive(Default)]
pub struct ScriptedEvaluator {
    scripts: Mutex<HashMap<String, VecDeque<Result<RawResult, EvaluationError>>>>,
    /// 按城市键设置每次尝试的耗时
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, website: &str, steps: Vec<Result<RawResult, EvaluationError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(website.to_string(), steps.into());
        self
    }

    pub fn delay(mut self, city: &str, delay: Duration) -> Self {
        self.delays.insert(city.to_string(), delay);
        self
    }

    /// 每次调用对应的单元键
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, website: &str) -> usize {
        self.calls()
            .iter()
            .filter(|key| key.ends_with(&format!("/{}", website)))
            .count()
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<RawResult, EvaluationError> {
        self.calls.lock().unwrap().push(request.key.to_string());
        if let Some(delay) = self.delays.get(&request.key.city) {
            tokio::time::sleep(*delay).await;
        }
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.key.website)
            .and_then(VecDeque::pop_front);
        step.unwrap_or_else(|| rated(7.0))
    }
}

pub fn rated(score: f64) -> Result<RawResult, EvaluationError> {
    Ok(RawResult::new(format!(
        "Observed the first 10 listings.\n```json\n{{\"score\": {}, \"summary\": \"score {}\"}}\n```",
        score, score
    )))
}

pub fn transient(message: &str) -> Result<RawResult, EvaluationError> {
    Err(EvaluationError::retryable(message))
}

pub fn structural(message: &str) -> Result<RawResult, EvaluationError> {
    Err(EvaluationError::structural(message))
}

/// 单功能、单日期区间的矩阵
pub fn definition(websites: &[&str], cities: &[&str], max_workers: usize) -> MatrixDefinition {
    parse_matrix_definition(&definition_toml(websites, cities, max_workers), "test").unwrap()
}

/// `definition` 对应的 TOML 文本
pub fn definition_toml(websites: &[&str], cities: &[&str], max_workers: usize) -> String {
    let quote = |items: &[&str]| {
        items
            .iter()
            .map(|s| format!("\"{}\"", s))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        r#"
[matrix]
websites = [{websites}]
features = ["relevance_of_top_listings"]
cities = [{cities}]
date_ranges = ["next_day_one_night"]

[websites.booking_com]
url = "https://www.booking.com"

[websites.google_travel]
url = "https://www.google.com/travel/"

[websites.agoda]
url = "https://www.agoda.com"

[features.relevance_of_top_listings]
prompt = "Search hotels in {{destination}} from {{checkin_date}} to {{checkout_date}}."

[cities]
amsterdam = "Amsterdam"
tokyo = "Tokyo"
zagreb = "Zagreb"
zurich = "Zurich"

[date_ranges.next_day_one_night]
checkin_offset = 1
checkout_offset = 2

[run]
max_workers = {max_workers}
max_attempts = 3
backoff_initial = "10ms"
backoff_max = "40ms"
attempt_timeout = "5s"
"#,
        websites = quote(websites),
        cities = quote(cities),
        max_workers = max_workers,
    )
}

pub struct TestEnv {
    _dir: TempDir,
    pub store: OutputStore,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(
            dir.path(),
            "text_recordings",
            "comparison_analysis",
            dir.path().join("logs"),
        );
        Self { _dir: dir, store }
    }

    pub fn path(&self) -> &Path {
        self._dir.path()
    }

    pub fn controller(&self, evaluator: Arc<ScriptedEvaluator>) -> RunController {
        RunController::spawn(
            self.store.clone(),
            evaluator,
            Arc::new(JsonBlockExtractor),
            None,
        )
    }

    pub fn controller_with_narrator(
        &self,
        evaluator: Arc<ScriptedEvaluator>,
        narrator: Arc<dyn ComparisonNarrator>,
    ) -> RunController {
        RunController::spawn(
            self.store.clone(),
            evaluator,
            Arc::new(JsonBlockExtractor),
            Some(narrator),
        )
    }
}

/// 永远不返回的对比分析，模拟卡住的模型请求
#[derive(Default)]
pub struct StalledNarrator {
    calls: AtomicUsize,
}

impl StalledNarrator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComparisonNarrator for StalledNarrator {
    async fn narrate(&self, _request: &NarrationRequest) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// 带超时的 wait，避免测试挂死
pub async fn wait(controller: &RunController) -> RunStatus {
    tokio::time::timeout(Duration::from_secs(20), controller.wait())
        .await
        .expect("run did not finish in time")
        .expect("controller alive")
}
