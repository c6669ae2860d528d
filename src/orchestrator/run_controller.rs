//! 运行控制器 - 编排层
//!
//! 把一次完整的矩阵执行当作一个可取消的任务来管理。
//!
//! ## 结构
//!
//! 控制器是一个独立的 actor 任务，独占运行状态：
//! - `start` / `stop` 通过命令通道串行送达，回复走 oneshot
//! - 状态快照通过 `watch` 发布，`status()` 直接读取，不会阻塞
//! - 单元在 `JoinSet` 中并发执行（上限 `max_workers`），进度事件经 mpsc 回到 actor
//! - 单元组就绪后立即在另一个 `JoinSet` 中聚合，组与组之间无顺序
//!
//! ```text
//! Idle --start--> Running --全部单元终态--> Completed
//!                 Running --配置无效 / 内部故障--> Errored
//!                 Running --stop + 在途任务排空--> Stopped
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};

use crate::error::{RunError, StoreError};
use crate::infrastructure::{OutputStore, RunLog};
use crate::models::{CellGroup, CellStatus, EvaluationCell, MatrixDefinition};
use crate::orchestrator::aggregator::Aggregator;
use crate::orchestrator::matrix_builder::build_matrix;
use crate::services::{ComparisonNarrator, Evaluator, RatingExtractor};
use crate::workflow::{CellCtx, CellEvent, CellExecutor, CellOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Errored,
    Stopped,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Errored | RunState::Stopped)
    }
}

/// 各状态的单元数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CellCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed_retryable: usize,
    pub failed_terminal: usize,
}

impl CellCounts {
    pub fn from_cells(cells: &[EvaluationCell]) -> Self {
        let mut counts = CellCounts::default();
        for cell in cells {
            match cell.status {
                CellStatus::Pending => counts.pending += 1,
                CellStatus::Running => counts.running += 1,
                CellStatus::Succeeded => counts.succeeded += 1,
                CellStatus::FailedRetryable => counts.failed_retryable += 1,
                CellStatus::FailedTerminal => counts.failed_terminal += 1,
            }
        }
        counts
    }
}

/// 运行状态快照
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub state: RunState,
    pub run_id: Option<String>,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
    pub log_file: Option<PathBuf>,
    pub counts: CellCounts,
    pub total_cells: usize,
    pub groups_total: usize,
    pub groups_aggregated: usize,
    /// Errored 时的错误信息
    pub error: Option<String>,
    pub stop_requested: bool,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            run_id: None,
            started_at: None,
            finished_at: None,
            log_file: None,
            counts: CellCounts::default(),
            total_cells: 0,
            groups_total: 0,
            groups_aggregated: 0,
            error: None,
            stop_requested: false,
        }
    }
}

enum Command {
    Start {
        definition: Box<MatrixDefinition>,
        reply: oneshot::Sender<Result<String, RunError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), RunError>>,
    },
}

/// 运行控制器句柄，可以随意 clone
#[derive(Clone)]
pub struct RunController {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<RunStatus>,
    store: OutputStore,
}

impl RunController {
    /// 启动控制器任务（必须在 tokio runtime 中调用）
    pub fn spawn(
        store: OutputStore,
        evaluator: Arc<dyn Evaluator>,
        extractor: Arc<dyn RatingExtractor>,
        narrator: Option<Arc<dyn ComparisonNarrator>>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(RunStatus::default());

        let actor = Actor {
            store: store.clone(),
            evaluator,
            extractor,
            narrator,
            status_tx,
            active: None,
        };
        tokio::spawn(actor.run(command_rx));

        Self {
            commands,
            status,
            store,
        }
    }

    /// 开始一次运行，返回 run_id
    ///
    /// 已有运行处于 Running 时返回 `Conflict`，且不改变任何状态。
    pub async fn start(&self, definition: MatrixDefinition) -> Result<String, RunError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Start {
                definition: Box::new(definition),
                reply,
            })
            .map_err(|_| RunError::ControllerUnavailable)?;
        rx.await.map_err(|_| RunError::ControllerUnavailable)?
    }

    /// 请求停止：不再发起新的尝试或新的单元，在途尝试跑完后进入 Stopped
    pub async fn stop(&self) -> Result<(), RunError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stop { reply })
            .map_err(|_| RunError::ControllerUnavailable)?;
        rx.await.map_err(|_| RunError::ControllerUnavailable)?
    }

    pub fn status(&self) -> RunStatus {
        self.status.borrow().clone()
    }

    /// 等待当前运行离开 Running 状态
    pub async fn wait(&self) -> Result<RunStatus, RunError> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|s| s.state != RunState::Running)
            .await
            .map_err(|_| RunError::ControllerUnavailable)?;
        Ok(status.clone())
    }

    /// 当前（或最近一次）运行的日志内容
    pub async fn logs(&self) -> Result<String, RunError> {
        let current = self
            .status()
            .log_file
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()));
        let name = match current {
            Some(name) => name,
            None => match self.store.list_log_files().await?.into_iter().next() {
                Some(latest) => latest,
                None => return Ok(String::new()),
            },
        };
        Ok(self.store.read_log(&name).await?)
    }

    pub async fn read_log(&self, file_name: &str) -> Result<String, RunError> {
        Ok(self.store.read_log(file_name).await?)
    }

    /// 所有运行日志文件，最新的在前
    pub async fn list_log_files(&self) -> Result<Vec<String>, RunError> {
        Ok(self.store.list_log_files().await?)
    }
}

// ========== actor ==========

struct Actor {
    store: OutputStore,
    evaluator: Arc<dyn Evaluator>,
    extractor: Arc<dyn RatingExtractor>,
    narrator: Option<Arc<dyn ComparisonNarrator>>,
    status_tx: watch::Sender<RunStatus>,
    active: Option<ActiveRun>,
}

enum Signal {
    Event(CellEvent),
    CellDone(Result<(usize, CellOutcome), JoinError>),
    Aggregated(Result<(usize, Result<PathBuf, StoreError>), JoinError>),
}

/// 一次正在进行的运行，只由 actor 访问
struct ActiveRun {
    log: RunLog,
    started_at: DateTime<Local>,
    cells: Vec<EvaluationCell>,
    groups: Vec<CellGroup>,
    /// 单元下标 → 所属单元组下标
    cell_group: Vec<usize>,
    aggregation_started: Vec<bool>,
    groups_aggregated: usize,
    next_cell: usize,
    max_workers: usize,
    executor: Arc<CellExecutor>,
    aggregator: Arc<Aggregator>,
    workers: JoinSet<(usize, CellOutcome)>,
    aggregations: JoinSet<(usize, Result<PathBuf, StoreError>)>,
    events_tx: mpsc::UnboundedSender<CellEvent>,
    events_rx: mpsc::UnboundedReceiver<CellEvent>,
    cancel_tx: watch::Sender<bool>,
    stop_requested: bool,
    /// 停止请求到达时仍有单元未结束；只剩聚合在途时停止，运行仍算完成
    interrupted: bool,
    fault: Option<String>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start { definition, reply }) => {
                        let result = self.start(*definition).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Stop { reply }) => {
                        let result = self.stop().await;
                        let _ = reply.send(result);
                    }
                    None => break,
                },
                signal = next_signal(&mut self.active) => {
                    self.handle_signal(signal).await;
                }
            }
        }

        // 所有句柄都已释放：不再调度，等在途尝试结束
        if let Some(run) = self.active.as_mut() {
            run.cancel_tx.send_replace(true);
            while run.workers.join_next().await.is_some() {}
            while run.aggregations.join_next().await.is_some() {}
        }
        debug!("运行控制器退出");
    }

    async fn start(&mut self, definition: MatrixDefinition) -> Result<String, RunError> {
        if let Some(run) = &self.active {
            return Err(RunError::Conflict {
                run_id: run.log.run_id().to_string(),
            });
        }

        let started_at = Local::now();
        let log = match self.store.create_run_log(started_at).await {
            Ok(log) => log,
            Err(e) => {
                let err = RunError::from(e);
                error!("💥 无法创建运行日志: {}", err);
                self.status_tx.send_replace(RunStatus {
                    state: RunState::Errored,
                    started_at: Some(started_at),
                    finished_at: Some(Local::now()),
                    error: Some(err.to_string()),
                    ..RunStatus::default()
                });
                return Err(err);
            }
        };
        log.info(format!("🚀 开始评估运行: {}", log.run_id())).await;

        let built = definition
            .validate()
            .and_then(|validated| Ok((build_matrix(&validated, started_at.date_naive())?, validated)));
        let (matrix, validated) = match built {
            Ok(built) => built,
            Err(e) => {
                log.error(format!("❌ 配置无效，运行中止: {}", e)).await;
                self.status_tx.send_replace(RunStatus {
                    state: RunState::Errored,
                    run_id: Some(log.run_id().to_string()),
                    started_at: Some(started_at),
                    finished_at: Some(Local::now()),
                    log_file: Some(log.path().to_path_buf()),
                    error: Some(e.to_string()),
                    ..RunStatus::default()
                });
                return Err(RunError::Configuration(e));
            }
        };

        let run_options = validated.run().clone();
        log.info(format!(
            "📊 矩阵: {} 个单元, {} 个单元组 (功能 {} × 城市 {} × 日期 {} × 网站 {})",
            matrix.cells.len(),
            matrix.groups.len(),
            validated.features().len(),
            validated.cities().len(),
            validated.date_ranges().len(),
            validated.websites().len()
        ))
        .await;
        log.info(format!(
            "⚙️ 并发 {}, 每单元最多尝试 {} 次, 单次超时 {}",
            run_options.max_workers,
            run_options.max_attempts,
            humantime::format_duration(run_options.attempt_timeout)
        ))
        .await;

        let executor = CellExecutor::new(
            self.evaluator.clone(),
            self.store.clone(),
            run_options.clone(),
            validated.prompts().browser_agent_system.clone(),
        );
        let aggregator = Aggregator::new(
            self.store.clone(),
            self.extractor.clone(),
            self.narrator.clone(),
            validated.prompts().comparison_system.clone(),
        )
        .with_narration_timeout(run_options.narration_timeout);

        let mut cell_group = vec![0; matrix.cells.len()];
        for (gi, group) in matrix.groups.iter().enumerate() {
            for &member in &group.members {
                cell_group[member] = gi;
            }
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, _) = watch::channel(false);
        let run_id = log.run_id().to_string();

        self.active = Some(ActiveRun {
            log,
            started_at,
            aggregation_started: vec![false; matrix.groups.len()],
            cells: matrix.cells,
            groups: matrix.groups,
            cell_group,
            groups_aggregated: 0,
            next_cell: 0,
            max_workers: run_options.max_workers,
            executor: Arc::new(executor),
            aggregator: Arc::new(aggregator),
            workers: JoinSet::new(),
            aggregations: JoinSet::new(),
            events_tx,
            events_rx,
            cancel_tx,
            stop_requested: false,
            interrupted: false,
            fault: None,
        });

        if let Some(run) = self.active.as_mut() {
            run.dispatch();
        }
        self.settle().await;
        Ok(run_id)
    }

    async fn stop(&mut self) -> Result<(), RunError> {
        let Some(run) = self.active.as_mut() else {
            return Err(RunError::NotRunning);
        };
        if !run.stop_requested {
            run.stop_requested = true;
            run.interrupted = !run.all_cells_terminal();
            run.cancel_tx.send_replace(true);
            run.log
                .warn(format!(
                    "⏹️ 收到停止请求，等待 {} 个在途单元结束",
                    run.workers.len()
                ))
                .await;
        }
        self.settle().await;
        Ok(())
    }

    async fn handle_signal(&mut self, signal: Signal) {
        let Some(run) = self.active.as_mut() else {
            return;
        };

        match signal {
            Signal::Event(CellEvent::AttemptStarted { cell_index, attempt }) => {
                if let Some(cell) = run.cells.get_mut(cell_index - 1) {
                    if !cell.is_terminal() {
                        cell.status = CellStatus::Running;
                        cell.attempts = attempt;
                    }
                }
            }
            Signal::Event(CellEvent::AttemptFailed {
                cell_index, error, ..
            }) => {
                if let Some(cell) = run.cells.get_mut(cell_index - 1) {
                    cell.fail_retryable(error);
                }
            }
            Signal::CellDone(Ok((idx, outcome))) => {
                if let Some(e) = outcome.persist_error {
                    run.record_fault(format!("录制保存失败 ({}): {}", outcome.cell.key, e))
                        .await;
                }
                run.cells[idx] = outcome.cell;
                run.aggregate_if_ready(run.cell_group[idx]);
            }
            Signal::CellDone(Err(e)) => {
                run.record_fault(format!("单元任务异常退出: {}", e)).await;
            }
            Signal::Aggregated(Ok((_, Ok(_)))) => {
                run.groups_aggregated += 1;
            }
            Signal::Aggregated(Ok((gi, Err(e)))) => {
                let key = run.groups[gi].key.to_string();
                run.record_fault(format!("对比产物写入失败 ({}): {}", key, e))
                    .await;
            }
            Signal::Aggregated(Err(e)) => {
                run.record_fault(format!("聚合任务异常退出: {}", e)).await;
            }
        }

        run.dispatch();
        self.settle().await;
    }

    /// 发布最新状态；运行结束时转入终态并释放运行
    async fn settle(&mut self) {
        let Some(run) = self.active.as_ref() else {
            return;
        };
        let Some(state) = run.finished_state() else {
            self.status_tx.send_replace(run.status(RunState::Running));
            return;
        };

        let Some(mut run) = self.active.take() else {
            return;
        };
        if state == RunState::Errored {
            let reason = run.fault.clone().unwrap_or_default();
            for cell in run.cells.iter_mut().filter(|c| c.status == CellStatus::Running) {
                cell.fail_terminal(format!("运行异常中止: {}", reason));
            }
        }

        let mut status = run.status(state);
        status.finished_at = Some(Local::now());
        let summary = format!(
            "🏁 运行结束: {:?} (成功 {}, 失败 {}, 未执行 {}, 对比产物 {}/{})",
            state,
            status.counts.succeeded,
            status.counts.failed_terminal,
            status.counts.pending,
            status.groups_aggregated,
            status.groups_total
        );
        match state {
            RunState::Errored => run.log.error(summary).await,
            _ => run.log.info(summary).await,
        }
        self.status_tx.send_replace(status);
    }
}

impl ActiveRun {
    fn dispatch(&mut self) {
        if self.stop_requested || self.fault.is_some() {
            return;
        }
        let total = self.cells.len();
        while self.workers.len() < self.max_workers && self.next_cell < total {
            let idx = self.next_cell;
            self.next_cell += 1;

            let cell = self.cells[idx].clone();
            let ctx = CellCtx::new(self.log.clone(), cell.index, total, cell.key.clone());
            let executor = self.executor.clone();
            let events = self.events_tx.clone();
            let cancel = self.cancel_tx.subscribe();

            self.workers.spawn(async move {
                let outcome = executor.run(&ctx, cell, &events, cancel).await;
                (idx, outcome)
            });
        }
    }

    /// 组内全部单元终态后才聚合，每组只聚合一次
    fn aggregate_if_ready(&mut self, gi: usize) {
        if self.aggregation_started[gi] || !self.groups[gi].is_ready(&self.cells) {
            return;
        }
        self.aggregation_started[gi] = true;

        let group = self.groups[gi].clone();
        let members: Vec<EvaluationCell> = group
            .members
            .iter()
            .map(|&i| self.cells[i].clone())
            .collect();
        let aggregator = self.aggregator.clone();
        let log = self.log.clone();
        let cancel = self.cancel_tx.subscribe();

        self.aggregations.spawn(async move {
            let result = aggregator.aggregate(&log, &group, &members, cancel).await;
            (gi, result)
        });
    }

    async fn record_fault(&mut self, message: String) {
        self.log.error(format!("💥 内部错误: {}", message)).await;
        if self.fault.is_none() {
            self.fault = Some(message);
        }
        self.cancel_tx.send_replace(true);
    }

    fn finished_state(&self) -> Option<RunState> {
        if !self.workers.is_empty() || !self.aggregations.is_empty() {
            return None;
        }
        if self.fault.is_some() {
            Some(RunState::Errored)
        } else if self.interrupted {
            Some(RunState::Stopped)
        } else if self.all_cells_terminal() {
            Some(RunState::Completed)
        } else {
            None
        }
    }

    fn all_cells_terminal(&self) -> bool {
        self.cells.iter().all(EvaluationCell::is_terminal)
    }

    fn status(&self, state: RunState) -> RunStatus {
        RunStatus {
            state,
            run_id: Some(self.log.run_id().to_string()),
            started_at: Some(self.started_at),
            finished_at: None,
            log_file: Some(self.log.path().to_path_buf()),
            counts: CellCounts::from_cells(&self.cells),
            total_cells: self.cells.len(),
            groups_total: self.groups.len(),
            groups_aggregated: self.groups_aggregated,
            error: self.fault.clone(),
            stop_requested: self.stop_requested,
        }
    }
}

async fn next_signal(active: &mut Option<ActiveRun>) -> Signal {
    let Some(run) = active.as_mut() else {
        return std::future::pending().await;
    };

    // 先处理进度事件，保证同一单元的事件先于它的完成信号
    tokio::select! {
        biased;
        Some(event) = run.events_rx.recv() => Signal::Event(event),
        Some(done) = run.workers.join_next() => Signal::CellDone(done),
        Some(done) = run.aggregations.join_next() => Signal::Aggregated(done),
        else => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_status() {
        let mut cells = Vec::new();
        for status in [
            CellStatus::Pending,
            CellStatus::Succeeded,
            CellStatus::Succeeded,
            CellStatus::FailedTerminal,
        ] {
            let mut cell: EvaluationCell = serde_json::from_value(serde_json::json!({
                "index": 1,
                "key": {"feature": "f", "city": "c", "date_range": "d", "website": "w"},
                "city_name": "C",
                "website_url": "https://w.example",
                "site_instructions": null,
                "dates": {"checkin": "2026-10-20", "checkout": "2026-10-21"},
                "prompt": "p",
                "status": "pending",
                "attempts": 0,
                "result": null,
                "error": null
            }))
            .unwrap();
            cell.status = status;
            cells.push(cell);
        }

        let counts = CellCounts::from_cells(&cells);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.succeeded, 2);
        assert_eq!(counts.failed_terminal, 1);
        assert_eq!(counts.running, 0);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Idle.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Stopped.is_terminal());
        assert!(RunState::Errored.is_terminal());
    }
}
