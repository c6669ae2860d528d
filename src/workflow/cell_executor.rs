//! 单元执行流程 - 流程层
//!
//! 核心职责：把一个单元推进到终态
//!
//! 流程顺序：
//! 1. 检查停止标志 → 发起一次尝试（受 `attempt_timeout` 约束）
//! 2. 成功 → Succeeded；结构性错误 → 立即 FailedTerminal
//! 3. 瞬时错误 / 超时 → 指数退避后重试，用完 `max_attempts` 后 FailedTerminal
//! 4. 终态单元写入录制文件（成功结果或错误记录）
//!
//! 单元级错误不会向上传播：返回值永远是一个单元，只有落盘失败会额外带回。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::error::{CellError, StoreError};
use crate::infrastructure::OutputStore;
use crate::models::{EvaluationCell, RecordingFile, RunOptions};
use crate::services::{EvaluationRequest, Evaluator};
use crate::utils::truncate_text;
use crate::workflow::cell_ctx::CellCtx;

/// 执行过程中发给运行控制器的进度事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellEvent {
    AttemptStarted {
        cell_index: usize,
        attempt: u32,
    },
    /// 可重试的失败，单元进入退避
    AttemptFailed {
        cell_index: usize,
        attempt: u32,
        error: String,
    },
}

/// 单元执行结果
#[derive(Debug)]
pub struct CellOutcome {
    pub cell: EvaluationCell,
    /// 录制文件写入失败（属于内部故障，由控制器决定如何处理）
    pub persist_error: Option<StoreError>,
}

/// 单元执行流程
///
/// - 只依赖 `Evaluator` 能力和输出目录
/// - 不持有浏览器，不做调度
pub struct CellExecutor {
    evaluator: Arc<dyn Evaluator>,
    store: OutputStore,
    options: RunOptions,
    system_prompt: Option<String>,
}

impl CellExecutor {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        store: OutputStore,
        options: RunOptions,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            evaluator,
            store,
            options,
            system_prompt,
        }
    }

    pub async fn run(
        &self,
        ctx: &CellCtx,
        mut cell: EvaluationCell,
        events: &mpsc::UnboundedSender<CellEvent>,
        mut cancel: watch::Receiver<bool>,
    ) -> CellOutcome {
        let timeout = self.options.attempt_timeout;
        let mut last_error: Option<CellError> = None;

        loop {
            if *cancel.borrow() {
                match last_error.take() {
                    // 还没开始就被停止：保持 Pending，不落盘
                    None => {
                        ctx.log.info(format!("{} ⏹️ 运行已停止，跳过", ctx)).await;
                        return CellOutcome {
                            cell,
                            persist_error: None,
                        };
                    }
                    Some(last) => {
                        let err = CellError::Cancelled {
                            last: last.to_string(),
                        };
                        ctx.log.warn(format!("{} ⏹️ {}", ctx, err)).await;
                        cell.fail_terminal(err.to_string());
                        break;
                    }
                }
            }

            if !cell.begin_attempt() {
                break;
            }
            let attempt = cell.attempts;
            let _ = events.send(CellEvent::AttemptStarted {
                cell_index: ctx.cell_index,
                attempt,
            });
            ctx.log
                .info(format!(
                    "{} 🔍 第 {}/{} 次尝试: {}",
                    ctx, attempt, self.options.max_attempts, cell.website_url
                ))
                .await;

            let request = EvaluationRequest::from_cell(&cell, timeout, self.system_prompt.clone());
            let result = match tokio::time::timeout(timeout, self.evaluator.evaluate(&request)).await {
                Ok(Ok(raw)) => Ok(raw),
                Ok(Err(e)) => Err(CellError::from(e)),
                Err(_) => Err(CellError::Timeout(timeout)),
            };

            match result {
                Ok(raw) => {
                    ctx.log
                        .info(format!(
                            "{} ✅ 成功 (第 {} 次尝试): {}",
                            ctx,
                            attempt,
                            truncate_text(raw.content.lines().next().unwrap_or_default(), 80)
                        ))
                        .await;
                    cell.succeed(raw);
                    break;
                }
                Err(err) if !err.is_retryable() => {
                    ctx.log.error(format!("{} ❌ {}，不再重试", ctx, err)).await;
                    cell.fail_terminal(err.to_string());
                    break;
                }
                Err(err) if attempt >= self.options.max_attempts => {
                    ctx.log
                        .error(format!("{} ❌ 已尝试 {} 次仍失败: {}", ctx, attempt, err))
                        .await;
                    cell.fail_terminal(format!("已尝试 {} 次仍失败: {}", attempt, err));
                    break;
                }
                Err(err) => {
                    let backoff = self.options.backoff_after(attempt);
                    ctx.log
                        .warn(format!(
                            "{} ⚠️ 第 {} 次尝试失败: {}，{} 后重试",
                            ctx,
                            attempt,
                            err,
                            humantime::format_duration(backoff)
                        ))
                        .await;
                    cell.fail_retryable(err.to_string());
                    let _ = events.send(CellEvent::AttemptFailed {
                        cell_index: ctx.cell_index,
                        attempt,
                        error: err.to_string(),
                    });
                    last_error = Some(err);

                    wait_backoff(backoff, &mut cancel).await;
                }
            }
        }

        let persist_error = self.persist(ctx, &cell).await.err();
        CellOutcome {
            cell,
            persist_error,
        }
    }

    async fn persist(&self, ctx: &CellCtx, cell: &EvaluationCell) -> Result<(), StoreError> {
        let recording = RecordingFile::from_cell(&ctx.run_id, cell);
        match self.store.write_recording(&recording).await {
            Ok(path) => {
                ctx.log
                    .info(format!("{} 💾 录制已保存: {}", ctx, path.display()))
                    .await;
                Ok(())
            }
            Err(e) => {
                ctx.log.error(format!("{} 💥 录制保存失败: {}", ctx, e)).await;
                Err(e)
            }
        }
    }
}

/// 退避等待，停止请求会提前结束等待
async fn wait_backoff(backoff: Duration, cancel: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(backoff) => {}
        _ = cancelled(cancel) => {}
    }
}

/// 停止标志置位时返回；发送端关闭后永不返回
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            // 发送端已关闭，不会再有停止请求
            std::future::pending::<()>().await;
        }
    }
}
