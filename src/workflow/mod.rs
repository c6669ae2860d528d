//! 流程层（Workflow Layer）
//!
//! 定义"一个单元"的完整执行流程：尝试 → 超时 / 失败分类 → 退避 → 重试 → 落盘。
//! 不持有浏览器，也不关心调度，只依赖业务能力层的 `Evaluator` 和基础设施层的输出目录。

pub mod cell_ctx;
pub mod cell_executor;

pub use cell_ctx::CellCtx;
pub use cell_executor::{CellEvent, CellExecutor, CellOutcome};
