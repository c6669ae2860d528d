//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责矩阵展开、并发调度和结果聚合，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `matrix_builder` - 测试矩阵构建器
//! - 把校验过的配置展开成单元列表（功能 → 城市 → 日期区间 → 网站）
//! - 解析日期偏移、填充提示词、按 (功能, 城市, 日期区间) 分组
//!
//! ### `run_controller` - 运行控制器
//! - 唯一持有运行状态的 actor，串行处理 start / stop
//! - 受 `max_workers` 约束并发执行单元
//! - 单元组就绪后触发聚合，发布状态快照
//!
//! ### `aggregator` - 结果聚合器
//! - 每个启用的网站一个条目，失败或未执行的显式标记为缺失
//! - 组级统计只来自成功的单元
//!
//! ## 层次关系
//!
//! ```text
//! run_controller (处理整个矩阵)
//!     ↓
//! workflow::CellExecutor (处理单个单元)      aggregator (处理单个单元组)
//!     ↓                                          ↓
//! services (能力层：evaluator / rating / narrator)
//!     ↓
//! infrastructure (基础设施：OutputStore / RunLog / JsExecutor)
//! ```

pub mod aggregator;
pub mod matrix_builder;
pub mod run_controller;

pub use aggregator::Aggregator;
pub use matrix_builder::{build_matrix, resolve_dates, Matrix};
pub use run_controller::{CellCounts, RunController, RunState, RunStatus};
