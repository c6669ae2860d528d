//! # Travel Quality Eval
//!
//! 旅行网站质量评估的编排引擎：把声明式的评估矩阵展开成单元，
//! 并发驱动浏览器评估，失败隔离与重试，最后按单元组生成横向对比产物。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page、文件），只暴露能力
//! - `JsExecutor` - 页面 owner，提供导航和 eval() 能力
//! - `OutputStore` / `RunLog` - 只追加的输出目录与运行日志
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个单元
//! - `Evaluator` / `BrowserEvaluator` - 浏览器评估能力
//! - `RatingExtractor` - 评分提取能力
//! - `ComparisonNarrator` - 对比分析能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个单元"的完整执行流程
//! - `CellCtx` - 上下文封装（run_id + 单元序号）
//! - `CellExecutor` - 尝试 → 超时 → 退避重试 → 落盘
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/matrix_builder` - 矩阵展开
//! - `orchestrator/run_controller` - 运行生命周期、并发调度
//! - `orchestrator/aggregator` - 单元组聚合
//!
//! 最外层的 `server` 把运行控制器暴露为 HTTP 接口（`serve` 子命令）。
//!
//! ## 模块结构

pub mod browser;
pub mod cli;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod server;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{CellError, ConfigError, EvaluationError, RunError, StoreError};
pub use infrastructure::{OutputStore, RunLog};
pub use models::{load_matrix_definition, MatrixDefinition};
pub use orchestrator::{RunController, RunState, RunStatus};
pub use services::{BrowserEvaluator, Evaluator, JsonBlockExtractor, LlmNarrator};
pub use workflow::{CellCtx, CellExecutor};
