//! 单元执行上下文
//!
//! 封装"我正在执行哪次运行的第几个单元"这一信息

use std::fmt::Display;

use crate::infrastructure::RunLog;
use crate::models::CellKey;

/// 单元执行上下文
#[derive(Debug, Clone)]
pub struct CellCtx {
    /// 本次运行 ID（同时也是落盘文件名）
    pub run_id: String,

    /// 单元在矩阵中的序号（从1开始）
    pub cell_index: usize,

    /// 矩阵中的单元总数（仅用于日志显示）
    pub total_cells: usize,

    pub key: CellKey,

    /// 本次运行的日志文件
    pub log: RunLog,
}

impl CellCtx {
    pub fn new(log: RunLog, cell_index: usize, total_cells: usize, key: CellKey) -> Self {
        Self {
            run_id: log.run_id().to_string(),
            cell_index,
            total_cells,
            key,
            log,
        }
    }
}

impl Display for CellCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[单元 {}/{} {}]",
            self.cell_index, self.total_cells, self.key
        )
    }
}
