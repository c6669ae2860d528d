//! 日志工具模块
//!
//! 初始化 tracing 订阅者，并提供日志格式化的辅助函数

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::orchestrator::RunStatus;

/// 初始化全局日志（`RUST_LOG` 优先，否则按 verbose 选择 info / debug）
///
/// 重复调用是安全的，后续调用会被忽略。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(max_workers: usize, max_attempts: u32) {
    info!("{}", "=".repeat(60));
    info!("🚀 质量评估启动 - 并发单元模式");
    info!("📊 最大并发数: {}, 每单元最多尝试: {}", max_workers, max_attempts);
    info!("{}", "=".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(status: &RunStatus) {
    info!("\n{}", "=".repeat(60));
    info!("📊 评估结束统计 ({:?})", status.state);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", status.counts.succeeded, status.total_cells);
    info!("❌ 失败: {}", status.counts.failed_terminal);
    info!("⏸️ 未执行: {}", status.counts.pending);
    info!(
        "📑 对比产物: {}/{}",
        status.groups_aggregated, status.groups_total
    );
    if let Some(error) = &status.error {
        info!("💥 错误: {}", error);
    }
    info!("{}", "=".repeat(60));
    if let Some(log_file) = &status.log_file {
        info!("\n日志已保存至: {}", log_file.display());
    }
}

/// 截断长文本用于日志显示
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("东京酒店", 2), "东京...");
        assert_eq!(truncate_text("Tokyo", 10), "Tokyo");
    }
}
