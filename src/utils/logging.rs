//! 日志工具模块
//!
//! 提供日志初始化和格式化输出的辅助函数

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::{RunId, RunReport, RunState, RunStatus};

/// 初始化日志
///
/// 设置了 `RUST_LOG` 时以它为准；否则默认 info，详细模式下为 debug
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("planbook_scorer={},warn", default_level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 规划书批量评分");
    info!("📊 最大并发数: {}", config.max_concurrent_tasks);
    info!(
        "🔁 最多调用次数: {} (退避 {}ms ~ {}ms)",
        config.max_attempts, config.retry_base_delay_ms, config.retry_max_delay_ms
    );
    info!("📁 数据目录: {}", config.data_dir);
    info!("{}", "=".repeat(60));
}

/// 打印一次执行的最终统计
pub fn print_final_stats(report: &RunReport) {
    info!("\n{}", "=".repeat(60));
    info!("📊 运行 {} 统计", report.run_id);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📋 任务总数: {} (启动前已完成 {})", report.total, report.skipped);
    info!("📤 本次派发: {}", report.dispatched);
    info!("✅ 成功: {}", report.succeeded);
    info!("❌ 调用失败: {}", report.call_failed);
    info!("⚠️ 解析失败: {}", report.parse_failed);
    if report.persistence_failed > 0 {
        warn!("💾 写入失败: {}", report.persistence_failed);
    }
    if let Some(reason) = &report.abort_reason {
        warn!("🛑 中止原因: {}", reason);
    }
    info!("{}", "=".repeat(60));
    info!("状态: {}", report.state);

    match report.state {
        RunState::Completed if report.call_failed + report.parse_failed > 0 => {
            info!(
                "💡 可用 `requeue {}` 清除失败任务的检查点后再 `resume`",
                report.run_id
            );
        }
        RunState::Completed => {}
        _ => info!(
            "💡 剩余 {} 个任务，可用 `resume {}` 继续",
            report.remaining(),
            report.run_id
        ),
    }
}

/// 打印运行状态
pub fn print_run_status(run_id: &RunId, status: &RunStatus) {
    info!("{}", "─".repeat(60));
    info!("运行 {}", run_id);
    info!(
        "完成 {}/{} (进行中 {}，待处理 {})",
        status.completed, status.total, status.in_flight, status.pending
    );
    info!(
        "成功 {}，失败 {} (调用失败 {}，解析失败 {})",
        status.succeeded,
        status.failed(),
        status.call_failed,
        status.parse_failed
    );
    if let Some(average) = status.average_score {
        info!("平均分: {:.2}", average);
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大字符数
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
