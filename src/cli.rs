//! 命令行参数

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::split_list;
use crate::orchestrator::RunOptions;

/// 规划书批量评分
#[derive(Debug, Parser)]
#[command(name = "planbook-scorer", version, about)]
pub struct Cli {
    /// TOML 配置文件
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 显示详细日志
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// 新建运行：文档 × 评分标准 × 提供商
    Run {
        /// 提供商，逗号分隔（默认取配置中的 PROVIDERS）
        #[arg(short, long)]
        providers: Option<String>,

        /// 并发数
        #[arg(short = 'n', long)]
        concurrency: Option<usize>,

        /// 规划书 Markdown 目录
        #[arg(long)]
        mds: Option<String>,

        /// 评分标准目录
        #[arg(long)]
        prompts: Option<String>,
    },

    /// 恢复运行，只执行没有检查点的任务
    Resume {
        run_id: String,

        #[arg(short = 'n', long)]
        concurrency: Option<usize>,
    },

    /// 查看运行状态
    Status { run_id: String },

    /// 按矩阵顺序输出结果（JSON Lines）
    Results {
        run_id: String,

        /// 只输出失败的任务
        #[arg(long)]
        failed: bool,
    },

    /// 清除调用失败任务的检查点，下次恢复时重新执行
    Requeue {
        run_id: String,

        /// 同时重新排队解析失败的任务
        #[arg(long)]
        parse_failed: bool,
    },

    /// 列出所有运行
    List,
}

impl Command {
    /// `run` 子命令的参数
    pub fn run_options(
        providers: Option<String>,
        concurrency: Option<usize>,
        mds: Option<String>,
        prompts: Option<String>,
    ) -> RunOptions {
        RunOptions {
            providers: providers.map(|p| split_list(&p)),
            concurrency,
            mds_dir: mds,
            prompts_dir: prompts,
        }
    }
}
