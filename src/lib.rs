//! # Planbook Scorer
//!
//! 对学生规划书做批量评分的 Rust 应用程序：
//! 文档 × 评分标准 × 提供商 展开成任务矩阵，并发调用评分模型，
//! 逐条落盘，进程中断后可以按运行 ID 恢复。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（文件），只暴露能力
//! - `JsonlFile` - 串行化的追加写 JSONL 文件
//! - `RunStore` - 运行清单的原子写入和读取
//!
//! ### ② 业务能力层（Services / Clients）
//! - `services/` - 描述"我能做什么"，只处理单个任务
//! - `CheckpointStore` - 记录已完成的任务
//! - `ResultSink` - 追加写任务结果
//! - `ResponseNormalizer` - 模型响应 → 结构化评分
//! - `clients/` - `ScoringBackend` 评分能力，按提供商注册
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个任务"的完整处理流程
//! - `TaskCtx` - 上下文封装（run_id + task key）
//! - `ScoringFlow` - 流程编排（调用 → 重试 → 规范化 → 写结果 → 写检查点）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/run_orchestrator` - 任务矩阵调度，管理并发、中止和取消
//! - `orchestrator/app` - 按配置装配各层，执行命令
//!
//! ## 模块结构

pub mod cli;
pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{BackendRegistry, BackendReply, ModelConfig, ScoringBackend};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{Document, Prompt, ProviderId, RunId, TaskKey, TaskResult, TaskStatus};
pub use orchestrator::{App, Orchestrator, RunOptions};
pub use workflow::{RetryPolicy, ScoringFlow};
