//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责任务矩阵的调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `matrix` - 任务矩阵展开
//! - 文档 × 评分标准 × 提供商，顺序固定
//!
//! ### `run_orchestrator` - 运行编排器
//! - 创建 / 恢复运行
//! - 按检查点过滤已完成任务
//! - 控制并发数量（Semaphore）
//! - 凭据错误中止、取消信号停止派发
//! - 运行状态和结果查询
//!
//! ### `app` - 应用入口
//! - 按配置装配存储和后端
//! - 加载输入目录，执行命令，输出统计
//!
//! ## 层次关系
//!
//! ```text
//! app (命令)
//!     ↓
//! run_orchestrator (处理 Vec<TaskKey>)
//!     ↓
//! workflow::ScoringFlow (处理单个任务)
//!     ↓
//! services / clients (能力层：检查点 / 结果 / 规范化 / 评分后端)
//!     ↓
//! infrastructure (基础设施：JSONL 文件、运行清单)
//! ```

pub mod app;
pub mod matrix;
pub mod run_orchestrator;

// 重新导出主要类型
pub use app::{App, RunOptions};
pub use run_orchestrator::Orchestrator;
