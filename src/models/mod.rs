//! 数据模型
//!
//! - `document`：文档与评分标准（Prompt）
//! - `provider`：提供商标识与默认配置
//! - `task`：任务键与任务结果
//! - `score`：结构化评分记录
//! - `run`：运行清单、运行状态与运行报告
//! - `loaders`：从目录加载文档和 Prompt

pub mod document;
pub mod loaders;
pub mod provider;
pub mod run;
pub mod score;
pub mod task;

pub use document::{derive_student_name, Document, Prompt};
pub use loaders::{load_documents, load_prompts};
pub use provider::{ProviderDefaults, ProviderId, ProviderSpec, SUPPORTED_PROVIDERS};
pub use run::{RunId, RunManifest, RunReport, RunState, RunStatus};
pub use score::ScoreRecord;
pub use task::{TaskKey, TaskResult, TaskStatus};
