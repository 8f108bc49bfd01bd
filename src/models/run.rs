//! 运行（Run）相关模型
//!
//! 一次运行 = 一个完整的任务矩阵执行，可按 ID 恢复。

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Local, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RunError;
use crate::models::document::{Document, Prompt};
use crate::models::provider::ProviderSpec;
use crate::models::task::TaskKey;
use crate::orchestrator::matrix;

const RUN_ID_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$";

/// 只编译一次
fn run_id_regex() -> Option<&'static Regex> {
    static RUN_ID_RE: OnceLock<Option<Regex>> = OnceLock::new();
    RUN_ID_RE
        .get_or_init(|| Regex::new(RUN_ID_PATTERN).ok())
        .as_ref()
}

/// 运行 ID
///
/// 格式 `20250108_153000-1a2b3c4d`，会被用作目录名，解析时做校验
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// 生成新的运行 ID（本地时间戳 + 随机后缀）
    pub fn generate() -> Self {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", timestamp, &suffix[..8]))
    }

    /// 解析外部传入的运行 ID
    pub fn parse(value: &str) -> Result<Self, RunError> {
        let valid = run_id_regex().is_some_and(|re| re.is_match(value));
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(RunError::InvalidRunId(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 运行清单：完整的任务矩阵定义
///
/// 持久化后，恢复运行不再需要外部重新提供文档和 Prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub concurrency_limit: usize,
    pub documents: Vec<Document>,
    pub prompts: Vec<Prompt>,
    pub providers: Vec<ProviderSpec>,
}

impl RunManifest {
    /// 按 文档 → Prompt → 提供商 的顺序展开任务键
    pub fn task_keys(&self) -> Vec<TaskKey> {
        matrix::expand(&self.documents, &self.prompts, &self.providers)
    }

    pub fn total_tasks(&self) -> usize {
        self.task_keys().len()
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn prompt(&self, id: &str) -> Option<&Prompt> {
        self.prompts.iter().find(|p| p.id == id)
    }
}

/// 运行状态快照
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatus {
    pub total: usize,
    /// 已写入检查点的任务数
    pub completed: usize,
    pub succeeded: usize,
    pub call_failed: usize,
    pub parse_failed: usize,
    /// 正在调用中的任务数（仅当前进程内活跃的运行）
    pub in_flight: usize,
    pub pending: usize,
    /// 成功结果的平均分
    pub average_score: Option<f64>,
}

impl RunStatus {
    pub fn failed(&self) -> usize {
        self.call_failed + self.parse_failed
    }
}

/// 运行结束状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// 所有任务都已写入检查点
    Completed,
    /// 部分任务结果写入失败，可以安全地再次恢复
    Degraded,
    /// 收到取消信号，剩余任务保持待处理
    Cancelled,
    /// 凭据被拒绝，整次运行中止
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Completed => "已完成",
            RunState::Degraded => "部分未落盘",
            RunState::Cancelled => "已取消",
            RunState::Aborted => "已中止",
        };
        f.write_str(s)
    }
}

/// 一次执行（启动或恢复）的汇总报告
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub state: RunState,
    pub total: usize,
    /// 启动前已完成、被跳过的任务数
    pub skipped: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub call_failed: usize,
    pub parse_failed: usize,
    /// 结果或检查点写入失败的任务数
    pub persistence_failed: usize,
    /// 已派发但未走到终态的任务数（取消、任务崩溃）
    pub unfinished: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

impl RunReport {
    pub fn new(run_id: RunId, total: usize, skipped: usize) -> Self {
        Self {
            run_id,
            state: RunState::Completed,
            total,
            skipped,
            dispatched: 0,
            succeeded: 0,
            call_failed: 0,
            parse_failed: 0,
            persistence_failed: 0,
            unfinished: 0,
            abort_reason: None,
        }
    }

    /// 本次执行结束后仍未完成的任务数
    pub fn remaining(&self) -> usize {
        let finished = self.skipped + self.succeeded + self.call_failed + self.parse_failed;
        self.total.saturating_sub(finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_run_id_is_parseable() {
        let id = RunId::generate();
        let parsed = RunId::parse(id.as_str()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_run_id_rejects_path_traversal() {
        assert!(RunId::parse("../etc").is_err());
        assert!(RunId::parse("a/b").is_err());
        assert!(RunId::parse("").is_err());
        assert!(RunId::parse("-leading-dash").is_err());
        assert!(RunId::parse("20250108_153000-1a2b3c4d").is_ok());
    }

    #[test]
    fn test_run_id_regex_is_shared() {
        let first = run_id_regex().unwrap();
        let second = run_id_regex().unwrap();
        assert!(std::ptr::eq(first, second));

        let ids: Vec<RunId> = (0..1000)
            .map(|i| RunId::parse(&format!("run-{}", i)).unwrap())
            .collect();
        assert_eq!(ids.len(), 1000);
        assert!(RunId::parse(&"x".repeat(129)).is_err());
    }
}
