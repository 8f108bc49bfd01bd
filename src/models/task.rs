use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::provider::ProviderId;
use crate::models::run::RunId;
use crate::models::score::ScoreRecord;

/// 任务键：(文档, 评分标准, 提供商) 唯一确定一个评分任务
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub document_id: String,
    pub prompt_id: String,
    pub provider_id: ProviderId,
}

impl TaskKey {
    pub fn new(
        document_id: impl Into<String>,
        prompt_id: impl Into<String>,
        provider_id: impl Into<ProviderId>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            prompt_id: prompt_id.into(),
            provider_id: provider_id.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {}",
            self.document_id, self.prompt_id, self.provider_id
        )
    }
}

/// 任务最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// 调用成功且响应通过校验
    Ok,
    /// 调用成功但响应无法解析，原文保留待人工检查
    ParseFailed,
    /// 调用失败（重试耗尽或不可重试）
    CallFailed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Ok => "ok",
            TaskStatus::ParseFailed => "parse-failed",
            TaskStatus::CallFailed => "call-failed",
        };
        f.write_str(s)
    }
}

/// 任务结果
///
/// 每个任务键完成时写入结果存储一次，写入后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub run_id: RunId,
    pub key: TaskKey,
    pub status: TaskStatus,
    pub student_name: String,
    pub model: String,
    /// 实际发起的调用次数（含重试）
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreRecord>,
    /// 模型原始响应
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    /// 模型的推理过程
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn is_ok(&self) -> bool {
        self.status == TaskStatus::Ok
    }

    /// 总分（仅成功的结果有）
    pub fn total_score(&self) -> Option<f64> {
        self.score.as_ref().map(|s| s.score)
    }
}
