//! 任务处理上下文
//!
//! 封装"我正在处理哪个运行的哪个任务"这一信息

use std::fmt::Display;

use chrono::Utc;

use crate::clients::BackendReply;
use crate::models::{RunId, ScoreRecord, TaskKey, TaskResult, TaskStatus};

/// 任务处理上下文
#[derive(Debug, Clone)]
pub struct TaskCtx {
    pub run_id: RunId,

    pub key: TaskKey,

    /// 任务在矩阵中的序号（从 1 开始，仅用于日志显示）
    pub index: usize,

    /// 矩阵任务总数
    pub total: usize,

    /// 从文档推导出的学生姓名
    pub student_name: String,
}

impl TaskCtx {
    pub fn new(
        run_id: RunId,
        key: TaskKey,
        index: usize,
        total: usize,
        student_name: String,
    ) -> Self {
        Self {
            run_id,
            key,
            index,
            total,
            student_name,
        }
    }

    /// 评分成功；模型返回了学生姓名时以模型为准
    pub fn succeeded(
        &self,
        model: &str,
        attempts: u32,
        score: ScoreRecord,
        reply: BackendReply,
    ) -> TaskResult {
        let student_name = score
            .student_name
            .clone()
            .unwrap_or_else(|| self.student_name.clone());
        TaskResult {
            student_name,
            score: Some(score),
            raw_response: Some(reply.content),
            thinking: reply.thinking,
            ..self.result(TaskStatus::Ok, model, attempts)
        }
    }

    /// 调用成功但响应无法解析，保留原文
    pub fn parse_failed(
        &self,
        model: &str,
        attempts: u32,
        reply: BackendReply,
        error: String,
    ) -> TaskResult {
        TaskResult {
            raw_response: Some(reply.content),
            thinking: reply.thinking,
            error: Some(error),
            ..self.result(TaskStatus::ParseFailed, model, attempts)
        }
    }

    /// 调用失败，记录最后一次错误
    pub fn call_failed(&self, model: &str, attempts: u32, error: String) -> TaskResult {
        TaskResult {
            error: Some(error),
            ..self.result(TaskStatus::CallFailed, model, attempts)
        }
    }

    fn result(&self, status: TaskStatus, model: &str, attempts: u32) -> TaskResult {
        TaskResult {
            run_id: self.run_id.clone(),
            key: self.key.clone(),
            status,
            student_name: self.student_name.clone(),
            model: model.to_string(),
            attempts,
            score: None,
            raw_response: None,
            thinking: None,
            error: None,
            completed_at: Utc::now(),
        }
    }
}

impl Display for TaskCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{} {} | {} | {}]",
            self.index,
            self.total,
            self.student_name,
            self.key.prompt_id,
            self.key.provider_id
        )
    }
}
