//! 评分任务流程 - 流程层
//!
//! 核心职责：定义"一个任务"的完整处理流程
//!
//! 流程顺序：
//! 0. 运行已取消或中止 → 不再调用
//! 1. 已有检查点 → 跳过
//! 2. 调用评分后端（超时 / 可重试错误按退避策略重试，凭据错误立即中止）
//! 3. 规范化响应（失败时保留原文）
//! 4. 先写结果，再写检查点

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::{BackendReply, ModelConfig, ScoringBackend};
use crate::error::{BackendError, PersistenceError};
use crate::models::TaskStatus;
use crate::services::{CheckpointStore, ResponseNormalizer, ResultSink};
use crate::utils::logging::truncate_text;
use crate::workflow::task_ctx::TaskCtx;

/// 重试策略
///
/// 第 n 次失败后等待 `min(max_delay, base_delay * 2^(n-1))`，再加上最多 25% 的随机抖动
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最多调用次数（含第一次）
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次失败后的基础等待时间（不含抖动）
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// 加上随机抖动后的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        let max_jitter_ms = (delay.as_millis() / 4) as u64;
        if max_jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
    }
}

/// 单个任务的请求参数
pub struct TaskRequest<'a> {
    pub prompt: &'a str,
    pub document_text: &'a str,
    pub backend: &'a dyn ScoringBackend,
    pub model: &'a ModelConfig,
}

/// 任务流程结果
#[derive(Debug)]
pub enum FlowOutcome {
    /// 结果和检查点都已写入
    Completed(TaskStatus),
    /// 已有检查点，未调用后端
    AlreadyComplete,
    /// 写入结果或检查点失败，任务保持待处理，下次恢复时会重新执行
    Unpersisted {
        status: TaskStatus,
        error: PersistenceError,
    },
    /// 凭据被拒绝，整次运行需要中止
    Fatal(BackendError),
    /// 调用前或退避等待期间收到取消信号，未写入任何内容
    Cancelled,
}

/// 后端调用的结果（重试之后）
enum CallOutcome {
    Responded { reply: BackendReply, attempts: u32 },
    Failed { error: BackendError, attempts: u32 },
    Fatal(BackendError),
    Cancelled,
}

/// 评分任务流程
///
/// - 编排单个任务的调用、重试、规范化、落盘
/// - 不持有后端（由调用方按提供商选择后传入）
/// - 不关心并发和任务顺序
pub struct ScoringFlow {
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn ResultSink>,
    retry: RetryPolicy,
    verbose_logging: bool,
}

impl ScoringFlow {
    pub fn new(
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Arc<dyn ResultSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            checkpoints,
            sink,
            retry,
            verbose_logging: false,
        }
    }

    pub fn with_verbose_logging(mut self, verbose: bool) -> Self {
        self.verbose_logging = verbose;
        self
    }

    pub async fn run(
        &self,
        ctx: &TaskCtx,
        request: TaskRequest<'_>,
        cancel: &CancellationToken,
    ) -> FlowOutcome {
        // 排队等待期间运行可能已被中止
        if cancel.is_cancelled() {
            debug!("{} 运行已取消，不再调用", ctx);
            return FlowOutcome::Cancelled;
        }

        // ========== 1. 检查点 ==========
        match self.checkpoints.is_complete(&ctx.run_id, &ctx.key).await {
            Ok(true) => {
                debug!("{} 已完成，跳过", ctx);
                return FlowOutcome::AlreadyComplete;
            }
            Ok(false) => {}
            // 读不到检查点时按未完成处理，最多重复执行一次
            Err(e) => warn!("{} ⚠️ 读取检查点失败: {}", ctx, e),
        }

        // ========== 2. 调用后端 ==========
        info!("{} 🤖 开始评分 (模型: {})", ctx, request.model.model);

        let result = match self.call_with_retry(ctx, &request, cancel).await {
            CallOutcome::Responded { reply, attempts } => {
                if self.verbose_logging {
                    debug!("{} 响应: {}", ctx, truncate_text(&reply.content, 200));
                    if let Some(thinking) = &reply.thinking {
                        debug!("{} 推理过程: {}", ctx, truncate_text(thinking, 200));
                    }
                }

                // ========== 3. 规范化 ==========
                match ResponseNormalizer::normalize(&reply.content) {
                    Ok(score) => {
                        info!("{} ✓ 评分完成: {} 分 (调用 {} 次)", ctx, score.score, attempts);
                        ctx.succeeded(&request.model.model, attempts, score, reply)
                    }
                    Err(e) => {
                        warn!("{} ⚠️ 响应无法解析，保留原文: {}", ctx, e);
                        ctx.parse_failed(&request.model.model, attempts, reply, e.to_string())
                    }
                }
            }
            CallOutcome::Failed { error, attempts } => {
                warn!("{} ❌ 调用失败 (共 {} 次): {}", ctx, attempts, error);
                ctx.call_failed(&request.model.model, attempts, error.to_string())
            }
            CallOutcome::Fatal(error) => {
                error!("{} 🛑 凭据被拒绝，中止运行: {}", ctx, error);
                return FlowOutcome::Fatal(error);
            }
            CallOutcome::Cancelled => {
                info!("{} 已取消，保持待处理", ctx);
                return FlowOutcome::Cancelled;
            }
        };

        // ========== 4. 先写结果，再写检查点 ==========
        let status = result.status;
        if let Err(error) = self.sink.append(&ctx.run_id, &result).await {
            error!("{} ❌ 结果写入失败，不写检查点: {}", ctx, error);
            return FlowOutcome::Unpersisted { status, error };
        }
        if let Err(error) = self.checkpoints.mark_complete(&ctx.run_id, &ctx.key).await {
            error!("{} ❌ 检查点写入失败: {}", ctx, error);
            return FlowOutcome::Unpersisted { status, error };
        }

        FlowOutcome::Completed(status)
    }

    async fn call_with_retry(
        &self,
        ctx: &TaskCtx,
        request: &TaskRequest<'_>,
        cancel: &CancellationToken,
    ) -> CallOutcome {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            // 其他任务可能已触发中止，发起调用前再确认一次
            if cancel.is_cancelled() {
                return CallOutcome::Cancelled;
            }
            attempts += 1;

            let call = request
                .backend
                .score(request.prompt, request.document_text, request.model);
            let error = match tokio::time::timeout(request.model.timeout, call).await {
                Ok(Ok(reply)) => return CallOutcome::Responded { reply, attempts },
                Ok(Err(e)) => e,
                Err(_) => BackendError::Timeout(request.model.timeout),
            };

            if error.is_fatal() {
                return CallOutcome::Fatal(error);
            }
            if !error.is_transient() {
                debug!("{} 错误不可重试: {}", ctx, error);
                return CallOutcome::Failed { error, attempts };
            }
            if attempts >= max_attempts {
                return CallOutcome::Failed { error, attempts };
            }

            let delay = self.retry.delay_for(attempts);
            warn!(
                "{} ⚠️ 第 {}/{} 次调用失败: {}，{}ms 后重试",
                ctx,
                attempts,
                max_attempts,
                error,
                delay.as_millis()
            );

            tokio::select! {
                _ = cancel.cancelled() => return CallOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunId, TaskKey, TaskResult};
    use crate::services::{MemoryCheckpointStore, MemoryResultSink};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    const VALID: &str = r#"{"score": 90, "sub_scores": {"a": 45}, "strengths": [], "gaps": [], "suggestions": []}"#;

    /// 按顺序返回预设结果，用完后一直返回最后一个
    struct Scripted {
        replies: Mutex<VecDeque<Result<BackendReply, BackendError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, BackendError>>) -> Self {
            Self::with_replies(replies.into_iter().map(|r| r.map(BackendReply::new)).collect())
        }

        fn with_replies(replies: Vec<Result<BackendReply, BackendError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ScoringBackend for Scripted {
        async fn score(
            &self,
            _: &str,
            _: &str,
            _: &ModelConfig,
        ) -> Result<BackendReply, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            }
        }
    }

    struct FailingSink;

    #[async_trait]
    impl ResultSink for FailingSink {
        async fn append(&self, _: &RunId, _: &TaskResult) -> Result<(), PersistenceError> {
            Err(PersistenceError::io(
                "results.jsonl",
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ))
        }

        async fn read_all(&self, _: &RunId) -> Result<Vec<TaskResult>, PersistenceError> {
            Ok(Vec::new())
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn ctx() -> TaskCtx {
        TaskCtx::new(
            RunId::parse("flow-test").unwrap(),
            TaskKey::new("a__张三.md", "v1", "gemini"),
            1,
            1,
            "张三".to_string(),
        )
    }

    async fn run_with(
        backend: &Scripted,
        checkpoints: Arc<MemoryCheckpointStore>,
        sink: Arc<dyn ResultSink>,
    ) -> FlowOutcome {
        let flow = ScoringFlow::new(checkpoints, sink, fast_retry());
        let model = ModelConfig::new("test-model");
        let request = TaskRequest {
            prompt: "评分标准",
            document_text: "规划书",
            backend,
            model: &model,
        };
        flow.run(&ctx(), request, &CancellationToken::new()).await
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(10), Duration::from_secs(30));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(30));

        let delay = policy.delay_for(2);
        assert!(delay >= Duration::from_secs(2));
        assert!(delay <= Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let backend = Scripted::new(vec![
            Err(BackendError::Timeout(Duration::from_secs(1))),
            Err(BackendError::RateLimited("slow".into())),
            Ok(VALID.to_string()),
        ]);
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let sink = Arc::new(MemoryResultSink::new());

        let outcome = run_with(&backend, checkpoints.clone(), sink.clone()).await;

        assert!(matches!(outcome, FlowOutcome::Completed(TaskStatus::Ok)));
        let results = sink.read_all(&ctx().run_id).await.unwrap();
        assert_eq!(results[0].attempts, 3);
        assert!(checkpoints.is_complete(&ctx().run_id, &ctx().key).await.unwrap());
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let backend = Scripted::new(vec![Err(BackendError::from_status(400, "bad request"))]);
        let sink = Arc::new(MemoryResultSink::new());

        let outcome = run_with(&backend, Arc::new(MemoryCheckpointStore::new()), sink.clone()).await;

        assert!(matches!(outcome, FlowOutcome::Completed(TaskStatus::CallFailed)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        let results = sink.read_all(&ctx().run_id).await.unwrap();
        assert!(results[0].error.as_deref().unwrap().contains("bad request"));
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal_and_writes_nothing() {
        let backend = Scripted::new(vec![Err(BackendError::Unauthorized("bad key".into()))]);
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let sink = Arc::new(MemoryResultSink::new());

        let outcome = run_with(&backend, checkpoints.clone(), sink.clone()).await;

        assert!(matches!(outcome, FlowOutcome::Fatal(BackendError::Unauthorized(_))));
        assert!(sink.read_all(&ctx().run_id).await.unwrap().is_empty());
        assert!(!checkpoints.is_complete(&ctx().run_id, &ctx().key).await.unwrap());
    }

    #[tokio::test]
    async fn test_sink_failure_leaves_task_pending() {
        let backend = Scripted::new(vec![Ok(VALID.to_string())]);
        let checkpoints = Arc::new(MemoryCheckpointStore::new());

        let outcome = run_with(&backend, checkpoints.clone(), Arc::new(FailingSink)).await;

        assert!(matches!(
            outcome,
            FlowOutcome::Unpersisted {
                status: TaskStatus::Ok,
                ..
            }
        ));
        assert!(!checkpoints.is_complete(&ctx().run_id, &ctx().key).await.unwrap());
    }

    #[tokio::test]
    async fn test_already_complete_skips_backend() {
        let backend = Scripted::new(vec![Ok(VALID.to_string())]);
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        checkpoints.mark_complete(&ctx().run_id, &ctx().key).await.unwrap();

        let outcome = run_with(&backend, checkpoints, Arc::new(MemoryResultSink::new())).await;

        assert!(matches!(outcome, FlowOutcome::AlreadyComplete));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    fn slow_retry_flow() -> ScoringFlow {
        ScoringFlow::new(
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(MemoryResultSink::new()),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let backend = Scripted::new(vec![Err(BackendError::NetworkError("reset".into()))]);
        let flow = slow_retry_flow();
        let model = ModelConfig::new("test-model");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let request = TaskRequest {
            prompt: "p",
            document_text: "d",
            backend: &backend,
            model: &model,
        };
        let outcome = flow.run(&ctx(), request, &cancel).await;

        assert!(matches!(outcome, FlowOutcome::Cancelled));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_call_skips_backend() {
        let backend = Scripted::new(vec![Ok(VALID.to_string())]);
        let flow = slow_retry_flow();
        let model = ModelConfig::new("test-model");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = TaskRequest {
            prompt: "p",
            document_text: "d",
            backend: &backend,
            model: &model,
        };
        let outcome = flow.run(&ctx(), request, &cancel).await;

        assert!(matches!(outcome, FlowOutcome::Cancelled));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_thinking_is_kept_with_result() {
        let backend = Scripted::with_replies(vec![
            Err(BackendError::Timeout(Duration::from_secs(1))),
            Ok(BackendReply::new(VALID).with_thinking("先看目标是否可量化")),
        ]);
        let sink = Arc::new(MemoryResultSink::new());

        let outcome = run_with(&backend, Arc::new(MemoryCheckpointStore::new()), sink.clone()).await;

        assert!(matches!(outcome, FlowOutcome::Completed(TaskStatus::Ok)));
        let results = sink.read_all(&ctx().run_id).await.unwrap();
        assert_eq!(results[0].thinking.as_deref(), Some("先看目标是否可量化"));
        assert_eq!(results[0].raw_response.as_deref(), Some(VALID));
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_thinking() {
        let backend = Scripted::with_replies(vec![Ok(
            BackendReply::new("抱歉，无法评分").with_thinking("文档太短")
        )]);
        let sink = Arc::new(MemoryResultSink::new());

        run_with(&backend, Arc::new(MemoryCheckpointStore::new()), sink.clone()).await;

        let results = sink.read_all(&ctx().run_id).await.unwrap();
        assert_eq!(results[0].status, TaskStatus::ParseFailed);
        assert_eq!(results[0].thinking.as_deref(), Some("文档太短"));
    }
}
