//! 运行编排器 - 编排层
//!
//! ## 职责
//!
//! 1. **创建运行**：校验输入，写入运行清单
//! 2. **过滤已完成**：按检查点跳过已完成的任务
//! 3. **并发派发**：使用 Semaphore 限制同时进行的任务数
//! 4. **中止与取消**：凭据错误中止整次运行；取消信号到达后不再派发
//! 5. **查询**：运行状态、按矩阵顺序的结果、重新排队失败任务
//!
//! 运行状态都挂在 `Orchestrator` 实例上，不使用全局变量

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::{BackendRegistry, ModelConfig, ScoringBackend};
use crate::error::{AppResult, ConfigError, RunError};
use crate::infrastructure::RunStore;
use crate::models::{
    Document, Prompt, ProviderId, ProviderSpec, RunId, RunManifest, RunReport, RunState,
    RunStatus, TaskKey, TaskResult, TaskStatus,
};
use crate::services::{CheckpointStore, ResultSink};
use crate::workflow::{FlowOutcome, ScoringFlow, TaskCtx, TaskRequest};

/// 进程内活跃运行的进度
#[derive(Default)]
struct RunProgress {
    in_flight: AtomicUsize,
}

/// 活跃运行登记，离开作用域时自动注销
struct ActiveGuard<'a> {
    active: &'a Mutex<HashMap<RunId, Arc<RunProgress>>>,
    run_id: RunId,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.run_id);
    }
}

/// 派发给单个任务的后端和模型参数
#[derive(Clone)]
struct Dispatch {
    backend: Arc<dyn ScoringBackend>,
    model: ModelConfig,
}

/// 运行编排器
pub struct Orchestrator {
    backends: BackendRegistry,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn ResultSink>,
    runs: RunStore,
    flow: Arc<ScoringFlow>,
    default_concurrency: usize,
    active: Mutex<HashMap<RunId, Arc<RunProgress>>>,
}

impl Orchestrator {
    pub fn new(
        backends: BackendRegistry,
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Arc<dyn ResultSink>,
        runs: RunStore,
        flow: ScoringFlow,
        default_concurrency: usize,
    ) -> Self {
        Self {
            backends,
            checkpoints,
            sink,
            runs,
            flow: Arc::new(flow),
            default_concurrency: default_concurrency.max(1),
            active: Mutex::new(HashMap::new()),
        }
    }

    // ========== 启动与恢复 ==========

    /// 校验输入并写入运行清单，不执行任务
    pub async fn create_run(
        &self,
        documents: Vec<Document>,
        prompts: Vec<Prompt>,
        providers: &[ProviderId],
        concurrency_limit: Option<usize>,
    ) -> AppResult<RunManifest> {
        ensure_not_empty("documents", documents.len())?;
        ensure_not_empty("prompts", prompts.len())?;
        ensure_not_empty("providers", providers.len())?;
        ensure_unique("documents", documents.iter().map(|d| d.id.as_str()))?;
        ensure_unique("prompts", prompts.iter().map(|p| p.id.as_str()))?;
        ensure_unique("providers", providers.iter().map(|p| p.as_str()))?;

        let mut specs = Vec::with_capacity(providers.len());
        for provider in providers {
            let entry = self.backends.get(provider).ok_or_else(|| {
                ConfigError::BackendNotRegistered {
                    provider: provider.to_string(),
                }
            })?;
            specs.push(ProviderSpec {
                id: provider.clone(),
                model: entry.model.model.clone(),
            });
        }

        let manifest = RunManifest {
            run_id: RunId::generate(),
            created_at: chrono::Utc::now(),
            concurrency_limit: concurrency_limit.unwrap_or(self.default_concurrency).max(1),
            documents,
            prompts,
            providers: specs,
        };
        self.runs.save(&manifest).await?;

        info!(
            "📝 创建运行 {}: {} 份文档 × {} 个评分标准 × {} 个提供商 = {} 个任务",
            manifest.run_id,
            manifest.documents.len(),
            manifest.prompts.len(),
            manifest.providers.len(),
            manifest.total_tasks()
        );
        Ok(manifest)
    }

    /// 创建运行并执行
    pub async fn start_run(
        &self,
        documents: Vec<Document>,
        prompts: Vec<Prompt>,
        providers: &[ProviderId],
        concurrency_limit: Option<usize>,
        cancel: CancellationToken,
    ) -> AppResult<RunReport> {
        let manifest = self
            .create_run(documents, prompts, providers, concurrency_limit)
            .await?;
        let concurrency = manifest.concurrency_limit;
        self.execute(Arc::new(manifest), concurrency, cancel).await
    }

    /// 恢复运行：只派发没有检查点的任务
    pub async fn resume_run(
        &self,
        run_id: &RunId,
        concurrency_limit: Option<usize>,
        cancel: CancellationToken,
    ) -> AppResult<RunReport> {
        let manifest = self.runs.load(run_id).await?;
        let concurrency = concurrency_limit.unwrap_or(manifest.concurrency_limit).max(1);
        info!("🔄 恢复运行 {} (创建于 {})", run_id, manifest.created_at);
        self.execute(Arc::new(manifest), concurrency, cancel).await
    }

    async fn execute(
        &self,
        manifest: Arc<RunManifest>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> AppResult<RunReport> {
        let run_id = manifest.run_id.clone();
        let progress = Arc::new(RunProgress::default());
        let _guard = self.register_active(&run_id, progress.clone())?;

        let dispatch = self.resolve_backends(&manifest)?;

        let keys = manifest.task_keys();
        let completed = self.checkpoints.load_completed(&run_id).await?;
        let pending: Vec<(usize, TaskKey)> = keys
            .into_iter()
            .enumerate()
            .filter(|(_, key)| !completed.contains(key))
            .collect();

        let total = manifest.total_tasks();
        let mut report = RunReport::new(run_id.clone(), total, total - pending.len());
        info!(
            "📋 运行 {}: 共 {} 个任务，已完成 {}，待处理 {}，并发 {}",
            run_id,
            total,
            report.skipped,
            pending.len(),
            concurrency
        );

        // 凭据错误只中止本次运行，外部取消信号同样会传到这里
        let abort = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut handles = Vec::with_capacity(pending.len());

        for (index, key) in pending {
            if abort.is_cancelled() {
                break;
            }
            let permit = tokio::select! {
                _ = abort.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            // 等待期间可能已中止
            if abort.is_cancelled() {
                break;
            }

            let (Some(document), Some(prompt), Some(target)) = (
                manifest.document(&key.document_id),
                manifest.prompt(&key.prompt_id),
                dispatch.get(&key.provider_id),
            ) else {
                error!("任务 {} 在运行清单中不完整，跳过", key);
                continue;
            };

            let provider = key.provider_id.clone();
            let ctx = TaskCtx::new(
                run_id.clone(),
                key,
                index + 1,
                total,
                document.student_name.clone(),
            );
            let document_text = document.text.clone();
            let prompt_text = prompt.text.clone();
            let target = target.clone();
            let flow = self.flow.clone();
            let progress = progress.clone();
            let abort = abort.clone();

            report.dispatched += 1;
            let handle = tokio::spawn(async move {
                let _permit = permit;
                progress.in_flight.fetch_add(1, Ordering::SeqCst);

                let request = TaskRequest {
                    prompt: &prompt_text,
                    document_text: &document_text,
                    backend: target.backend.as_ref(),
                    model: &target.model,
                };
                let outcome = flow.run(&ctx, request, &abort).await;
                if matches!(outcome, FlowOutcome::Fatal(_)) {
                    abort.cancel();
                }

                progress.in_flight.fetch_sub(1, Ordering::SeqCst);
                outcome
            });
            handles.push((provider, handle));
        }

        // 等待已派发的任务结束（进行中的调用允许完成或超时）
        let mut finished = 0;
        for (provider, handle) in handles {
            match handle.await {
                Ok(FlowOutcome::Completed(status)) => {
                    finished += 1;
                    match status {
                        TaskStatus::Ok => report.succeeded += 1,
                        TaskStatus::CallFailed => report.call_failed += 1,
                        TaskStatus::ParseFailed => report.parse_failed += 1,
                    }
                }
                Ok(FlowOutcome::AlreadyComplete) => {
                    finished += 1;
                    report.skipped += 1;
                }
                Ok(FlowOutcome::Unpersisted { .. }) => report.persistence_failed += 1,
                Ok(FlowOutcome::Fatal(e)) => {
                    if report.abort_reason.is_none() {
                        let reason = ConfigError::Unauthorized {
                            provider: provider.to_string(),
                            message: e.to_string(),
                        };
                        report.abort_reason = Some(reason.to_string());
                    }
                }
                Ok(FlowOutcome::Cancelled) => {}
                Err(e) => error!("任务执行失败: {}", e),
            }
        }

        report.unfinished = report
            .dispatched
            .saturating_sub(finished + report.persistence_failed);
        report.state = if report.abort_reason.is_some() {
            RunState::Aborted
        } else if cancel.is_cancelled() {
            RunState::Cancelled
        } else if report.persistence_failed > 0 || report.remaining() > 0 {
            RunState::Degraded
        } else {
            RunState::Completed
        };

        info!("🏁 运行 {} 结束: {}", run_id, report.state);
        Ok(report)
    }

    fn register_active(
        &self,
        run_id: &RunId,
        progress: Arc<RunProgress>,
    ) -> Result<ActiveGuard<'_>, RunError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.contains_key(run_id) {
            return Err(RunError::AlreadyActive(run_id.to_string()));
        }
        active.insert(run_id.clone(), progress);
        Ok(ActiveGuard {
            active: &self.active,
            run_id: run_id.clone(),
        })
    }

    /// 为清单中的每个提供商找到后端；模型名以清单为准
    fn resolve_backends(
        &self,
        manifest: &RunManifest,
    ) -> Result<HashMap<ProviderId, Dispatch>, ConfigError> {
        let mut dispatch = HashMap::new();
        for spec in &manifest.providers {
            let entry =
                self.backends
                    .get(&spec.id)
                    .ok_or_else(|| ConfigError::BackendNotRegistered {
                        provider: spec.id.to_string(),
                    })?;
            if entry.model.model != spec.model {
                debug!(
                    "提供商 {} 使用运行清单中的模型 {} (当前配置: {})",
                    spec.id, spec.model, entry.model.model
                );
            }
            dispatch.insert(
                spec.id.clone(),
                Dispatch {
                    backend: entry.backend.clone(),
                    model: ModelConfig {
                        model: spec.model.clone(),
                        ..entry.model.clone()
                    },
                },
            );
        }
        Ok(dispatch)
    }

    // ========== 查询 ==========

    /// 运行状态快照
    pub async fn get_run_status(&self, run_id: &RunId) -> AppResult<RunStatus> {
        let manifest = self.runs.load(run_id).await?;
        let keys = manifest.task_keys();
        let completed = self.checkpoints.load_completed(run_id).await?;
        let results = self.latest_results(run_id, &completed).await?;

        let mut status = RunStatus {
            total: keys.len(),
            completed: keys.iter().filter(|k| completed.contains(k)).count(),
            in_flight: self.in_flight(run_id),
            ..Default::default()
        };

        let mut score_sum = 0.0;
        for result in results.values() {
            match result.status {
                TaskStatus::Ok => {
                    status.succeeded += 1;
                    if let Some(score) = result.total_score() {
                        score_sum += score;
                    }
                }
                TaskStatus::CallFailed => status.call_failed += 1,
                TaskStatus::ParseFailed => status.parse_failed += 1,
            }
        }
        if status.succeeded > 0 {
            status.average_score = Some(score_sum / status.succeeded as f64);
        }
        status.pending = status
            .total
            .saturating_sub(status.completed + status.in_flight);

        Ok(status)
    }

    /// 运行结果，按矩阵展开顺序排列（与完成顺序无关）
    ///
    /// 只包含有检查点的任务；同一任务有多条结果时取最后写入的一条
    pub async fn get_results(&self, run_id: &RunId) -> AppResult<Vec<TaskResult>> {
        let manifest = self.runs.load(run_id).await?;
        let completed = self.checkpoints.load_completed(run_id).await?;
        let mut latest = self.latest_results(run_id, &completed).await?;

        Ok(manifest
            .task_keys()
            .iter()
            .filter_map(|key| latest.remove(key))
            .collect())
    }

    /// 清除单个任务的检查点，返回之前是否已完成
    pub async fn clear_checkpoint(&self, run_id: &RunId, key: &TaskKey) -> AppResult<bool> {
        self.ensure_idle(run_id)?;
        Ok(self.checkpoints.clear(run_id, key).await?)
    }

    /// 重新排队失败的任务（清除检查点），返回清除的数量
    pub async fn requeue_failed(
        &self,
        run_id: &RunId,
        include_parse_failed: bool,
    ) -> AppResult<usize> {
        self.ensure_idle(run_id)?;

        let mut cleared = 0;
        for result in self.get_results(run_id).await? {
            let requeue = match result.status {
                TaskStatus::CallFailed => true,
                TaskStatus::ParseFailed => include_parse_failed,
                TaskStatus::Ok => false,
            };
            if requeue && self.checkpoints.clear(run_id, &result.key).await? {
                debug!("重新排队: {}", result.key);
                cleared += 1;
            }
        }

        if cleared > 0 {
            info!("🔁 运行 {} 重新排队 {} 个任务", run_id, cleared);
        } else {
            warn!("运行 {} 没有需要重新排队的任务", run_id);
        }
        Ok(cleared)
    }

    /// 列出所有运行
    pub async fn list_runs(&self) -> AppResult<Vec<RunId>> {
        Ok(self.runs.list().await?)
    }

    pub async fn load_manifest(&self, run_id: &RunId) -> AppResult<RunManifest> {
        Ok(self.runs.load(run_id).await?)
    }

    async fn latest_results(
        &self,
        run_id: &RunId,
        completed: &HashSet<TaskKey>,
    ) -> AppResult<HashMap<TaskKey, TaskResult>> {
        let mut latest = HashMap::new();
        for result in self.sink.read_all(run_id).await? {
            if completed.contains(&result.key) {
                latest.insert(result.key.clone(), result);
            }
        }
        Ok(latest)
    }

    fn in_flight(&self, run_id: &RunId) -> usize {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active
            .get(run_id)
            .map_or(0, |progress| progress.in_flight.load(Ordering::SeqCst))
    }

    fn ensure_idle(&self, run_id: &RunId) -> Result<(), RunError> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.contains_key(run_id) {
            return Err(RunError::AlreadyActive(run_id.to_string()));
        }
        Ok(())
    }
}

fn ensure_not_empty(what: &'static str, len: usize) -> Result<(), ConfigError> {
    if len == 0 {
        return Err(ConfigError::EmptyInput { what });
    }
    Ok(())
}

fn ensure_unique<'a>(
    what: &'static str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ConfigError::DuplicateId {
                what,
                id: id.to_string(),
            });
        }
    }
    Ok(())
}
