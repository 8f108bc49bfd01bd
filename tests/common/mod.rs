//! 集成测试共用的脚本化后端和装配函数

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use planbook_scorer::error::{BackendError, PersistenceError};
use planbook_scorer::infrastructure::{RunLayout, RunStore};
use planbook_scorer::models::{Document, Prompt, RunId, TaskKey, TaskResult};
use planbook_scorer::services::{CheckpointStore, ResultSink};
use planbook_scorer::{BackendRegistry, BackendReply, ModelConfig, Orchestrator, RetryPolicy, ScoringBackend, ScoringFlow};

pub const PROVIDER: &str = "gemini";

/// 脚本中的一次回复
#[derive(Clone)]
pub enum Reply {
    Ok(String),
    Err(BackendError),
    /// 一直不返回，由调用超时打断
    Hang,
    /// 延迟后返回
    Delayed(Duration, String),
    /// 正文和推理过程
    Thinking(String, String),
}

/// 按文档正文匹配脚本的评分后端
///
/// 每份文档的脚本按顺序消费，用完后使用默认回复
pub struct ScriptedBackend {
    default_reply: Reply,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: AtomicUsize,
    calls_by_document: Mutex<HashMap<String, usize>>,
}

impl ScriptedBackend {
    pub fn new(default_reply: Reply) -> Self {
        Self {
            default_reply,
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            calls_by_document: Mutex::new(HashMap::new()),
        }
    }

    pub fn always_valid() -> Self {
        Self::new(Reply::Ok(valid_payload(88.0)))
    }

    pub fn script(self, document_text: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(document_text.to_string(), replies.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, document_text: &str) -> usize {
        self.calls_by_document
            .lock()
            .unwrap()
            .get(document_text)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ScoringBackend for ScriptedBackend {
    async fn score(
        &self,
        _prompt: &str,
        document_text: &str,
        _config: &ModelConfig,
    ) -> Result<BackendReply, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_by_document
            .lock()
            .unwrap()
            .entry(document_text.to_string())
            .or_default() += 1;

        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(document_text)
            .and_then(|replies| replies.pop_front())
            .unwrap_or_else(|| self.default_reply.clone());

        match reply {
            Reply::Ok(text) => Ok(BackendReply::new(text)),
            Reply::Err(e) => Err(e),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(BackendError::NetworkError("unreachable".into()))
            }
            Reply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(BackendReply::new(text))
            }
            Reply::Thinking(text, thinking) => Ok(BackendReply::new(text).with_thinking(thinking)),
        }
    }
}

/// 结果存储写入总是失败
pub struct FailingSink;

#[async_trait]
impl ResultSink for FailingSink {
    async fn append(&self, _: &RunId, _: &TaskResult) -> Result<(), PersistenceError> {
        Err(disk_full("results.jsonl"))
    }

    async fn read_all(&self, _: &RunId) -> Result<Vec<TaskResult>, PersistenceError> {
        Ok(Vec::new())
    }
}

/// 包装一个检查点存储，`mark_complete` 前 N 次失败（模拟写完结果后进程被杀）
pub struct FlakyCheckpoints<C> {
    pub inner: C,
    failures_left: AtomicUsize,
}

impl<C> FlakyCheckpoints<C> {
    pub fn new(inner: C, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl<C: CheckpointStore> CheckpointStore for FlakyCheckpoints<C> {
    async fn is_complete(&self, run_id: &RunId, key: &TaskKey) -> Result<bool, PersistenceError> {
        self.inner.is_complete(run_id, key).await
    }

    async fn mark_complete(&self, run_id: &RunId, key: &TaskKey) -> Result<(), PersistenceError> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(disk_full("checkpoints.jsonl"));
        }
        self.inner.mark_complete(run_id, key).await
    }

    async fn load_completed(
        &self,
        run_id: &RunId,
    ) -> Result<std::collections::HashSet<TaskKey>, PersistenceError> {
        self.inner.load_completed(run_id).await
    }

    async fn clear(&self, run_id: &RunId, key: &TaskKey) -> Result<bool, PersistenceError> {
        self.inner.clear(run_id, key).await
    }
}

fn disk_full(path: &str) -> PersistenceError {
    PersistenceError::io(
        path,
        std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
    )
}

pub fn valid_payload(score: f64) -> String {
    format!(
        r#"以下是评分结果：
```json
{{
  "score": {score},
  "sub_scores": {{"clearness_and_consistency": 18, "fitness": 17}},
  "strengths": ["目标清晰"],
  "gaps": ["缺少时间安排"],
  "suggestions": ["按学期拆分目标"],
  "rationale": "整体完整"
}}
```
谢谢。"#
    )
}

/// 文档正文为 `正文-<i>`
pub fn documents(n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| Document::new(format!("{:02}__学生{}.md", i, i), document_text(i)))
        .collect()
}

pub fn document_text(i: usize) -> String {
    format!("正文-{}", i)
}

pub fn prompts(n: usize) -> Vec<Prompt> {
    (0..n)
        .map(|i| Prompt::new(format!("prompt_v{}", i), "请按标准评分并返回 JSON"))
        .collect()
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

pub fn model_config() -> ModelConfig {
    ModelConfig {
        timeout: Duration::from_millis(100),
        ..ModelConfig::new("scripted-model")
    }
}

/// 只注册一个提供商的编排器
pub fn orchestrator(
    data_dir: &Path,
    backend: Arc<dyn ScoringBackend>,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn ResultSink>,
    concurrency: usize,
) -> Orchestrator {
    let mut registry = BackendRegistry::new();
    registry.register(PROVIDER, backend, model_config());

    let flow = ScoringFlow::new(checkpoints.clone(), sink.clone(), fast_retry());
    Orchestrator::new(
        registry,
        checkpoints,
        sink,
        RunStore::new(RunLayout::new(data_dir)),
        flow,
        concurrency,
    )
}
