//! 检查点存储 - 业务能力层
//!
//! 只负责"记录哪些任务已经完成"，不关心流程
//!
//! 底层是追加写日志：标记完成和清除检查点都是新增一行，
//! 读取时按顺序重放得到当前的完成集合。写一半崩溃最多导致
//! "尚未标记完成"，只会让该任务被重新执行一次。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::PersistenceError;
use crate::infrastructure::{JsonlFile, RunLayout};
use crate::models::{RunId, TaskKey};

/// 检查点存储
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 任务是否已完成
    async fn is_complete(&self, run_id: &RunId, key: &TaskKey) -> Result<bool, PersistenceError>;

    /// 标记任务完成，重复标记为空操作
    async fn mark_complete(&self, run_id: &RunId, key: &TaskKey) -> Result<(), PersistenceError>;

    /// 加载运行的全部已完成任务
    async fn load_completed(&self, run_id: &RunId) -> Result<HashSet<TaskKey>, PersistenceError>;

    /// 清除检查点，使任务在下次恢复时重新执行；返回之前是否已完成
    async fn clear(&self, run_id: &RunId, key: &TaskKey) -> Result<bool, PersistenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum CheckpointOp {
    Complete,
    Clear,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    op: CheckpointOp,
    key: TaskKey,
    at: DateTime<Utc>,
}

/// 单个运行的检查点日志及其内存视图
struct RunCheckpoints {
    file: JsonlFile,
    /// 首次访问时从磁盘重放
    completed: Mutex<Option<HashSet<TaskKey>>>,
}

impl RunCheckpoints {
    async fn loaded<'a>(
        &self,
        cache: &'a mut Option<HashSet<TaskKey>>,
    ) -> Result<&'a mut HashSet<TaskKey>, PersistenceError> {
        if cache.is_none() {
            *cache = Some(self.replay().await?);
        }
        Ok(cache.get_or_insert_with(HashSet::new))
    }

    async fn replay(&self) -> Result<HashSet<TaskKey>, PersistenceError> {
        let records: Vec<CheckpointRecord> = self.file.read_all().await?;
        let mut completed = HashSet::new();
        for record in records {
            match record.op {
                CheckpointOp::Complete => {
                    completed.insert(record.key);
                }
                CheckpointOp::Clear => {
                    completed.remove(&record.key);
                }
            }
        }
        debug!(
            "重放检查点 {}: {} 个已完成",
            self.file.path().display(),
            completed.len()
        );
        Ok(completed)
    }
}

/// 基于文件的检查点存储（`runs/<run_id>/checkpoints.jsonl`）
pub struct FileCheckpointStore {
    layout: RunLayout,
    runs: Mutex<HashMap<RunId, Arc<RunCheckpoints>>>,
}

impl FileCheckpointStore {
    pub fn new(layout: RunLayout) -> Self {
        Self {
            layout,
            runs: Mutex::new(HashMap::new()),
        }
    }

    async fn run(&self, run_id: &RunId) -> Arc<RunCheckpoints> {
        let mut runs = self.runs.lock().await;
        runs.entry(run_id.clone())
            .or_insert_with(|| {
                Arc::new(RunCheckpoints {
                    file: JsonlFile::new(self.layout.checkpoints_path(run_id)),
                    completed: Mutex::new(None),
                })
            })
            .clone()
    }

    /// 在持有锁的情况下执行操作，必要时先从磁盘加载
    async fn with_completed<T>(
        &self,
        run_id: &RunId,
        op: impl FnOnce(&mut HashSet<TaskKey>) -> T,
    ) -> Result<T, PersistenceError> {
        let run = self.run(run_id).await;
        let mut guard = run.completed.lock().await;
        let completed = run.loaded(&mut guard).await?;
        Ok(op(completed))
    }

    async fn write(
        &self,
        run_id: &RunId,
        key: &TaskKey,
        op: CheckpointOp,
    ) -> Result<bool, PersistenceError> {
        let run = self.run(run_id).await;
        let mut guard = run.completed.lock().await;
        let completed = run.loaded(&mut guard).await?;

        let was_complete = completed.contains(key);
        let changes = match op {
            CheckpointOp::Complete => !was_complete,
            CheckpointOp::Clear => was_complete,
        };
        if !changes {
            return Ok(was_complete);
        }

        // 先落盘再更新内存视图
        let record = CheckpointRecord {
            op,
            key: key.clone(),
            at: Utc::now(),
        };
        run.file.append(&record).await?;

        match op {
            CheckpointOp::Complete => completed.insert(key.clone()),
            CheckpointOp::Clear => completed.remove(key),
        };
        Ok(was_complete)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn is_complete(&self, run_id: &RunId, key: &TaskKey) -> Result<bool, PersistenceError> {
        self.with_completed(run_id, |completed| completed.contains(key))
            .await
    }

    async fn mark_complete(&self, run_id: &RunId, key: &TaskKey) -> Result<(), PersistenceError> {
        self.write(run_id, key, CheckpointOp::Complete).await?;
        Ok(())
    }

    async fn load_completed(&self, run_id: &RunId) -> Result<HashSet<TaskKey>, PersistenceError> {
        self.with_completed(run_id, |completed| completed.clone())
            .await
    }

    async fn clear(&self, run_id: &RunId, key: &TaskKey) -> Result<bool, PersistenceError> {
        self.write(run_id, key, CheckpointOp::Clear).await
    }
}

/// 内存检查点存储（测试和一次性运行使用）
#[derive(Default)]
pub struct MemoryCheckpointStore {
    runs: Mutex<HashMap<RunId, HashSet<TaskKey>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn is_complete(&self, run_id: &RunId, key: &TaskKey) -> Result<bool, PersistenceError> {
        let runs = self.runs.lock().await;
        Ok(runs.get(run_id).is_some_and(|set| set.contains(key)))
    }

    async fn mark_complete(&self, run_id: &RunId, key: &TaskKey) -> Result<(), PersistenceError> {
        let mut runs = self.runs.lock().await;
        runs.entry(run_id.clone()).or_default().insert(key.clone());
        Ok(())
    }

    async fn load_completed(&self, run_id: &RunId) -> Result<HashSet<TaskKey>, PersistenceError> {
        let runs = self.runs.lock().await;
        Ok(runs.get(run_id).cloned().unwrap_or_default())
    }

    async fn clear(&self, run_id: &RunId, key: &TaskKey) -> Result<bool, PersistenceError> {
        let mut runs = self.runs.lock().await;
        Ok(runs.get_mut(run_id).is_some_and(|set| set.remove(key)))
    }
}
