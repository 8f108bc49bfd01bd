//! 结果存储 - 业务能力层
//!
//! 只追加，不改写。每个运行一个 `results.jsonl`，读者可以随时全量重读。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::PersistenceError;
use crate::infrastructure::{JsonlFile, RunLayout};
use crate::models::{RunId, TaskResult};

/// 结果存储
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// 追加一条结果，返回时已落盘
    async fn append(&self, run_id: &RunId, result: &TaskResult) -> Result<(), PersistenceError>;

    /// 按写入顺序读取运行的全部结果（同一任务键可能出现多次）
    async fn read_all(&self, run_id: &RunId) -> Result<Vec<TaskResult>, PersistenceError>;
}

/// 基于文件的结果存储（`runs/<run_id>/results.jsonl`）
pub struct FileResultSink {
    layout: RunLayout,
    files: Mutex<HashMap<RunId, Arc<JsonlFile>>>,
}

impl FileResultSink {
    pub fn new(layout: RunLayout) -> Self {
        Self {
            layout,
            files: Mutex::new(HashMap::new()),
        }
    }

    async fn file(&self, run_id: &RunId) -> Arc<JsonlFile> {
        let mut files = self.files.lock().await;
        files
            .entry(run_id.clone())
            .or_insert_with(|| Arc::new(JsonlFile::new(self.layout.results_path(run_id))))
            .clone()
    }
}

#[async_trait]
impl ResultSink for FileResultSink {
    async fn append(&self, run_id: &RunId, result: &TaskResult) -> Result<(), PersistenceError> {
        self.file(run_id).await.append(result).await
    }

    async fn read_all(&self, run_id: &RunId) -> Result<Vec<TaskResult>, PersistenceError> {
        self.file(run_id).await.read_all().await
    }
}

/// 内存结果存储
#[derive(Default)]
pub struct MemoryResultSink {
    runs: Mutex<HashMap<RunId, Vec<TaskResult>>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn append(&self, run_id: &RunId, result: &TaskResult) -> Result<(), PersistenceError> {
        let mut runs = self.runs.lock().await;
        runs.entry(run_id.clone()).or_default().push(result.clone());
        Ok(())
    }

    async fn read_all(&self, run_id: &RunId) -> Result<Vec<TaskResult>, PersistenceError> {
        let runs = self.runs.lock().await;
        Ok(runs.get(run_id).cloned().unwrap_or_default())
    }
}
