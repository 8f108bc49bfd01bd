use std::path::PathBuf;

use crate::models::RunId;

/// 运行在磁盘上的目录结构
///
/// ```text
/// <data_dir>/runs/<run_id>/manifest.json      运行清单
/// <data_dir>/runs/<run_id>/checkpoints.jsonl  检查点（追加写）
/// <data_dir>/runs/<run_id>/results.jsonl      任务结果（追加写）
/// ```
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into(),
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.runs_dir().join(run_id.as_str())
    }

    pub fn manifest_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("manifest.json")
    }

    pub fn checkpoints_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("checkpoints.jsonl")
    }

    pub fn results_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("results.jsonl")
    }
}
