//! 运行清单存储 - 基础设施层

use tokio::fs;
use tracing::{debug, warn};

use crate::error::PersistenceError;
use crate::infrastructure::RunLayout;
use crate::models::{RunId, RunManifest};

/// 运行清单存储
///
/// 清单在运行创建时写入一次，之后只读
pub struct RunStore {
    layout: RunLayout,
}

impl RunStore {
    pub fn new(layout: RunLayout) -> Self {
        Self { layout }
    }

    /// 保存运行清单（先写临时文件再改名，不会留下半个清单）
    pub async fn save(&self, manifest: &RunManifest) -> Result<(), PersistenceError> {
        let run_dir = self.layout.run_dir(&manifest.run_id);
        fs::create_dir_all(&run_dir)
            .await
            .map_err(|e| PersistenceError::io(&run_dir, e))?;

        let path = self.layout.manifest_path(&manifest.run_id);
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(manifest)?;

        fs::write(&tmp_path, &content)
            .await
            .map_err(|e| PersistenceError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| PersistenceError::io(&path, e))?;

        debug!("运行清单已保存: {}", path.display());
        Ok(())
    }

    /// 加载运行清单
    pub async fn load(&self, run_id: &RunId) -> Result<RunManifest, PersistenceError> {
        let path = self.layout.manifest_path(run_id);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::ManifestNotFound {
                    run_id: run_id.to_string(),
                })
            }
            Err(e) => return Err(PersistenceError::io(&path, e)),
        };

        serde_json::from_slice(&content)
            .map_err(|source| PersistenceError::ManifestCorrupt { path, source })
    }

    /// 列出所有运行（新的在前）
    pub async fn list(&self) -> Result<Vec<RunId>, PersistenceError> {
        let runs_dir = self.layout.runs_dir();
        let mut entries = match fs::read_dir(&runs_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(&runs_dir, e)),
        };

        let mut run_ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(&runs_dir, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(run_id) = RunId::parse(&name) else {
                warn!("跳过无法识别的目录: {}", name);
                continue;
            };

            let has_manifest = fs::try_exists(self.layout.manifest_path(&run_id))
                .await
                .unwrap_or(false);
            if has_manifest {
                run_ids.push(run_id);
            } else {
                debug!("跳过没有清单的目录: {}", name);
            }
        }

        run_ids.sort();
        run_ids.reverse();
        Ok(run_ids)
    }
}
