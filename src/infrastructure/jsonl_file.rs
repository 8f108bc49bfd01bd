//! 追加写 JSONL 文件 - 基础设施层
//!
//! 只负责"一行一条记录"的追加和全量读取，不关心记录内容

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::PersistenceError;

/// 追加写 JSONL 文件
///
/// 职责：
/// - 写入串行化：同一时刻只有一个写者，两条记录的字节不会交错
/// - 每条记录写完后 `sync_data`，返回即已落盘
/// - 读取时跳过损坏的行（进程在写一半时被杀）
///
/// 同一路径在进程内只能有一个 `JsonlFile` 实例
pub struct JsonlFile {
    path: PathBuf,
    /// 上次追加之后文件末尾是否一定是换行
    boundary_checked: Mutex<bool>,
}

impl JsonlFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            boundary_checked: Mutex::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条记录
    pub async fn append<T: Serialize>(&self, record: &T) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        // 锁覆盖整个 打开 → 写入 → 落盘 过程
        let mut boundary_checked = self.boundary_checked.lock().await;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_err(e))?;

        let written = self
            .write_line(&mut file, &line, !*boundary_checked)
            .await;
        // 写入失败时末尾可能留下残行，下次追加前重新检查
        *boundary_checked = written.is_ok();
        written?;

        debug!("追加记录到 {} ({} 字节)", self.path.display(), line.len());
        Ok(())
    }

    async fn write_line(
        &self,
        file: &mut fs::File,
        line: &str,
        check_boundary: bool,
    ) -> Result<(), PersistenceError> {
        // 文件末尾可能有没有换行结尾的残行，先补一个换行，避免新记录被拼进残行
        if check_boundary && self.ends_without_newline(file).await? {
            warn!("文件末尾存在未完成的记录，补齐换行: {}", self.path.display());
            file.write_all(b"\n").await.map_err(|e| self.io_err(e))?;
        }

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.io_err(e))?;
        file.flush().await.map_err(|e| self.io_err(e))?;
        file.sync_data().await.map_err(|e| self.io_err(e))
    }

    /// 读取所有记录
    ///
    /// 文件不存在时返回空列表；无法解析的行记录警告后跳过
    pub async fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, PersistenceError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };

        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "跳过损坏的记录 {}:{}: {}",
                    self.path.display(),
                    index + 1,
                    e
                ),
            }
        }

        Ok(records)
    }

    async fn ends_without_newline(&self, file: &mut fs::File) -> Result<bool, PersistenceError> {
        let len = file.metadata().await.map_err(|e| self.io_err(e))?.len();
        if len == 0 {
            return Ok(false);
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))
            .await
            .map_err(|e| self.io_err(e))?;
        file.read_exact(&mut last)
            .await
            .map_err(|e| self.io_err(e))?;
        Ok(last[0] != b'\n')
    }

    fn io_err(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::io(&self.path, source)
    }
}
