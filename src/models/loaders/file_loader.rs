use crate::models::document::{Document, Prompt};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 从文件夹中加载所有 Markdown 规划书（`*.md`，按文件名排序）
///
/// 空文件会被跳过；文件夹中没有任何有效文档时返回错误
pub async fn load_documents(folder_path: &str) -> Result<Vec<Document>> {
    let files = list_files_with_extension(folder_path, "md").await?;
    if files.is_empty() {
        anyhow::bail!("文件夹中没有 Markdown 文件: {}", folder_path);
    }

    let mut documents = Vec::new();
    for path in files {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("无法读取文件: {}", path.display()))?;
        let content = content.trim();
        if content.is_empty() {
            tracing::warn!("跳过空文件: {}", path.display());
            continue;
        }

        let file_name = file_name_of(&path);
        tracing::debug!("已加载文档: {} ({} 字符)", file_name, content.chars().count());
        documents.push(Document::new(file_name, content));
    }

    if documents.is_empty() {
        anyhow::bail!("文件夹中的 Markdown 文件均为空: {}", folder_path);
    }

    tracing::info!("✓ 加载了 {} 份规划书", documents.len());
    Ok(documents)
}

/// 从文件夹中加载所有评分 Prompt（`*.txt`，ID 为去掉扩展名的文件名）
pub async fn load_prompts(folder_path: &str) -> Result<Vec<Prompt>> {
    let files = list_files_with_extension(folder_path, "txt").await?;

    let mut prompts = Vec::new();
    for path in files {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("无法读取 Prompt 文件: {}", path.display()))?;
        if content.trim().is_empty() {
            tracing::warn!("跳过空 Prompt: {}", path.display());
            continue;
        }

        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name_of(&path));
        prompts.push(Prompt::new(id, content));
    }

    if prompts.is_empty() {
        anyhow::bail!("文件夹中没有可用的 Prompt: {}", folder_path);
    }

    tracing::info!(
        "✓ 加载了 {} 个评分标准: {}",
        prompts.len(),
        prompts
            .iter()
            .map(|p| p.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(prompts)
}

/// 列出文件夹中指定扩展名的文件（忽略大小写，按文件名排序）
async fn list_files_with_extension(folder_path: &str, extension: &str) -> Result<Vec<PathBuf>> {
    let folder = PathBuf::from(folder_path);

    if !folder.is_dir() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut files = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if matches && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}
