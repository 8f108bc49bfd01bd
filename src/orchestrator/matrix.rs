//! 任务矩阵展开

use std::collections::HashSet;

use crate::models::{Document, Prompt, ProviderSpec, TaskKey};

/// 展开任务矩阵
///
/// 顺序固定为 文档 → Prompt → 提供商，重复的任务键只保留第一次出现
pub fn expand(
    documents: &[Document],
    prompts: &[Prompt],
    providers: &[ProviderSpec],
) -> Vec<TaskKey> {
    let mut seen = HashSet::new();
    let mut keys = Vec::with_capacity(documents.len() * prompts.len() * providers.len());

    for document in documents {
        for prompt in prompts {
            for provider in providers {
                let key = TaskKey::new(
                    document.id.as_str(),
                    prompt.id.as_str(),
                    provider.id.clone(),
                );
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
    }

    keys
}
