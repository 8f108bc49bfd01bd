//! 评分后端
//!
//! 每个提供商一个实现，编排层只通过 `ScoringBackend` 调用，
//! 除了按提供商 ID 选择后端以外不区分提供商。

pub mod openai_compatible;
pub mod registry;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::BackendError;

pub use openai_compatible::OpenAiCompatibleBackend;
pub use registry::{BackendEntry, BackendRegistry};

/// 单次调用的模型参数
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    /// 默认为 0，保证评分尽量可复现
    pub temperature: f32,
    /// 单次调用的最长等待时间
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            timeout: Duration::from_secs(300),
            max_tokens: 8192,
        }
    }
}

/// 模型的一次回复
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendReply {
    /// 回复正文
    pub content: String,
    /// 推理过程（提供商返回 `reasoning_content` 时才有）
    pub thinking: Option<String>,
}

impl BackendReply {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            thinking: None,
        }
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }
}

/// 评分能力
///
/// 给定评分标准和文档正文，返回模型的原始回复
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    async fn score(
        &self,
        prompt: &str,
        document_text: &str,
        config: &ModelConfig,
    ) -> Result<BackendReply, BackendError>;
}
