//! 提供商标识与默认配置
//!
//! 所有提供商都通过 OpenAI 兼容的 chat/completions 接口访问，
//! 这里只记录各家的兼容端点和默认模型。

use std::fmt;

use phf::phf_map;
use serde::{Deserialize, Serialize};

/// 提供商默认配置
#[derive(Debug, Clone, Copy)]
pub struct ProviderDefaults {
    pub base_url: &'static str,
    pub model: &'static str,
}

/// 支持的提供商（按展示顺序）
pub const SUPPORTED_PROVIDERS: [&str; 7] = [
    "gemini", "openai", "claude", "deepseek", "qwen", "doubao", "kimi",
];

static PROVIDER_DEFAULTS: phf::Map<&'static str, ProviderDefaults> = phf_map! {
    "gemini" => ProviderDefaults {
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        model: "gemini-2.5-pro-preview-05-06",
    },
    "openai" => ProviderDefaults {
        base_url: "https://api.openai.com/v1",
        model: "gpt-4o",
    },
    "claude" => ProviderDefaults {
        base_url: "https://api.anthropic.com/v1",
        model: "claude-sonnet-4-20250514",
    },
    "deepseek" => ProviderDefaults {
        base_url: "https://api.deepseek.com",
        model: "deepseek-reasoner",
    },
    "qwen" => ProviderDefaults {
        base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1",
        model: "qwen-plus",
    },
    "doubao" => ProviderDefaults {
        base_url: "https://ark.cn-beijing.volces.com/api/v3",
        model: "doubao-1-5-thinking-pro-250415",
    },
    "kimi" => ProviderDefaults {
        base_url: "https://api.moonshot.cn/v1",
        model: "moonshot-v1-8k",
    },
};

/// 提供商 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// 统一转为小写
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 环境变量前缀，例如 `gemini` → `GEMINI`
    pub fn env_prefix(&self) -> String {
        self.0.to_uppercase()
    }

    /// 内置默认配置（未知提供商返回 None）
    pub fn defaults(&self) -> Option<&'static ProviderDefaults> {
        PROVIDER_DEFAULTS.get(self.0.as_str())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// 运行中使用的提供商及其模型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub id: ProviderId,
    pub model: String,
}
