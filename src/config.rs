//! 程序配置
//!
//! 加载顺序：默认值 → TOML 配置文件（可选）→ 环境变量（`.env` 由 main 预先载入）

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::clients::ModelConfig;
use crate::error::ConfigError;
use crate::models::{ProviderId, SUPPORTED_PROVIDERS};
use crate::workflow::RetryPolicy;

/// 单个提供商的凭据和覆盖项
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 该提供商的 HTTP 代理，如 `http://127.0.0.1:7890`
    pub proxy: Option<String>,
}

impl ProviderSettings {
    /// 用另一份设置中存在的字段覆盖自身
    fn merge(&mut self, other: ProviderSettings) {
        if other.api_key.is_some() {
            self.api_key = other.api_key;
        }
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
    }
}

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时进行的评分任务数
    pub max_concurrent_tasks: usize,
    /// 每个任务最多调用次数（含第一次）
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// 单次调用超时
    pub request_timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 运行数据目录（清单、检查点、结果）
    pub data_dir: String,
    /// 规划书 Markdown 目录
    pub mds_dir: String,
    /// 评分标准目录
    pub prompts_dir: String,
    /// 默认启用的提供商
    pub providers: Vec<String>,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- 提供商凭据 ---
    pub provider_overrides: HashMap<String, ProviderSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            request_timeout_secs: 300,
            temperature: 0.0,
            max_tokens: 8192,
            data_dir: "data".to_string(),
            mds_dir: "mds".to_string(),
            prompts_dir: "prompts".to_string(),
            providers: vec!["gemini".to_string()],
            verbose_logging: false,
            provider_overrides: HashMap::new(),
        }
    }
}

/// TOML 配置文件的结构，所有字段可选
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    max_concurrent_tasks: Option<usize>,
    max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    data_dir: Option<String>,
    mds_dir: Option<String>,
    prompts_dir: Option<String>,
    providers: Option<Vec<String>>,
    verbose_logging: Option<bool>,
    /// `[provider.<id>]` 表
    provider: HashMap<String, ProviderSettings>,
}

impl Config {
    /// 从环境变量加载（未设置的项使用默认值）
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env(|name| std::env::var(name).ok())
    }

    /// 从 TOML 文件加载（未出现的项使用默认值）
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::default().apply_toml_file(path.as_ref())
    }

    /// 默认值 → TOML 文件（如果提供）→ 环境变量
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::default().apply_toml_file(path)?,
            None => Self::default(),
        };
        config
            .apply_env(|name| std::env::var(name).ok())?
            .validated()
    }

    fn apply_toml_file(self, path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::FileUnreadable {
                path: path.to_path_buf(),
                source,
            })?;
        self.apply_toml_str(&content)
            .map_err(|source| ConfigError::TomlParseFailed {
                path: path.to_path_buf(),
                source,
            })
    }

    fn apply_toml_str(mut self, content: &str) -> Result<Self, toml::de::Error> {
        let file: FileConfig = toml::from_str(content)?;

        if let Some(v) = file.max_concurrent_tasks {
            self.max_concurrent_tasks = v;
        }
        if let Some(v) = file.max_attempts {
            self.max_attempts = v;
        }
        if let Some(v) = file.retry_base_delay_ms {
            self.retry_base_delay_ms = v;
        }
        if let Some(v) = file.retry_max_delay_ms {
            self.retry_max_delay_ms = v;
        }
        if let Some(v) = file.request_timeout_secs {
            self.request_timeout_secs = v;
        }
        if let Some(v) = file.temperature {
            self.temperature = v;
        }
        if let Some(v) = file.max_tokens {
            self.max_tokens = v;
        }
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file.mds_dir {
            self.mds_dir = v;
        }
        if let Some(v) = file.prompts_dir {
            self.prompts_dir = v;
        }
        if let Some(v) = file.providers {
            self.providers = v;
        }
        if let Some(v) = file.verbose_logging {
            self.verbose_logging = v;
        }
        for (id, settings) in file.provider {
            self.provider_overrides
                .entry(ProviderId::new(&id).to_string())
                .or_default()
                .merge(settings);
        }

        Ok(self)
    }

    /// 用环境变量覆盖；`lookup` 便于测试时替换环境
    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(v) = parse_env(&lookup, "MAX_CONCURRENT_TASKS", "usize")? {
            self.max_concurrent_tasks = v;
        }
        if let Some(v) = parse_env(&lookup, "MAX_ATTEMPTS", "u32")? {
            self.max_attempts = v;
        }
        if let Some(v) = parse_env(&lookup, "RETRY_BASE_DELAY_MS", "u64")? {
            self.retry_base_delay_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "RETRY_MAX_DELAY_MS", "u64")? {
            self.retry_max_delay_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "REQUEST_TIMEOUT_SECS", "u64")? {
            self.request_timeout_secs = v;
        }
        if let Some(v) = parse_env(&lookup, "TEMPERATURE", "f32")? {
            self.temperature = v;
        }
        if let Some(v) = parse_env(&lookup, "MAX_TOKENS", "u32")? {
            self.max_tokens = v;
        }
        if let Some(v) = parse_env(&lookup, "VERBOSE_LOGGING", "bool")? {
            self.verbose_logging = v;
        }
        if let Some(v) = string_env(&lookup, "DATA_DIR") {
            self.data_dir = v;
        }
        if let Some(v) = string_env(&lookup, "MDS_DIR") {
            self.mds_dir = v;
        }
        if let Some(v) = string_env(&lookup, "PROMPTS_DIR") {
            self.prompts_dir = v;
        }
        if let Some(v) = string_env(&lookup, "PROVIDERS") {
            self.providers = split_list(&v);
        }

        // {PREFIX}_API_KEY / _MODEL / _BASE_URL / _PROXY
        for id in SUPPORTED_PROVIDERS {
            let prefix = ProviderId::new(id).env_prefix();
            let settings = ProviderSettings {
                api_key: string_env(&lookup, &format!("{}_API_KEY", prefix)),
                model: string_env(&lookup, &format!("{}_MODEL", prefix)),
                base_url: string_env(&lookup, &format!("{}_BASE_URL", prefix)),
                proxy: string_env(&lookup, &format!("{}_PROXY", prefix)),
            };
            if settings != ProviderSettings::default() {
                self.provider_overrides
                    .entry(id.to_string())
                    .or_default()
                    .merge(settings);
            }
        }

        Ok(self)
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_CONCURRENT_TASKS",
                reason: "至少为 1".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_ATTEMPTS",
                reason: "至少为 1".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REQUEST_TIMEOUT_SECS",
                reason: "至少为 1 秒".to_string(),
            });
        }
        Ok(self)
    }

    /// 提供商的有效设置（未配置时全部为空）
    pub fn provider_settings(&self, provider: &ProviderId) -> ProviderSettings {
        self.provider_overrides
            .get(provider.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// 配置中启用的提供商
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(ProviderId::new).collect()
    }

    /// 指定模型的调用参数
    pub fn model_config(&self, model: impl Into<String>) -> ModelConfig {
        ModelConfig {
            model: model.into(),
            temperature: self.temperature,
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_tokens: self.max_tokens,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

/// 读取字符串环境变量，空值视为未设置
fn string_env(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    expected_type: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::EnvVarParseFailed {
            var_name: name.to_string(),
            value,
            expected_type: expected_type.to_string(),
        })
}

/// 解析逗号分隔的列表，去掉空项
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
