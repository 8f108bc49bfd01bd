//! 后端注册表：提供商 ID → 评分后端

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::clients::{ModelConfig, OpenAiCompatibleBackend, ScoringBackend};
use crate::config::Config;
use crate::error::ConfigError;
use crate::models::{ProviderId, SUPPORTED_PROVIDERS};

/// 一个已注册的后端及其模型参数
#[derive(Clone)]
pub struct BackendEntry {
    pub backend: Arc<dyn ScoringBackend>,
    pub model: ModelConfig,
}

/// 后端注册表
#[derive(Clone, Default)]
pub struct BackendRegistry {
    entries: HashMap<ProviderId, BackendEntry>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册后端，同一提供商重复注册时覆盖
    pub fn register(
        &mut self,
        provider: impl Into<ProviderId>,
        backend: Arc<dyn ScoringBackend>,
        model: ModelConfig,
    ) -> &mut Self {
        self.entries
            .insert(provider.into(), BackendEntry { backend, model });
        self
    }

    pub fn get(&self, provider: &ProviderId) -> Option<&BackendEntry> {
        self.entries.get(provider)
    }

    pub fn contains(&self, provider: &ProviderId) -> bool {
        self.entries.contains_key(provider)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 已注册的提供商，按 ID 排序
    pub fn provider_ids(&self) -> Vec<&ProviderId> {
        let mut ids: Vec<_> = self.entries.keys().collect();
        ids.sort();
        ids
    }

    /// 按配置为指定提供商创建 OpenAI 兼容后端
    ///
    /// 没有 API key 的提供商会被跳过；一个都不剩时返回 `NoProviders`
    pub fn from_config(config: &Config, providers: &[ProviderId]) -> Result<Self, ConfigError> {
        let mut registry = Self::new();

        for provider in providers {
            let defaults = provider
                .defaults()
                .ok_or_else(|| ConfigError::UnknownProvider {
                    provider: provider.to_string(),
                    supported: SUPPORTED_PROVIDERS.join(", "),
                })?;
            let settings = config.provider_settings(provider);

            let Some(api_key) = settings.api_key.filter(|k| !k.trim().is_empty()) else {
                warn!(
                    "⚠️ 跳过提供商 {}: {}_API_KEY 未配置",
                    provider,
                    provider.env_prefix()
                );
                continue;
            };

            let base_url = settings
                .base_url
                .unwrap_or_else(|| defaults.base_url.to_string());
            let model = settings
                .model
                .unwrap_or_else(|| defaults.model.to_string());

            info!("✓ 提供商 {} 就绪 (模型: {}, 端点: {})", provider, model, base_url);

            let backend = OpenAiCompatibleBackend::new(
                provider.clone(),
                &api_key,
                &base_url,
                settings.proxy.as_deref(),
            )?;
            registry.register(provider.clone(), Arc::new(backend), config.model_config(model));
        }

        if registry.is_empty() {
            return Err(ConfigError::NoProviders);
        }
        Ok(registry)
    }
}

impl fmt::Debug for BackendEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendEntry")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

// 后端是 trait 对象，这里只列出提供商和模型
impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.provider_ids()
                    .into_iter()
                    .map(|id| (id.as_str(), &self.entries[id].model.model)),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;

    #[test]
    fn test_providers_without_key_are_skipped() {
        let mut config = Config::default();
        config.provider_overrides.insert(
            "deepseek".to_string(),
            ProviderSettings {
                api_key: Some("sk-test".to_string()),
                model: None,
                base_url: None,
                proxy: Some("http://127.0.0.1:7890".to_string()),
            },
        );

        let providers = vec![ProviderId::new("gemini"), ProviderId::new("deepseek")];
        let registry = BackendRegistry::from_config(&config, &providers).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(&ProviderId::new("gemini")));
        let entry = registry.get(&ProviderId::new("deepseek")).unwrap();
        assert_eq!(entry.model.model, "deepseek-reasoner");
    }

    #[test]
    fn test_no_usable_provider() {
        let config = Config::default();
        let err = BackendRegistry::from_config(&config, &[ProviderId::new("gemini")]).unwrap_err();
        assert!(matches!(err, ConfigError::NoProviders));
    }

    #[test]
    fn test_unknown_provider() {
        let config = Config::default();
        let err = BackendRegistry::from_config(&config, &[ProviderId::new("grok")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider { .. }));
    }

    #[test]
    fn test_debug_lists_providers() {
        let mut config = Config::default();
        for id in ["kimi", "deepseek"] {
            config.provider_overrides.insert(
                id.to_string(),
                ProviderSettings {
                    api_key: Some("sk-test".to_string()),
                    ..Default::default()
                },
            );
        }
        let providers = vec![ProviderId::new("kimi"), ProviderId::new("deepseek")];
        let registry = BackendRegistry::from_config(&config, &providers).unwrap();

        assert_eq!(
            format!("{:?}", registry),
            r#"{"deepseek": "deepseek-reasoner", "kimi": "moonshot-v1-8k"}"#
        );
        let err = BackendRegistry::from_config(&Config::default(), &providers).unwrap_err();
        assert!(matches!(err, ConfigError::NoProviders));
    }

    #[test]
    fn test_invalid_proxy_fails_registration() {
        let mut config = Config::default();
        config.provider_overrides.insert(
            "openai".to_string(),
            ProviderSettings {
                api_key: Some("sk-test".to_string()),
                proxy: Some("http://[::1".to_string()),
                ..Default::default()
            },
        );
        let err = BackendRegistry::from_config(&config, &[ProviderId::new("openai")]).unwrap_err();
        assert!(matches!(err, ConfigError::HttpClient { .. }));
    }
}
