//! OpenAI 兼容接口的评分后端
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 各提供商都走各自的 OpenAI 兼容端点（Gemini, Claude, DeepSeek, Qwen, Doubao, Kimi 等）
//! - 评分标准作为系统消息，文档正文作为用户消息

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::clients::{BackendReply, ModelConfig, ScoringBackend};
use crate::error::{BackendError, ConfigError};
use crate::models::ProviderId;

/// OpenAI 兼容后端
///
/// 职责：
/// - 组装 chat/completions 请求
/// - 取出回复正文和推理过程（`reasoning_content`）
/// - 把客户端库的错误归类到后端错误
/// - 不重试、不计时，这些由流程层负责
pub struct OpenAiCompatibleBackend {
    provider: ProviderId,
    client: Client<OpenAIConfig>,
}

impl OpenAiCompatibleBackend {
    /// `proxy` 为空时直连
    pub fn new(
        provider: ProviderId,
        api_key: &str,
        base_url: &str,
        proxy: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        let http_client = build_http_client(&provider, proxy)?;

        // 客户端库默认会在内部重试 429 和 5xx，这里只允许调用一次
        let single_attempt: ExponentialBackoff = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();

        Ok(Self {
            provider,
            client: Client::with_config(openai_config)
                .with_http_client(http_client)
                .with_backoff(single_attempt),
        })
    }

    fn build_messages(
        prompt: &str,
        document_text: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(prompt)
            .build()?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(document_text)
            .build()?;

        Ok(vec![
            ChatCompletionRequestMessage::System(system_msg),
            ChatCompletionRequestMessage::User(user_msg),
        ])
    }
}

#[async_trait]
impl ScoringBackend for OpenAiCompatibleBackend {
    async fn score(
        &self,
        prompt: &str,
        document_text: &str,
        config: &ModelConfig,
    ) -> Result<BackendReply, BackendError> {
        debug!(
            "[{}] 调用评分接口，模型: {}，正文 {} 字符",
            self.provider,
            config.model,
            document_text.chars().count()
        );

        let messages = Self::build_messages(prompt, document_text).map_err(classify_error)?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&config.model)
            .messages(messages)
            .temperature(config.temperature)
            .max_tokens(config.max_tokens)
            .build()
            .map_err(classify_error)?;

        // 按原始 JSON 读取响应，标准响应类型里没有 reasoning_content
        let response: JsonValue = self
            .client
            .chat()
            .create_byot(request)
            .await
            .map_err(|e| {
                warn!("[{}] 评分接口调用失败: {}", self.provider, e);
                classify_error(e)
            })?;

        let reply = parse_reply(&response)?;
        debug!(
            "[{}] 评分接口调用成功 (推理过程 {} 字符)",
            self.provider,
            reply.thinking.as_deref().map_or(0, |t| t.chars().count())
        );
        Ok(reply)
    }
}

/// 创建 HTTP 客户端，配置了代理时所有请求都走代理
fn build_http_client(
    provider: &ProviderId,
    proxy: Option<&str>,
) -> Result<reqwest::Client, ConfigError> {
    let http_error = |e: reqwest::Error| ConfigError::HttpClient {
        provider: provider.to_string(),
        reason: e.to_string(),
    };

    let mut builder = reqwest::Client::builder();
    if let Some(proxy_url) = proxy.map(str::trim).filter(|p| !p.is_empty()) {
        debug!("[{}] 使用代理: {}", provider, proxy_url);
        builder = builder.proxy(reqwest::Proxy::all(proxy_url).map_err(http_error)?);
    }
    builder.build().map_err(http_error)
}

/// 从 chat/completions 响应中取出第一个回复的正文和推理过程
fn parse_reply(response: &JsonValue) -> Result<BackendReply, BackendError> {
    let message = response.pointer("/choices/0/message");
    let text_of = |field: &str| {
        message
            .and_then(|m| m.get(field))
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    };

    let content = text_of("content").ok_or_else(|| BackendError::ServiceError {
        status: None,
        message: "返回内容为空".to_string(),
    })?;

    Ok(BackendReply {
        content,
        thinking: text_of("reasoning_content"),
    })
}

/// 把客户端库的错误归类
///
/// - 传输层：超时 → Timeout；带状态码的按状态码归类；其余 → NetworkError
/// - API 错误体：按 type / code / message 中的关键字归类，识别不了的视为服务端错误
/// - 请求构造或反序列化失败：视为服务端错误
fn classify_error(err: OpenAIError) -> BackendError {
    match err {
        OpenAIError::Reqwest(e) => {
            if e.is_timeout() {
                BackendError::Timeout(Duration::ZERO)
            } else if let Some(status) = e.status() {
                BackendError::from_status(status.as_u16(), e.to_string())
            } else {
                BackendError::NetworkError(e.to_string())
            }
        }
        OpenAIError::ApiError(api) => {
            let kind = api
                .r#type
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_default();
            let code = api
                .code
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_default();
            classify_api_error(&kind, &code, &api.message)
        }
        OpenAIError::InvalidArgument(message) => BackendError::ServiceError {
            status: Some(400),
            message,
        },
        other => BackendError::ServiceError {
            status: None,
            message: other.to_string(),
        },
    }
}

fn classify_api_error(kind: &str, code: &str, message: &str) -> BackendError {
    let haystack = format!("{} {} {}", kind, code, message).to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| haystack.contains(n));

    if has(&[
        "invalid_api_key",
        "authentication",
        "unauthorized",
        "permission",
        "api key not valid",
        "incorrect api key",
    ]) {
        BackendError::Unauthorized(message.to_string())
    } else if has(&["rate_limit", "rate limit", "too many requests", "resource_exhausted"]) {
        BackendError::RateLimited(message.to_string())
    } else if has(&["timeout", "timed out"]) {
        BackendError::Timeout(Duration::ZERO)
    } else if has(&["invalid_request", "context_length", "not_found", "model_not_found"]) {
        BackendError::ServiceError {
            status: Some(400),
            message: message.to_string(),
        }
    } else {
        BackendError::ServiceError {
            status: None,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_api_error_keywords() {
        let err = classify_api_error("invalid_request_error", "invalid_api_key", "Incorrect API key provided");
        assert!(err.is_fatal());

        let err = classify_api_error("", "rate_limit_exceeded", "slow down");
        assert_eq!(err, BackendError::RateLimited("slow down".to_string()));

        let err = classify_api_error("invalid_request_error", "context_length_exceeded", "too long");
        assert!(!err.is_transient());
        assert!(!err.is_fatal());

        // 识别不了的错误按服务端错误处理，可以重试
        let err = classify_api_error("server_error", "", "overloaded");
        assert!(err.is_transient());
    }

    #[test]
    fn test_build_messages_order() {
        let messages = OpenAiCompatibleBackend::build_messages("评分标准", "规划书正文").unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_parse_reply_keeps_reasoning() {
        let response = serde_json::json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "  {\"score\": 90}\n",
                    "reasoning_content": "先检查目标是否具体"
                }
            }]
        });
        let reply = parse_reply(&response).unwrap();
        assert_eq!(reply.content, "{\"score\": 90}");
        assert_eq!(reply.thinking.as_deref(), Some("先检查目标是否具体"));

        // 没有推理字段或为空白时不保留
        let response = serde_json::json!({
            "choices": [{"message": {"content": "ok", "reasoning_content": "  "}}]
        });
        assert_eq!(parse_reply(&response).unwrap(), BackendReply::new("ok"));

        let response = serde_json::json!({"choices": [{"message": {"content": null}}]});
        assert!(parse_reply(&response).unwrap_err().is_transient());
    }

    #[test]
    fn test_invalid_proxy_is_rejected() {
        let result = OpenAiCompatibleBackend::new(
            ProviderId::new("openai"),
            "sk-test",
            "http://127.0.0.1:1",
            Some("http://[::1"),
        );
        assert!(matches!(result, Err(ConfigError::HttpClient { .. })));

        let result = OpenAiCompatibleBackend::new(
            ProviderId::new("openai"),
            "sk-test",
            "http://127.0.0.1:1",
            Some("http://127.0.0.1:7890"),
        );
        assert!(result.is_ok());
    }

    mod http {
        use super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn backend_for(server: &MockServer) -> OpenAiCompatibleBackend {
            OpenAiCompatibleBackend::new(ProviderId::new("openai"), "sk-test", &server.uri(), None)
                .unwrap()
        }

        async fn score_once(backend: &OpenAiCompatibleBackend) -> Result<BackendReply, BackendError> {
            // 客户端内部若有重试，会在这里超时
            tokio::time::timeout(
                Duration::from_secs(10),
                backend.score("评分标准", "规划书正文", &ModelConfig::new("test-model")),
            )
            .await
            .expect("评分调用应当立即返回")
        }

        #[tokio::test]
        async fn test_rate_limit_is_reported_after_one_request() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/chat/completions"))
                .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                    "error": {
                        "message": "Rate limit reached for requests",
                        "type": "requests",
                        "param": null,
                        "code": "rate_limit_exceeded"
                    }
                })))
                .expect(1)
                .mount(&server)
                .await;

            let err = score_once(&backend_for(&server)).await.unwrap_err();
            assert_eq!(
                err,
                BackendError::RateLimited("Rate limit reached for requests".to_string())
            );
            assert_eq!(server.received_requests().await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_server_error_is_reported_after_one_request() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/chat/completions"))
                .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
                .expect(1)
                .mount(&server)
                .await;

            let err = score_once(&backend_for(&server)).await.unwrap_err();
            assert!(err.is_transient());
            assert_eq!(server.received_requests().await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_bad_key_is_fatal() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/chat/completions"))
                .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                    "error": {
                        "message": "Incorrect API key provided",
                        "type": "invalid_request_error",
                        "param": null,
                        "code": "invalid_api_key"
                    }
                })))
                .expect(1)
                .mount(&server)
                .await;

            let err = score_once(&backend_for(&server)).await.unwrap_err();
            assert!(err.is_fatal());
        }

        #[tokio::test]
        async fn test_reply_with_reasoning_content() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/chat/completions"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 0,
                    "model": "test-model",
                    "choices": [{
                        "index": 0,
                        "message": {
                            "role": "assistant",
                            "content": "{\"score\": 75}",
                            "reasoning_content": "目标可量化，但缺少时间安排"
                        },
                        "finish_reason": "stop"
                    }]
                })))
                .mount(&server)
                .await;

            let reply = score_once(&backend_for(&server)).await.unwrap();
            assert_eq!(reply.content, "{\"score\": 75}");
            assert_eq!(reply.thinking.as_deref(), Some("目标可量化，但缺少时间安排"));

            let requests = server.received_requests().await.unwrap();
            let body: JsonValue = requests[0].body_json().unwrap();
            assert_eq!(body["model"], "test-model");
            assert_eq!(body["messages"][0]["role"], "system");
            assert_eq!(body["messages"][1]["content"], "规划书正文");
        }
    }

    /// 测试真实接口（需要 GEMINI_API_KEY）
    #[tokio::test]
    #[ignore]
    async fn test_live_score_call() {
        let _ = tracing_subscriber::fmt::try_init();

        let api_key = std::env::var("GEMINI_API_KEY").expect("需要 GEMINI_API_KEY");
        let provider = ProviderId::new("gemini");
        let defaults = provider.defaults().unwrap();
        let backend =
            OpenAiCompatibleBackend::new(provider, &api_key, defaults.base_url, None).unwrap();

        let reply = backend
            .score(
                "请只返回 JSON: {\"score\": 数字}",
                "我的规划是每天学习两小时。",
                &ModelConfig::new(defaults.model),
            )
            .await
            .unwrap();
        println!("响应: {}", reply.content);
        assert!(!reply.content.is_empty());
    }
}
