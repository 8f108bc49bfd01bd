//! 错误类型
//!
//! 所有错误集中定义在这里，按来源分为五类：
//! - `ConfigError`：配置错误（凭据被拒绝时整次运行中止）
//! - `BackendError`：评分后端调用错误（可重试 / 致命 / 永久失败）
//! - `ResponseFormatError`：模型响应无法解析（记录但不重试）
//! - `PersistenceError`：检查点或结果写入失败
//! - `RunError`：运行级别错误（运行不存在、重复启动等）

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    #[error("后端调用错误: {0}")]
    Backend(#[from] BackendError),

    #[error("响应格式错误: {0}")]
    Response(#[from] ResponseFormatError),

    #[error("持久化错误: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("运行错误: {0}")]
    Run(#[from] RunError),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("不支持的提供商: {provider} (支持: {supported})")]
    UnknownProvider { provider: String, supported: String },

    #[error("没有任何可用的提供商")]
    NoProviders,

    #[error("提供商 {provider} 没有注册评分后端")]
    BackendNotRegistered { provider: String },

    #[error("提供商 {provider} 拒绝了凭据: {message}")]
    Unauthorized { provider: String, message: String },

    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },

    #[error("配置项 {key} 不合法: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("提供商 {provider} 的 HTTP 客户端创建失败: {reason}")]
    HttpClient { provider: String, reason: String },

    #[error("无法读取配置文件 ({path}): {source}")]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("配置文件解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{what} 中存在重复的 id: {id}")]
    DuplicateId { what: &'static str, id: String },

    #[error("{what} 不能为空")]
    EmptyInput { what: &'static str },
}

/// 评分后端调用错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("凭据无效: {0}")]
    Unauthorized(String),

    #[error("请求频率限制: {0}")]
    RateLimited(String),

    #[error("请求超时 ({}s)", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("服务错误 (status={status:?}): {message}")]
    ServiceError { status: Option<u16>, message: String },

    #[error("网络错误: {0}")]
    NetworkError(String),
}

impl BackendError {
    /// 根据 HTTP 状态码归类
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => BackendError::Unauthorized(message),
            408 => BackendError::Timeout(Duration::ZERO),
            429 => BackendError::RateLimited(message),
            _ => BackendError::ServiceError {
                status: Some(status),
                message,
            },
        }
    }

    /// 凭据错误会影响该提供商的所有任务，必须中止整次运行
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::Unauthorized(_))
    }

    /// 可以退避后重试的错误
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::RateLimited(_)
            | BackendError::Timeout(_)
            | BackendError::NetworkError(_) => true,
            BackendError::ServiceError { status, .. } => status.map_or(true, |s| s >= 500),
            BackendError::Unauthorized(_) => false,
        }
    }
}

/// 响应格式错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResponseFormatError {
    #[error("响应中未找到有效的 JSON 对象")]
    NoStructuredPayload,

    #[error("JSON 解析失败: {0}")]
    InvalidJson(String),

    #[error("JSON 顶层不是对象")]
    NotAnObject,

    #[error("缺少必填字段: {0}")]
    MissingField(&'static str),

    #[error("字段 {field} 类型不正确: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// 持久化错误
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("运行清单不存在: {run_id}")]
    ManifestNotFound { run_id: String },

    #[error("运行清单已损坏 ({path}): {source}")]
    ManifestCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 运行级别错误
#[derive(Debug, Error)]
pub enum RunError {
    #[error("非法的运行 ID: {0}")]
    InvalidRunId(String),

    #[error("运行 {0} 正在执行中")]
    AlreadyActive(String),
}

// ========== 便捷构造函数 ==========

impl PersistenceError {
    /// 创建文件操作错误
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Persistence(PersistenceError::Serialize(err))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
