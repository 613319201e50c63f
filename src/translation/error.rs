//! 翻译模块统一错误处理
//!
//! 提供结构化错误类型和错误处理机制。管道中的任何失败最坏只会让文本保持未翻译，
//! 因此大部分错误在组件边界被记录并吞掉，只有少数会返回给调用方。

use std::fmt;

use thiserror::Error;

/// 翻译错误类型
///
/// 需要 `Clone`：同一个进行中的请求会把同一个结果（包括错误）交给所有等待者。
#[derive(Error, Debug, Clone)]
pub enum TranslationError {
    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 网络错误（瞬时故障，可重试）
    #[error("网络错误: {0}")]
    NetworkError(String),

    /// 速率限制错误
    #[error("请求速率过快，已达到限制")]
    RateLimitExceeded,

    /// 输入验证错误
    #[error("输入无效: {0}")]
    InvalidInput(String),

    /// 翻译服务返回了空的或无效的译文
    #[error("译文无效: {0}")]
    ProviderContent(String),

    /// 本地或远程存储错误
    #[error("存储错误: {0}")]
    StorageError(String),

    /// 批次处理错误
    #[error("批次处理错误: {0}")]
    BatchProcessingError(String),

    /// 超时错误
    #[error("操作超时: {0}")]
    TimeoutError(String),

    /// 解析错误
    #[error("解析错误: {0}")]
    ParseError(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 重试次数耗尽
    #[error("重试 {attempts} 次后仍然失败: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<TranslationError>,
    },

    /// 结果属于已被取代的语言切换
    #[error("结果已过期，被更新的请求取代")]
    Superseded,
}

impl TranslationError {
    /// 检查错误是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslationError::NetworkError(_) => true,
            TranslationError::TimeoutError(_) => true,
            TranslationError::RateLimitExceeded => true,
            TranslationError::ConfigError(_) => false,
            TranslationError::InvalidInput(_) => false,
            TranslationError::ProviderContent(_) => false,
            TranslationError::StorageError(_) => false,
            TranslationError::BatchProcessingError(_) => false,
            TranslationError::ParseError(_) => false,
            TranslationError::SerializationError(_) => false,
            TranslationError::RetryExhausted { .. } => false,
            TranslationError::Superseded => false,
        }
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TranslationError::ConfigError(_) => ErrorSeverity::Critical,
            TranslationError::NetworkError(_) => ErrorSeverity::Warning,
            TranslationError::RateLimitExceeded => ErrorSeverity::Warning,
            TranslationError::InvalidInput(_) => ErrorSeverity::Info,
            TranslationError::ProviderContent(_) => ErrorSeverity::Info,
            TranslationError::StorageError(_) => ErrorSeverity::Warning,
            TranslationError::BatchProcessingError(_) => ErrorSeverity::Error,
            TranslationError::TimeoutError(_) => ErrorSeverity::Warning,
            TranslationError::ParseError(_) => ErrorSeverity::Error,
            TranslationError::SerializationError(_) => ErrorSeverity::Error,
            TranslationError::RetryExhausted { .. } => ErrorSeverity::Error,
            TranslationError::Superseded => ErrorSeverity::Info,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            TranslationError::ConfigError(_) => ErrorCategory::Configuration,
            TranslationError::NetworkError(_) => ErrorCategory::Network,
            TranslationError::RateLimitExceeded => ErrorCategory::RateLimit,
            TranslationError::InvalidInput(_) => ErrorCategory::Input,
            TranslationError::ProviderContent(_) => ErrorCategory::Content,
            TranslationError::StorageError(_) => ErrorCategory::Storage,
            TranslationError::BatchProcessingError(_) => ErrorCategory::Processing,
            TranslationError::TimeoutError(_) => ErrorCategory::Timeout,
            TranslationError::ParseError(_) => ErrorCategory::Parsing,
            TranslationError::SerializationError(_) => ErrorCategory::Serialization,
            TranslationError::RetryExhausted { last, .. } => last.category(),
            TranslationError::Superseded => ErrorCategory::Stale,
        }
    }

    /// 创建带上下文的错误
    pub fn with_context<T: fmt::Display>(mut self, context: T) -> Self {
        let new_msg = format!("{} (上下文: {})", self, context);

        match &mut self {
            TranslationError::ConfigError(ref mut msg)
            | TranslationError::NetworkError(ref mut msg)
            | TranslationError::InvalidInput(ref mut msg)
            | TranslationError::ProviderContent(ref mut msg)
            | TranslationError::StorageError(ref mut msg)
            | TranslationError::BatchProcessingError(ref mut msg)
            | TranslationError::TimeoutError(ref mut msg)
            | TranslationError::ParseError(ref mut msg)
            | TranslationError::SerializationError(ref mut msg) => *msg = new_msg,
            TranslationError::RateLimitExceeded
            | TranslationError::RetryExhausted { .. }
            | TranslationError::Superseded => {}
        }

        self
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Network,
    RateLimit,
    Input,
    Content,
    Storage,
    Processing,
    Timeout,
    Parsing,
    Serialization,
    Stale,
}

/// 标准错误转换
impl From<std::io::Error> for TranslationError {
    fn from(error: std::io::Error) -> Self {
        TranslationError::StorageError(format!("IO错误: {}", error))
    }
}

impl From<serde_json::Error> for TranslationError {
    fn from(error: serde_json::Error) -> Self {
        TranslationError::SerializationError(format!("JSON序列化错误: {}", error))
    }
}

impl From<toml::de::Error> for TranslationError {
    fn from(error: toml::de::Error) -> Self {
        TranslationError::ParseError(format!("TOML解析错误: {}", error))
    }
}

impl From<redb::Error> for TranslationError {
    fn from(error: redb::Error) -> Self {
        TranslationError::StorageError(format!("redb错误: {}", error))
    }
}

impl From<redb::DatabaseError> for TranslationError {
    fn from(error: redb::DatabaseError) -> Self {
        TranslationError::StorageError(format!("打开数据库失败: {}", error))
    }
}

impl From<redb::TransactionError> for TranslationError {
    fn from(error: redb::TransactionError) -> Self {
        TranslationError::StorageError(format!("数据库事务错误: {}", error))
    }
}

impl From<redb::TableError> for TranslationError {
    fn from(error: redb::TableError) -> Self {
        TranslationError::StorageError(format!("数据表错误: {}", error))
    }
}

impl From<redb::StorageError> for TranslationError {
    fn from(error: redb::StorageError) -> Self {
        TranslationError::StorageError(format!("数据库存储错误: {}", error))
    }
}

impl From<redb::CommitError> for TranslationError {
    fn from(error: redb::CommitError) -> Self {
        TranslationError::StorageError(format!("数据库提交失败: {}", error))
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TranslationError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TranslationError::TimeoutError(error.to_string())
        } else if error.is_decode() {
            TranslationError::ParseError(format!("响应解析失败: {}", error))
        } else {
            TranslationError::NetworkError(error.to_string())
        }
    }
}

/// 错误结果类型别名
pub type TranslationResult<T> = Result<T, TranslationError>;

/// 错误处理助手函数
pub mod helpers {
    use super::*;

    /// 按严重程度记录被吞掉的错误
    pub fn log_error(error: &TranslationError, context: impl fmt::Display) {
        match error.severity() {
            ErrorSeverity::Info => tracing::debug!("{}: {}", context, error),
            ErrorSeverity::Warning => tracing::warn!("{}: {}", context, error),
            ErrorSeverity::Error | ErrorSeverity::Critical => tracing::error!("{}: {}", context, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TranslationError::NetworkError("reset".into()).is_retryable());
        assert!(TranslationError::RateLimitExceeded.is_retryable());
        assert!(!TranslationError::ProviderContent("empty".into()).is_retryable());
        assert!(!TranslationError::Superseded.is_retryable());
    }

    #[test]
    fn test_retry_exhausted_keeps_last_error() {
        let err = TranslationError::RetryExhausted {
            attempts: 3,
            last: Box::new(TranslationError::NetworkError("502".into())),
        };
        assert_eq!(err.category(), ErrorCategory::Network);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("3"));
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let err: TranslationError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, TranslationError::SerializationError(_)));
        assert_eq!(err.severity(), ErrorSeverity::Error);
    }

    #[test]
    fn test_with_context() {
        let err = TranslationError::StorageError("disk full".into()).with_context("保存缓存");
        assert!(err.to_string().contains("保存缓存"));
        assert_eq!(err.category(), ErrorCategory::Storage);
    }
}
