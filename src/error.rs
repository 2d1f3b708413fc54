//! 翻译引擎统一错误处理
//!
//! 提供结构化错误类型和错误处理机制。
//!
//! 注意响应格式违例不在这里：它由
//! [`ValidationResult`](crate::core::validator::ValidationResult) 表达，
//! 在批次恢复控制器内部被吸收。批次彻底失败时调用方得到的是
//! 原文透传的结果，而不是错误。

use thiserror::Error;

/// 翻译错误类型
#[derive(Error, Debug, Clone)]
pub enum TranslationError {
    /// 请求超时（已用尽超时重试次数）
    #[error("请求超时，已重试 {attempts} 次")]
    Timeout { attempts: u32 },

    /// 远端限流（已用尽限流重试次数）
    #[error("请求速率过快，已达到限制")]
    RateLimited,

    /// 远端服务错误（已用尽重试次数）
    #[error("翻译服务错误: {0}")]
    ServerError(String),

    /// 未预期的错误，不重试
    #[error("内部错误: {0}")]
    Fatal(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 术语表错误
    #[error("术语表错误: {0}")]
    GlossaryError(String),

    /// 输入验证错误
    #[error("输入无效: {0}")]
    InvalidInput(String),
}

impl TranslationError {
    /// 检查错误是否可重试
    ///
    /// 注意：这里的"可重试"指的是整个批次层面的重试。单次请求内部的
    /// 超时/限流/服务错误重试已经在请求执行器中完成，走到这里的错误
    /// 都是重试预算耗尽之后的结果。
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslationError::Timeout { .. } => true,
            TranslationError::RateLimited => false, // 需要等待
            TranslationError::ServerError(_) => true,
            TranslationError::Fatal(_) => false,
            TranslationError::ConfigError(_) => false,
            TranslationError::GlossaryError(_) => false,
            TranslationError::InvalidInput(_) => false,
        }
    }
}

impl From<config::ConfigError> for TranslationError {
    fn from(error: config::ConfigError) -> Self {
        TranslationError::ConfigError(error.to_string())
    }
}

impl From<toml::ser::Error> for TranslationError {
    fn from(error: toml::ser::Error) -> Self {
        TranslationError::ConfigError(format!("TOML序列化错误: {}", error))
    }
}

/// 错误结果类型别名
pub type TranslationResult<T> = Result<T, TranslationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(TranslationError::Timeout { attempts: 3 }.is_retryable());
        assert!(TranslationError::ServerError("502".into()).is_retryable());
        assert!(!TranslationError::RateLimited.is_retryable());
        assert!(!TranslationError::Fatal("boom".into()).is_retryable());
        assert!(!TranslationError::ConfigError("bad".into()).is_retryable());
    }
}
