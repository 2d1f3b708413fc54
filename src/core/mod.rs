//! 翻译引擎核心
//!
//! 模块划分：
//! - `provider`: 对外能力契约（聊天补全、翻译器接口）
//! - `executor`: 单次请求的派发、超时取消与分类重试
//! - `validator`: 响应格式校验与逐项切分
//! - `recovery`: 批次级容错（整批重试、回退模型、递归拆分）
//! - `service`: 对外入口，批次调度与结果写回

pub mod executor;
pub mod provider;
pub mod recovery;
pub mod service;
pub mod validator;

pub use executor::{RequestExecutor, TokenUsage};
pub use provider::{ChatCompletion, CompletionOutput, CompletionRequest, ProviderError, Translator};
pub use recovery::BatchRecoveryController;
pub use service::TranslationService;
pub use validator::{validate, ValidationResult, Violation};
