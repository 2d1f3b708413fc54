//! # Batch Translator
//!
//! 面向生成式补全服务的自适应批处理翻译引擎：把带位置标号的查询
//! 组装为批次 prompt，对响应做严格的格式校验，并用分层的容错策略
//! （分类重试、回退模型、递归对半拆分）保证结果与输入逐项对齐。
//! 传输层由调用方通过 [`ChatCompletion`] 接口注入。
//!
//! ## 模块组织
//!
//! - `config` - 配置加载与校验
//! - `core` - 请求执行、响应校验、批次容错与对外服务
//! - `error` - 统一错误类型
//! - `glossary` - 术语表加载与相关性匹配
//! - `limiter` - 进程级请求限流
//! - `pipeline` - 批次模型与 prompt 组装

pub mod config;
pub mod core;
pub mod error;
pub mod glossary;
pub mod limiter;
pub mod pipeline;

// Re-export commonly used items for convenience
pub use crate::config::TranslatorConfig;
pub use crate::core::{
    ChatCompletion, CompletionOutput, CompletionRequest, ProviderError, TokenUsage,
    TranslationService, Translator,
};
pub use crate::error::{TranslationError, TranslationResult};
pub use crate::glossary::Glossary;
pub use crate::limiter::RateLimiter;
pub use crate::pipeline::{Batch, PromptAssembler, Query};
