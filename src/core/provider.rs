//! 外部协作方接口
//!
//! 引擎不关心聊天补全的传输细节，只依赖这里定义的能力契约。
//! 生产环境由调用方提供具体实现（HTTP 客户端、SDK 封装等），
//! 测试中使用脚本化的 mock。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::TranslatorConfig;
use crate::error::TranslationResult;

/// 一次聊天补全请求
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// 系统提示词
    pub system_prompt: String,
    /// 可选的术语表系统消息
    pub glossary_note: Option<String>,
    /// 可选的上文（前一页内容）
    pub prior_context: Option<String>,
    /// 可选的示例对话 (用户输入, 助手输出)
    pub example_exchange: Option<(String, String)>,
    /// 用户 prompt（带标号的批次正文）
    pub user_prompt: String,
    /// 模型标识
    pub model: String,
    /// 输出 token 上限
    pub max_output_tokens: u32,
    /// 采样温度
    pub temperature: f32,
    /// 核采样参数
    pub top_p: f32,
    /// 传输层超时（引擎另有墙钟超时做强制取消）
    pub timeout: Duration,
}

/// 补全输出
#[derive(Debug, Clone)]
pub struct CompletionOutput {
    /// 原始响应文本
    pub text: String,
    /// 本次调用消耗的 token 总数；部分中转服务不返回
    pub usage_tokens: Option<u64>,
}

/// 补全服务错误
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// 远端限流信号（如 HTTP 429）
    #[error("补全服务限流")]
    RateLimited,

    /// 瞬时的服务端错误，可重试
    #[error("补全服务错误: {0}")]
    ServerError(String),

    /// 响应中没有可用文本
    #[error("补全服务返回空响应")]
    Empty,

    /// 其他错误，不重试
    #[error("补全服务异常: {0}")]
    Other(String),
}

/// 聊天补全能力
///
/// 引擎唯一依赖的外部接口。实现必须是 `Send + Sync`，
/// 因为递归拆分出的并发子批次会共享同一个实例。
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionOutput, ProviderError>;
}

/// 翻译器能力接口
///
/// 引擎只依赖这个接口，不关心具体后端。每种后端变体
/// 各自实现配置解析、翻译与语言支持判断。
#[async_trait]
pub trait Translator: Send + Sync {
    /// 应用外部配置
    fn parse_config(&mut self, config: TranslatorConfig) -> TranslationResult<()>;

    /// 翻译一组查询，返回与输入等长、顺序一致的译文
    async fn translate(&self, queries: &[String]) -> TranslationResult<Vec<String>>;

    /// 是否支持给定语言代码
    fn supports_language(&self, lang: &str) -> bool;
}
