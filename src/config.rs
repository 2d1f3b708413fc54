//! 翻译配置管理模块
//!
//! 提供配置加载和验证功能，支持多种配置源：
//! 内置默认值 → 可选的 TOML 配置文件 → `TRANSLATOR_*` 环境变量覆盖。

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{TranslationError, TranslationResult};

/// 配置常量
pub mod constants {
    /// 默认配置文件名（不含扩展名，支持 translator-config.toml）
    pub const CONFIG_FILE_STEM: &str = "translator-config";
    /// 环境变量前缀
    pub const ENV_PREFIX: &str = "TRANSLATOR";

    // 默认配置值，与请求执行器/恢复控制器的关键参数对应
    pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 0; // 0 = 不限流
    pub const DEFAULT_TIMEOUT_SECS: u64 = 999;
    pub const DEFAULT_RETRY_ATTEMPTS: u32 = 2;
    pub const DEFAULT_TIMEOUT_RETRY_ATTEMPTS: u32 = 3;
    pub const DEFAULT_RATELIMIT_RETRY_ATTEMPTS: u32 = 3;
    pub const DEFAULT_MAX_SPLIT_DEPTH: u32 = 3;
    pub const DEFAULT_MAX_TOKENS: u32 = 8192;
    pub const DEFAULT_TEMPERATURE: f32 = 0.3;
    pub const DEFAULT_TOP_P: f32 = 1.0;
}

/// 翻译器配置
///
/// 字段默认值来自引擎的经验参数，全部可以被配置文件或环境变量覆盖。
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// 主模型标识
    pub model: String,

    /// 可选的回退模型标识，主模型重试耗尽后启用
    pub fallback_model: Option<String>,

    /// 目标语言代码（如 "ENG", "CHS", "JPN"）
    pub target_lang: String,

    /// 每分钟最大请求数，0 表示不限流
    pub max_requests_per_minute: u32,

    /// 单次请求的超时时间（秒）
    pub timeout_secs: u64,

    /// 同一批次的最大整体重试次数
    pub retry_attempts: u32,

    /// 请求因超时被取消后的最大重试次数
    pub timeout_retry_attempts: u32,

    /// 遇到限流时的最大重试次数
    pub ratelimit_retry_attempts: u32,

    /// 递归拆分批次的最大层数
    pub max_split_depth: u32,

    /// prompt + completion 的最大 token 数
    pub max_tokens: u32,

    /// 采样温度
    pub temperature: f32,

    /// 核采样参数
    pub top_p: f32,

    /// 是否在 prompt 前附加指令模板
    pub include_template: bool,

    /// prompt 指令模板，`{to_lang}` 会被替换为目标语言显示名
    pub prompt_template: String,

    /// 系统消息模板，`{to_lang}` 会被替换为目标语言显示名
    pub system_template: String,

    /// 术语表系统消息模板，`{glossary_text}` 会被替换为相关术语列表
    pub glossary_template: String,

    /// 可选的术语表文件路径
    pub glossary_path: Option<PathBuf>,

    /// 可选的示例对话（两个元素：用户输入、助手输出）
    pub chat_sample: Option<Vec<String>>,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            fallback_model: None,
            target_lang: "ENG".to_string(),
            max_requests_per_minute: constants::DEFAULT_MAX_REQUESTS_PER_MINUTE,
            timeout_secs: constants::DEFAULT_TIMEOUT_SECS,
            retry_attempts: constants::DEFAULT_RETRY_ATTEMPTS,
            timeout_retry_attempts: constants::DEFAULT_TIMEOUT_RETRY_ATTEMPTS,
            ratelimit_retry_attempts: constants::DEFAULT_RATELIMIT_RETRY_ATTEMPTS,
            max_split_depth: constants::DEFAULT_MAX_SPLIT_DEPTH,
            max_tokens: constants::DEFAULT_MAX_TOKENS,
            temperature: constants::DEFAULT_TEMPERATURE,
            top_p: constants::DEFAULT_TOP_P,
            include_template: true,
            prompt_template: "Translate the following text into {to_lang} and keep the original format.".to_string(),
            system_template: "You are a professional translation engine. Translate each numbered segment into {to_lang}, keeping the <|N|> prefixes and outputting one segment per line.".to_string(),
            glossary_template: "Use the following glossary. Terms are given as source->target:\n{glossary_text}".to_string(),
            glossary_path: None,
            chat_sample: None,
        }
    }
}

impl TranslatorConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 配置来源优先级：默认值 < `translator-config.toml` < `TRANSLATOR_*`
    /// 环境变量。配置文件不存在时静默使用默认值。
    pub fn load() -> TranslationResult<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(constants::CONFIG_FILE_STEM).required(false))
            .add_source(
                Environment::with_prefix(constants::ENV_PREFIX)
                    .try_parsing(true)
                    .separator("__"),
            )
            .build()?;

        let config: TranslatorConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 使用目标语言构造默认配置
    pub fn default_with_lang(target_lang: &str) -> Self {
        Self {
            target_lang: target_lang.to_string(),
            ..Self::default()
        }
    }

    /// 校验配置
    pub fn validate(&self) -> TranslationResult<()> {
        if self.model.trim().is_empty() {
            return Err(TranslationError::ConfigError("模型标识不能为空".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(TranslationError::ConfigError(
                "max_tokens 必须大于 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(TranslationError::ConfigError(format!(
                "temperature 超出范围 [0, 2]: {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(TranslationError::ConfigError(format!(
                "top_p 超出范围 [0, 1]: {}",
                self.top_p
            )));
        }
        if let Some(sample) = &self.chat_sample {
            if sample.len() != 2 {
                return Err(TranslationError::ConfigError(
                    "chat_sample 必须包含两个元素（用户输入、助手输出）".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// 单次请求的超时时间
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 生成示例配置文件内容
    pub fn example_toml() -> TranslationResult<String> {
        let example = TranslatorConfig {
            fallback_model: Some("gpt-4o".to_string()),
            glossary_path: Some(PathBuf::from("glossary.txt")),
            ..TranslatorConfig::default()
        };
        Ok(toml::to_string_pretty(&example)?)
    }
}
