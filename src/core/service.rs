//! 翻译服务
//!
//! 引擎的对外入口。持有配置、术语表、限流器与恢复控制器，
//! 把调用方的查询列表切成批次逐个翻译，再按原始位置写回结果。

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::TranslatorConfig;
use crate::core::executor::{RequestExecutor, TokenUsage};
use crate::core::provider::{ChatCompletion, Translator};
use crate::core::recovery::BatchRecoveryController;
use crate::error::TranslationResult;
use crate::glossary::Glossary;
use crate::limiter::RateLimiter;
use crate::pipeline::batch::Batch;
use crate::pipeline::prompt::{lang_display_name, PromptAssembler};

/// 翻译服务
pub struct TranslationService {
    config: Arc<TranslatorConfig>,
    executor: Arc<RequestExecutor>,
    assembler: PromptAssembler,
    controller: Arc<BatchRecoveryController>,
}

impl TranslationService {
    /// 创建翻译服务
    ///
    /// 校验配置并加载术语表。术语表文件缺失不是错误，
    /// 会退化为空术语表继续运行。
    pub fn new(
        config: TranslatorConfig,
        provider: Arc<dyn ChatCompletion>,
    ) -> TranslationResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let glossary = Arc::new(Glossary::load(config.glossary_path.as_deref()));
        let limiter = Arc::new(RateLimiter::new(config.max_requests_per_minute));
        let usage = Arc::new(TokenUsage::default());
        let executor = Arc::new(RequestExecutor::new(
            provider,
            Arc::clone(&config),
            limiter,
            glossary,
            usage,
        ));
        let assembler = PromptAssembler::new(&config);
        let controller = Arc::new(BatchRecoveryController::new(
            Arc::clone(&executor),
            assembler.clone(),
            Arc::clone(&config),
        ));

        Ok(Self {
            config,
            executor,
            assembler,
            controller,
        })
    }

    /// 当前生效的配置
    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// 设置前一页上文，作为后续请求的系统消息附加
    pub fn set_prev_context(&self, text: &str) {
        self.executor.set_prev_context(text);
    }

    /// token 消耗计数器
    pub fn token_usage(&self) -> &Arc<TokenUsage> {
        self.executor.usage()
    }

    /// 翻译一组查询
    ///
    /// 结果与输入等长、顺序一致。个别批次彻底失败时对应位置
    /// 透传原文，整体调用仍然成功。
    pub async fn translate_queries(&self, queries: &[String]) -> TranslationResult<Vec<String>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<String> = vec![String::new(); queries.len()];
        let mut offset = 0usize;

        for (prompt, size) in self.assembler.assemble(queries) {
            let batch = Batch::from_texts(&queries[offset..offset + size], offset);
            let (ok, segments) = Arc::clone(&self.controller)
                .translate_batch(batch, prompt, 0)
                .await;
            if !ok {
                tracing::warn!(
                    "批次未完全翻译，部分结果为原文透传 (offset={}, size={})",
                    offset,
                    size
                );
            }
            for (i, segment) in segments.into_iter().enumerate() {
                results[offset + i] = segment;
            }
            offset += size;
        }

        tracing::info!(
            "翻译完成: {} 条查询, 累计 token 消耗 {}",
            queries.len(),
            self.token_usage().lifetime()
        );
        Ok(results)
    }
}

#[async_trait]
impl Translator for TranslationService {
    fn parse_config(&mut self, config: TranslatorConfig) -> TranslationResult<()> {
        config.validate()?;
        let config = Arc::new(config);

        let glossary = Arc::new(Glossary::load(config.glossary_path.as_deref()));
        let limiter = Arc::new(RateLimiter::new(config.max_requests_per_minute));
        let executor = Arc::new(RequestExecutor::new(
            self.executor.provider(),
            Arc::clone(&config),
            limiter,
            glossary,
            Arc::clone(self.executor.usage()),
        ));
        self.assembler = PromptAssembler::new(&config);
        self.controller = Arc::new(BatchRecoveryController::new(
            Arc::clone(&executor),
            self.assembler.clone(),
            Arc::clone(&config),
        ));
        self.executor = executor;
        self.config = config;
        Ok(())
    }

    async fn translate(&self, queries: &[String]) -> TranslationResult<Vec<String>> {
        self.translate_queries(queries).await
    }

    /// 语言代码是否有对应的显示名
    fn supports_language(&self, lang: &str) -> bool {
        lang_display_name(lang) != lang
    }
}
