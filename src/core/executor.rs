//! 请求执行器
//!
//! 负责发出单次生成请求：限流许可 → 可取消的派发 → 墙钟超时 →
//! 按错误类别分别重试（超时 / 限流 / 瞬时服务错误），其余错误立即
//! 作为 `Fatal` 传播。成功后对原始文本做统一清理，并记录 token 消耗。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use regex::Regex;
use tokio::time::sleep;

use crate::config::TranslatorConfig;
use crate::core::provider::{ChatCompletion, CompletionRequest, ProviderError};
use crate::error::{TranslationError, TranslationResult};
use crate::glossary::Glossary;
use crate::limiter::RateLimiter;
use crate::pipeline::prompt::lang_display_name;

/// 限流重试前的固定等待
const RATELIMIT_BACKOFF: Duration = Duration::from_secs(2);
/// 服务错误重试前的固定等待
const SERVER_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// token 消耗计数器（进程级运行累计）
///
/// 只有请求执行器在成功调用后写入，外部报表只读。两个字段都是
/// 简单的后写覆盖/累加语义，不要求跨字段原子性（近似计数即可）。
/// 测试中通过 [`reset`](Self::reset) 显式清零。
#[derive(Debug, Default)]
pub struct TokenUsage {
    lifetime: AtomicU64,
    last_call: AtomicU64,
}

impl TokenUsage {
    /// 记录一次成功调用的 token 消耗
    pub fn record(&self, tokens: u64) {
        self.lifetime.fetch_add(tokens, Ordering::Relaxed);
        self.last_call.store(tokens, Ordering::Relaxed);
    }

    /// 记录一次没有用量信息的成功调用
    pub fn record_missing(&self) {
        self.last_call.store(0, Ordering::Relaxed);
    }

    /// 运行期累计消耗
    pub fn lifetime(&self) -> u64 {
        self.lifetime.load(Ordering::Relaxed)
    }

    /// 最近一次调用的消耗
    pub fn last_call(&self) -> u64 {
        self.last_call.load(Ordering::Relaxed)
    }

    /// 清零计数器，仅供测试使用
    pub fn reset(&self) {
        self.lifetime.store(0, Ordering::Relaxed);
        self.last_call.store(0, Ordering::Relaxed);
    }
}

/// 请求执行器
pub struct RequestExecutor {
    provider: Arc<dyn ChatCompletion>,
    config: Arc<TranslatorConfig>,
    limiter: Arc<RateLimiter>,
    glossary: Arc<Glossary>,
    usage: Arc<TokenUsage>,
    /// 前一页上文，由服务层更新，请求时附为系统消息
    prev_context: RwLock<String>,
    think_re: Regex,
    blank_re: Regex,
    marker_re: Regex,
}

impl RequestExecutor {
    pub fn new(
        provider: Arc<dyn ChatCompletion>,
        config: Arc<TranslatorConfig>,
        limiter: Arc<RateLimiter>,
        glossary: Arc<Glossary>,
        usage: Arc<TokenUsage>,
    ) -> Self {
        Self {
            provider,
            config,
            limiter,
            glossary,
            usage,
            prev_context: RwLock::new(String::new()),
            // 部分中转服务会把思考过程强制输出在正文里，需要额外过滤；
            // 个别模型还会漏掉起始标签只留下孤立的 </think>
            think_re: Regex::new(r"(?s)(</think>)?<think>.*?</think>").unwrap(),
            blank_re: Regex::new(r"\n\s*\n").unwrap(),
            marker_re: Regex::new(r"<\|(\d+)\|>").unwrap(),
        }
    }

    /// 设置前一页上文
    pub fn set_prev_context(&self, text: &str) {
        if let Ok(mut context) = self.prev_context.write() {
            *context = text.to_string();
        }
    }

    /// token 消耗计数器
    pub fn usage(&self) -> &Arc<TokenUsage> {
        &self.usage
    }

    /// 底层补全服务
    pub fn provider(&self) -> Arc<dyn ChatCompletion> {
        Arc::clone(&self.provider)
    }

    /// 发出一次带重试的生成请求
    ///
    /// 重试策略分三类独立计数：
    /// - 超时：主动取消在途请求后重发，超过 `timeout_retry_attempts`
    ///   次则以 [`TranslationError::Timeout`] 失败
    /// - 限流：固定退避 2s，超过 `ratelimit_retry_attempts` 次传播
    /// - 瞬时服务错误：固定退避 1s，超过 `retry_attempts` 次传播
    ///
    /// 其余错误不重试，立即作为 [`TranslationError::Fatal`] 传播。
    pub async fn request_with_retry(&self, prompt: &str, model: &str) -> TranslationResult<String> {
        let mut timeout_attempt = 0u32;
        let mut ratelimit_attempt = 0u32;
        let mut server_error_attempt = 0u32;

        loop {
            self.limiter.throttle().await;

            let request = self.build_request(prompt, model);
            let provider = Arc::clone(&self.provider);
            let mut task = tokio::spawn(async move { provider.complete(request).await });

            match tokio::time::timeout(self.config.timeout(), &mut task).await {
                // 超时 => 主动取消在途请求，保证并发请求数有界，然后重试
                Err(_) => {
                    task.abort();
                    timeout_attempt += 1;
                    if timeout_attempt > self.config.timeout_retry_attempts {
                        return Err(TranslationError::Timeout {
                            attempts: self.config.timeout_retry_attempts,
                        });
                    }
                    tracing::warn!("请求超时，重试中... (attempt={})", timeout_attempt);
                }

                // 任务本身异常终止（panic 等），不重试
                Ok(Err(join_err)) => {
                    return Err(TranslationError::Fatal(format!(
                        "请求任务异常终止: {}",
                        join_err
                    )));
                }

                Ok(Ok(Err(ProviderError::RateLimited))) => {
                    ratelimit_attempt += 1;
                    if ratelimit_attempt > self.config.ratelimit_retry_attempts {
                        return Err(TranslationError::RateLimited);
                    }
                    tracing::warn!("触发限流，重试中... (attempt={})", ratelimit_attempt);
                    sleep(RATELIMIT_BACKOFF).await;
                }

                Ok(Ok(Err(ProviderError::ServerError(msg)))) => {
                    server_error_attempt += 1;
                    if server_error_attempt > self.config.retry_attempts {
                        tracing::error!("服务错误重试耗尽: {}", msg);
                        return Err(TranslationError::ServerError(msg));
                    }
                    tracing::warn!(
                        "服务错误: {}，重试中... (attempt={})",
                        msg,
                        server_error_attempt
                    );
                    sleep(SERVER_ERROR_BACKOFF).await;
                }

                Ok(Ok(Err(other))) => {
                    tracing::error!("请求发生未预期错误: {}", other);
                    return Err(TranslationError::Fatal(other.to_string()));
                }

                Ok(Ok(Ok(output))) => {
                    match output.usage_tokens {
                        Some(tokens) => self.usage.record(tokens),
                        None => {
                            // 第三方中转服务可能不返回 token 数
                            tracing::warn!("响应中缺少 token 用量信息");
                            self.usage.record_missing();
                        }
                    }
                    return Ok(self.clean_response(&output.text));
                }
            }
        }
    }

    /// 构建一次补全请求
    ///
    /// 系统模板插入目标语言显示名；术语表只带入与本次 prompt 相关的
    /// 条目；上文与示例对话按配置附加。
    fn build_request(&self, prompt: &str, model: &str) -> CompletionRequest {
        let lang_name = lang_display_name(&self.config.target_lang);

        let glossary_note = {
            let relevant = self.glossary.relevant_terms(prompt);
            if relevant.is_empty() {
                None
            } else {
                tracing::info!("从术语表中提取了 {} 条相关术语", relevant.len());
                let glossary_text = relevant
                    .iter()
                    .map(|(src, dst)| format!("{}->{}", src, dst))
                    .collect::<Vec<_>>()
                    .join("\n");
                Some(
                    self.config
                        .glossary_template
                        .replace("{glossary_text}", &glossary_text),
                )
            }
        };

        let prior_context = match self.prev_context.read() {
            Ok(context) if !context.is_empty() => Some(context.clone()),
            _ => None,
        };

        let example_exchange = self
            .config
            .chat_sample
            .as_ref()
            .filter(|sample| sample.len() == 2)
            .map(|sample| (sample[0].clone(), sample[1].clone()));

        CompletionRequest {
            system_prompt: self.config.system_template.replace("{to_lang}", lang_name),
            glossary_note,
            prior_context,
            example_exchange,
            user_prompt: prompt.to_string(),
            model: model.to_string(),
            max_output_tokens: self.config.max_tokens / 2,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            timeout: self.config.timeout(),
        }
    }

    /// 清理原始响应文本
    ///
    /// 1. 去除 `<think>...</think>` 推理段
    /// 2. 压缩连续空行
    /// 3. 出现 `<|N|>` 标号时，裁掉 `<|1|>` 所在行之前与最大标号行
    ///    之后的内容，丢弃模型附带的解释性文字；没有标号时不裁剪，
    ///    避免把正文删光
    fn clean_response(&self, raw_text: &str) -> String {
        let without_think = self.think_re.replace_all(raw_text, "");
        let cleaned = self
            .blank_re
            .replace_all(&without_think, "\n")
            .trim()
            .to_string();

        let lines: Vec<&str> = cleaned.lines().collect();
        let mut min_index_line = None;
        let mut max_index_line: Option<(usize, usize)> = None; // (行号, 标号)

        for (line_idx, line) in lines.iter().enumerate() {
            if let Some(captures) = self.marker_re.captures(line) {
                if let Ok(index) = captures[1].parse::<usize>() {
                    if index == 1 {
                        min_index_line.get_or_insert(line_idx);
                    }
                    if max_index_line.map_or(true, |(_, max)| index > max) {
                        max_index_line = Some((line_idx, index));
                    }
                }
            }
        }

        match (min_index_line, max_index_line) {
            (Some(start), Some((end, _))) if start <= end => lines[start..=end].join("\n"),
            (None, Some(_)) | (Some(_), _) | (None, None) => cleaned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::CompletionOutput;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct ScriptedProvider {
        calls: AtomicU32,
        fail_first: u32,
        failure: ProviderError,
    }

    #[async_trait]
    impl ChatCompletion for ScriptedProvider {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionOutput, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(self.failure.clone())
            } else {
                Ok(CompletionOutput {
                    text: "<|1|>ok".to_string(),
                    usage_tokens: Some(42),
                })
            }
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl ChatCompletion for HangingProvider {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionOutput, ProviderError> {
            sleep(Duration::from_secs(3600)).await;
            unreachable!("request should have been cancelled")
        }
    }

    fn executor_with(provider: Arc<dyn ChatCompletion>, config: TranslatorConfig) -> RequestExecutor {
        let config = Arc::new(config);
        RequestExecutor::new(
            provider,
            Arc::clone(&config),
            Arc::new(RateLimiter::new(config.max_requests_per_minute)),
            Arc::new(Glossary::empty()),
            Arc::new(TokenUsage::default()),
        )
    }

    #[tokio::test]
    async fn retries_transient_server_errors() {
        let provider = Arc::new(ScriptedProvider {
            calls: AtomicU32::new(0),
            fail_first: 2,
            failure: ProviderError::ServerError("502".to_string()),
        });
        let executor = executor_with(provider.clone(), TranslatorConfig::default());

        let text = executor.request_with_retry("<|1|>hi", "m").await.unwrap();
        assert_eq!(text, "<|1|>ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.usage().lifetime(), 42);
        assert_eq!(executor.usage().last_call(), 42);
    }

    #[tokio::test]
    async fn server_errors_exhaust_to_error() {
        let provider = Arc::new(ScriptedProvider {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            failure: ProviderError::ServerError("503".to_string()),
        });
        let config = TranslatorConfig {
            retry_attempts: 1,
            ..TranslatorConfig::default()
        };
        let executor = executor_with(provider.clone(), config);

        let err = executor.request_with_retry("<|1|>hi", "m").await.unwrap_err();
        assert!(matches!(err, TranslationError::ServerError(_)));
        // 初次 + 1 次重试
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_provider_error_is_not_retried() {
        let provider = Arc::new(ScriptedProvider {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            failure: ProviderError::Other("schema drift".to_string()),
        });
        let executor = executor_with(provider.clone(), TranslatorConfig::default());

        let err = executor.request_with_retry("<|1|>hi", "m").await.unwrap_err();
        assert!(matches!(err, TranslationError::Fatal(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_cancels_and_retries_then_fails() {
        let config = TranslatorConfig {
            timeout_secs: 1,
            timeout_retry_attempts: 1,
            ..TranslatorConfig::default()
        };
        let executor = executor_with(Arc::new(HangingProvider), config);

        let err = executor.request_with_retry("<|1|>hi", "m").await.unwrap_err();
        assert!(matches!(err, TranslationError::Timeout { attempts: 1 }));
    }

    #[tokio::test]
    async fn ratelimit_retries_then_succeeds() {
        let provider = Arc::new(ScriptedProvider {
            calls: AtomicU32::new(0),
            fail_first: 1,
            failure: ProviderError::RateLimited,
        });
        let executor = executor_with(provider.clone(), TranslatorConfig::default());

        let text = executor.request_with_retry("<|1|>hi", "m").await.unwrap();
        assert_eq!(text, "<|1|>ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clean_response_strips_think_segments() {
        let executor = executor_with(
            Arc::new(HangingProvider),
            TranslatorConfig::default(),
        );
        let raw = "<think>reasoning here</think>\n<|1|>Hello";
        assert_eq!(executor.clean_response(raw), "<|1|>Hello");
    }

    #[test]
    fn clean_response_collapses_blank_lines() {
        let executor = executor_with(Arc::new(HangingProvider), TranslatorConfig::default());
        let raw = "<|1|>a\n\n\n<|2|>b";
        assert_eq!(executor.clean_response(raw), "<|1|>a\n<|2|>b");
    }

    #[test]
    fn clean_response_trims_outside_marker_range() {
        let executor = executor_with(Arc::new(HangingProvider), TranslatorConfig::default());
        let raw = "Sure, here are the translations:\n<|1|>Hello\n<|2|>World\nHope this helps!";
        assert_eq!(executor.clean_response(raw), "<|1|>Hello\n<|2|>World");
    }

    #[test]
    fn clean_response_without_markers_keeps_text() {
        let executor = executor_with(Arc::new(HangingProvider), TranslatorConfig::default());
        let raw = "plain answer without markers";
        assert_eq!(executor.clean_response(raw), raw);
    }

    #[test]
    fn glossary_note_contains_relevant_terms_only() {
        use crate::glossary::GlossaryEntry;

        let glossary = Glossary::from_entries(vec![
            GlossaryEntry {
                source: "月の都".to_string(),
                target: "Moon Capital".to_string(),
            },
            GlossaryEntry {
                source: "zzz unrelated zzz".to_string(),
                target: "nope".to_string(),
            },
        ]);
        let config = Arc::new(TranslatorConfig::default());
        let executor = RequestExecutor::new(
            Arc::new(HangingProvider),
            Arc::clone(&config),
            Arc::new(RateLimiter::new(0)),
            Arc::new(glossary),
            Arc::new(TokenUsage::default()),
        );

        let request = executor.build_request("<|1|>月の都", "m");
        let note = request.glossary_note.expect("glossary note expected");
        assert!(note.contains("月の都->Moon Capital"));
        assert!(!note.contains("nope"));
    }

    #[test]
    fn prev_context_is_attached_when_set() {
        let executor = executor_with(Arc::new(HangingProvider), TranslatorConfig::default());
        assert!(executor.build_request("<|1|>a", "m").prior_context.is_none());
        executor.set_prev_context("previous page text");
        let request = executor.build_request("<|1|>a", "m");
        assert_eq!(request.prior_context.as_deref(), Some("previous page text"));
    }
}
