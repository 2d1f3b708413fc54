//! 批次恢复控制器
//!
//! 单个批次的完整容错流程：整批重试 → 回退模型 → 递归对半拆分。
//! 每一层的失败都被吸收，控制器永远返回与批次等长的结果列表，
//! 最终仍失败的查询以原文透传，保证整体请求不会因个别批次中断。

use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use tokio::time::{sleep, Duration};

use crate::config::TranslatorConfig;
use crate::core::executor::RequestExecutor;
use crate::core::validator;
use crate::pipeline::batch::Batch;
use crate::pipeline::prompt::PromptAssembler;

/// 回退模型的总尝试次数
const FALLBACK_ATTEMPTS: u32 = 3;
/// 批次整体重试间的等待
const BATCH_RETRY_BACKOFF: Duration = Duration::from_secs(1);

fn marker_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*<\|\d+\|>\s*").unwrap())
}

/// 批次恢复控制器
///
/// 通过 `Arc<Self>` 共享：拆分出的子批次在独立任务中运行，
/// 各自持有控制器的引用。
pub struct BatchRecoveryController {
    executor: Arc<RequestExecutor>,
    assembler: PromptAssembler,
    config: Arc<TranslatorConfig>,
}

impl BatchRecoveryController {
    pub fn new(
        executor: Arc<RequestExecutor>,
        assembler: PromptAssembler,
        config: Arc<TranslatorConfig>,
    ) -> Self {
        Self {
            executor,
            assembler,
            config,
        }
    }

    /// 翻译一个批次
    ///
    /// 返回 `(全部成功, 结果列表)`。结果与批次等长且顺序一致；
    /// 失败的查询位置上放原文。`split_level` 是当前递归拆分深度，
    /// 顶层调用传 0。
    pub fn translate_batch(
        self: Arc<Self>,
        batch: Batch,
        prompt: String,
        split_level: u32,
    ) -> BoxFuture<'static, (bool, Vec<String>)> {
        async move { self.translate_batch_inner(batch, prompt, split_level).await }.boxed()
    }

    async fn translate_batch_inner(
        self: Arc<Self>,
        batch: Batch,
        prompt: String,
        split_level: u32,
    ) -> (bool, Vec<String>) {
        if batch.is_empty() {
            return (true, Vec::new());
        }

        // 记录最后一次失败的响应，终态日志用
        let mut last_response = String::new();

        // 1. 整批重试
        let attempts = self.config.retry_attempts + 1;
        for attempt in 1..=attempts {
            match self
                .executor
                .request_with_retry(&prompt, &self.config.model)
                .await
            {
                Ok(response) => {
                    let result = validator::validate(&response, &batch);
                    if result.ok {
                        tracing::info!(
                            "批次翻译成功 (size={}, attempt={}, split_level={})",
                            batch.len(),
                            attempt,
                            split_level
                        );
                        return (true, result.segments);
                    }
                    tracing::warn!(
                        "批次响应格式违例: {:?} (attempt={}/{})",
                        result.violation,
                        attempt,
                        attempts
                    );
                    last_response = response;
                }
                Err(e) => {
                    tracing::warn!("批次请求失败: {} (attempt={}/{})", e, attempt, attempts);
                    if attempt < attempts {
                        sleep(BATCH_RETRY_BACKOFF).await;
                    }
                }
            }
        }

        // 2. 回退模型
        if let Some(results) = self.try_fallback(&batch).await {
            return (true, results);
        }

        // 3. 递归对半拆分
        if split_level < self.config.max_split_depth && batch.len() > 1 {
            tracing::warn!(
                "批次翻译失败，对半拆分重试 (size={}, split_level={})",
                batch.len(),
                split_level
            );
            let (left, right) = batch.split_halves();
            let left_prompt = self.assembler.render_for_batch(&left);
            let right_prompt = self.assembler.render_for_batch(&right);

            let left_task = tokio::spawn(Arc::clone(&self).translate_batch(
                left.clone(),
                left_prompt.clone(),
                split_level + 1,
            ));
            let right_task = tokio::spawn(Arc::clone(&self).translate_batch(
                right.clone(),
                right_prompt.clone(),
                split_level + 1,
            ));

            let ((left_ok, left_results), (right_ok, right_results)) =
                match tokio::try_join!(left_task, right_task) {
                    Ok(results) => results,
                    Err(e) => {
                        // 并发子任务异常终止时退回顺序执行
                        tracing::warn!("并发拆分任务异常终止: {}，改为顺序执行", e);
                        let left_result = Arc::clone(&self)
                            .translate_batch(left, left_prompt, split_level + 1)
                            .await;
                        let right_result = Arc::clone(&self)
                            .translate_batch(right, right_prompt, split_level + 1)
                            .await;
                        (left_result, right_result)
                    }
                };

            let mut merged = left_results;
            merged.extend(right_results);
            return (left_ok && right_ok, merged);
        }

        // 4. 终态失败：原文透传
        if batch.len() == 1 && !last_response.starts_with("<|1|>") {
            tracing::error!(
                "单查询翻译失败且响应缺少位置标号，透传原文: {:?}",
                last_response
            );
        } else {
            tracing::error!(
                "批次翻译失败，透传原文 (size={}, split_level={})",
                batch.len(),
                split_level
            );
        }
        (false, batch.source_texts_owned())
    }

    /// 用回退模型做最后的整批尝试
    ///
    /// 回退路径不走严格校验：只要求标号切分后的段数与批次一致，
    /// 且至少有一段非空、与原文不同。空缺的段用原文补齐。
    async fn try_fallback(&self, batch: &Batch) -> Option<Vec<String>> {
        let fallback_model = self.config.fallback_model.as_deref()?;
        tracing::warn!("主模型重试耗尽，切换回退模型: {}", fallback_model);

        let prompt = self.assembler.render_for_batch(batch);
        let marker_re = marker_split_re();

        for attempt in 1..=FALLBACK_ATTEMPTS {
            if attempt > 1 {
                sleep(BATCH_RETRY_BACKOFF).await;
            }

            let response = match self
                .executor
                .request_with_retry(&prompt, fallback_model)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        "回退模型请求失败: {} (attempt={}/{})",
                        e,
                        attempt,
                        FALLBACK_ATTEMPTS
                    );
                    continue;
                }
            };

            let mut segments: Vec<String> = marker_re
                .split(&response)
                .map(|s| s.trim().to_string())
                .collect();
            if segments.first().is_some_and(|s| s.is_empty()) {
                segments.remove(0);
            }

            if segments.len() != batch.len() {
                tracing::warn!(
                    "回退模型段数不符: expected={}, got={} (attempt={}/{})",
                    batch.len(),
                    segments.len(),
                    attempt,
                    FALLBACK_ATTEMPTS
                );
                continue;
            }

            let any_translated = batch
                .queries()
                .iter()
                .zip(segments.iter())
                .any(|(query, segment)| !segment.is_empty() && *segment != query.text);
            if !any_translated {
                tracing::warn!(
                    "回退模型未产生有效译文 (attempt={}/{})",
                    attempt,
                    FALLBACK_ATTEMPTS
                );
                continue;
            }

            // 空缺段用原文补齐
            for (query, segment) in batch.queries().iter().zip(segments.iter_mut()) {
                if segment.is_empty() {
                    *segment = query.text.clone();
                }
            }
            tracing::info!("回退模型翻译成功 (size={})", batch.len());
            return Some(segments);
        }

        tracing::error!("回退模型重试耗尽");
        None
    }
}
