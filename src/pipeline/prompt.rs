//! Prompt 组装器
//!
//! 把有序的查询列表按估算的 token 预算分组，每组生成一个带
//! `<|i|>` 位置标号的 prompt。粗略估算按 1 token ≈ 4 字符计，
//! 每个查询额外预留约 10 个字符的标号开销。

use crate::config::TranslatorConfig;
use crate::pipeline::batch::Batch;

/// 每个查询的标号开销（`<|N|>` 加换行的余量）
const MARKER_OVERHEAD: usize = 10;

/// 语言代码到显示名的映射
///
/// 未收录的代码原样返回，交给模板直接使用。
pub fn lang_display_name(code: &str) -> &str {
    match code {
        "CHS" => "Simplified Chinese",
        "CHT" => "Traditional Chinese",
        "ENG" => "English",
        "JPN" => "Japanese",
        "KOR" => "Korean",
        "FRA" => "French",
        "DEU" => "German",
        "ESP" => "Spanish",
        "RUS" => "Russian",
        "VIN" => "Vietnamese",
        other => other,
    }
}

/// Prompt 组装器
///
/// 同一个组装器可以反复调用 [`assemble`](Self::assemble)，
/// 产生的序列是有限且可重新开始的。
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    max_chars: usize,
    include_template: bool,
    template: String,
    lang_name: String,
}

impl PromptAssembler {
    /// 从配置创建组装器
    pub fn new(config: &TranslatorConfig) -> Self {
        Self {
            // 粗略估算: 1 token ~ 4 chars
            max_chars: config.max_tokens as usize * 4,
            include_template: config.include_template,
            template: config.prompt_template.clone(),
            lang_name: lang_display_name(&config.target_lang).to_string(),
        }
    }

    /// 把查询列表分组为 (prompt, 批次大小) 的惰性序列
    ///
    /// 完整消费该序列后，按顺序拼接各组的查询可精确还原输入列表，
    /// 无缺失也无重复。除非输入为空，产生的每一组都非空；
    /// 单个超长查询也会独占一组发出，绝不静默丢弃。
    pub fn assemble<'a, S: AsRef<str>>(
        &'a self,
        queries: &'a [S],
    ) -> impl Iterator<Item = (String, usize)> + 'a {
        PromptChunks {
            assembler: self,
            queries,
            next: 0,
        }
    }

    /// 为一个批次渲染 prompt
    ///
    /// 批次拆分后必须用这个方法为每一半重新生成 prompt，
    /// 不能复用父批次的 prompt（标号从 1 重新开始编号）。
    pub fn render_for_batch(&self, batch: &Batch) -> String {
        self.render(&batch.source_texts())
    }

    fn render(&self, texts: &[&str]) -> String {
        let mut prompt = String::new();
        if self.include_template {
            prompt.push_str(&self.template.replace("{to_lang}", &self.lang_name));
        }
        for (i, text) in texts.iter().enumerate() {
            prompt.push_str(&format!("\n<|{}|>{}", i + 1, text));
        }
        prompt.trim_start().to_string()
    }
}

/// [`PromptAssembler::assemble`] 返回的惰性分组序列
struct PromptChunks<'a, S: AsRef<str>> {
    assembler: &'a PromptAssembler,
    queries: &'a [S],
    next: usize,
}

impl<S: AsRef<str>> Iterator for PromptChunks<'_, S> {
    type Item = (String, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.queries.len() {
            return None;
        }

        let start = self.next;
        let mut current_length = 0;
        while self.next < self.queries.len() {
            let cost = self.queries[self.next].as_ref().chars().count() + MARKER_OVERHEAD;
            // 组内至少放一个查询，即使它单独超出预算
            if current_length + cost > self.assembler.max_chars && self.next > start {
                break;
            }
            current_length += cost;
            self.next += 1;
        }

        let texts: Vec<&str> = self.queries[start..self.next]
            .iter()
            .map(|q| q.as_ref())
            .collect();
        Some((self.assembler.render(&texts), texts.len()))
    }
}
