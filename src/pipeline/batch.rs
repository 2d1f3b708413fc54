//! 批次数据模型
//!
//! 一个批次是一段连续的查询及其在整体请求中的原始位置。
//! 批次由 prompt 组装器创建，或由父批次对半拆分产生；
//! 结果向上合并后批次即被丢弃。

/// 单个查询：调用方提供的不可变源文本及其稳定位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// 在整体请求中的位置（0 起）
    pub position: usize,
    /// 源文本
    pub text: String,
}

/// 翻译批次
///
/// 不变式：批次内各查询的位置互不相同且严格递增。
#[derive(Debug, Clone, Default)]
pub struct Batch {
    queries: Vec<Query>,
}

impl Batch {
    /// 从连续的文本切片创建批次，位置从 `start_position` 起连续编号
    pub fn from_texts<S: AsRef<str>>(texts: &[S], start_position: usize) -> Self {
        let queries = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Query {
                position: start_position + i,
                text: text.as_ref().to_string(),
            })
            .collect();
        Self { queries }
    }

    /// 批次大小
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// 批次是否为空
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// 查询列表
    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    /// 源文本列表（与批次顺序一致）
    pub fn source_texts(&self) -> Vec<&str> {
        self.queries.iter().map(|q| q.text.as_str()).collect()
    }

    /// 源文本副本，用于失败时的原文透传
    pub fn source_texts_owned(&self) -> Vec<String> {
        self.queries.iter().map(|q| q.text.clone()).collect()
    }

    /// 按位置对半拆分，前一半取 `floor(n/2)` 项
    ///
    /// 拆分不改变位置编号，两半的位置区间互不相交且合并后还原原批次。
    pub fn split_halves(&self) -> (Batch, Batch) {
        let mid = self.queries.len() / 2;
        let left = Batch {
            queries: self.queries[..mid].to_vec(),
        };
        let right = Batch {
            queries: self.queries[mid..].to_vec(),
        };
        (left, right)
    }
}
