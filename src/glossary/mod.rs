//! 术语表模块
//!
//! 术语表把源语言术语映射到目标语言译文，用于在生成请求中引导术语
//! 一致性。加载后只读，可在并发任务间无锁共享：
//! - **loader**: 自动识别三种行格式的加载器
//! - **matcher**: 分层的术语相关性匹配

pub mod loader;
pub mod matcher;

pub use loader::{reset_glossary_warning, GlossaryFormat};

/// 术语表条目：(源模式, 目标译文)
///
/// 源模式可以是字面文本，也可以是正则表达式。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlossaryEntry {
    pub source: String,
    pub target: String,
}

/// 已加载的术语表
///
/// 加载完成后不可变。加载失败会退化为空术语表并记录一次性警告，
/// 绝不致命。
#[derive(Debug, Clone, Default)]
pub struct Glossary {
    entries: Vec<GlossaryEntry>,
}

impl Glossary {
    /// 创建空术语表
    pub fn empty() -> Self {
        Self::default()
    }

    /// 从条目列表构造（主要用于测试）
    pub fn from_entries(entries: Vec<GlossaryEntry>) -> Self {
        Self { entries }
    }

    /// 条目数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 条目列表
    pub fn entries(&self) -> &[GlossaryEntry] {
        &self.entries
    }
}
