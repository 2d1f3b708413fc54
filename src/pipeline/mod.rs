//! 文本处理管道模块
//!
//! 负责把调用方的查询列表组装为带标号的 prompt 批次：
//! - **batch**: 批次与查询的数据模型
//! - **prompt**: 按 token 预算分组的 prompt 组装器

pub mod batch;
pub mod prompt;

pub use batch::{Batch, Query};
pub use prompt::{lang_display_name, PromptAssembler};
