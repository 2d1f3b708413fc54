//! 术语表加载器
//!
//! 自动识别三种行格式的术语表文件：
//! - **sakura**: `源词->目标词`，`//` 或 `\\` 开头为注释行
//! - **galtransl**: 制表符或四个空格分隔的键值对，注释同上
//! - **mit**: 最宽松的制表符/空白分隔格式，支持 `#` 或 `//` 行尾注释，
//!   源字段会被校验为合法正则表达式，非法条目跳过并记录诊断
//!
//! 文件缺失、格式未知或解析失败都退化为空术语表加一次性警告，
//! 不会中断翻译流程。

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;

use crate::glossary::{Glossary, GlossaryEntry};

/// 术语表缺失警告是否已经显示过（进程级一次性标志）
static GLOSSARY_WARNING_SHOWN: AtomicBool = AtomicBool::new(false);

/// 重置一次性警告标志，仅供测试使用
pub fn reset_glossary_warning() {
    GLOSSARY_WARNING_SHOWN.store(false, Ordering::SeqCst);
}

fn warn_once(message: &str) {
    if !GLOSSARY_WARNING_SHOWN.swap(true, Ordering::SeqCst) {
        tracing::warn!("{}", message);
    }
}

/// 术语表文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlossaryFormat {
    Sakura,
    Galtransl,
    Mit,
    Unknown,
}

impl Glossary {
    /// 从文件加载术语表
    ///
    /// `path` 为 `None` 时返回空术语表且不告警；文件不存在或格式未知时
    /// 返回空术语表并记录一次性警告。
    pub fn load(path: Option<&Path>) -> Glossary {
        let Some(path) = path else {
            return Glossary::empty();
        };

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn_once(&format!("术语表文件不可用: {}: {}", path.display(), e));
                return Glossary::empty();
            }
        };

        let format = detect_format(&content);
        tracing::debug!("检测术语表格式: {} -> {:?}", path.display(), format);

        let glossary = match format {
            GlossaryFormat::Sakura => load_sakura(&content),
            GlossaryFormat::Galtransl => load_galtransl(&content),
            GlossaryFormat::Mit => load_mit(&content),
            GlossaryFormat::Unknown => {
                warn_once(&format!("无法识别的术语表格式: {}", path.display()));
                return Glossary::empty();
            }
        };

        tracing::info!(
            "已加载术语表 {} ({:?} 格式, {} 条)",
            path.display(),
            format,
            glossary.len()
        );
        glossary
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with("\\\\") || line.starts_with("//")
}

/// 检测术语表格式
///
/// 判断顺序从严到宽：sakura -> galtransl -> mit。
pub fn detect_format(content: &str) -> GlossaryFormat {
    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    if lines.is_empty() {
        return GlossaryFormat::Unknown;
    }

    // 先判断是否为 sakura 字典：所有数据行都含 "->"
    let mut sakura_count = 0;
    let mut is_sakura = true;
    for line in &lines {
        if line.is_empty() || is_comment(line) {
            continue;
        }
        if line.contains("->") {
            sakura_count += 1;
        } else {
            is_sakura = false;
            break;
        }
    }
    if is_sakura && sakura_count > 0 {
        return GlossaryFormat::Sakura;
    }

    // 再判断 galtransl：所有数据行都含制表符或四个空格
    let mut galtransl_count = 0;
    let mut is_galtransl = true;
    for line in &lines {
        if line.is_empty() || is_comment(line) {
            continue;
        }
        if line.contains('\t') || line.contains("    ") {
            galtransl_count += 1;
        } else {
            is_galtransl = false;
            break;
        }
    }
    if is_galtransl && galtransl_count > 0 {
        return GlossaryFormat::Galtransl;
    }

    // 最后判断 mit（最宽松的格式）
    let mut mit_count = 0;
    let mut is_mit = true;
    for line in &lines {
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }
        if line.contains("->") {
            is_mit = false;
            break;
        }
        if split_source_target(line).is_some() {
            mit_count += 1;
        } else {
            is_mit = false;
            break;
        }
    }
    if is_mit && mit_count > 0 {
        return GlossaryFormat::Mit;
    }

    GlossaryFormat::Unknown
}

/// 先按制表符分割，失败时退回任意空白分割
fn split_source_target(line: &str) -> Option<(&str, &str)> {
    if let Some((src, dst)) = line.split_once('\t') {
        return Some((src.trim(), dst.trim()));
    }
    let mut parts = line.splitn(2, char::is_whitespace);
    let src = parts.next()?.trim();
    let dst = parts.next()?.trim();
    if dst.is_empty() {
        return None;
    }
    Some((src, dst))
}

fn load_sakura(content: &str) -> Glossary {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || is_comment(line) {
            continue;
        }
        match line.split_once("->") {
            Some((src, dst)) => entries.push(GlossaryEntry {
                source: src.trim().to_string(),
                target: dst.trim().to_string(),
            }),
            None => tracing::debug!("跳过不符合 sakura 格式的行: {}", line),
        }
    }
    Glossary::from_entries(entries)
}

fn load_galtransl(content: &str) -> Glossary {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() || is_comment(line.trim_start()) {
            continue;
        }
        let parts = line
            .split_once('\t')
            .or_else(|| line.split_once("    "));
        match parts {
            Some((src, dst)) => entries.push(GlossaryEntry {
                source: src.trim().to_string(),
                target: dst.trim().to_string(),
            }),
            None => tracing::debug!("跳过不符合 galtransl 格式的行: {}", line.trim()),
        }
    }
    Glossary::from_entries(entries)
}

fn load_mit(content: &str) -> Glossary {
    let mut entries = Vec::new();
    let mut regex_errors = 0;

    for (line_number, raw_line) in content.lines().enumerate() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        // 截取行尾注释并保留，附加在译文之后
        let mut comment = String::new();
        if let Some(pos) = line.find('#') {
            comment = format!("#{}", &line[pos + 1..]);
            line = line[..pos].trim();
        } else if let Some(pos) = line.find("//") {
            comment = format!("//{}", &line[pos + 2..]);
            line = line[..pos].trim();
        }

        let Some((src, dst)) = split_source_target(line) else {
            tracing::debug!("跳过只有单个字段的行: {}", line);
            continue;
        };
        let src = src.replace('_', " ");
        let dst = dst.replace('_', " ");

        // 源字段必须是合法正则，非法条目跳过并记录诊断
        if let Err(e) = Regex::new(&src) {
            regex_errors += 1;
            tracing::warn!("第 {} 行正则表达式错误: '{}' - {}", line_number + 1, src, e);
            continue;
        }

        let target = if comment.is_empty() {
            dst
        } else {
            format!("{} {}", dst, comment)
        };
        entries.push(GlossaryEntry {
            source: src,
            target,
        });
    }

    if regex_errors > 0 {
        tracing::info!("mit 术语表中有 {} 条正则无效的条目被跳过", regex_errors);
    }
    Glossary::from_entries(entries)
}
