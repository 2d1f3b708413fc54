//! 响应格式校验
//!
//! 把模型返回的自由文本按 `<|N|>` 位置标号解析为逐项译文，并检测
//! 各类格式违例：标号缺失/重复/越界、段落串行、可疑字符、不该为空
//! 的空译文等。校验是纯函数，对任何畸形输入都不会 panic 或报错，
//! 永远返回结构化的通过/失败结果；所有失败都意味着"重试本次尝试"。

use std::sync::OnceLock;

use regex::Regex;

use crate::pipeline::batch::Batch;

/// 已知的模型幻觉字符，与任何受支持语言无关
const SUSPICIOUS_SYMBOLS: [char; 3] = ['ହ', 'ି', 'ഹ'];

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\|(\d+)\|>").unwrap())
}

fn marker_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^<\|(\d+)\|>(.*)$").unwrap())
}

/// 格式违例种类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// 非空批次收到空响应
    EmptyResponse,
    /// 同一标号出现多次
    DuplicateMarker(usize),
    /// 标号超出 1..=批次大小 的范围
    MarkerOutOfRange(usize),
    /// 收集到的标号集合不等于 {1..=批次大小}
    MissingMarkers { expected: usize, found: usize },
    /// 标号出现次数与批次大小不符（多余标号混入段落正文）
    SegmentCountMismatch { expected: usize, got: usize },
    /// 响应中含有已知的幻觉字符
    SuspiciousSymbol(char),
    /// 原文非空但对应译文为空（1 起的位置）
    EmptyTranslation(usize),
    /// 原文不是纯标点但译文是纯标点，疑似多句被并入一句（1 起的位置）
    MergedTranslation(usize),
}

/// 单次尝试的校验结果
///
/// `ok = true` 时 `segments` 与批次等长且按输入位置排列；
/// 失败时 `violation` 给出首个被发现的违例。
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub ok: bool,
    pub segments: Vec<String>,
    pub violation: Option<Violation>,
}

impl ValidationResult {
    fn pass(segments: Vec<String>) -> Self {
        Self {
            ok: true,
            segments,
            violation: None,
        }
    }

    fn fail(violation: Violation) -> Self {
        Self {
            ok: false,
            segments: Vec::new(),
            violation: Some(violation),
        }
    }
}

/// 校验一次响应
///
/// 按固定顺序执行检查，遇到首个违例立即失败返回：
/// 1. 按标号切分并修剪各段
/// 2. 单查询多段响应的合并启发式（命中则跳过 3–4）
/// 3. 严格的逐行结构检查（重复/越界/缺失标号）
/// 4. 标号出现次数与批次大小一致（捕捉混入段落正文的多余标号）
/// 5. 幻觉字符
/// 6. 非空原文的空译文
/// 7. 纯标点译文对非纯标点原文（串行检测）
pub fn validate(raw_text: &str, batch: &Batch) -> ValidationResult {
    let batch_size = batch.len();
    if batch_size == 0 {
        return ValidationResult::pass(Vec::new());
    }

    let marker_re = marker_re();

    // 1. 按标号切分，修剪每段，丢弃开头的空段
    let mut split_segments: Vec<String> = marker_re
        .split(raw_text)
        .map(|s| s.trim().to_string())
        .collect();
    if split_segments.first().is_some_and(|s| s.is_empty()) {
        split_segments.remove(0);
    }

    // 2. 单查询多段响应：模型把单个答案拆成了多个带标号的行。
    //    出现大于 1 的标号即视为此情况，把所有段合并为一段，
    //    并跳过结构检查与段数检查。
    let mut segments: Vec<String>;
    if batch_size == 1 && split_segments.len() > 1 {
        let has_invalid_index = marker_re
            .captures_iter(raw_text)
            .filter_map(|c| c[1].parse::<usize>().ok())
            .any(|index| index > 1);
        if has_invalid_index {
            tracing::warn!("检测到单查询被拆分为多段响应，已合并");
            let merged = marker_re.replace_all(raw_text, "").trim().to_string();
            segments = vec![merged];
        } else {
            match scan_structure(raw_text, batch_size) {
                Ok(ordered) => segments = ordered,
                Err(violation) => return ValidationResult::fail(violation),
            }
        }
    } else {
        // 3. 严格结构检查：逐行扫描，收集标号段
        match scan_structure(raw_text, batch_size) {
            Ok(ordered) => segments = ordered,
            Err(violation) => return ValidationResult::fail(violation),
        }

        // 4. 标号总出现次数必须与批次大小一致。逐行扫描只看行首标号，
        //    这里的计数额外捕捉混在段落正文中的多余标号。
        let marker_count = marker_re.find_iter(raw_text).count();
        if marker_count != batch_size {
            return ValidationResult::fail(Violation::SegmentCountMismatch {
                expected: batch_size,
                got: marker_count,
            });
        }
    }

    // 5. 幻觉字符检测
    if let Some(symbol) = SUSPICIOUS_SYMBOLS
        .iter()
        .find(|s| raw_text.contains(**s))
    {
        return ValidationResult::fail(Violation::SuspiciousSymbol(*symbol));
    }

    // 合并启发式路径可能只有一段，补齐到批次长度的防御在这里不需要：
    // batch_size == 1 时两者长度一定相等
    for segment in &mut segments {
        *segment = segment.trim().to_string();
    }

    // 6. 原文非空但译文为空
    for (i, (query, segment)) in batch.queries().iter().zip(segments.iter()).enumerate() {
        if !query.text.trim().is_empty() && segment.is_empty() {
            return ValidationResult::fail(Violation::EmptyTranslation(i + 1));
        }
    }

    // 7. 串行检测：原文不是纯标点，译文却是纯标点
    for (i, (query, segment)) in batch.queries().iter().zip(segments.iter()).enumerate() {
        let source_is_punct = query.text.chars().all(|c| c.is_ascii_punctuation());
        let segment_is_punct = segment.chars().all(|c| c.is_ascii_punctuation());
        if segment_is_punct && !source_is_punct && !segment.is_empty() {
            return ValidationResult::fail(Violation::MergedTranslation(i + 1));
        }
    }

    ValidationResult::pass(segments)
}

/// 逐行扫描响应结构
///
/// 每个非空行要么以 `<|N|>` 开头并开启一个新段，要么视为上一段被
/// 折行的续行。返回按标号 1..=batch_size 重排的段列表，或首个违例。
fn scan_structure(raw_text: &str, batch_size: usize) -> Result<Vec<String>, Violation> {
    let line_re = marker_line_re();

    let mut collected: Vec<(usize, String)> = Vec::new();
    let mut current: Option<(usize, String)> = None;
    let mut non_empty_lines = 0usize;

    for line in raw_text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        non_empty_lines += 1;

        if let Some(captures) = line_re.captures(line) {
            let Ok(index) = captures[1].parse::<usize>() else {
                // 标号溢出 usize，按越界处理
                return Err(Violation::MarkerOutOfRange(usize::MAX));
            };

            if index < 1 || index > batch_size {
                return Err(Violation::MarkerOutOfRange(index));
            }
            if collected.iter().any(|(i, _)| *i == index)
                || current.as_ref().is_some_and(|(i, _)| *i == index)
            {
                return Err(Violation::DuplicateMarker(index));
            }

            if let Some(done) = current.take() {
                collected.push(done);
            }
            current = Some((index, captures[2].trim().to_string()));
        } else if let Some((_, text)) = current.as_mut() {
            // 无标号行是上一段的折行续行
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(line);
        }
        // 首个标号出现之前的无标号行是模型附带的杂音，忽略
    }
    if let Some(done) = current.take() {
        collected.push(done);
    }

    if non_empty_lines == 0 {
        return Err(Violation::EmptyResponse);
    }

    if collected.len() != batch_size {
        return Err(Violation::MissingMarkers {
            expected: batch_size,
            found: collected.len(),
        });
    }

    // 按标号重排为输入位置顺序。重复与越界已排除，集合必为 {1..=n}
    collected.sort_by_key(|(index, _)| *index);
    Ok(collected
        .into_iter()
        .map(|(_, text)| text.trim().to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(texts: &[&str]) -> Batch {
        Batch::from_texts(texts, 0)
    }

    #[test]
    fn well_formed_response_passes() {
        let b = batch(&["こんにちは", "ありがとう"]);
        let result = validate("<|1|>Hello\n<|2|>Thanks", &b);
        assert!(result.ok);
        assert_eq!(result.segments, vec!["Hello", "Thanks"]);
    }

    #[test]
    fn out_of_order_markers_are_reordered() {
        let b = batch(&["a", "b", "c"]);
        let result = validate("<|2|>two\n<|3|>three\n<|1|>one", &b);
        assert!(result.ok);
        assert_eq!(result.segments, vec!["one", "two", "three"]);
    }

    #[test]
    fn duplicate_marker_fails() {
        let b = batch(&["a", "b"]);
        let result = validate("<|1|>x\n<|1|>y", &b);
        assert!(!result.ok);
        assert_eq!(result.violation, Some(Violation::DuplicateMarker(1)));
    }

    #[test]
    fn missing_marker_fails() {
        let b = batch(&["a", "b", "c"]);
        let result = validate("<|1|>Hello\n<|2|>Thanks", &b);
        assert!(!result.ok);
        assert_eq!(
            result.violation,
            Some(Violation::MissingMarkers {
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn marker_leaked_into_segment_text_fails() {
        // 行首标号齐全，但段落正文里混入了多余标号
        let b = batch(&["a", "b"]);
        let result = validate("<|1|>x <|1|>y\n<|2|>z", &b);
        assert!(!result.ok);
        assert_eq!(
            result.violation,
            Some(Violation::SegmentCountMismatch {
                expected: 2,
                got: 3
            })
        );
    }

    #[test]
    fn leading_noise_before_first_marker_is_tolerated() {
        let b = batch(&["a", "b"]);
        let result = validate("Sure, here you go:\n<|1|>x\n<|2|>y", &b);
        assert!(result.ok);
        assert_eq!(result.segments, vec!["x", "y"]);
    }

    #[test]
    fn marker_out_of_range_fails() {
        let b = batch(&["a", "b"]);
        let result = validate("<|1|>x\n<|5|>y", &b);
        assert!(!result.ok);
        assert_eq!(result.violation, Some(Violation::MarkerOutOfRange(5)));
    }

    #[test]
    fn empty_response_fails() {
        let b = batch(&["a"]);
        let result = validate("   \n  ", &b);
        assert!(!result.ok);
        assert_eq!(result.violation, Some(Violation::EmptyResponse));
    }

    #[test]
    fn wrapped_continuation_lines_join_previous_segment() {
        let b = batch(&["long sentence", "short"]);
        let result = validate("<|1|>first part\nsecond part\n<|2|>done", &b);
        assert!(result.ok);
        assert_eq!(result.segments[0], "first part\nsecond part");
        assert_eq!(result.segments[1], "done");
    }

    #[test]
    fn single_query_split_response_is_merged() {
        let b = batch(&["一つの質問"]);
        let result = validate("<|1|>part one\n<|2|>part two", &b);
        assert!(result.ok);
        assert_eq!(result.segments.len(), 1);
        assert!(result.segments[0].contains("part one"));
        assert!(result.segments[0].contains("part two"));
    }

    #[test]
    fn suspicious_symbol_fails() {
        let b = batch(&["a"]);
        let result = validate("<|1|>textହ", &b);
        assert!(!result.ok);
        assert_eq!(result.violation, Some(Violation::SuspiciousSymbol('ହ')));
    }

    #[test]
    fn empty_translation_for_nonempty_source_fails() {
        let b = batch(&["text", "more"]);
        let result = validate("<|1|>\n<|2|>ok", &b);
        assert!(!result.ok);
        assert_eq!(result.violation, Some(Violation::EmptyTranslation(1)));
    }

    #[test]
    fn punctuation_only_translation_for_text_source_fails() {
        let b = batch(&["本当の文章", "。"]);
        let result = validate("<|1|>...!\n<|2|>。", &b);
        assert!(!result.ok);
        assert_eq!(result.violation, Some(Violation::MergedTranslation(1)));
    }

    #[test]
    fn punctuation_source_may_stay_punctuation() {
        let b = batch(&["..."]);
        let result = validate("<|1|>...", &b);
        assert!(result.ok);
    }

    #[test]
    fn empty_batch_passes_trivially() {
        let b = batch(&[]);
        let result = validate("anything", &b);
        assert!(result.ok);
        assert!(result.segments.is_empty());
    }
}
