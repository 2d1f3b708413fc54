//! 术语相关性匹配
//!
//! 按 query 自动提取相关术语条目，而不是一次性把整个术语表塞进系统
//! 提示词，以免浪费 token 且稀释指令权重。术语来源混杂：字面词、
//! 带空格/变形的变体、以及刻意写成正则的模式，单一匹配策略要么漏配
//! 要么泛滥，因此采用分层策略，每个条目按顺序尝试，命中即止：
//!
//! 1. 原文精确子串（含去空格变体）
//! 2. 含假名的术语：规范化编辑距离（片假名折叠到平假名）
//! 3. 其他术语：按长度缩放阈值的编辑距离，长文本用滑动窗口
//! 4. 规范化后的子串包含
//! 5. 以原始术语为模式的不区分大小写正则搜索

use regex::RegexBuilder;

use crate::glossary::Glossary;

impl Glossary {
    /// 提取与 prompt 文本相关的术语条目
    ///
    /// 返回 (源模式, 目标译文) 列表；顺序与术语表一致，但调用方
    /// 不应依赖顺序。
    pub fn relevant_terms<'a>(&'a self, text: &str) -> Vec<(&'a str, &'a str)> {
        let mut relevant = Vec::new();
        let normalized_text = normalize_term(text);

        for entry in self.entries() {
            let term = entry.source.as_str();

            // 1. 精确匹配：同时检查原词和去除空格的变体
            if text.contains(term) || text.contains(&term.replace(' ', "")) {
                relevant.push((term, entry.target.as_str()));
                continue;
            }

            let normalized_term = normalize_term(term);

            // 2. 含日语假名的术语：规范化编辑距离匹配
            if contains_kana(term) {
                if is_japanese_similar(&normalized_text, &normalized_term) {
                    relevant.push((term, entry.target.as_str()));
                    continue;
                }
            // 3. 普通编辑距离匹配（非日语术语）
            } else if is_general_similar(&normalized_text, &normalized_term) {
                relevant.push((term, entry.target.as_str()));
                continue;
            }

            // 4. 规范化后的子串包含
            if !normalized_term.is_empty() && normalized_text.contains(&normalized_term) {
                relevant.push((term, entry.target.as_str()));
                continue;
            }

            // 5. 把原始术语当作正则做不区分大小写搜索
            //    （sakura/galtransl 条目未经正则校验，编译失败时跳过）
            if let Ok(pattern) = RegexBuilder::new(term).case_insensitive(true).build() {
                if pattern.is_match(text) {
                    relevant.push((term, entry.target.as_str()));
                }
            }
        }

        relevant
    }
}

/// 判断术语是否包含平假名或片假名 (U+3040..=U+30FF)
pub fn contains_kana(term: &str) -> bool {
    term.chars()
        .any(|c| (0x3040..=0x30FF).contains(&(c as u32)))
}

/// 术语规范化：去标点、小写、小假名放大、片假名折叠到平假名
///
/// 与 `\w`/`\s` 语义对齐：字母数字、下划线和空白保留，其余移除。
pub fn normalize_term(term: &str) -> String {
    term.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .flat_map(|c| c.to_lowercase())
        .map(fold_kana)
        .collect()
}

/// 单字符假名折叠
///
/// 小写假名先映射到标准假名（当前 OCR 对日语大小假名的区分不可靠，
/// 这一步不可或缺），再把片假名按码位差折叠到平假名。
fn fold_kana(c: char) -> char {
    let c = match c {
        'ァ' => 'ア',
        'ィ' => 'イ',
        'ゥ' => 'ウ',
        'ェ' => 'エ',
        'ォ' => 'オ',
        'ッ' => 'ツ',
        'ャ' => 'ヤ',
        'ュ' => 'ユ',
        'ョ' => 'ヨ',
        'ぁ' => 'あ',
        'ぃ' => 'い',
        'ぅ' => 'う',
        'ぇ' => 'え',
        'ぉ' => 'お',
        'っ' => 'つ',
        'ゃ' => 'や',
        'ゅ' => 'ゆ',
        'ょ' => 'よ',
        other => other,
    };
    let code = c as u32;
    if (0x30A0..=0x30FF).contains(&code) {
        // 片假名到平假名的码位差固定为 0x60
        char::from_u32(code - 0x60).unwrap_or(c)
    } else {
        c
    }
}

/// Levenshtein 编辑距离（按字符计）
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    edit_distance_chars(&a_chars, &b_chars)
}

fn edit_distance_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, &a_ch) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &b_ch) in b.iter().enumerate() {
            let cost = usize::from(a_ch != b_ch);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// 日语特化的相似度判断（输入已规范化）
///
/// 短术语收紧阈值：长度 ≤2 时要求完全一致，≤4 时允许 1，
/// 其余允许 2。与整个规范化文本比较，不做子串窗口。
fn is_japanese_similar(normalized_text: &str, normalized_term: &str) -> bool {
    let term_len = normalized_term.chars().count();
    let threshold = if term_len <= 2 {
        0
    } else if term_len <= 4 {
        1
    } else {
        2
    };
    edit_distance(normalized_text, normalized_term) <= threshold
}

/// 普通文本的相似度判断（输入已规范化）
///
/// 阈值按术语长度缩放 (len / 8，夹在 [0, 3])。文本远长于术语
/// (超过 5 倍) 时，用与术语等长（长术语略加余量）的窗口在文本上
/// 滑动，取最小距离；否则直接比较全串。
fn is_general_similar(normalized_text: &str, normalized_term: &str) -> bool {
    let term_chars: Vec<char> = normalized_term.chars().collect();
    let text_chars: Vec<char> = normalized_text.chars().collect();
    let term_len = term_chars.len();
    if term_len == 0 {
        return false;
    }

    let threshold = (term_len / 8).min(3);

    if text_chars.len() > term_len * 5 {
        let window_size = if term_len <= 8 {
            term_len
        } else if term_len <= 16 {
            term_len + 1
        } else {
            term_len + 2
        };
        if text_chars.len() < window_size {
            return edit_distance_chars(&text_chars, &term_chars) <= threshold;
        }
        let mut min_distance = usize::MAX;
        for window in text_chars.windows(window_size) {
            min_distance = min_distance.min(edit_distance_chars(window, &term_chars));
            if min_distance == 0 {
                break;
            }
        }
        min_distance <= threshold
    } else {
        edit_distance_chars(&text_chars, &term_chars) <= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glossary::GlossaryEntry;

    fn glossary(pairs: &[(&str, &str)]) -> Glossary {
        Glossary::from_entries(
            pairs
                .iter()
                .map(|(s, t)| GlossaryEntry {
                    source: s.to_string(),
                    target: t.to_string(),
                })
                .collect(),
        )
    }

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance("", ""), 0);
        assert_eq!(edit_distance("abc", "abc"), 0);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("あいう", "あいえ"), 1);
    }

    #[test]
    fn normalization_folds_katakana_and_punctuation() {
        assert_eq!(normalize_term("カグヤ"), "かぐや");
        assert_eq!(normalize_term("Hello, World!"), "hello world");
        assert_eq!(normalize_term("ッチ"), "つち");
    }

    #[test]
    fn verbatim_term_is_always_included() {
        let g = glossary(&[("月の都", "Moon Capital"), ("無関係", "Unrelated")]);
        let terms = g.relevant_terms("<|1|>月の都へようこそ");
        assert!(terms.iter().any(|(s, _)| *s == "月の都"));
    }

    #[test]
    fn spaced_variant_matches_without_spaces() {
        let g = glossary(&[("Moon Capital", "月の都")]);
        let terms = g.relevant_terms("Welcome to MoonCapital!");
        assert_eq!(terms.len(), 1);
    }

    #[test]
    fn katakana_term_matches_hiragana_text() {
        // 片假名术语折叠到平假名后与文本一致
        let g = glossary(&[("カグヤヒメ", "Princess Kaguya")]);
        let terms = g.relevant_terms("かぐやひめ");
        assert!(terms.iter().any(|(s, _)| *s == "カグヤヒメ"));
    }

    #[test]
    fn distant_term_is_excluded() {
        let g = glossary(&[("completely different phrase", "x")]);
        let terms = g.relevant_terms("<|1|>こんにちは<|2|>ありがとう");
        assert!(terms.is_empty());
    }

    #[test]
    fn regex_entry_matches_raw_text() {
        let g = glossary(&[(r"[Mm]agical\s+[Gg]irl", "魔法少女")]);
        let terms = g.relevant_terms("She is a magical  girl from the east.");
        assert_eq!(terms.len(), 1);
    }

    #[test]
    fn short_kana_term_requires_exact_match() {
        // 规范化长度 ≤2 的假名术语阈值为 0
        let g = glossary(&[("つき", "moon")]);
        assert!(g.relevant_terms("つき").len() == 1);
        assert!(g.relevant_terms("とけい").is_empty());
    }

    #[test]
    fn invalid_regex_entry_does_not_panic() {
        let g = glossary(&[("[broken", "x")]);
        assert!(g.relevant_terms("anything").is_empty());
    }
}
