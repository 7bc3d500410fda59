//! Transcript cleanup before splitting.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::options::{Language, Model};

static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,6});").expect("entity regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([,，。！？!?:：；;])").expect("punct regex"));
static SPACE_AFTER_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([(（\[【{])\s+").expect("open regex"));
static SPACE_BEFORE_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+([)）\]】}])").expect("close regex"));

/// Ideographs, kana and hangul: scripts written without inter-word spaces.
pub fn is_cjk(c: char) -> bool {
    matches!(
        c,
        '\u{4E00}'..='\u{9FFF}' | '\u{3040}'..='\u{30FF}' | '\u{31F0}'..='\u{31FF}' | '\u{AC00}'..='\u{D7AF}'
    )
}

fn is_fullwidth_punct(c: char) -> bool {
    matches!(c, '，' | '。' | '！' | '？' | '、' | '；' | '：')
}

/// Characters that take no space when joined to a neighbour.
pub(crate) fn is_wide(c: char) -> bool {
    is_cjk(c) || matches!(c, '\u{3000}'..='\u{303F}' | '\u{FF00}'..='\u{FFEF}')
}

fn joins_tight(prev: char, next: char, with_punct: bool) -> bool {
    if is_cjk(prev) && is_cjk(next) {
        return true;
    }
    with_punct && ((is_cjk(prev) && is_fullwidth_punct(next)) || (is_fullwidth_punct(prev) && is_cjk(next)))
}

/// Drop whitespace between two CJK characters (and, with `with_punct`,
/// between CJK and full-width punctuation). Spaces at CJK–Latin boundaries
/// are kept. Idempotent.
pub fn repair_cjk_spacing(text: &str, with_punct: bool) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut prev: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        if !chars[i].is_whitespace() {
            out.push(chars[i]);
            prev = Some(chars[i]);
            i += 1;
            continue;
        }
        let run_end = chars[i..]
            .iter()
            .position(|c| !c.is_whitespace())
            .map_or(chars.len(), |n| i + n);
        let tight = match (prev, chars.get(run_end)) {
            (Some(p), Some(&n)) => joins_tight(p, n, with_punct),
            _ => false,
        };
        if !tight {
            out.extend(&chars[i..run_end]);
        }
        i = run_end;
    }
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        _ => return None,
    })
}

fn unescape_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| match decode_entity(&caps[1]) {
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Fold runs of three or more identical noisy punctuation marks to two.
fn fold_repeated_punct(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run_char: Option<char> = None;
    let mut run_len = 0usize;
    for c in text.chars() {
        if Some(c) == run_char {
            run_len += 1;
        } else {
            run_char = Some(c);
            run_len = 1;
        }
        let noisy = matches!(c, '!' | '?' | '！' | '？' | '。' | '.' | ',' | '，');
        if !noisy || run_len <= 2 {
            out.push(c);
        }
    }
    out
}

/// Clean one backend transcript: entities, whitespace, CJK spacing,
/// punctuation spacing and repeated punctuation.
pub fn normalize_transcript(text: &str, language: Language, model: Model) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    let x = unescape_entities(text).replace('\u{3000}', " ");
    let x = WHITESPACE.replace_all(&x, " ");
    let x = repair_cjk_spacing(x.trim(), false);
    let x = SPACE_BEFORE_PUNCT.replace_all(&x, "$1");
    let x = SPACE_AFTER_OPEN.replace_all(&x, "$1");
    let x = SPACE_BEFORE_CLOSE.replace_all(&x, "$1");
    let mut x = fold_repeated_punct(&x);
    if language.may_be_cjk() || model.is_whisper_family() {
        x = repair_cjk_spacing(&x, true);
    }
    x.trim().to_string()
}
