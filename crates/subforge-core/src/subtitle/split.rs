//! Sentence-aware splitting of a segment transcript into display lines.

use super::text::is_wide;
use crate::options::{Language, Model, MAX_CHARS_RANGE};

/// English sentences longer than this are also split at commas.
const LONG_EN_SENTENCE: usize = 72;
/// Sentences longer than `budget * HARD_CUT_FACTOR` are cut into budget-sized pieces.
const HARD_CUT_FACTOR: f64 = 1.8;

/// Characters per line for this job.
pub fn char_budget(language: Language, model: Model, max_chars: Option<usize>) -> usize {
    let budget = max_chars.unwrap_or(match language {
        Language::Ja => 20,
        Language::Zh => 24,
        Language::Auto if model.is_whisper_family() => 22,
        _ => 42,
    });
    budget.clamp(MAX_CHARS_RANGE.0, MAX_CHARS_RANGE.1)
}

fn is_cjk_terminator(c: char) -> bool {
    matches!(c, '。' | '！' | '？' | '；' | '…')
}

fn is_terminator(c: char) -> bool {
    is_cjk_terminator(c) || matches!(c, '.' | '!' | '?' | ';')
}

fn is_closing(c: char) -> bool {
    matches!(c, '」' | '』' | '）' | ')' | '"' | '\'' | '”' | '’' | '】')
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split after sentence punctuation: CJK terminators split directly, ASCII
/// ones only when followed by whitespace (so `3.14` stays whole).
pub fn split_sentences(text: &str, language: Language) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < chars.len() {
        if !is_terminator(chars[i]) {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        let mut cjk = is_cjk_terminator(chars[i]);
        while j < chars.len() && (is_terminator(chars[j]) || is_closing(chars[j])) {
            cjk |= is_cjk_terminator(chars[j]);
            j += 1;
        }
        let at_boundary = j == chars.len() || chars[j].is_whitespace();
        if cjk || at_boundary {
            push_trimmed(&mut out, chars[start..j].iter().collect());
            start = j;
        }
        i = j;
    }
    if start < chars.len() {
        push_trimmed(&mut out, chars[start..].iter().collect());
    }

    if language == Language::En {
        out = out
            .into_iter()
            .flat_map(|s| {
                if char_len(&s) > LONG_EN_SENTENCE {
                    split_clauses(&s)
                } else {
                    vec![s]
                }
            })
            .collect();
    }
    if out.is_empty() && !text.trim().is_empty() {
        out.push(text.trim().to_string());
    }
    out
}

fn push_trimmed(out: &mut Vec<String>, s: String) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
}

/// Split after `,` or `;` followed by whitespace.
fn split_clauses(sentence: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = sentence;
    while let Some(pos) = rest
        .char_indices()
        .zip(rest.chars().skip(1))
        .find(|((_, c), next)| matches!(c, ',' | ';') && next.is_whitespace())
        .map(|((i, c), _)| i + c.len_utf8())
    {
        push_trimmed(&mut out, rest[..pos].to_string());
        rest = &rest[pos..];
    }
    push_trimmed(&mut out, rest.to_string());
    out
}

/// Join two pieces of text: a space between Latin text, nothing next to CJK.
pub(crate) fn join_text(a: &str, b: &str) -> String {
    match (a.chars().last(), b.chars().next()) {
        (Some(p), Some(n)) if !is_wide(p) && !is_wide(n) => format!("{a} {b}"),
        _ => format!("{a}{b}"),
    }
}

/// Best split point of `chars` near `target` such that both halves fit in
/// `max`: after a clause mark, else at whitespace, else at `target`.
fn soft_cut(chars: &[char], target: usize, max: usize) -> usize {
    let fits = |k: usize| k > 0 && k < chars.len() && k <= max && chars.len() - k <= max;
    let best = |pred: &dyn Fn(usize) -> bool| {
        (1..chars.len())
            .filter(|&k| fits(k) && pred(k))
            .min_by_key(|&k| k.abs_diff(target))
    };
    best(&|k| matches!(chars[k - 1], ',' | '，' | '、' | ';' | '；' | ':' | '：'))
        .or_else(|| best(&|k| chars[k].is_whitespace()))
        .unwrap_or(target.clamp(1, chars.len().saturating_sub(1).max(1)))
}

/// Cut an over-long sentence into pieces of at most `budget` chars,
/// preferring the last whitespace of each window for Latin text.
fn hard_cut(sentence: &str, budget: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest: Vec<char> = sentence.chars().collect();
    while rest.len() > budget {
        let window = &rest[..budget];
        let cut = window
            .iter()
            .rposition(|c| c.is_whitespace())
            .filter(|&k| k >= budget / 2)
            .unwrap_or(budget);
        push_trimmed(&mut out, rest[..cut].iter().collect());
        rest = rest[cut..].iter().copied().skip_while(|c| c.is_whitespace()).collect();
    }
    push_trimmed(&mut out, rest.iter().collect());
    out
}

/// Lines of at most `budget` chars each, following sentence boundaries.
pub fn split_lines(text: &str, language: Language, budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    let mut pieces: Vec<String> = Vec::new();
    for sentence in split_sentences(text, language) {
        let len = char_len(&sentence);
        if len <= budget {
            pieces.push(sentence);
        } else if (len as f64) <= budget as f64 * HARD_CUT_FACTOR {
            let chars: Vec<char> = sentence.chars().collect();
            let cut = soft_cut(&chars, len / 2, budget);
            push_trimmed(&mut pieces, chars[..cut].iter().collect());
            push_trimmed(&mut pieces, chars[cut..].iter().collect());
        } else {
            pieces.extend(hard_cut(&sentence, budget));
        }
    }

    let mut lines: Vec<String> = Vec::new();
    let mut cur = String::new();
    for piece in pieces {
        if cur.is_empty() {
            cur = piece;
            continue;
        }
        let candidate = join_text(&cur, &piece);
        if char_len(&candidate) <= budget {
            cur = candidate;
        } else {
            lines.push(std::mem::replace(&mut cur, piece));
        }
    }
    if !cur.is_empty() {
        lines.push(cur);
    }

    let short = (budget / 5).max(4);
    let mut merged: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines {
        if let Some(prev) = merged.last_mut() {
            if char_len(&line) < short {
                let joined = join_text(prev, &line);
                if char_len(&joined) <= budget {
                    *prev = joined;
                    continue;
                }
            }
        }
        merged.push(line);
    }
    merged
}
