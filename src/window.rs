//! Keyword-focused excerpt extraction.
//!
//! Given a passage and a keyword set, [`extract`] returns the smallest
//! readable span that carries the keywords, either as a run of characters
//! around the outermost hits ([`Granularity::Char`]) or as the
//! keyword-bearing sentences plus `radius` neighbours on each side
//! ([`Granularity::Sentence`]).
//!
//! The output is always a (possibly ellipsis-decorated) piece of the input
//! text, or of its whitespace-normalized form in sentence mode.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    text_util::{
        ELLIPSIS,
        FALLBACK_CHARS,
        Matching,
        distinct_keywords,
        fallback_excerpt,
        find_all,
        fold_chars,
        fold_str,
        is_hangul_syllable,
        normalize_whitespace,
        prefix_chars,
    },
};

/// Characters that end a formal declarative sentence when followed by `.`.
const SENTENCE_FINAL_ENDINGS: &[char] = &['다', '음', '함', '됨', '슴', '며'];

/// Fragments this short (in characters) are dropped after segmentation.
const MIN_SENTENCE_CHARS: usize = 3;

/// Unit of windowing for keyword extraction.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Sentence,
    Char,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sentence => f.write_str("sentence"),
            Self::Char => f.write_str("char"),
        }
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sentence" => Ok(Self::Sentence),
            "char" | "character" => Ok(Self::Char),
            other => Err(Error::Config(format!(
                "unknown granularity '{other}' (expected sentence or char)"
            ))),
        }
    }
}

/// A character-granularity window over a source text.
///
/// Offsets are character indices into the source, `[start_offset, end_offset)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionWindow {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub truncated_start: bool,
    pub truncated_end: bool,
}

impl ExtractionWindow {
    /// The window text with `...` on each side that was cut.
    pub fn render(&self) -> String {
        let capacity = self.text.len() + 2 * ELLIPSIS.len();
        let mut out = String::with_capacity(capacity);
        if self.truncated_start {
            out.push_str(ELLIPSIS);
        }
        out.push_str(&self.text);
        if self.truncated_end {
            out.push_str(ELLIPSIS);
        }
        out
    }
}

/// Extract the keyword-bearing part of `text`, matching case-insensitively.
///
/// `radius` is in sentences for [`Granularity::Sentence`] and in characters
/// for [`Granularity::Char`]; it is used exactly as given.
pub fn extract(
    text: &str,
    keywords: &[String],
    granularity: Granularity,
    radius: usize,
) -> String {
    extract_with(text, keywords, granularity, radius, Matching::default())
}

/// [`extract`] with an explicit matching mode.
pub fn extract_with(
    text: &str,
    keywords: &[String],
    granularity: Granularity,
    radius: usize,
    matching: Matching,
) -> String {
    match granularity {
        Granularity::Char => extract_by_chars(text, keywords, radius, matching),
        Granularity::Sentence => {
            extract_by_sentences(text, keywords, radius, matching)
        }
    }
}

/// Character-granularity extraction.
///
/// Falls back to the first [`FALLBACK_CHARS`] characters (no ellipsis) when
/// the text is empty, no usable keyword is given, or no keyword occurs.
pub fn extract_by_chars(
    text: &str,
    keywords: &[String],
    radius: usize,
    matching: Matching,
) -> String {
    match char_window(text, keywords, radius, matching) {
        Some(window) => window.render(),
        None => fallback_excerpt(text),
    }
}

/// Compute the character window around all keyword hits in `text`.
///
/// The window spans from `radius` characters before the first hit to
/// `radius` characters after the last one, clamped to the text. If the
/// window does not contain every keyword, the radius is doubled once and
/// the window recomputed; there is no further widening.
///
/// Returns `None` when no keyword occurs in the text.
pub fn char_window(
    text: &str,
    keywords: &[String],
    radius: usize,
    matching: Matching,
) -> Option<ExtractionWindow> {
    let keywords = distinct_keywords(keywords, matching);
    if text.is_empty() || keywords.is_empty() {
        return None;
    }

    let chars: Vec<char> = text.chars().collect();
    let folded = fold_chars(text, matching);

    let mut first_start = usize::MAX;
    let mut last_end = 0usize;
    for keyword in &keywords {
        let needle: Vec<char> = keyword.chars().collect();
        for (start, end) in find_all(&folded, &needle) {
            first_start = first_start.min(start);
            last_end = last_end.max(end);
        }
    }
    if first_start == usize::MAX {
        return None;
    }

    let bounds = |r: usize| {
        let start = first_start.saturating_sub(r);
        let end = last_end.saturating_add(r).min(chars.len());
        (start, end)
    };

    let (mut start, mut end) = bounds(radius);
    let window_folded: String = folded[start..end].iter().collect();
    let covered = keywords
        .iter()
        .filter(|k| window_folded.contains(k.as_str()))
        .count();
    if covered < keywords.len() {
        (start, end) = bounds(radius.saturating_mul(2));
    }

    Some(ExtractionWindow {
        text: chars[start..end].iter().collect(),
        start_offset: start,
        end_offset: end,
        truncated_start: start > 0,
        truncated_end: end < chars.len(),
    })
}

/// Split whitespace-normalized text into sentences.
///
/// A boundary follows a `.` that comes right after a formal sentence-final
/// ending (다, 음, 함, 됨, 슴, 며), or any `!` / `?`, provided the next
/// non-space character is a Hangul syllable, an ASCII uppercase letter or a
/// newline. The terminating punctuation stays with its sentence. Fragments
/// of two characters or fewer are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;

    for i in 0..chars.len() {
        let c = chars[i];
        let is_terminator = match c {
            '.' => i > 0 && SENTENCE_FINAL_ENDINGS.contains(&chars[i - 1]),
            '!' | '?' => true,
            _ => false,
        };
        if is_terminator && starts_new_sentence(&chars[i + 1..]) {
            push_sentence(&mut sentences, &chars[start..=i]);
            start = i + 1;
        }
    }
    if start < chars.len() {
        push_sentence(&mut sentences, &chars[start..]);
    }

    sentences
}

fn starts_new_sentence(rest: &[char]) -> bool {
    for &c in rest {
        if c == '\n' {
            return true;
        }
        if c.is_whitespace() {
            continue;
        }
        return is_hangul_syllable(c) || c.is_ascii_uppercase();
    }
    false
}

fn push_sentence(sentences: &mut Vec<String>, fragment: &[char]) {
    let raw: String = fragment.iter().collect();
    let sentence = normalize_whitespace(&raw);
    if sentence.chars().count() >= MIN_SENTENCE_CHARS {
        sentences.push(sentence);
    }
}

/// Sentence-granularity extraction.
///
/// Keeps every sentence containing at least one keyword, plus `radius`
/// sentences on each side, in document order. A `...` marker stands in for
/// each run of dropped sentences between kept ones.
///
/// Falls back to the first [`FALLBACK_CHARS`] characters of the normalized
/// text (with a trailing `...` when cut) when there is nothing to anchor on.
pub fn extract_by_sentences(
    text: &str,
    keywords: &[String],
    radius: usize,
    matching: Matching,
) -> String {
    let cleaned = normalize_whitespace(text);
    let keywords = distinct_keywords(keywords, matching);
    if cleaned.is_empty() || keywords.is_empty() {
        return sentence_fallback(&cleaned);
    }

    let sentences = split_sentences(&cleaned);
    if sentences.is_empty() {
        return sentence_fallback(&cleaned);
    }

    let hits: Vec<usize> = sentences
        .iter()
        .enumerate()
        .filter(|(_, sentence)| {
            let folded = fold_str(sentence, matching);
            keywords.iter().any(|k| folded.contains(k.as_str()))
        })
        .map(|(i, _)| i)
        .collect();
    if hits.is_empty() {
        return sentence_fallback(&cleaned);
    }

    let last = sentences.len() - 1;
    let included: BTreeSet<usize> = hits
        .iter()
        .flat_map(|&i| {
            i.saturating_sub(radius)..=i.saturating_add(radius).min(last)
        })
        .collect();

    let mut parts: Vec<&str> = Vec::with_capacity(included.len() * 2);
    let mut previous: Option<usize> = None;
    for &idx in &included {
        if let Some(prev) = previous
            && idx > prev + 1
        {
            parts.push(ELLIPSIS);
        }
        parts.push(&sentences[idx]);
        previous = Some(idx);
    }

    normalize_whitespace(&parts.join(" "))
}

fn sentence_fallback(cleaned: &str) -> String {
    let head = prefix_chars(cleaned, FALLBACK_CHARS);
    if head.len() < cleaned.len() {
        format!("{head}{ELLIPSIS}")
    } else {
        head.to_string()
    }
}
