/// Number of characters shown when no keyword-focused window can be built.
pub const FALLBACK_CHARS: usize = 500;

/// Marker inserted where text was omitted.
pub const ELLIPSIS: &str = "...";

/// How keywords are compared against passage text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Matching {
    #[default]
    CaseInsensitive,
    CaseSensitive,
}

/// Collapse every run of whitespace (including newlines) into a single
/// space and trim both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Return at most the first `max_chars` characters of `text`.
///
/// Slices on a character boundary, so multi-byte text (Hangul, CJK) is
/// never split mid-codepoint.
pub fn prefix_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// The fallback excerpt used when nothing better is available: the first
/// [`FALLBACK_CHARS`] characters, without any ellipsis.
pub fn fallback_excerpt(text: &str) -> String {
    prefix_chars(text, FALLBACK_CHARS).to_string()
}

/// Fold a single character for comparison.
///
/// Lowercasing can expand some characters into several codepoints; those
/// are left untouched so folded text stays aligned with the original
/// character offsets.
pub fn fold_char(c: char, matching: Matching) -> char {
    if matching == Matching::CaseSensitive {
        return c;
    }
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}

/// Fold every character of `text`, preserving one output char per input char.
pub fn fold_chars(text: &str, matching: Matching) -> Vec<char> {
    text.chars().map(|c| fold_char(c, matching)).collect()
}

/// Fold `text` into a `String` (same character count as the input).
pub fn fold_str(text: &str, matching: Matching) -> String {
    text.chars().map(|c| fold_char(c, matching)).collect()
}

/// Folded, de-duplicated, non-empty keywords in first-seen order.
pub fn distinct_keywords(
    keywords: &[String],
    matching: Matching,
) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        if keyword.is_empty() {
            continue;
        }
        let folded = fold_str(keyword, matching);
        if !seen.contains(&folded) {
            seen.push(folded);
        }
    }
    seen
}

/// Find every occurrence of `needle` in `haystack`, overlapping ones
/// included. Offsets are character indices `[start, end)`.
pub fn find_all(haystack: &[char], needle: &[char]) -> Vec<(usize, usize)> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(start, _)| (start, start + needle.len()))
        .collect()
}

/// Whether a Hangul syllable (가..=힣).
pub fn is_hangul_syllable(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_runs() {
        assert_eq!(
            normalize_whitespace("  도로의\n\n설계속도는 \t 안전 "),
            "도로의 설계속도는 안전"
        );
    }

    #[test]
    fn normalize_empty() {
        assert_eq!(normalize_whitespace(" \n\t "), "");
    }

    #[test]
    fn prefix_chars_respects_char_boundaries() {
        assert_eq!(prefix_chars("설계속도", 2), "설계");
        assert_eq!(prefix_chars("abc", 10), "abc");
        assert_eq!(prefix_chars("", 3), "");
    }

    #[test]
    fn fallback_is_capped_without_ellipsis() {
        let long = "가".repeat(FALLBACK_CHARS + 20);
        let out = fallback_excerpt(&long);
        assert_eq!(out.chars().count(), FALLBACK_CHARS);
        assert!(!out.ends_with(ELLIPSIS));
    }

    #[test]
    fn fold_keeps_alignment() {
        let text = "ABC İx";
        assert_eq!(fold_chars(text, Matching::CaseInsensitive).len(), 6);
        assert_eq!(fold_str("RoAD", Matching::CaseInsensitive), "road");
        assert_eq!(fold_str("RoAD", Matching::CaseSensitive), "RoAD");
    }

    #[test]
    fn distinct_keywords_dedupes_case_insensitively() {
        let keywords = vec![
            "Road".to_string(),
            "road".to_string(),
            String::new(),
            "차로폭".to_string(),
        ];
        assert_eq!(
            distinct_keywords(&keywords, Matching::CaseInsensitive),
            vec!["road".to_string(), "차로폭".to_string()]
        );
    }

    #[test]
    fn find_all_counts_overlaps() {
        let hay: Vec<char> = "aaaa".chars().collect();
        let needle: Vec<char> = "aa".chars().collect();
        assert_eq!(find_all(&hay, &needle), vec![(0, 2), (1, 3), (2, 4)]);
    }

    #[test]
    fn find_all_empty_needle() {
        let hay: Vec<char> = "abc".chars().collect();
        assert!(find_all(&hay, &[]).is_empty());
    }

    #[test]
    fn hangul_detection() {
        assert!(is_hangul_syllable('가'));
        assert!(is_hangul_syllable('힣'));
        assert!(!is_hangul_syllable('A'));
        assert!(!is_hangul_syllable('ㄱ'));
    }
}
