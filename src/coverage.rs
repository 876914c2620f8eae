use crate::text_util::{Matching, fallback_excerpt, fold_str};

/// Percentage of `keywords` that occur in `window`, in `[0.0, 100.0]` and
/// rounded to one decimal place.
///
/// Each keyword is matched case-insensitively and counted on its own, so a
/// repeated keyword weighs once per repetition on both sides of the ratio:
/// `["road", "ROAD", "lane"]` against `"Road"` scores 66.7. Empty keywords
/// are ignored. Returns `0.0` when either side is empty.
pub fn keyword_coverage(window: &str, keywords: &[String]) -> f64 {
    let keywords: Vec<String> = keywords
        .iter()
        .filter(|k| !k.is_empty())
        .map(|k| fold_str(k, Matching::CaseInsensitive))
        .collect();
    if window.is_empty() || keywords.is_empty() {
        return 0.0;
    }

    let folded = fold_str(window, Matching::CaseInsensitive);
    let found = keywords
        .iter()
        .filter(|k| folded.contains(k.as_str()))
        .count();

    round_one_decimal(100.0 * found as f64 / keywords.len() as f64)
}

/// An excerpt ready for display together with its keyword coverage.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredExcerpt {
    pub excerpt: String,
    pub coverage: f64,
}

/// Score an extraction result against its source passage.
///
/// When extraction changed the text, the extracted window is both shown and
/// scored. When it did not, the full passage is scored and only its first
/// characters are kept for display.
pub fn score_extraction(
    original: &str,
    extracted: &str,
    keywords: &[String],
) -> ScoredExcerpt {
    if !extracted.is_empty() && extracted != original {
        ScoredExcerpt {
            excerpt: extracted.to_string(),
            coverage: keyword_coverage(extracted, keywords),
        }
    } else {
        ScoredExcerpt {
            excerpt: fallback_excerpt(original),
            coverage: keyword_coverage(original, keywords),
        }
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::window::{Granularity, extract};

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn full_coverage() {
        let window = "도로의 설계속도는 안전성을 고려한다.";
        assert_eq!(keyword_coverage(window, &kw(&["설계속도"])), 100.0);
    }

    #[test]
    fn partial_coverage_rounds_to_one_decimal() {
        let keywords = kw(&["alpha", "gamma", "delta"]);
        assert_eq!(keyword_coverage("alpha beta", &keywords), 33.3);
        let keywords = kw(&["alpha", "beta", "gamma"]);
        assert_eq!(keyword_coverage("alpha beta", &keywords), 66.7);
    }

    #[test]
    fn empty_inputs_score_zero() {
        assert_eq!(keyword_coverage("", &kw(&["a"])), 0.0);
        assert_eq!(keyword_coverage("abc", &[]), 0.0);
        assert_eq!(keyword_coverage("abc", &kw(&[""])), 0.0);
    }

    #[test]
    fn repeated_keywords_count_per_occurrence_in_the_list() {
        assert_eq!(keyword_coverage("Road", &kw(&["road", "ROAD"])), 100.0);
        let keywords = kw(&["road", "ROAD", "lane"]);
        assert_eq!(keyword_coverage("Road", &keywords), 66.7);
        let keywords = kw(&["lane", "lane", "road"]);
        assert_eq!(keyword_coverage("Road", &keywords), 33.3);
    }

    #[test]
    fn changed_extraction_is_scored_on_the_window() {
        let original = "설계속도 문장이다. 무관한 문장이다. 차로폭 문장이다.";
        let keywords = kw(&["설계속도", "차로폭"]);
        let scored = score_extraction(original, "설계속도 문장이다.", &keywords);
        assert_eq!(scored.excerpt, "설계속도 문장이다.");
        assert_eq!(scored.coverage, 50.0);
    }

    #[test]
    fn unchanged_extraction_scores_the_passage() {
        let original = "교차로 설계에서는 시거확보가 중요한 요소이다.";
        let keywords = kw(&["설계속도"]);
        let extracted = extract(original, &keywords, Granularity::Sentence, 1);
        let scored = score_extraction(original, &extracted, &keywords);
        assert_eq!(scored.excerpt, original);
        assert_eq!(scored.coverage, 0.0);
    }

    #[test]
    fn end_to_end_sentence_examples() {
        let text =
            "도로의 설계속도는 안전성을 고려한다. 차로폭은 3.0m 이상이다.";

        let keywords = kw(&["설계속도"]);
        let out = extract(text, &keywords, Granularity::Sentence, 0);
        let scored = score_extraction(text, &out, &keywords);
        assert_eq!(scored.excerpt, "도로의 설계속도는 안전성을 고려한다.");
        assert_eq!(scored.coverage, 100.0);

        let keywords = kw(&["설계속도", "차로폭"]);
        let out = extract(text, &keywords, Granularity::Sentence, 0);
        assert_eq!(out, text);
        assert_eq!(keyword_coverage(&out, &keywords), 100.0);
    }

    proptest! {
        #[test]
        fn widening_never_lowers_coverage(
            text in "[a-d ]{0,80}",
            keywords in proptest::collection::vec("[a-d]{1,2}", 1..4),
            radius in 0usize..10,
            extra in 0usize..10,
        ) {
            let narrow = extract(&text, &keywords, Granularity::Char, radius);
            let wide =
                extract(&text, &keywords, Granularity::Char, radius + extra);
            let narrow = keyword_coverage(&narrow, &keywords);
            prop_assert!(keyword_coverage(&wide, &keywords) >= narrow);
        }
    }
}
