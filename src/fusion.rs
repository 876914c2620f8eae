//! Weighted fusion of vector and keyword result sets.
//!
//! [`fuse`] merges two independently ranked candidate lists by `vector_id`.
//! Each side contributes a weighted, non-negative component and the final
//! score is their sum. The output order is fully determined by the input
//! order: equal final scores keep the order in which ids were first seen,
//! vector candidates before keyword-only candidates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    document::Metadata,
    providers::{KeywordMatch, VectorMatch},
};

/// A candidate scored by both sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridMatch {
    pub vector_id: u64,
    /// `similarity * vector_weight`, in `[0, vector_weight]`.
    pub vector_score: f32,
    /// `match_score * (1 - vector_weight)`, in `[0, 1 - vector_weight]`.
    pub keyword_score: f32,
    pub final_score: f32,
    pub matched_keywords: Vec<String>,
    pub text: String,
    pub metadata: Metadata,
}

/// Merge vector and keyword candidates into one list, best first.
///
/// `vector_weight` must already be validated to `[0, 1]`. Similarities are
/// clamped to `[0, 1]` before weighting so negative cosine scores never
/// produce a negative component. A candidate seen by only one source has
/// the other component at exactly zero. If an id repeats within one source,
/// its later entry replaces the earlier component.
pub fn fuse(
    vector_results: Vec<VectorMatch>,
    keyword_results: Vec<KeywordMatch>,
    vector_weight: f32,
) -> Vec<HybridMatch> {
    let keyword_weight = 1.0 - vector_weight;
    let mut slots: HashMap<u64, usize> = HashMap::new();
    let mut merged: Vec<HybridMatch> =
        Vec::with_capacity(vector_results.len() + keyword_results.len());

    for hit in vector_results {
        let vector_score = hit.similarity.clamp(0.0, 1.0) * vector_weight;
        match slots.get(&hit.vector_id) {
            Some(&slot) => merged[slot].vector_score = vector_score,
            None => {
                slots.insert(hit.vector_id, merged.len());
                merged.push(HybridMatch {
                    vector_id: hit.vector_id,
                    vector_score,
                    keyword_score: 0.0,
                    final_score: 0.0,
                    matched_keywords: Vec::new(),
                    text: hit.text,
                    metadata: hit.metadata,
                });
            }
        }
    }

    for hit in keyword_results {
        let keyword_score = hit.match_score.clamp(0.0, 1.0) * keyword_weight;
        match slots.get(&hit.vector_id) {
            Some(&slot) => {
                let entry = &mut merged[slot];
                entry.keyword_score = keyword_score;
                entry.matched_keywords = hit.matched_keywords;
            }
            None => {
                slots.insert(hit.vector_id, merged.len());
                merged.push(HybridMatch {
                    vector_id: hit.vector_id,
                    vector_score: 0.0,
                    keyword_score,
                    final_score: 0.0,
                    matched_keywords: hit.matched_keywords,
                    text: hit.text,
                    metadata: hit.metadata,
                });
            }
        }
    }

    for entry in &mut merged {
        entry.final_score = entry.vector_score + entry.keyword_score;
    }
    merged.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
    merged
}

/// A ranked hit from any search mode, carrying the score its mode defines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Hit {
    Vector(VectorMatch),
    Keyword(KeywordMatch),
    Hybrid(HybridMatch),
}

impl Hit {
    /// The ranking score: similarity, match score or final score.
    pub fn score(&self) -> f32 {
        match self {
            Self::Vector(m) => m.similarity,
            Self::Keyword(m) => m.match_score,
            Self::Hybrid(m) => m.final_score,
        }
    }

    pub fn vector_id(&self) -> u64 {
        match self {
            Self::Vector(m) => m.vector_id,
            Self::Keyword(m) => m.vector_id,
            Self::Hybrid(m) => m.vector_id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Vector(m) => &m.text,
            Self::Keyword(m) => &m.text,
            Self::Hybrid(m) => &m.text,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Self::Vector(m) => &m.metadata,
            Self::Keyword(m) => &m.metadata,
            Self::Hybrid(m) => &m.metadata,
        }
    }

    pub fn matched_keywords(&self) -> &[String] {
        match self {
            Self::Vector(_) => &[],
            Self::Keyword(m) => &m.matched_keywords,
            Self::Hybrid(m) => &m.matched_keywords,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn vm(id: u64, similarity: f32) -> VectorMatch {
        VectorMatch {
            vector_id: id,
            similarity,
            text: format!("doc {id}"),
            metadata: Metadata::new(),
        }
    }

    fn km(id: u64, score: f32) -> KeywordMatch {
        KeywordMatch {
            vector_id: id,
            match_score: score,
            matched_keywords: vec!["kw".to_string()],
            text: format!("doc {id}"),
            metadata: Metadata::new(),
        }
    }

    fn order(fused: &[HybridMatch]) -> Vec<u64> {
        fused.iter().map(|m| m.vector_id).collect()
    }

    #[test]
    fn weighted_fusion_example() {
        let fused = fuse(vec![vm(1, 0.9)], vec![km(1, 0.5), km(2, 1.0)], 0.7);
        assert_eq!(order(&fused), vec![1, 2]);
        assert!((fused[0].final_score - 0.78).abs() < 1e-6);
        assert!((fused[0].vector_score - 0.63).abs() < 1e-6);
        assert!((fused[0].keyword_score - 0.15).abs() < 1e-6);
        assert_eq!(fused[0].matched_keywords, vec!["kw".to_string()]);
        assert!((fused[1].final_score - 0.3).abs() < 1e-6);
        assert_eq!(fused[1].vector_score, 0.0);
    }

    #[test]
    fn single_source_inputs() {
        let fused = fuse(vec![], vec![km(3, 0.5), km(4, 1.0)], 0.5);
        assert_eq!(order(&fused), vec![4, 3]);

        let fused = fuse(vec![vm(7, 0.2), vm(8, 0.6)], vec![], 0.5);
        assert_eq!(order(&fused), vec![8, 7]);
        assert!(fused.iter().all(|m| m.keyword_score == 0.0));

        assert!(fuse(vec![], vec![], 0.5).is_empty());
    }

    #[test]
    fn negative_similarity_contributes_nothing() {
        let fused = fuse(vec![vm(1, -0.4)], vec![], 0.7);
        assert_eq!(fused[0].vector_score, 0.0);
        assert_eq!(fused[0].final_score, 0.0);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let fused = fuse(vec![vm(5, 0.5), vm(2, 0.5)], vec![km(9, 0.5)], 0.5);
        assert_eq!(order(&fused), vec![5, 2, 9]);
    }

    #[test]
    fn hit_scores_by_variant() {
        assert_eq!(Hit::Vector(vm(1, 0.4)).score(), 0.4);
        assert_eq!(Hit::Keyword(km(1, 0.5)).score(), 0.5);
        let hybrid = fuse(vec![vm(1, 1.0)], vec![km(1, 1.0)], 0.5).remove(0);
        assert_eq!(Hit::Hybrid(hybrid).score(), 1.0);
        assert!(Hit::Vector(vm(1, 0.4)).matched_keywords().is_empty());
    }

    #[test]
    fn hit_serializes_with_kind_tag() {
        let json = serde_json::to_value(Hit::Keyword(km(3, 1.0))).unwrap();
        assert_eq!(json["kind"], "keyword");
        assert_eq!(json["vector_id"], 3);
    }

    fn arb_vector() -> impl Strategy<Value = Vec<VectorMatch>> {
        proptest::collection::vec((0u64..20, -1.0f32..=1.0), 0..12)
            .prop_map(|v| v.into_iter().map(|(id, s)| vm(id, s)).collect())
    }

    fn arb_keyword() -> impl Strategy<Value = Vec<KeywordMatch>> {
        proptest::collection::vec((0u64..20, 0.0f32..=1.0), 0..12)
            .prop_map(|v| v.into_iter().map(|(id, s)| km(id, s)).collect())
    }

    fn distinct_by_id<T>(items: Vec<T>, id: impl Fn(&T) -> u64) -> Vec<T> {
        let mut seen = std::collections::HashSet::new();
        items.into_iter().filter(|i| seen.insert(id(i))).collect()
    }

    fn arb_distinct_vector() -> impl Strategy<Value = Vec<VectorMatch>> {
        arb_vector().prop_map(|v| distinct_by_id(v, |m| m.vector_id))
    }

    fn arb_distinct_keyword() -> impl Strategy<Value = Vec<KeywordMatch>> {
        arb_keyword().prop_map(|k| distinct_by_id(k, |m| m.vector_id))
    }

    proptest! {
        #[test]
        fn components_are_bounded_and_sum(
            vectors in arb_vector(),
            keywords in arb_keyword(),
            weight in 0.0f32..=1.0,
        ) {
            let fused = fuse(vectors, keywords, weight);
            for m in &fused {
                prop_assert!(m.vector_score >= 0.0);
                prop_assert!(m.keyword_score >= 0.0);
                prop_assert!(m.vector_score <= weight + 1e-6);
                prop_assert!(m.keyword_score <= 1.0 - weight + 1e-6);
                let sum = m.vector_score + m.keyword_score;
                prop_assert_eq!(m.final_score, sum);
            }
            for pair in fused.windows(2) {
                prop_assert!(pair[0].final_score >= pair[1].final_score);
            }
        }

        #[test]
        fn full_vector_weight_reproduces_vector_order(
            vectors in arb_distinct_vector(),
        ) {
            let mut expected: Vec<VectorMatch> = vectors
                .iter()
                .cloned()
                .map(|mut m| {
                    // `+ 0.0` folds -0.0 the same way final_score does.
                    m.similarity = m.similarity.clamp(0.0, 1.0) + 0.0;
                    m
                })
                .collect();
            expected.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

            let fused = fuse(vectors, vec![], 1.0);
            let got: Vec<u64> = fused.iter().map(|m| m.vector_id).collect();
            let want: Vec<u64> = expected.iter().map(|m| m.vector_id).collect();
            prop_assert_eq!(got, want);
        }

        #[test]
        fn zero_vector_weight_reproduces_keyword_order(
            vectors in arb_distinct_vector(),
            keywords in arb_distinct_keyword(),
        ) {
            let fused = fuse(vectors, keywords.clone(), 0.0);
            let ranked: Vec<u64> = fused
                .iter()
                .filter(|m| m.final_score > 0.0)
                .map(|m| m.vector_id)
                .collect();

            let mut expected: Vec<&KeywordMatch> =
                keywords.iter().filter(|k| k.match_score > 0.0).collect();
            expected.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));
            let expected_scores: Vec<f32> =
                expected.iter().map(|k| k.match_score).collect();
            let got_scores: Vec<f32> = fused
                .iter()
                .filter(|m| m.final_score > 0.0)
                .map(|m| m.final_score)
                .collect();
            prop_assert_eq!(ranked.len(), expected.len());
            prop_assert_eq!(got_scores, expected_scores);
        }
    }
}
