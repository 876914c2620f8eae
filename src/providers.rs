use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    corpus::Corpus,
    document::{IndexedDocument, Metadata},
    error::Result,
    index::NearestNeighbors,
    text_util::{Matching, fold_str},
};

/// One hit from the nearest-neighbour index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub vector_id: u64,
    pub similarity: f32,
    pub text: String,
    pub metadata: Metadata,
}

/// One hit from the literal keyword scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordMatch {
    pub vector_id: u64,
    /// `matched / total` keywords, in `[0, 1]`.
    pub match_score: f32,
    /// Keywords found in the passage, as the caller spelled them.
    pub matched_keywords: Vec<String>,
    pub text: String,
    pub metadata: Metadata,
}

/// How many keywords a passage must contain to count as a keyword hit.
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
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Every keyword must occur; the score is always 1.0.
    All,
    /// At least one keyword must occur; the score is the matched fraction.
    #[default]
    Any,
}

/// Query the corpus index and attach passage text and metadata.
///
/// `k` is clamped to the corpus size. Hits below `min_similarity` are
/// dropped, so fewer than `k` matches may come back.
pub fn vector_search(
    corpus: &Corpus,
    embedding: &[f32],
    k: usize,
    min_similarity: f32,
) -> Result<Vec<VectorMatch>> {
    if corpus.is_empty() {
        tracing::warn!("vector search on an empty corpus");
        return Ok(Vec::new());
    }

    let k = k.min(corpus.len());
    let hits = corpus.index().query(embedding, k)?;

    Ok(hits
        .into_iter()
        .filter(|(_, similarity)| *similarity >= min_similarity)
        .filter_map(|(vector_id, similarity)| {
            corpus.get(vector_id).map(|doc| VectorMatch {
                vector_id,
                similarity,
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
            })
        })
        .collect())
}

/// Case-insensitive substring scan of every passage.
///
/// Results are ordered by score, highest first; equal scores keep corpus
/// order. Empty keywords are ignored, and an empty keyword list matches
/// nothing.
pub fn keyword_search(
    documents: &[IndexedDocument],
    keywords: &[String],
    policy: MatchPolicy,
    k: usize,
) -> Vec<KeywordMatch> {
    let keywords: Vec<&String> =
        keywords.iter().filter(|k| !k.is_empty()).collect();
    if keywords.is_empty() || k == 0 {
        return Vec::new();
    }

    let folded: Vec<String> = keywords
        .iter()
        .map(|k| fold_str(k, Matching::CaseInsensitive))
        .collect();
    let total = keywords.len() as f32;

    let mut matches: Vec<KeywordMatch> = documents
        .par_iter()
        .filter_map(|doc| {
            let text = fold_str(&doc.text, Matching::CaseInsensitive);
            let matched_keywords: Vec<String> = keywords
                .iter()
                .zip(&folded)
                .filter(|(_, f)| text.contains(f.as_str()))
                .map(|(k, _)| (*k).clone())
                .collect();

            let found = matched_keywords.len();
            let match_score = match policy {
                MatchPolicy::All if found == keywords.len() => 1.0,
                MatchPolicy::All => return None,
                MatchPolicy::Any if found == 0 => return None,
                MatchPolicy::Any => found as f32 / total,
            };

            Some(KeywordMatch {
                vector_id: doc.vector_id,
                match_score,
                matched_keywords,
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
            })
        })
        .collect();

    // par_iter().collect() preserves corpus order, and the sort is stable.
    matches.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));
    matches.truncate(k);
    matches
}
