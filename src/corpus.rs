use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    document::{ADDED_AT_KEY, IndexedDocument, Metadata, VECTOR_ID_KEY},
    error::{Error, Result},
    index::{FlatIndex, IndexKind, NearestNeighbors},
};

/// Append-only passage store paired with its nearest-neighbour index.
///
/// Document `i` and index row `i` always describe the same passage.
#[derive(Debug, Clone)]
pub struct Corpus {
    documents: Vec<IndexedDocument>,
    index: FlatIndex,
}

impl Corpus {
    pub fn new(dimension: usize, kind: IndexKind) -> Result<Self> {
        Ok(Self {
            documents: Vec::new(),
            index: FlatIndex::new(dimension, kind)?,
        })
    }

    /// Rebuild a corpus from persisted parts.
    pub fn from_parts(
        index: FlatIndex,
        documents: Vec<IndexedDocument>,
    ) -> Result<Self> {
        if index.len() != documents.len() {
            return Err(Error::LengthMismatch {
                embeddings: index.len(),
                metadatas: documents.len(),
                documents: documents.len(),
            });
        }
        if let Some(doc) = documents
            .iter()
            .enumerate()
            .find(|(i, d)| d.vector_id != *i as u64)
            .map(|(_, d)| d)
        {
            return Err(Error::Config(format!(
                "corpus document ids are not sequential at vector_id {}",
                doc.vector_id
            )));
        }
        Ok(Self { documents, index })
    }

    /// Append passages and return the range of `vector_id`s they received.
    ///
    /// All three inputs must have the same length and every embedding must
    /// match the index dimension; nothing is stored otherwise. Each stored
    /// passage's metadata gains `vector_id` and `added_at` entries.
    pub fn add_documents(
        &mut self,
        embeddings: &[Vec<f32>],
        metadatas: Vec<Metadata>,
        texts: Vec<String>,
    ) -> Result<Range<u64>> {
        if embeddings.len() != metadatas.len()
            || embeddings.len() != texts.len()
        {
            return Err(Error::LengthMismatch {
                embeddings: embeddings.len(),
                metadatas: metadatas.len(),
                documents: texts.len(),
            });
        }

        let start = self.documents.len() as u64;
        self.index.add(embeddings)?;

        let added_at = Utc::now().to_rfc3339();
        for (offset, (mut metadata, text)) in
            metadatas.into_iter().zip(texts).enumerate()
        {
            let vector_id = start + offset as u64;
            metadata.insert(VECTOR_ID_KEY.to_string(), vector_id.into());
            metadata.insert(ADDED_AT_KEY.to_string(), added_at.clone().into());
            self.documents.push(IndexedDocument {
                vector_id,
                text,
                metadata,
            });
        }

        let end = self.documents.len() as u64;
        tracing::info!(added = end - start, total = end, "added documents");
        Ok(start..end)
    }

    pub fn get(&self, vector_id: u64) -> Option<&IndexedDocument> {
        usize::try_from(vector_id)
            .ok()
            .and_then(|i| self.documents.get(i))
    }

    pub fn documents(&self) -> &[IndexedDocument] {
        &self.documents
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn kind(&self) -> IndexKind {
        self.index.kind()
    }

    pub fn stats(&self, searches: &SearchStats) -> CorpusStats {
        CorpusStats {
            total_documents: self.len(),
            dimension: self.dimension(),
            index_kind: self.kind(),
            total_searches: searches.total_searches,
            last_search: searches.last_search,
        }
    }
}

/// Search telemetry kept alongside a corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub total_searches: u64,
    pub last_search: Option<DateTime<Utc>>,
}

impl SearchStats {
    pub fn record(&mut self) {
        self.total_searches += 1;
        self.last_search = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CorpusStats {
    pub total_documents: usize,
    pub dimension: usize,
    #[schemars(with = "String")]
    pub index_kind: IndexKind,
    pub total_searches: u64,
    #[schemars(with = "Option<String>")]
    pub last_search: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn meta(category: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert("category".to_string(), json!(category));
        m
    }

    #[test]
    fn assigns_sequential_ids() {
        let mut corpus = Corpus::new(2, IndexKind::Cosine).unwrap();
        let first = corpus
            .add_documents(
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                vec![meta("a"), meta("b")],
                vec!["one".into(), "two".into()],
            )
            .unwrap();
        assert_eq!(first, 0..2);

        let second = corpus
            .add_documents(
                &[vec![1.0, 1.0]],
                vec![meta("c")],
                vec!["three".into()],
            )
            .unwrap();
        assert_eq!(second, 2..3);

        let doc = corpus.get(2).unwrap();
        assert_eq!(doc.vector_id, 2);
        assert_eq!(doc.text, "three");
        assert_eq!(doc.metadata[VECTOR_ID_KEY], json!(2));
        assert!(doc.metadata.contains_key(ADDED_AT_KEY));
        assert_eq!(doc.metadata["category"], json!("c"));
        assert_eq!(corpus.index().len(), 3);
    }

    #[test]
    fn length_mismatch_stores_nothing() {
        let mut corpus = Corpus::new(2, IndexKind::Cosine).unwrap();
        let err = corpus
            .add_documents(&[vec![1.0, 0.0]], vec![], vec!["x".into()])
            .unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { metadatas: 0, .. }));
        assert!(corpus.is_empty());
    }

    #[test]
    fn dimension_mismatch_stores_nothing() {
        let mut corpus = Corpus::new(2, IndexKind::L2).unwrap();
        let err = corpus
            .add_documents(
                &[vec![1.0, 0.0], vec![1.0, 0.0, 0.0]],
                vec![meta("a"), meta("b")],
                vec!["a".into(), "b".into()],
            )
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { actual: 3, .. }));
        assert!(corpus.is_empty());
        assert!(corpus.index().is_empty());
    }

    #[test]
    fn stats_reflect_corpus_and_searches() {
        let mut corpus = Corpus::new(2, IndexKind::InnerProduct).unwrap();
        corpus
            .add_documents(&[vec![1.0, 0.0]], vec![meta("a")], vec!["a".into()])
            .unwrap();
        let mut searches = SearchStats::default();
        searches.record();
        searches.record();

        let stats = corpus.stats(&searches);
        assert_eq!(stats.total_documents, 1);
        assert_eq!(stats.dimension, 2);
        assert_eq!(stats.index_kind, IndexKind::InnerProduct);
        assert_eq!(stats.total_searches, 2);
        assert!(stats.last_search.is_some());
    }

    #[test]
    fn from_parts_checks_alignment() {
        let mut index = FlatIndex::new(2, IndexKind::Cosine).unwrap();
        index.add(&[vec![1.0, 0.0]]).unwrap();
        assert!(Corpus::from_parts(index.clone(), vec![]).is_err());

        let doc = IndexedDocument {
            vector_id: 5,
            text: "x".into(),
            metadata: Metadata::new(),
        };
        assert!(Corpus::from_parts(index, vec![doc]).is_err());
    }

    #[test]
    fn get_out_of_range_is_none() {
        let corpus = Corpus::new(2, IndexKind::Cosine).unwrap();
        assert!(corpus.get(0).is_none());
        assert!(corpus.get(u64::MAX).is_none());
    }
}
