use std::path::Path;

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};

use crate::{
    corpus::{Corpus, SearchStats},
    data_dir::DataDir,
    document::IndexedDocument,
    embedding::HashingEmbedder,
    error::{Error, Result},
    index::{FlatIndex, IndexKind},
    search::SearchContext,
};

/// vector_id → JSON-encoded [`IndexedDocument`].
const DOCUMENTS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("documents");

/// vector_id → index row as `dimension` little-endian f32 values.
const EMBEDDINGS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("embeddings");

/// Corpus-wide facts: dimension, index kind, search stats.
const INFO: TableDefinition<&str, &str> = TableDefinition::new("info");

const DIMENSION_KEY: &str = "dimension";
const INDEX_KIND_KEY: &str = "index_kind";
const STATS_KEY: &str = "search_stats";

/// On-disk copy of one named corpus.
///
/// The corpus is append-only, so saving writes only the passages that are
/// not on disk yet.
pub struct CorpusDb {
    db: Database,
}

impl CorpusDb {
    /// Open or create a corpus database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(EMBEDDINGS)?;
        txn.open_table(INFO)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Persist `corpus` and its search stats in one transaction.
    pub fn save(&self, corpus: &Corpus, stats: &SearchStats) -> Result<()> {
        let dimension = corpus.dimension();
        let kind = corpus.kind();

        let txn = self.db.begin_write()?;
        {
            let mut info = txn.open_table(INFO)?;
            match read_shape(&info)? {
                Some((stored_dim, stored_kind))
                    if stored_dim != dimension || stored_kind != kind =>
                {
                    return Err(Error::Config(format!(
                        "stored corpus is {stored_kind}/{stored_dim}, not {kind}/{dimension}"
                    )));
                }
                _ => {}
            }

            let mut documents = txn.open_table(DOCUMENTS)?;
            let mut embeddings = txn.open_table(EMBEDDINGS)?;
            let on_disk = documents.len()? as usize;
            if on_disk > corpus.len() {
                return Err(Error::Config(format!(
                    "stored corpus has {on_disk} passages, more than the {} being saved",
                    corpus.len()
                )));
            }

            for doc in &corpus.documents()[on_disk..] {
                let json = serde_json::to_vec(doc)?;
                documents.insert(doc.vector_id, json.as_slice())?;

                let row = corpus.index().vector(doc.vector_id).ok_or_else(|| {
                    Error::NotFound {
                        kind: "index row",
                        name: doc.vector_id.to_string(),
                    }
                })?;
                let byte_len = std::mem::size_of_val(row);
                let mut guard =
                    embeddings.insert_reserve(doc.vector_id, byte_len)?;
                guard.as_mut().copy_from_slice(bytemuck::cast_slice(row));
            }

            info.insert(DIMENSION_KEY, dimension.to_string().as_str())?;
            info.insert(INDEX_KIND_KEY, kind.as_str())?;
            let stats_json = serde_json::to_string(stats)?;
            info.insert(STATS_KEY, stats_json.as_str())?;

            tracing::debug!(
                written = corpus.len() - on_disk,
                total = corpus.len(),
                "saved corpus"
            );
        }
        txn.commit()?;
        Ok(())
    }

    /// Update only the search stats.
    pub fn save_stats(&self, stats: &SearchStats) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut info = txn.open_table(INFO)?;
            let stats_json = serde_json::to_string(stats)?;
            info.insert(STATS_KEY, stats_json.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Load the stored corpus, or `None` if nothing was ever saved here.
    pub fn load(&self) -> Result<Option<(Corpus, SearchStats)>> {
        let txn = self.db.begin_read()?;
        let info = txn.open_table(INFO)?;
        let Some((dimension, kind)) = read_shape(&info)? else {
            return Ok(None);
        };

        let stats = match info.get(STATS_KEY)? {
            Some(guard) => serde_json::from_str(guard.value())?,
            None => SearchStats::default(),
        };

        let documents_table = txn.open_table(DOCUMENTS)?;
        let mut documents = Vec::with_capacity(documents_table.len()? as usize);
        for entry in documents_table.iter()? {
            let (_, value) = entry?;
            let doc: IndexedDocument = serde_json::from_slice(value.value())?;
            documents.push(doc);
        }

        let embeddings_table = txn.open_table(EMBEDDINGS)?;
        let mut rows = Vec::with_capacity(documents.len() * dimension);
        for entry in embeddings_table.iter()? {
            let (key, value) = entry?;
            let bytes = value.value();
            if bytes.len() != dimension * 4 {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: bytes.len() / 4,
                });
            }
            // Stored bytes carry no alignment guarantee, so decode per value.
            rows.extend(
                bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
            tracing::trace!(vector_id = key.value(), "loaded index row");
        }

        let index = FlatIndex::from_rows(dimension, kind, rows)?;
        let corpus = Corpus::from_parts(index, documents)?;
        Ok(Some((corpus, stats)))
    }
}

impl std::fmt::Debug for CorpusDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorpusDb").finish_non_exhaustive()
    }
}

/// Open corpus `name` and build a search context over it.
///
/// The embedder is a [`HashingEmbedder`] sized to the corpus. A corpus that
/// was never saved gives an empty context and no database, so searches
/// report it as not ready instead of returning nothing.
pub fn open_context(
    data_dir: &DataDir,
    name: &str,
) -> Result<(SearchContext, Option<CorpusDb>)> {
    let path = data_dir.corpus_db(name)?;
    if !path.exists() {
        tracing::warn!(corpus = name, "corpus has not been ingested yet");
        return Ok((SearchContext::new(), None));
    }

    let db = CorpusDb::open(&path)?;
    let Some((corpus, stats)) = db.load()? else {
        tracing::warn!(corpus = name, "corpus database is empty");
        return Ok((SearchContext::new(), Some(db)));
    };

    let embedder = HashingEmbedder::new(corpus.dimension())?;
    tracing::debug!(corpus = name, documents = corpus.len(), "loaded corpus");
    let ctx = SearchContext::with_corpus(corpus, stats)
        .with_embedder(Box::new(embedder));
    Ok((ctx, Some(db)))
}

fn read_shape(
    info: &impl ReadableTable<&'static str, &'static str>,
) -> Result<Option<(usize, IndexKind)>> {
    let Some(dimension) = info.get(DIMENSION_KEY)? else {
        return Ok(None);
    };
    let dimension: usize = dimension.value().parse().map_err(|_| {
        Error::Config(format!(
            "invalid stored dimension '{}'",
            dimension.value()
        ))
    })?;
    let kind: IndexKind = match info.get(INDEX_KIND_KEY)? {
        Some(kind) => kind.value().parse()?,
        None => IndexKind::default(),
    };
    Ok(Some((dimension, kind)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::Metadata;

    fn test_db() -> (tempfile::TempDir, CorpusDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = CorpusDb::open(&tmp.path().join("corpus.redb")).unwrap();
        (tmp, db)
    }

    fn sample_corpus(kind: IndexKind) -> Corpus {
        let mut corpus = Corpus::new(3, kind).unwrap();
        let mut meta = Metadata::new();
        meta.insert("category".into(), json!("도로설계요령"));
        corpus
            .add_documents(
                &[vec![3.0, 4.0, 0.0], vec![0.0, 0.0, 2.0]],
                vec![meta.clone(), meta],
                vec!["설계속도 기준".into(), "차로폭 기준".into()],
            )
            .unwrap();
        corpus
    }

    #[test]
    fn load_empty_returns_none() {
        let (_tmp, db) = test_db();
        assert!(db.load().unwrap().is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let (_tmp, db) = test_db();
        let corpus = sample_corpus(IndexKind::Cosine);
        let mut stats = SearchStats::default();
        stats.record();
        db.save(&corpus, &stats).unwrap();

        let (loaded, loaded_stats) = db.load().unwrap().unwrap();
        assert_eq!(loaded.documents(), corpus.documents());
        assert_eq!(loaded.kind(), IndexKind::Cosine);
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.index().vector(0), corpus.index().vector(0));
        assert_eq!(loaded_stats, stats);
    }

    #[test]
    fn save_appends_only_new_passages() {
        let (_tmp, db) = test_db();
        let mut corpus = sample_corpus(IndexKind::L2);
        db.save(&corpus, &SearchStats::default()).unwrap();

        corpus
            .add_documents(
                &[vec![1.0, 1.0, 1.0]],
                vec![Metadata::new()],
                vec!["배수시설".into()],
            )
            .unwrap();
        db.save(&corpus, &SearchStats::default()).unwrap();

        let (loaded, _) = db.load().unwrap().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.get(2).unwrap().text, "배수시설");
    }

    #[test]
    fn refuses_to_overwrite_different_shape() {
        let (_tmp, db) = test_db();
        db.save(&sample_corpus(IndexKind::Cosine), &SearchStats::default())
            .unwrap();
        let other = Corpus::new(3, IndexKind::L2).unwrap();
        assert!(db.save(&other, &SearchStats::default()).is_err());
    }

    #[test]
    fn save_stats_only_touches_stats() {
        let (_tmp, db) = test_db();
        db.save(&sample_corpus(IndexKind::Cosine), &SearchStats::default())
            .unwrap();

        let mut stats = SearchStats::default();
        stats.record();
        stats.record();
        db.save_stats(&stats).unwrap();

        let (loaded, loaded_stats) = db.load().unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded_stats.total_searches, 2);
    }

    #[test]
    fn open_context_handles_missing_and_saved_corpora() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();

        let (ctx, db) = open_context(&data_dir, "manuals").unwrap();
        assert!(db.is_none());
        assert!(ctx.corpus().unwrap_err().is_unready());

        let path = data_dir.corpus_db("manuals").unwrap();
        let db = CorpusDb::open(&path).unwrap();
        db.save(&sample_corpus(IndexKind::Cosine), &SearchStats::default())
            .unwrap();
        drop(db);

        let (ctx, db) = open_context(&data_dir, "manuals").unwrap();
        assert!(db.is_some());
        assert_eq!(ctx.corpus().unwrap().len(), 2);
        assert_eq!(ctx.embedder().unwrap().dimension(), 3);
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("corpus.redb");
        {
            let db = CorpusDb::open(&path).unwrap();
            let corpus = sample_corpus(IndexKind::InnerProduct);
            db.save(&corpus, &SearchStats::default()).unwrap();
        }
        let db = CorpusDb::open(&path).unwrap();
        let (loaded, _) = db.load().unwrap().unwrap();
        assert_eq!(loaded.kind(), IndexKind::InnerProduct);
        assert_eq!(loaded.index().vector(1), Some(&[0.0, 0.0, 2.0][..]));
    }
}
