use std::{
    io::BufRead,
    ops::Range,
    path::Path,
};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    corpus::Corpus,
    document::Metadata,
    embedding::Embedder,
    error::{Error, Result},
};

/// One line of a JSONL passage file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Read passages from a JSONL file.
pub fn read_passages(path: &Path) -> Result<Vec<Passage>> {
    let file = std::fs::File::open(path).map_err(|e| {
        Error::Config(format!("cannot open {}: {e}", path.display()))
    })?;
    parse_passages(
        std::io::BufReader::new(file),
        &path.display().to_string(),
    )
}

/// Parse JSONL passages. Blank lines are skipped; any other line must be a
/// `{"text": ..., "metadata": {...}}` object with non-blank text.
pub fn parse_passages(
    reader: impl BufRead,
    source: &str,
) -> Result<Vec<Passage>> {
    let mut passages = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = i + 1;
        if line.trim().is_empty() {
            continue;
        }

        let passage: Passage = serde_json::from_str(&line).map_err(|e| {
            Error::Config(format!("{source}:{line_no}: invalid passage: {e}"))
        })?;
        if passage.text.trim().is_empty() {
            return Err(Error::Config(format!(
                "{source}:{line_no}: passage text is empty"
            )));
        }
        passages.push(passage);
    }
    Ok(passages)
}

/// Embed `passages` in parallel and append them to `corpus`.
///
/// Returns the `vector_id` range assigned to the new passages.
pub fn ingest_passages(
    corpus: &mut Corpus,
    embedder: &dyn Embedder,
    passages: Vec<Passage>,
) -> Result<Range<u64>> {
    if passages.is_empty() {
        let end = corpus.len() as u64;
        return Ok(end..end);
    }
    if embedder.dimension() != corpus.dimension() {
        return Err(Error::DimensionMismatch {
            expected: corpus.dimension(),
            actual: embedder.dimension(),
        });
    }

    let embeddings: Vec<Vec<f32>> = passages
        .par_iter()
        .map(|p| embedder.encode(&p.text))
        .collect::<Result<_>>()?;

    let (texts, metadatas): (Vec<String>, Vec<Metadata>) =
        passages.into_iter().map(|p| (p.text, p.metadata)).unzip();

    tracing::info!(
        passages = texts.len(),
        model = embedder.model_name(),
        "embedded passages"
    );
    corpus.add_documents(&embeddings, metadatas, texts)
}
