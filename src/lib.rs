//! docspan - hybrid vector and keyword passage retrieval with keyword-focused
//! excerpts.
//!
//! docspan keeps a corpus of short passages with an exact (flat) vector index
//! beside them. A search fuses vector similarity with keyword matching, cuts
//! a window of context around the keywords in each hit, and reports how many
//! of the keywords that window still contains. For rendered pages it also
//! turns keyword occurrences into deduplicated highlight boxes.
//!
//! # Quick start
//!
//! ```no_run
//! use docspan::{Corpus, HashingEmbedder, IndexKind, SearchContext, SearchStats};
//! use docspan::embedding::{Embedder, DEFAULT_DIMENSION};
//! use docspan::search::{self, SearchMode, SearchRequest};
//!
//! let embedder = HashingEmbedder::default();
//! let texts = vec!["도로의 설계속도는 안전성을 고려한다.".to_string()];
//! let embeddings = embedder.encode_batch(&texts).unwrap();
//!
//! let mut corpus = Corpus::new(DEFAULT_DIMENSION, IndexKind::Cosine).unwrap();
//! corpus.add_documents(&embeddings, vec![Default::default()], texts).unwrap();
//!
//! let mut ctx = SearchContext::with_corpus(corpus, SearchStats::default())
//!     .with_embedder(Box::new(embedder));
//! let mut request = SearchRequest::new("설계속도");
//! request.mode = SearchMode::Hybrid;
//!
//! let response = search::execute_search(&mut ctx, &request).unwrap();
//! for r in &response.results {
//!     println!("#{} {:.3} {}", r.hit.vector_id(), r.score, r.excerpt);
//! }
//! ```

pub mod cli;
pub mod config_db;
pub mod corpus;
pub mod corpus_db;
pub mod coverage;
pub mod data_dir;
pub mod document;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod highlight;
pub mod index;
pub mod ingestion;
pub mod mcp;
pub mod providers;
pub mod search;
pub mod text_util;
pub mod window;

pub use config_db::ConfigDb;
pub use corpus::{Corpus, SearchStats};
pub use corpus_db::CorpusDb;
pub use data_dir::DataDir;
pub use embedding::HashingEmbedder;
pub use error::{Error, Result};
pub use index::{FlatIndex, IndexKind};
pub use search::SearchContext;
