use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    /// No query text or keywords were supplied.
    #[error("empty input: a query or at least one keyword is required")]
    EmptyInput,

    /// A collaborator (corpus, embedder) has not been initialized yet.
    #[error("service not ready: {0} is not initialized")]
    IndexUnready(&'static str),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "input length mismatch: {embeddings} embeddings, {metadatas} metadata entries, {documents} documents"
    )]
    LengthMismatch {
        embeddings: usize,
        metadatas: usize,
        documents: usize,
    },

    #[error("{name} = {value} is out of range (expected {range})")]
    OutOfRange {
        name: &'static str,
        value: String,
        range: &'static str,
    },

    #[error("tensor computation error: {0}")]
    Tensor(String),
}

impl Error {
    /// Build an [`Error::OutOfRange`] from any displayable value.
    pub fn out_of_range(
        name: &'static str,
        value: impl std::fmt::Display,
        range: &'static str,
    ) -> Self {
        Self::OutOfRange {
            name,
            value: value.to_string(),
            range,
        }
    }

    /// Whether this error means a collaborator is not ready yet, as opposed
    /// to a bad request or an internal failure.
    pub fn is_unready(&self) -> bool {
        matches!(self, Self::IndexUnready(_))
    }
}

impl From<candle_core::Error> for Error {
    fn from(e: candle_core::Error) -> Self {
        Self::Tensor(e.to_string())
    }
}
