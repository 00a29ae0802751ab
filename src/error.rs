use thiserror::Error;

/// Error kinds surfaced by the indexing and retrieval pipeline.
///
/// Single-source failures (`SourceRead`, `DimensionMismatch`) are local:
/// the indexer logs them and continues with the next source. Service-level
/// failures (`EmbeddingTransient`, `EmbeddingProtocol`) abort the running
/// batch. `Cancelled` is returned quietly when the abort token trips.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding request failed: {0}")]
    EmbeddingTransient(String),

    #[error("embedding response malformed: {0}")]
    EmbeddingProtocol(String),

    #[error("cannot read source {path}: {reason}")]
    SourceRead { path: String, reason: String },

    #[error("index file write failed: {0}")]
    StoreIo(String),

    #[error("vision model does not support image input")]
    VisionUnsupported,

    #[error("indexing cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// True for failures that should abort the whole batch rather than
    /// just the current source.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::EmbeddingTransient(_)
                | EngineError::EmbeddingProtocol(_)
                | EngineError::Cancelled
        )
    }
}
