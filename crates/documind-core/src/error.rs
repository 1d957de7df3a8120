//! Error taxonomy for the retrieval pipeline.
//!
//! Every failure a caller can observe is an [`Error`] variant with a stable
//! [`kind`](Error::kind) name and a human-readable message. Index
//! corruption is not an error: it is recovered and logged, never raised.

use thiserror::Error;

/// Main error type for DocuMind operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The file kind has no extractor.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The payload could not be read. Non-fatal to a batch.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Invalid split parameters or an internal boundary violation.
    #[error("chunking failed: {0}")]
    Chunking(String),

    /// Embedding backend unreachable or input rejected.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Vector index I/O failure.
    #[error("index error: {0}")]
    Index(String),

    /// Generation backend could not be reached before generation started.
    #[error("generation backend unavailable: {0}")]
    BridgeUnavailable(String),

    /// No response from the generation backend within the bound.
    #[error("generation timed out after {0}s")]
    GenerationTimeout(u64),

    /// Malformed or backend-reported generation failure.
    #[error("generation failed: {0}")]
    Generation(String),

    /// An orchestrator stage exceeded its bound.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    /// The caller cancelled the query between stages.
    #[error("query cancelled")]
    Cancelled,
}

impl Error {
    /// Stable snake_case name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::Extraction(_) => "extraction",
            Error::Chunking(_) => "chunking",
            Error::Embedding(_) => "embedding",
            Error::Index(_) => "index",
            Error::BridgeUnavailable(_) => "bridge_unavailable",
            Error::GenerationTimeout(_) => "generation_timeout",
            Error::Generation(_) => "generation",
            Error::Timeout { .. } => "timeout",
            Error::Cancelled => "cancelled",
        }
    }
}

/// Result type alias for DocuMind operations.
pub type Result<T> = std::result::Result<T, Error>;
