//! Error taxonomy for the knowledge engine.
//!
//! Variants distinguish retryable infrastructure failures
//! ([`KnowledgeError::ProviderUnavailable`]) from contract violations
//! ([`KnowledgeError::ProviderProtocolError`]) so callers can decide
//! whether a retry is worth anything. The engine itself never retries.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KnowledgeError>;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The embedding backend could not be reached or did not answer in
    /// time. Retryable.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The embedding backend answered, but the response violates the
    /// protocol (wrong shape, wrong dimensions). Not retryable.
    #[error("embedding provider protocol error: {0}")]
    ProviderProtocolError(String),

    /// The corpus rendered zero documents.
    #[error("corpus contains no documents")]
    CorpusEmpty,

    /// Two corpus entries render to the same document id, e.g. two modules
    /// sharing a name. Lookups would resolve ambiguously, so the corpus is
    /// rejected at build time.
    #[error("corpus contains duplicate document id '{0}'")]
    DuplicateDocumentId(String),

    /// No persisted index at the configured path.
    #[error("no persisted index at {0}")]
    IndexMissing(PathBuf),

    /// A persisted index exists but no longer matches the current
    /// provider identity or corpus fingerprint.
    #[error("persisted index is stale: {0}")]
    IndexStale(String),

    /// A caller-supplied argument is out of contract, e.g. an unknown
    /// `context_type` filter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A query operation arrived while the engine is not `READY`.
    #[error("knowledge engine not initialized; call ensure_ready first")]
    NotReady,

    /// Initialization did not finish within the caller's deadline. The
    /// attempt keeps running in the background.
    #[error("initialization did not complete within {0:?}")]
    InitTimeout(Duration),

    /// Initialization failed; the reason is reported to every caller
    /// until a rebuild is forced.
    #[error("initialization failed: {0}")]
    InitFailed(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
