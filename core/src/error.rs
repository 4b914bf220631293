use thiserror::Error;

/// Errors raised by the chunker, codec, segmenter and key-exchange
/// primitives. Configuration/precondition violations are fatal at
/// startup; integrity violations abort the current decode; all other
/// kinds propagate to the pipeline stage that triggered them, per the
/// error handling design (no retry on the client).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("distribution submatrix is not invertible for share ids {0:?}")]
    NonInvertible(Vec<usize>),

    #[error("secret of size {secret_size} exceeds the aligned buffer capacity {capacity}")]
    SecretTooLarge { secret_size: usize, capacity: usize },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("internal error: {0}")]
    Internal(String),
}
