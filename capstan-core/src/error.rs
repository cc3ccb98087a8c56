//! Error types for Capstan.
//!
//! One enum covers the whole workspace, split along the lines the sync
//! engine cares about: retryable upstream trouble, fatal malformation,
//! persistence failures, and caller mistakes surfaced by the query API.

use thiserror::Error;

/// Result type for Capstan operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Capstan.
#[derive(Debug, Error)]
pub enum Error {
    /// An upstream RPC call timed out. Retryable.
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// An upstream RPC call failed. Retryable with backoff.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Upstream returned data we cannot interpret. Fatal for the block
    /// being processed; the tick aborts and the block is retried.
    #[error("malformed upstream data: {0}")]
    UpstreamMalformed(String),

    /// A persistence operation failed. The current tick aborts.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// An internal invariant was violated. Programmer bug.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// The requested item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller's request is inconsistent or incomplete.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the operation may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::UpstreamTimeout(_) | Error::Upstream(_) | Error::Persistence(_)
        )
    }

    /// Whether this error is the caller's fault (4xx equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::BadRequest(_) | Error::NotFound(_))
    }

    /// Create an `Upstream` error from any displayable source.
    pub fn upstream(e: impl std::fmt::Display) -> Self {
        Error::Upstream(e.to_string())
    }

    /// Create a `Persistence` error from any displayable source.
    pub fn persistence(e: impl std::fmt::Display) -> Self {
        Error::Persistence(e.to_string())
    }

    /// Create an `Invariant` error.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::Invariant(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::UpstreamTimeout("t".into()).is_retryable());
        assert!(Error::Upstream("u".into()).is_retryable());
        assert!(Error::Persistence("p".into()).is_retryable());
        assert!(!Error::UpstreamMalformed("m".into()).is_retryable());
        assert!(!Error::Invariant("i".into()).is_retryable());
        assert!(!Error::BadRequest("b".into()).is_retryable());
    }

    #[test]
    fn test_client_error_classification() {
        assert!(Error::BadRequest("b".into()).is_client_error());
        assert!(Error::NotFound("n".into()).is_client_error());
        assert!(!Error::Persistence("p".into()).is_client_error());
    }

    #[test]
    fn test_display() {
        let e = Error::upstream("connection refused");
        assert_eq!(e.to_string(), "upstream error: connection refused");
    }
}
