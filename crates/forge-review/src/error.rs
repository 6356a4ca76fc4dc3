//! Error types for the review pipeline
//!
//! Taxonomy: data errors (missing PR URL, malformed PR URL) are fatal
//! for the current operation and not retried; race outcomes (lost
//! claims) are not errors at all; external-call failures are classified
//! by message content where possible and otherwise converted into a
//! terminal `sentinel_failed` transition by the sentinel's top-level
//! catch.

use forge_ticket::StoreError;
use std::time::Duration;

/// Errors from the verifier call contract
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    /// Verifier process could not be launched
    #[error("failed to launch verifier: {0}")]
    Spawn(std::io::Error),

    /// I/O failure talking to the verifier process
    #[error("verifier io error: {0}")]
    Io(#[from] std::io::Error),

    /// Verifier exited unsuccessfully without a parseable result
    #[error("verifier command failed: {0}")]
    CommandFailed(String),

    /// Verifier output did not match the result contract
    #[error("verifier protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}

/// Errors from the merge coordinator
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// PR URL did not match `<host>/<owner>/<repo>/pull/<number>`
    #[error("invalid PR URL: {0}")]
    InvalidPrUrl(String),

    /// External merge call exceeded its bound
    #[error("merge command timed out after {0:?}")]
    Timeout(Duration),

    /// Merge command could not be launched
    #[error("failed to launch merge command: {0}")]
    Spawn(std::io::Error),

    /// Merge command failed (and the failure was not "already merged")
    #[error("merge command failed: {0}")]
    CommandFailed(String),

    /// Recording the merged state failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors on the sentinel review execution path
///
/// All of these are caught at the top level of review execution and
/// converted into a `sentinel_failed` transition; none propagate back
/// to the dispatch loop.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    /// Store query or transition failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Verifier invocation failed
    #[error(transparent)]
    Verifier(#[from] VerifierError),

    /// Verifier result could not be serialized for the failure reason
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_error_display() {
        let err = MergeError::InvalidPrUrl("not-a-url".to_string());
        assert!(err.to_string().contains("invalid PR URL"));

        let err = MergeError::Timeout(Duration::from_secs(60));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn review_error_wraps_store_error() {
        let id = forge_ticket::TicketId::new();
        let err = ReviewError::from(StoreError::TicketNotFound(id));
        assert!(err.to_string().contains("ticket not found"));
    }
}
