//! Classified error kinds.
//!
//! Most functions return `anyhow::Result`; the kinds below are wrapped
//! inside `anyhow::Error` where a caller needs to react differently to
//! them (retry at finer granularity, rebuild, abort, surface to the user).
//! Use [`classify`] or the `is_*` helpers to recover the kind.

use thiserror::Error;

/// Error kinds the pipeline and the retrieval engine branch on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShelfError {
    /// A readme or AI request failed after retries.
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    /// An external service answered with something we could not parse.
    #[error("malformed response: {0}")]
    Parse(String),
    /// A persisted index snapshot was written by a different engine version.
    #[error("index snapshot version mismatch: expected {expected}, found {found}")]
    IndexVersionMismatch { expected: String, found: String },
    /// Credentials are missing or were rejected.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// An internal invariant was broken. Always a bug.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// The single-flight guard rejected a second enrichment run.
    #[error("an enrichment run is already in progress")]
    EnrichmentInProgress,
    /// A backup bundle does not carry the exact supported version.
    #[error("unsupported backup version: expected {expected}, found {found}")]
    BackupVersion { expected: u32, found: u32 },
}

/// Extract the [`ShelfError`] kind from an `anyhow::Error` chain, if any.
pub fn classify(err: &anyhow::Error) -> Option<&ShelfError> {
    err.chain().find_map(|e| e.downcast_ref::<ShelfError>())
}

pub fn is_auth_error(err: &anyhow::Error) -> bool {
    matches!(classify(err), Some(ShelfError::Auth(_)))
}

pub fn is_version_mismatch(err: &anyhow::Error) -> bool {
    matches!(classify(err), Some(ShelfError::IndexVersionMismatch { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn classify_through_context() {
        let err: anyhow::Result<()> = Err(ShelfError::Auth("no token".into()).into());
        let err = err.context("fetching readme").unwrap_err();
        assert!(is_auth_error(&err));
        assert!(!is_version_mismatch(&err));
    }

    #[test]
    fn plain_errors_are_unclassified() {
        let err = anyhow::anyhow!("boom");
        assert!(classify(&err).is_none());
    }
}
