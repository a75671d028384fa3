//! Explorer error taxonomy
//!
//! Gateway failures are wrapped at the operation boundary according to what
//! the caller was doing, so the UI layer can tell a failed listing from a
//! failed mutation without inspecting transport details.

use thiserror::Error;

use crate::gateway::StorageError;

#[derive(Error, Debug)]
pub enum ExplorerError {
    /// A listing or tree fetch failed
    #[error("Listing failed: {0}")]
    Listing(#[source] StorageError),

    /// Create, delete, upload or tag failed
    #[error("Operation failed: {0}")]
    Mutation(#[source] StorageError),

    /// Download, signed link or tag read failed
    #[error("Retrieval failed: {0}")]
    Retrieval(#[source] StorageError),

    /// The user cancelled a download or upload
    #[error("Transfer aborted")]
    TransferAborted,

    /// Rejected before any network call
    #[error("{0}")]
    Validation(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExplorerError {
    /// True for user cancellations, which are a normal terminal state
    pub fn is_abort(&self) -> bool {
        matches!(self, ExplorerError::TransferAborted)
    }

    /// Underlying gateway error, if any
    pub fn storage_error(&self) -> Option<&StorageError> {
        match self {
            ExplorerError::Listing(e) | ExplorerError::Mutation(e) | ExplorerError::Retrieval(e) => {
                Some(e)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_wraps_storage_message() {
        let err = ExplorerError::Listing(StorageError::NotFound("docs/".into()));
        assert_eq!(err.to_string(), "Listing failed: Not found: docs/");
        assert!(err.storage_error().is_some());
        assert!(!err.is_abort());
    }

    #[test]
    fn test_abort_and_validation() {
        assert!(ExplorerError::TransferAborted.is_abort());
        let err = ExplorerError::Validation("Folder name cannot be empty".into());
        assert_eq!(err.to_string(), "Folder name cannot be empty");
        assert!(err.storage_error().is_none());
    }
}
