//! Error types for ClipForge

use thiserror::Error;

/// Core error type
///
/// Shared by every crate in the workspace. Storage failures propagate
/// unchanged from the block store up through sequences, clips and tracks.
#[derive(Error, Debug)]
pub enum CfError {
    /// A precondition or invariant was violated by the caller
    #[error("Internal inconsistency: {0}")]
    Inconsistency(String),

    /// The user cancelled a long-running operation
    #[error("Operation cancelled")]
    Cancelled,

    /// A failure the user should be told about
    #[error("{0}")]
    UserVisible(String),

    #[error("Block store error: {0}")]
    Store(String),

    #[error("Sequence is locked")]
    Locked,

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CfError {
    /// Shorthand for building an inconsistency error
    pub fn inconsistency(what: impl Into<String>) -> Self {
        Self::Inconsistency(what.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Errors the command layer reports in a message box.
    /// Never true for cancellation.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::UserVisible(_) | Self::Store(_) | Self::Io(_))
    }

    pub fn is_inconsistency(&self) -> bool {
        matches!(self, Self::Inconsistency(_))
    }
}

impl From<serde_json::Error> for CfError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias
pub type CfResult<T> = Result<T, CfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(CfError::Cancelled.is_cancelled());
        assert!(!CfError::Cancelled.is_user_visible());
        assert!(CfError::UserVisible("Resampling failed.".into()).is_user_visible());
        assert!(CfError::inconsistency("t0 > t1").is_inconsistency());
        assert_eq!(
            CfError::UserVisible("Resampling failed.".into()).to_string(),
            "Resampling failed."
        );
    }
}
