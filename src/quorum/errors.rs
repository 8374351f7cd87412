//! Quorum distribution errors

use thiserror::Error;

use crate::configuration::ConfigurationError;

/// Result type for quorum operations
pub type QuorumResult<T> = Result<T, QuorumError>;

/// Quorum errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuorumError {
    /// Fewer than a majority of locations agreed or acknowledged.
    #[error(
        "Quorum lost during {}: {} of {} required ({})",
        .operation,
        .reached,
        .required,
        .detail.join("; ")
    )]
    QuorumLoss {
        operation: &'static str,
        required: usize,
        reached: usize,
        detail: Vec<String>,
    },

    #[error("No blob locations configured")]
    NoLocations,

    #[error("Unknown blob location index: {0}")]
    UnknownLocation(usize),

    #[error("Blob location {index} failed: {reason}")]
    Location { index: usize, reason: String },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl QuorumError {
    pub fn code(&self) -> &'static str {
        match self {
            QuorumError::QuorumLoss { .. } => "RT_QUORUM_LOSS",
            QuorumError::NoLocations => "RT_QUORUM_NO_LOCATIONS",
            QuorumError::UnknownLocation(_) => "RT_QUORUM_UNKNOWN_LOCATION",
            QuorumError::Location { .. } => "RT_QUORUM_LOCATION_FAILED",
            QuorumError::Configuration(e) => e.code(),
        }
    }
}

/// Votes needed for a majority of `total`.
pub fn majority_of(total: usize) -> usize {
    total / 2 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_majority_of() {
        assert_eq!(majority_of(1), 1);
        assert_eq!(majority_of(2), 2);
        assert_eq!(majority_of(3), 2);
        assert_eq!(majority_of(4), 3);
        assert_eq!(majority_of(5), 3);
    }

    #[test]
    fn test_quorum_loss_message() {
        let err = QuorumError::QuorumLoss {
            operation: "read",
            required: 2,
            reached: 1,
            detail: vec!["acct1: not found".into(), "acct2: unreachable".into()],
        };
        assert_eq!(err.code(), "RT_QUORUM_LOSS");
        let message = err.to_string();
        assert!(message.contains("1 of 2"));
        assert!(message.contains("acct2: unreachable"));
    }
}
