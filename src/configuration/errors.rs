//! Configuration integrity errors
//!
//! Every rejected mutation leaves the configuration unchanged and names the
//! offending view, table or replica.

use thiserror::Error;

/// Result type for configuration operations
pub type ConfigurationResult<T> = Result<T, ConfigurationError>;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    // Chain shape
    #[error("View:'{view}' has invalid Read chain: {signature}")]
    InvalidChain { view: String, signature: String },

    #[error("View:'{view}' cannot be set read-only: replica '{account}' is WriteOnly, enable ReadWrite on it first")]
    WriteOnlyReplicaInChain { view: String, account: String },

    #[error("View:'{view}' has an invalid replica: {reason}")]
    InvalidReplica { view: String, reason: String },

    #[error("View:'{view}' lists replica '{account}' more than once")]
    DuplicateReplica { view: String, account: String },

    // Views
    #[error("View name is empty")]
    EmptyViewName,

    #[error("View:'{0}' is not configured")]
    ViewNotFound(String),

    #[error("View:'{view}' is referenced by table '{table}'")]
    ViewReferenced { view: String, table: String },

    // Tables
    #[error("Table name is empty")]
    EmptyTableName,

    #[error("Table:'{0}' is not configured")]
    TableNotConfigured(String),

    #[error("Table:'{table}' refers to missing view '{view}'")]
    TableViewNotFound { table: String, view: String },

    #[error("Table:'{0}' has a partition map but no default view")]
    PartitionWithoutDefaultView(String),

    #[error("Table:'{0}' has no view to route to")]
    TableHasNoView(String),

    #[error("Table:'{table}' is in conversion mode but view '{view}' has {replicas} replicas")]
    ConversionModeViolation {
        table: String,
        view: String,
        replicas: usize,
    },

    #[error("More than one default table: '{first}' and '{second}'")]
    DuplicateDefaultTable { first: String, second: String },

    // Handle
    #[error("No configuration installed")]
    NotInstalled,

    #[error("View:'{view}' would regress from ViewId {installed} to {offered}")]
    StaleConfiguration {
        view: String,
        installed: u64,
        offered: u64,
    },

    // Documents
    #[error("Configuration document error: {0}")]
    Serialization(String),
}

impl ConfigurationError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            ConfigurationError::InvalidChain { .. } => "RT_CONFIG_INVALID_CHAIN",
            ConfigurationError::WriteOnlyReplicaInChain { .. } => "RT_CONFIG_WRITE_ONLY_REPLICA",
            ConfigurationError::InvalidReplica { .. } => "RT_CONFIG_INVALID_REPLICA",
            ConfigurationError::DuplicateReplica { .. } => "RT_CONFIG_DUPLICATE_REPLICA",
            ConfigurationError::EmptyViewName => "RT_CONFIG_EMPTY_VIEW_NAME",
            ConfigurationError::ViewNotFound(_) => "RT_CONFIG_VIEW_NOT_FOUND",
            ConfigurationError::ViewReferenced { .. } => "RT_CONFIG_VIEW_REFERENCED",
            ConfigurationError::EmptyTableName => "RT_CONFIG_EMPTY_TABLE_NAME",
            ConfigurationError::TableNotConfigured(_) => "RT_CONFIG_TABLE_NOT_CONFIGURED",
            ConfigurationError::TableViewNotFound { .. } => "RT_CONFIG_TABLE_VIEW_NOT_FOUND",
            ConfigurationError::PartitionWithoutDefaultView(_) => {
                "RT_CONFIG_PARTITION_WITHOUT_DEFAULT_VIEW"
            }
            ConfigurationError::TableHasNoView(_) => "RT_CONFIG_TABLE_HAS_NO_VIEW",
            ConfigurationError::ConversionModeViolation { .. } => "RT_CONFIG_CONVERSION_MODE",
            ConfigurationError::DuplicateDefaultTable { .. } => "RT_CONFIG_DUPLICATE_DEFAULT",
            ConfigurationError::NotInstalled => "RT_CONFIG_NOT_INSTALLED",
            ConfigurationError::StaleConfiguration { .. } => "RT_CONFIG_STALE",
            ConfigurationError::Serialization(_) => "RT_CONFIG_SERIALIZATION",
        }
    }
}

impl From<serde_json::Error> for ConfigurationError {
    fn from(e: serde_json::Error) -> Self {
        ConfigurationError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_chain_message() {
        let err = ConfigurationError::InvalidChain {
            view: "v1".into(),
            signature: "RWRR".into(),
        };
        assert_eq!(err.to_string(), "View:'v1' has invalid Read chain: RWRR");
        assert_eq!(err.code(), "RT_CONFIG_INVALID_CHAIN");
    }

    #[test]
    fn test_referenced_view_names_table() {
        let err = ConfigurationError::ViewReferenced {
            view: "v1".into(),
            table: "orders".into(),
        };
        assert!(err.to_string().contains("orders"));
    }
}
