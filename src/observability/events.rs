//! Observable events
//!
//! Every log line emitted by the crate names one of these.

use std::fmt;

use super::logger::Severity;

/// Observable events in rtable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Settings
    /// Client settings loaded
    SettingsLoaded,

    // Chain / view
    /// A repair primitive changed a view
    ViewMutated,
    /// A repair primitive found nothing to change
    ViewUnchanged,
    /// A chain failed shape validation
    ChainRejected,

    // Configuration
    /// A configuration mutation was rejected
    ConfigRejected,
    /// A configuration was installed into a handle
    ConfigInstalled,

    // Quorum
    /// Per-location read outcome
    BlobRead,
    /// Per-location write outcome
    BlobWrite,
    /// Quorum write committed
    QuorumWriteCommitted,
    /// Quorum write did not reach a majority
    QuorumWriteFailed,
    /// No majority among read locations
    QuorumLost,
    /// A minority location was rewritten
    ReadRepair,

    // Rows
    /// Row operation started
    RowOpBegin,
    /// Row operation fully propagated
    RowOpComplete,
    /// Row operation hit a live lock
    RowLockConflict,
    /// Row operation rejected by ETag
    RowVersionConflict,
    /// Row operation failed with a retriable condition
    RowRetriable,
    /// A timed-out lock was taken over
    RowRepaired,
    /// Rows copied to a catching-up replica
    TableRepaired,
    /// Head/tail invariant violated
    ChainInconsistent,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::SettingsLoaded => "SETTINGS_LOADED",

            Event::ViewMutated => "VIEW_MUTATED",
            Event::ViewUnchanged => "VIEW_UNCHANGED",
            Event::ChainRejected => "CHAIN_REJECTED",

            Event::ConfigRejected => "CONFIG_REJECTED",
            Event::ConfigInstalled => "CONFIG_INSTALLED",

            Event::BlobRead => "BLOB_READ",
            Event::BlobWrite => "BLOB_WRITE",
            Event::QuorumWriteCommitted => "QUORUM_WRITE_COMMITTED",
            Event::QuorumWriteFailed => "QUORUM_WRITE_FAILED",
            Event::QuorumLost => "QUORUM_LOST",
            Event::ReadRepair => "READ_REPAIR",

            Event::RowOpBegin => "ROW_OP_BEGIN",
            Event::RowOpComplete => "ROW_OP_COMPLETE",
            Event::RowLockConflict => "ROW_LOCK_CONFLICT",
            Event::RowVersionConflict => "ROW_VERSION_CONFLICT",
            Event::RowRetriable => "ROW_RETRIABLE",
            Event::RowRepaired => "ROW_REPAIRED",
            Event::TableRepaired => "TABLE_REPAIRED",
            Event::ChainInconsistent => "CHAIN_INCONSISTENT",
        }
    }

    /// Default severity for the event
    pub fn severity(&self) -> Severity {
        match self {
            Event::RowOpBegin | Event::RowOpComplete | Event::BlobRead | Event::BlobWrite => {
                Severity::Trace
            }
            Event::ChainRejected
            | Event::ConfigRejected
            | Event::RowLockConflict
            | Event::RowVersionConflict
            | Event::RowRetriable
            | Event::ReadRepair => Severity::Warn,
            Event::QuorumWriteFailed | Event::QuorumLost | Event::ChainInconsistent => {
                Severity::Error
            }
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_upper_snake() {
        let events = [
            Event::SettingsLoaded,
            Event::ViewMutated,
            Event::ViewUnchanged,
            Event::ChainRejected,
            Event::ConfigRejected,
            Event::ConfigInstalled,
            Event::BlobRead,
            Event::BlobWrite,
            Event::QuorumWriteCommitted,
            Event::QuorumWriteFailed,
            Event::QuorumLost,
            Event::ReadRepair,
            Event::RowOpBegin,
            Event::RowOpComplete,
            Event::RowLockConflict,
            Event::RowVersionConflict,
            Event::RowRetriable,
            Event::RowRepaired,
            Event::TableRepaired,
            Event::ChainInconsistent,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_event_severity() {
        assert_eq!(Event::QuorumLost.severity(), Severity::Error);
        assert_eq!(Event::RowLockConflict.severity(), Severity::Warn);
        assert_eq!(Event::ViewMutated.severity(), Severity::Info);
        assert_eq!(Event::RowOpBegin.severity(), Severity::Trace);
    }
}
