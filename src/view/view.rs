//! View: one versioned snapshot of a replica chain
//!
//! - Head is index 0, tail is the last entry
//! - `view_id` strictly increases on every mutation of order or status
//! - `read_view_head_index` is derived from the chain after each mutation
//!   and on load; a persisted index is ignored

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::replica::{ReplicaInfo, ReplicaStatus};

/// Default lease, in seconds, for views and configurations.
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 60;

/// Longest lease honoured; larger values are clamped.
const MAX_LEASE_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

pub(crate) fn default_lease_duration() -> u64 {
    DEFAULT_LEASE_DURATION_SECS
}

pub(crate) fn lease_from_secs(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_LEASE_DURATION_SECS) as i64)
}

/// A replica chain plus its view metadata.
///
/// Serialized field names follow the persisted configuration document.
/// The read head index is derived from the chain when a document is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", from = "ViewDocument")]
pub struct View {
    view_id: u64,

    replica_chain: Vec<ReplicaInfo>,

    read_view_head_index: usize,

    #[serde(rename = "ConvertXStoreTableMode")]
    convert_xstore_table_mode: bool,

    /// Seconds
    lease_duration: u64,

    instrumentation: bool,

    timestamp: DateTime<Utc>,
}

/// On-disk form of a view; missing fields take their defaults.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ViewDocument {
    #[serde(default)]
    view_id: u64,

    #[serde(default)]
    replica_chain: Vec<ReplicaInfo>,

    #[serde(rename = "ConvertXStoreTableMode", default)]
    convert_xstore_table_mode: bool,

    #[serde(default = "default_lease_duration")]
    lease_duration: u64,

    #[serde(default)]
    instrumentation: bool,

    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

impl From<ViewDocument> for View {
    fn from(doc: ViewDocument) -> Self {
        let mut view = Self {
            view_id: doc.view_id,
            replica_chain: doc.replica_chain,
            read_view_head_index: 0,
            convert_xstore_table_mode: doc.convert_xstore_table_mode,
            lease_duration: doc.lease_duration,
            instrumentation: doc.instrumentation,
            timestamp: doc.timestamp,
        };
        view.refresh_read_head();
        view
    }
}

impl Default for View {
    fn default() -> Self {
        Self::new(0)
    }
}

impl View {
    /// Create an empty view.
    pub fn new(view_id: u64) -> Self {
        Self {
            view_id,
            replica_chain: Vec::new(),
            read_view_head_index: 0,
            convert_xstore_table_mode: false,
            lease_duration: DEFAULT_LEASE_DURATION_SECS,
            instrumentation: false,
            timestamp: Utc::now(),
        }
    }

    /// Create a view from an operator-provided chain.
    ///
    /// The chain is not validated here; `set_view` does that.
    pub fn with_chain(view_id: u64, replica_chain: Vec<ReplicaInfo>) -> Self {
        let mut view = Self::new(view_id);
        view.replica_chain = replica_chain;
        view.refresh_read_head();
        view
    }

    /// Append a replica at the tail.
    pub fn push_replica(&mut self, replica: ReplicaInfo) {
        self.replica_chain.push(replica);
        self.refresh_read_head();
    }

    pub fn set_convert_xstore_table_mode(&mut self, enabled: bool) {
        self.convert_xstore_table_mode = enabled;
    }

    pub fn set_instrumentation(&mut self, enabled: bool) {
        self.instrumentation = enabled;
    }

    pub fn set_lease_duration_secs(&mut self, secs: u64) {
        self.lease_duration = secs;
    }

    pub fn view_id(&self) -> u64 {
        self.view_id
    }

    pub fn replica_chain(&self) -> &[ReplicaInfo] {
        &self.replica_chain
    }

    pub fn read_view_head_index(&self) -> usize {
        self.read_view_head_index
    }

    pub fn convert_xstore_table_mode(&self) -> bool {
        self.convert_xstore_table_mode
    }

    pub fn instrumentation(&self) -> bool {
        self.instrumentation
    }

    pub fn lease_duration(&self) -> Duration {
        lease_from_secs(self.lease_duration)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_empty(&self) -> bool {
        self.replica_chain.is_empty()
    }

    /// Replicas whose status is not `None`, in chain order.
    pub fn active_replicas(&self) -> impl Iterator<Item = &ReplicaInfo> {
        self.replica_chain.iter().filter(|r| r.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.active_replicas().count()
    }

    /// Position of `account` in the chain.
    pub fn find_replica(&self, account: &str) -> Option<usize> {
        self.replica_chain
            .iter()
            .position(|r| r.storage_account_name == account)
    }

    /// Replicas that receive writes, head to tail.
    pub fn write_view(&self) -> Vec<&ReplicaInfo> {
        self.replica_chain.iter().filter(|r| r.is_writable()).collect()
    }

    /// First readable replica.
    pub fn read_head(&self) -> Option<&ReplicaInfo> {
        self.replica_chain
            .get(self.read_view_head_index)
            .filter(|r| r.is_readable())
    }

    /// Last readable replica: the most fully propagated copy.
    pub fn tail(&self) -> Option<&ReplicaInfo> {
        self.replica_chain.iter().rev().find(|r| r.is_readable())
    }

    /// Whether a client that installed this view at `installed_at` must
    /// re-read it before use.
    pub fn is_expired(&self, installed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        installed_at + self.lease_duration() < now
    }

    /// Align an operator-provided view with the view it replaces.
    ///
    /// A changed chain gets the next ViewId; an identical chain keeps the
    /// current one. Replicas already in the current chain keep their
    /// entry ViewId, new ones are stamped with the resulting ViewId.
    pub fn sanitize_with_current_view(&mut self, current: Option<&View>) {
        match current {
            None => {
                if self.view_id == 0 {
                    self.view_id = 1;
                }
            }
            Some(current) => {
                if current.replica_chain_shape() != self.replica_chain_shape() {
                    self.view_id = current.view_id + 1;
                    self.timestamp = Utc::now();
                } else {
                    self.view_id = current.view_id;
                    self.timestamp = current.timestamp;
                }
            }
        }

        let view_id = self.view_id;
        for replica in &mut self.replica_chain {
            let previous = current.and_then(|c| {
                c.replica_chain
                    .iter()
                    .find(|r| r.storage_account_name == replica.storage_account_name)
            });
            replica.view_in_which_added_to_chain = match previous {
                Some(previous) => previous.view_in_which_added_to_chain,
                None => view_id,
            };
        }
        self.refresh_read_head();
    }

    fn replica_chain_shape(&self) -> Vec<(&str, ReplicaStatus)> {
        self.replica_chain
            .iter()
            .map(|r| (r.storage_account_name.as_str(), r.status))
            .collect()
    }

    pub(super) fn replica_chain_mut(&mut self) -> &mut Vec<ReplicaInfo> {
        &mut self.replica_chain
    }

    /// Record a mutation: next ViewId, fresh timestamp, derived read head.
    pub(super) fn bump(&mut self) {
        self.view_id += 1;
        self.timestamp = Utc::now();
        self.refresh_read_head();
    }

    fn refresh_read_head(&mut self) {
        self.read_view_head_index = self
            .replica_chain
            .iter()
            .position(|r| r.is_readable())
            .unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(name: &str, status: ReplicaStatus) -> ReplicaInfo {
        ReplicaInfo::new(name, "key", status)
    }

    #[test]
    fn test_read_head_and_tail() {
        let view = View::with_chain(
            1,
            vec![
                replica("account0", ReplicaStatus::None),
                replica("account1", ReplicaStatus::WriteOnly),
                replica("account2", ReplicaStatus::ReadWrite),
                replica("account3", ReplicaStatus::ReadWrite),
            ],
        );
        assert_eq!(view.read_view_head_index(), 2);
        assert_eq!(view.read_head().unwrap().storage_account_name, "account2");
        assert_eq!(view.tail().unwrap().storage_account_name, "account3");
        assert_eq!(view.write_view().len(), 3);
        assert_eq!(view.active_count(), 3);
    }

    #[test]
    fn test_sanitize_new_view() {
        let mut view = View::with_chain(0, vec![replica("account1", ReplicaStatus::ReadWrite)]);
        view.sanitize_with_current_view(None);
        assert_eq!(view.view_id(), 1);
        assert_eq!(view.replica_chain()[0].view_in_which_added_to_chain, 1);
    }

    #[test]
    fn test_sanitize_changed_chain_bumps() {
        let mut current =
            View::with_chain(0, vec![replica("account1", ReplicaStatus::ReadWrite)]);
        current.sanitize_with_current_view(None);

        let mut next = View::with_chain(
            0,
            vec![
                replica("account1", ReplicaStatus::ReadWrite),
                replica("account2", ReplicaStatus::ReadWrite),
            ],
        );
        next.sanitize_with_current_view(Some(&current));
        assert_eq!(next.view_id(), 2);
        assert_eq!(next.replica_chain()[0].view_in_which_added_to_chain, 1);
        assert_eq!(next.replica_chain()[1].view_in_which_added_to_chain, 2);
    }

    #[test]
    fn test_sanitize_same_chain_keeps_view_id() {
        let mut current =
            View::with_chain(5, vec![replica("account1", ReplicaStatus::ReadWrite)]);
        current.sanitize_with_current_view(None);

        let mut same = View::with_chain(0, vec![replica("account1", ReplicaStatus::ReadWrite)]);
        same.sanitize_with_current_view(Some(&current));
        assert_eq!(same.view_id(), 5);
    }

    #[test]
    fn test_expiry() {
        let mut view = View::new(1);
        view.set_lease_duration_secs(10);
        let installed = Utc::now();
        assert!(!view.is_expired(installed, installed + Duration::seconds(5)));
        assert!(view.is_expired(installed, installed + Duration::seconds(11)));
    }

    #[test]
    fn test_legacy_fields_default() {
        let view: View = serde_json::from_str(
            r#"{"ViewId":3,"ReplicaChain":[{"StorageAccountName":"account1","Status":3}]}"#,
        )
        .unwrap();
        assert_eq!(view.view_id(), 3);
        assert_eq!(view.lease_duration(), Duration::seconds(60));
        assert!(!view.convert_xstore_table_mode());
        assert_eq!(view.replica_chain()[0].status, ReplicaStatus::ReadWrite);
    }

    #[test]
    fn test_read_head_derived_on_load() {
        let missing: View = serde_json::from_str(
            r#"{"ViewId":2,"ReplicaChain":[
                {"StorageAccountName":"account0","Status":0},
                {"StorageAccountName":"account1","Status":3},
                {"StorageAccountName":"account2","Status":3}]}"#,
        )
        .unwrap();
        assert_eq!(missing.read_view_head_index(), 1);
        assert_eq!(missing.read_head().unwrap().storage_account_name, "account1");

        let stale: View = serde_json::from_str(
            r#"{"ViewId":2,"ReadViewHeadIndex":0,"ReplicaChain":[
                {"StorageAccountName":"account0","Status":2},
                {"StorageAccountName":"account1","Status":3}]}"#,
        )
        .unwrap();
        assert_eq!(stale.read_view_head_index(), 1);
        assert_eq!(stale.read_head().unwrap().storage_account_name, "account1");
    }
}
