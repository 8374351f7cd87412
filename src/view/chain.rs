//! Chain validation and repair primitives
//!
//! A chain is well formed when its active replicas (status other than
//! `None`), classified `W` if writable and `R` otherwise, are:
//! - empty, or
//! - all `R` (read-only topology), or
//! - all `W` with at least one `ReadWrite` (write rollout).
//!
//! The repair primitives move a view through outage and recovery. Each
//! returns whether it changed the view; a change always bumps the ViewId,
//! a mismatch is a no-op.

use crate::configuration::{ConfigurationError, ConfigurationResult};
use crate::replica::{ReplicaInfo, ReplicaStatus};

use super::view::View;

/// Legal chain shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainShape {
    /// No active replica
    Empty,
    /// Every active replica is read-only
    ReadOnly,
    /// Every active replica accepts writes, one or more also reads
    WriteRollout,
}

impl View {
    /// Status signature of the active replicas, e.g. `RWRR`.
    pub fn chain_signature(&self) -> String {
        self.active_replicas()
            .map(|r| if r.is_writable() { 'W' } else { 'R' })
            .collect()
    }

    /// Classify the chain, or fail with the offending signature.
    pub fn chain_shape(&self, view_name: &str) -> ConfigurationResult<ChainShape> {
        let signature = self.chain_signature();
        if signature.is_empty() {
            return Ok(ChainShape::Empty);
        }
        if signature.chars().all(|c| c == 'R') {
            return Ok(ChainShape::ReadOnly);
        }
        let any_read_write = self
            .active_replicas()
            .any(|r| r.status == ReplicaStatus::ReadWrite);
        if signature.chars().all(|c| c == 'W') && any_read_write {
            return Ok(ChainShape::WriteRollout);
        }
        Err(ConfigurationError::InvalidChain {
            view: view_name.to_string(),
            signature,
        })
    }

    pub fn throw_if_chain_is_not_valid(&self, view_name: &str) -> ConfigurationResult<()> {
        self.chain_shape(view_name).map(|_| ())
    }

    /// Park `account` at the head with status `None` and leave the rest of
    /// the chain read-only.
    ///
    /// Fails, leaving the view untouched, while any active replica is
    /// `WriteOnly`: its data is not yet known to be fully propagated.
    pub fn move_replica_to_head_and_set_view_to_read_only(
        &mut self,
        view_name: &str,
        account: &str,
    ) -> ConfigurationResult<bool> {
        let Some(index) = self.find_replica(account) else {
            return Ok(false);
        };

        let shape = self.chain_shape(view_name)?;
        if shape == ChainShape::WriteRollout {
            if let Some(write_only) = self
                .active_replicas()
                .find(|r| r.status == ReplicaStatus::WriteOnly)
            {
                return Err(ConfigurationError::WriteOnlyReplicaInChain {
                    view: view_name.to_string(),
                    account: write_only.storage_account_name.clone(),
                });
            }
        }

        let mut chain = self.replica_chain().to_vec();
        let mut parked = chain.remove(index);
        parked.status = ReplicaStatus::None;
        chain.insert(0, parked);
        for replica in chain.iter_mut().skip(1) {
            if replica.is_active() {
                replica.status = ReplicaStatus::ReadOnly;
            }
        }

        Ok(self.commit_chain(chain))
    }

    /// Start re-admitting the head replica into the write path.
    ///
    /// A sole replica goes straight to `ReadWrite`. Otherwise the head
    /// becomes `WriteOnly` and every other active replica `ReadWrite`.
    pub fn enable_write_on_replicas(&mut self, head_account: &str) -> bool {
        if self.find_replica(head_account) != Some(0) {
            return false;
        }

        let mut chain = self.replica_chain().to_vec();
        if chain.len() == 1 {
            chain[0].status = ReplicaStatus::ReadWrite;
        } else {
            chain[0].status = ReplicaStatus::WriteOnly;
            for replica in chain.iter_mut().skip(1) {
                if replica.is_active() {
                    replica.status = ReplicaStatus::ReadWrite;
                }
            }
        }

        self.commit_chain(chain)
    }

    /// Finish re-admission once the head has caught up.
    pub fn enable_read_write_on_replica(&mut self, head_account: &str) -> bool {
        if self.find_replica(head_account) != Some(0) {
            return false;
        }
        if self.replica_chain()[0].status != ReplicaStatus::WriteOnly {
            return false;
        }

        let mut chain = self.replica_chain().to_vec();
        chain[0].status = ReplicaStatus::ReadWrite;
        self.commit_chain(chain)
    }

    fn commit_chain(&mut self, chain: Vec<ReplicaInfo>) -> bool {
        if chain.as_slice() == self.replica_chain() {
            return false;
        }
        *self.replica_chain_mut() = chain;
        self.bump();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(statuses: &[ReplicaStatus]) -> View {
        View::with_chain(
            1,
            statuses
                .iter()
                .enumerate()
                .map(|(i, s)| ReplicaInfo::new(format!("account{}", i), "key", *s))
                .collect(),
        )
    }

    fn statuses(view: &View) -> Vec<ReplicaStatus> {
        view.replica_chain().iter().map(|r| r.status).collect()
    }

    use crate::replica::ReplicaStatus::{None as N, ReadOnly as RO, ReadWrite as RW, WriteOnly as WO};

    #[test]
    fn test_valid_shapes() {
        assert_eq!(chain(&[]).chain_shape("v").unwrap(), ChainShape::Empty);
        assert_eq!(chain(&[N, N]).chain_shape("v").unwrap(), ChainShape::Empty);
        assert_eq!(chain(&[RO, RO]).chain_shape("v").unwrap(), ChainShape::ReadOnly);
        assert_eq!(chain(&[N, RO, RW]).chain_signature(), "RW");
        assert_eq!(
            chain(&[WO, RW, RW]).chain_shape("v").unwrap(),
            ChainShape::WriteRollout
        );
    }

    #[test]
    fn test_invalid_shapes() {
        let err = chain(&[N, RO, WO, RO, RO]).chain_shape("v1").unwrap_err();
        assert_eq!(err.to_string(), "View:'v1' has invalid Read chain: RWRR");

        // all writable but none readable
        assert!(chain(&[WO, WO]).chain_shape("v").is_err());
        assert!(chain(&[RW, RO]).chain_shape("v").is_err());
    }

    #[test]
    fn test_move_not_found_is_noop() {
        let mut view = chain(&[RW, RW]);
        assert!(!view
            .move_replica_to_head_and_set_view_to_read_only("v", "missing")
            .unwrap());
        assert_eq!(view.view_id(), 1);
    }

    #[test]
    fn test_move_in_read_only_chain() {
        let mut view = chain(&[RO, RO, RO]);
        assert!(view
            .move_replica_to_head_and_set_view_to_read_only("v", "account2")
            .unwrap());
        assert_eq!(view.replica_chain()[0].storage_account_name, "account2");
        assert_eq!(statuses(&view), vec![N, RO, RO]);
        assert_eq!(view.view_id(), 2);
        assert_eq!(view.read_view_head_index(), 1);
    }

    #[test]
    fn test_move_in_read_write_chain() {
        let mut view = chain(&[RW, RW, RW]);
        assert!(view
            .move_replica_to_head_and_set_view_to_read_only("v", "account1")
            .unwrap());
        assert_eq!(view.replica_chain()[0].storage_account_name, "account1");
        assert_eq!(statuses(&view), vec![N, RO, RO]);
        assert!(view.throw_if_chain_is_not_valid("v").is_ok());
    }

    #[test]
    fn test_move_rejected_with_write_only() {
        let original = chain(&[WO, RW, RW]);
        for target in ["account0", "account1", "account2"] {
            let mut view = original.clone();
            let err = view
                .move_replica_to_head_and_set_view_to_read_only("v", target)
                .unwrap_err();
            assert!(matches!(err, ConfigurationError::WriteOnlyReplicaInChain { .. }));
            assert_eq!(view, original);
        }
    }

    #[test]
    fn test_move_repeat_is_noop() {
        let mut view = chain(&[RO, RO]);
        assert!(view
            .move_replica_to_head_and_set_view_to_read_only("v", "account1")
            .unwrap());
        let id = view.view_id();
        assert!(!view
            .move_replica_to_head_and_set_view_to_read_only("v", "account1")
            .unwrap());
        assert_eq!(view.view_id(), id);
    }

    #[test]
    fn test_enable_write_single_replica() {
        let mut view = chain(&[N]);
        assert!(view.enable_write_on_replicas("account0"));
        assert_eq!(statuses(&view), vec![RW]);
        assert_eq!(view.view_id(), 2);
    }

    #[test]
    fn test_enable_write_multi_replica() {
        let mut view = chain(&[N, RO, RO]);
        assert!(view.enable_write_on_replicas("account0"));
        assert_eq!(statuses(&view), vec![WO, RW, RW]);
        assert!(view.throw_if_chain_is_not_valid("v").is_ok());
        assert_eq!(view.read_view_head_index(), 1);
    }

    #[test]
    fn test_enable_write_not_head_is_noop() {
        let mut view = chain(&[N, RO, RO]);
        assert!(!view.enable_write_on_replicas("account1"));
        assert!(!view.enable_write_on_replicas("missing"));
        assert!(!chain(&[]).enable_write_on_replicas("account0"));
        assert_eq!(view.view_id(), 1);
    }

    #[test]
    fn test_enable_read_write() {
        let mut view = chain(&[WO, RW, RW]);
        assert!(view.enable_read_write_on_replica("account0"));
        assert_eq!(statuses(&view), vec![RW, RW, RW]);
        assert_eq!(view.view_id(), 2);
        assert_eq!(view.read_view_head_index(), 0);

        // already ReadWrite
        assert!(!view.enable_read_write_on_replica("account0"));
        assert_eq!(view.view_id(), 2);
    }

    #[test]
    fn test_enable_read_write_requires_write_only_head() {
        let mut view = chain(&[N, RO]);
        assert!(!view.enable_read_write_on_replica("account0"));
        assert!(!view.enable_read_write_on_replica("account1"));
        assert_eq!(view.view_id(), 1);
    }

    #[test]
    fn test_full_outage_and_recovery_cycle() {
        let mut view = chain(&[RW, RW, RW]);
        let mut last = view.view_id();

        assert!(view
            .move_replica_to_head_and_set_view_to_read_only("v", "account2")
            .unwrap());
        assert!(view.view_id() > last);
        last = view.view_id();

        assert!(view.enable_write_on_replicas("account2"));
        assert!(view.view_id() > last);
        last = view.view_id();

        assert!(view.enable_read_write_on_replica("account2"));
        assert!(view.view_id() > last);

        assert_eq!(statuses(&view), vec![RW, RW, RW]);
        assert_eq!(view.replica_chain()[0].storage_account_name, "account2");
    }
}
