//! Chain Invariant Tests
//!
//! A view chain is only ever published in one of two shapes:
//! - read-only topology: every active replica is readable but not writable
//! - write rollout: every active replica is writable, one or more readable
//!
//! The repair primitives walk a view through outage and recovery without
//! ever leaving those shapes, and every change moves the ViewId forward.

use rtable::configuration::{ConfigurationError, ConfiguredTable, ReplicatedTableConfiguration};
use rtable::replica::{ReplicaInfo, ReplicaStatus};
use rtable::view::{ChainShape, View};

use ReplicaStatus::{None as N, ReadOnly as RO, ReadWrite as RW, WriteOnly as WO};

fn view(statuses: &[ReplicaStatus]) -> View {
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

fn accounts(view: &View) -> Vec<&str> {
    view.replica_chain()
        .iter()
        .map(|r| r.storage_account_name.as_str())
        .collect()
}

// =============================================================================
// Chain Shape Tests
// =============================================================================

/// Replicas with status None do not count toward the shape.
#[test]
fn test_inactive_replicas_ignored() {
    assert_eq!(view(&[N, RW, RW]).chain_shape("v").unwrap(), ChainShape::WriteRollout);
    assert_eq!(view(&[N, RO]).chain_shape("v").unwrap(), ChainShape::ReadOnly);
    assert_eq!(view(&[N]).chain_shape("v").unwrap(), ChainShape::Empty);
}

/// Mixing read-only and writable replicas is rejected with the signature.
#[test]
fn test_mixed_chain_rejected() {
    let err = view(&[RW, RO, RW]).throw_if_chain_is_not_valid("orders").unwrap_err();
    match err {
        ConfigurationError::InvalidChain { view, signature } => {
            assert_eq!(view, "orders");
            assert_eq!(signature, "WRW");
        }
        other => panic!("expected InvalidChain, got {:?}", other),
    }
}

/// A configuration refuses to hold an invalid chain.
#[test]
fn test_configuration_rejects_invalid_chain() {
    let mut configuration = ReplicatedTableConfiguration::new();
    let id = configuration.id();
    assert!(configuration.set_view("v1", view(&[WO, WO])).is_err());
    assert!(configuration.get_view("v1").is_none());
    assert_eq!(configuration.id(), id);
}

// =============================================================================
// Read Head and Tail Tests
// =============================================================================

/// Reads start at the first readable replica; the write path is every
/// writable replica in chain order.
#[test]
fn test_read_head_and_write_view() {
    let v = view(&[WO, RW, RW]);
    assert_eq!(v.read_view_head_index(), 1);
    assert_eq!(v.read_head().unwrap().storage_account_name, "account1");
    assert_eq!(v.tail().unwrap().storage_account_name, "account2");

    let writers: Vec<&str> = v
        .write_view()
        .iter()
        .map(|r| r.storage_account_name.as_str())
        .collect();
    assert_eq!(writers, vec!["account0", "account1", "account2"]);
}

// =============================================================================
// Outage and Recovery Tests
// =============================================================================

/// Full cycle: a replica fails, is parked at the head, is re-admitted for
/// writes, then becomes fully readable again.
#[test]
fn test_outage_recovery_cycle_through_configuration() {
    let mut configuration = ReplicatedTableConfiguration::new();
    configuration.set_view("v1", view(&[RW, RW, RW])).unwrap();
    configuration
        .set_table(ConfiguredTable::new("orders", "v1"))
        .unwrap();

    assert!(configuration
        .move_replica_to_head_and_set_view_to_read_only("v1", "account1")
        .unwrap());
    let v = configuration.get_view("v1").unwrap();
    assert_eq!(accounts(v), vec!["account1", "account0", "account2"]);
    assert_eq!(statuses(v), vec![N, RO, RO]);
    assert_eq!(v.view_id(), 2);

    assert!(configuration
        .enable_write_on_replicas("v1", "account1")
        .unwrap());
    let v = configuration.get_view("v1").unwrap();
    assert_eq!(statuses(v), vec![WO, RW, RW]);
    assert_eq!(v.view_id(), 3);

    assert!(configuration
        .enable_read_write_on_replica("v1", "account1")
        .unwrap());
    let v = configuration.get_view("v1").unwrap();
    assert_eq!(statuses(v), vec![RW, RW, RW]);
    assert_eq!(v.view_id(), 4);
    assert!(configuration.validate().is_ok());
}

/// While a replica is catching up, nothing may be moved to the head.
#[test]
fn test_move_blocked_during_catch_up() {
    let mut configuration = ReplicatedTableConfiguration::new();
    configuration.set_view("v1", view(&[WO, RW])).unwrap();
    let id = configuration.id();

    let err = configuration
        .move_replica_to_head_and_set_view_to_read_only("v1", "account1")
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::WriteOnlyReplicaInChain { .. }));
    assert_eq!(configuration.id(), id);
    assert_eq!(statuses(configuration.get_view("v1").unwrap()), vec![WO, RW]);
}

/// Repair requests that do not match the chain leave it alone.
#[test]
fn test_mismatched_repairs_are_noops() {
    let mut configuration = ReplicatedTableConfiguration::new();
    configuration.set_view("v1", view(&[RW, RW])).unwrap();
    let id = configuration.id();

    assert!(!configuration
        .enable_write_on_replicas("v1", "account1")
        .unwrap());
    assert!(!configuration
        .enable_read_write_on_replica("v1", "account0")
        .unwrap());
    assert!(!configuration
        .move_replica_to_head_and_set_view_to_read_only("v1", "unknown1")
        .unwrap());
    assert_eq!(configuration.id(), id);
    assert_eq!(configuration.get_view("v1").unwrap().view_id(), 1);
}
