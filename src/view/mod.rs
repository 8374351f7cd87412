//! Views and replica chains
//!
//! A view is an ordered chain of replicas under a monotonically increasing
//! ViewId. `chain` holds the well-formedness rules and the maintenance
//! primitives that move a chain through outage and recovery.

mod chain;
mod view;

pub use chain::ChainShape;
pub use view::{View, DEFAULT_LEASE_DURATION_SECS};
pub(crate) use view::{default_lease_duration, lease_from_secs};
