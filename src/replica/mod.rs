//! Replica Model
//!
//! A replica is one backing store taking part in a chain. Its status decides
//! whether it serves reads, accepts writes, both, or neither.

mod info;

pub use info::{ReplicaInfo, ReplicaStatus};
