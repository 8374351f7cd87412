//! Multi-View / Multi-Table Configuration
//!
//! - Named views and named table bindings with referential integrity
//! - Chain repair primitives applied under the table constraints
//! - An explicit handle holding the installed configuration
//!
//! Mutations are expected to be serialized by the caller (one control
//! loop driving reconfiguration); nothing here arbitrates concurrent
//! reconfigurations of the same view.

mod configuration;
mod errors;
mod handle;
mod table;

pub use configuration::{ReplicatedTableConfiguration, LEGACY_VIEW_NAME};
pub use errors::{ConfigurationError, ConfigurationResult};
pub use handle::{ConfigurationHandle, HandleState, InstalledConfiguration};
pub use table::{ConfiguredTable, DEFAULT_TABLE_NAME};
