//! Row Replication Protocol
//!
//! - Per-row replication metadata and typed property bags
//! - Table stores, one per storage account, behind [`TableStore`]
//! - Head-to-tail write propagation with row locks and optimistic
//!   concurrency
//! - Stale lock takeover, chain consistency checks, table catch-up
//!
//! Every failure carries an [`ErrorClass`]: back off on `LockConflict`,
//! retry on `Retriable`, stop on `Fatal`.

mod batch;
mod consistency;
mod entity;
mod errors;
mod protocol;
mod store;

pub use batch::TableBatch;
pub use consistency::{ChainInconsistency, InconsistencyKind, TableRepairReport};
pub use entity::{
    PropertyMap, PropertyValue, ReplicatedEntity, RowMetadata, RowOperation, TableEntity,
    ETAG_WILDCARD,
};
pub use errors::{ErrorClass, RowError, RowResult};
pub use protocol::{
    ReplicatedTable, RowRepair, RowSettings, DEFAULT_LOCK_TIMEOUT, DEFAULT_RETRY_DELAY,
    PARTITION_KEY_PROPERTY, ROW_KEY_PROPERTY,
};
pub use store::{
    MemoryTableStore, StoreError, StoreOperation, StoreRegistry, StoreResult, StoredRow,
    TableStore, WriteCondition, MAX_BATCH_BYTES, MAX_BATCH_OPERATIONS, MAX_ENTITY_BYTES,
    MAX_PROPERTY_NAME_LEN,
};
