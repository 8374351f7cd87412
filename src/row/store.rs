//! Table stores backing each replica
//!
//! A store offers per-row CRUD with ETag preconditions and atomic
//! same-partition batches. Store limits are reported as
//! `StoreError::LimitExceeded` and passed through unchanged.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use super::entity::TableEntity;

/// Operations per batch
pub const MAX_BATCH_OPERATIONS: usize = 100;
/// Bytes per batch
pub const MAX_BATCH_BYTES: usize = 4 * 1024 * 1024;
/// Bytes per entity
pub const MAX_ENTITY_BYTES: usize = 1024 * 1024;
/// Characters per property name
pub const MAX_PROPERTY_NAME_LEN: usize = 255;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Entity not found: {partition_key}/{row_key}")]
    NotFound {
        partition_key: String,
        row_key: String,
    },

    #[error("Precondition failed for {partition_key}/{row_key}")]
    PreconditionFailed {
        partition_key: String,
        row_key: String,
    },

    #[error("Store limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Precondition on a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Unconditional upsert
    Any,
    /// Row must not exist
    IfAbsent,
    /// Row must exist with this store ETag
    IfMatch(String),
}

/// A row together with the store's own ETag for it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub entity: TableEntity,
    pub etag: String,
}

impl StoredRow {
    /// Condition that matches exactly this stored copy.
    pub fn condition(&self) -> WriteCondition {
        WriteCondition::IfMatch(self.etag.clone())
    }
}

/// One operation of a store batch
#[derive(Debug, Clone)]
pub enum StoreOperation {
    Put {
        entity: TableEntity,
        condition: WriteCondition,
    },
    Delete {
        partition_key: String,
        row_key: String,
        condition: WriteCondition,
    },
}

impl StoreOperation {
    fn keys(&self) -> (&str, &str) {
        match self {
            StoreOperation::Put { entity, .. } => (&entity.partition_key, &entity.row_key),
            StoreOperation::Delete {
                partition_key,
                row_key,
                ..
            } => (partition_key, row_key),
        }
    }
}

/// Table store for one storage account
pub trait TableStore: Send + Sync + fmt::Debug {
    /// Read one row
    fn get(&self, table: &str, partition_key: &str, row_key: &str)
        -> StoreResult<Option<StoredRow>>;

    /// Write one row; returns the new store ETag
    fn put(&self, table: &str, entity: TableEntity, condition: WriteCondition)
        -> StoreResult<String>;

    /// Delete one row
    fn delete(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        condition: WriteCondition,
    ) -> StoreResult<()>;

    /// All rows, optionally restricted to one partition, in key order
    fn scan(&self, table: &str, partition_key: Option<&str>) -> StoreResult<Vec<StoredRow>>;

    /// Apply `operations` atomically; returns one ETag per operation
    /// (empty for deletes)
    fn execute_batch(&self, table: &str, operations: Vec<StoreOperation>)
        -> StoreResult<Vec<String>>;
}

/// Account name → table store
#[derive(Debug, Clone, Default)]
pub struct StoreRegistry {
    stores: HashMap<String, Arc<dyn TableStore>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, account: impl Into<String>, store: Arc<dyn TableStore>) {
        self.stores.insert(account.into(), store);
    }

    pub fn get(&self, account: &str) -> Option<Arc<dyn TableStore>> {
        self.stores.get(account).cloned()
    }

    pub fn accounts(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }
}

type RowKey = (String, String);
type Table = BTreeMap<RowKey, StoredRow>;

/// In-memory table store enforcing the store limits.
#[derive(Debug)]
pub struct MemoryTableStore {
    tables: RwLock<HashMap<String, Table>>,
    next_etag: AtomicU64,
    available: AtomicBool,
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            next_etag: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("store is offline".to_string()))
        }
    }

    fn new_etag(&self) -> String {
        format!("W/\"{}\"", self.next_etag.fetch_add(1, Ordering::SeqCst))
    }

    fn check_entity(entity: &TableEntity) -> StoreResult<()> {
        if let Some(name) = entity
            .properties
            .keys()
            .find(|name| name.chars().count() > MAX_PROPERTY_NAME_LEN)
        {
            return Err(StoreError::LimitExceeded(format!(
                "property name of {} characters exceeds {}",
                name.chars().count(),
                MAX_PROPERTY_NAME_LEN
            )));
        }
        let size = entity.size();
        if size > MAX_ENTITY_BYTES {
            return Err(StoreError::LimitExceeded(format!(
                "entity {}/{} is {} bytes, limit {}",
                entity.partition_key, entity.row_key, size, MAX_ENTITY_BYTES
            )));
        }
        Ok(())
    }

    fn check_condition(
        table: &Table,
        partition_key: &str,
        row_key: &str,
        condition: &WriteCondition,
    ) -> StoreResult<()> {
        let existing = table.get(&(partition_key.to_string(), row_key.to_string()));
        let ok = match (condition, existing) {
            (WriteCondition::Any, _) => true,
            (WriteCondition::IfAbsent, existing) => existing.is_none(),
            (WriteCondition::IfMatch(etag), Some(row)) => &row.etag == etag,
            (WriteCondition::IfMatch(_), None) => false,
        };
        if ok {
            Ok(())
        } else if existing.is_none() && matches!(condition, WriteCondition::IfMatch(_)) {
            Err(StoreError::NotFound {
                partition_key: partition_key.to_string(),
                row_key: row_key.to_string(),
            })
        } else {
            Err(StoreError::PreconditionFailed {
                partition_key: partition_key.to_string(),
                row_key: row_key.to_string(),
            })
        }
    }

    fn check_batch(operations: &[StoreOperation]) -> StoreResult<()> {
        if operations.is_empty() {
            return Err(StoreError::InvalidBatch("batch is empty".to_string()));
        }
        if operations.len() > MAX_BATCH_OPERATIONS {
            return Err(StoreError::LimitExceeded(format!(
                "batch of {} operations exceeds {}",
                operations.len(),
                MAX_BATCH_OPERATIONS
            )));
        }

        let partition = operations[0].keys().0;
        let mut seen = std::collections::HashSet::new();
        let mut bytes = 0usize;
        for op in operations {
            let (pk, rk) = op.keys();
            if pk != partition {
                return Err(StoreError::InvalidBatch(format!(
                    "partition keys differ: '{}' and '{}'",
                    partition, pk
                )));
            }
            if !seen.insert(rk) {
                return Err(StoreError::InvalidBatch(format!(
                    "row key '{}' appears more than once",
                    rk
                )));
            }
            if let StoreOperation::Put { entity, .. } = op {
                Self::check_entity(entity)?;
                bytes += entity.size();
            }
        }
        if bytes > MAX_BATCH_BYTES {
            return Err(StoreError::LimitExceeded(format!(
                "batch of {} bytes exceeds {}",
                bytes, MAX_BATCH_BYTES
            )));
        }
        Ok(())
    }
}

impl TableStore for MemoryTableStore {
    fn get(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> StoreResult<Option<StoredRow>> {
        self.check_available()?;
        let tables = self
            .tables
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(tables
            .get(table)
            .and_then(|t| t.get(&(partition_key.to_string(), row_key.to_string())))
            .cloned())
    }

    fn put(
        &self,
        table: &str,
        entity: TableEntity,
        condition: WriteCondition,
    ) -> StoreResult<String> {
        self.check_available()?;
        Self::check_entity(&entity)?;
        let mut tables = self
            .tables
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let rows = tables.entry(table.to_string()).or_default();
        Self::check_condition(rows, &entity.partition_key, &entity.row_key, &condition)?;

        let etag = self.new_etag();
        let key = (entity.partition_key.clone(), entity.row_key.clone());
        rows.insert(
            key,
            StoredRow {
                entity,
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    fn delete(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        condition: WriteCondition,
    ) -> StoreResult<()> {
        self.check_available()?;
        let mut tables = self
            .tables
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let rows = tables.entry(table.to_string()).or_default();
        let key = (partition_key.to_string(), row_key.to_string());
        if !rows.contains_key(&key) {
            return Err(StoreError::NotFound {
                partition_key: partition_key.to_string(),
                row_key: row_key.to_string(),
            });
        }
        Self::check_condition(rows, partition_key, row_key, &condition)?;
        rows.remove(&key);
        Ok(())
    }

    fn scan(&self, table: &str, partition_key: Option<&str>) -> StoreResult<Vec<StoredRow>> {
        self.check_available()?;
        let tables = self
            .tables
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|row| partition_key.map_or(true, |pk| row.entity.partition_key == pk))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn execute_batch(
        &self,
        table: &str,
        operations: Vec<StoreOperation>,
    ) -> StoreResult<Vec<String>> {
        self.check_available()?;
        Self::check_batch(&operations)?;
        let mut tables = self
            .tables
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let rows = tables.entry(table.to_string()).or_default();

        // Every precondition is checked before anything is applied.
        for op in &operations {
            match op {
                StoreOperation::Put { entity, condition } => {
                    Self::check_condition(rows, &entity.partition_key, &entity.row_key, condition)?
                }
                StoreOperation::Delete {
                    partition_key,
                    row_key,
                    condition,
                } => {
                    if !rows.contains_key(&(partition_key.clone(), row_key.clone())) {
                        return Err(StoreError::NotFound {
                            partition_key: partition_key.clone(),
                            row_key: row_key.clone(),
                        });
                    }
                    Self::check_condition(rows, partition_key, row_key, condition)?;
                }
            }
        }

        let mut etags = Vec::with_capacity(operations.len());
        for op in operations {
            match op {
                StoreOperation::Put { entity, .. } => {
                    let etag = self.new_etag();
                    let key = (entity.partition_key.clone(), entity.row_key.clone());
                    rows.insert(
                        key,
                        StoredRow {
                            entity,
                            etag: etag.clone(),
                        },
                    );
                    etags.push(etag);
                }
                StoreOperation::Delete {
                    partition_key,
                    row_key,
                    ..
                } => {
                    rows.remove(&(partition_key, row_key));
                    etags.push(String::new());
                }
            }
        }
        Ok(etags)
    }
}
