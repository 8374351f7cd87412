//! Same-partition batches
//!
//! Every row of a batch is checked before anything is written; the batch
//! then travels down the chain as one atomic store batch per replica.

use std::collections::HashSet;

use chrono::Utc;

use super::entity::{ReplicatedEntity, RowOperation};
use super::errors::{RowError, RowResult};
use super::protocol::{Propagation, ReplicatedTable};

/// Ordered list of row operations on one partition
#[derive(Debug, Clone, Default)]
pub struct TableBatch {
    operations: Vec<(RowOperation, ReplicatedEntity)>,
}

impl TableBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: ReplicatedEntity) -> &mut Self {
        self.push(RowOperation::Insert, entity)
    }

    pub fn replace(&mut self, entity: ReplicatedEntity) -> &mut Self {
        self.push(RowOperation::Replace, entity)
    }

    pub fn merge(&mut self, entity: ReplicatedEntity) -> &mut Self {
        self.push(RowOperation::Merge, entity)
    }

    pub fn delete(&mut self, entity: ReplicatedEntity) -> &mut Self {
        self.push(RowOperation::Delete, entity)
    }

    pub fn insert_or_replace(&mut self, entity: ReplicatedEntity) -> &mut Self {
        self.push(RowOperation::InsertOrReplace, entity)
    }

    pub fn insert_or_merge(&mut self, entity: ReplicatedEntity) -> &mut Self {
        self.push(RowOperation::InsertOrMerge, entity)
    }

    pub fn push(&mut self, operation: RowOperation, entity: ReplicatedEntity) -> &mut Self {
        self.operations.push((operation, entity));
        self
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[(RowOperation, ReplicatedEntity)] {
        &self.operations
    }

    /// Shared partition key; rejects empty batches, mixed partitions and
    /// repeated row keys.
    fn partition_key(&self) -> RowResult<&str> {
        let (_, first) = self
            .operations
            .first()
            .ok_or_else(|| RowError::InvalidBatch("batch is empty".to_string()))?;

        let mut row_keys = HashSet::new();
        for (_, entity) in &self.operations {
            if entity.partition_key != first.partition_key {
                return Err(RowError::InvalidBatch(format!(
                    "partition keys differ: '{}' and '{}'",
                    first.partition_key, entity.partition_key
                )));
            }
            if !row_keys.insert(entity.row_key.as_str()) {
                return Err(RowError::InvalidBatch(format!(
                    "row key '{}' appears more than once",
                    entity.row_key
                )));
            }
        }
        Ok(&first.partition_key)
    }
}

impl ReplicatedTable {
    /// Run `batch` all-or-nothing. Returns the new ETag of each row, in
    /// batch order.
    pub fn execute_batch(&self, batch: &TableBatch) -> RowResult<Vec<String>> {
        let result = self.execute_batch_inner(batch);
        let partition = batch
            .operations()
            .first()
            .map(|(_, e)| e.partition_key.as_str())
            .unwrap_or("");
        self.record("batch", partition, "*", &result);
        if let Ok(ref etags) = result {
            for _ in etags {
                self.metrics().increment_row_writes();
            }
        }
        result
    }

    fn execute_batch_inner(&self, batch: &TableBatch) -> RowResult<Vec<String>> {
        batch.partition_key()?;

        let mut chain = None;
        for (_, entity) in batch.operations() {
            let resolved =
                self.chain_for(&entity.partition_key, &entity.row_key, Some(&entity.properties))?;
            match chain {
                None => chain = Some(resolved),
                Some(ref first) if first.view_name != resolved.view_name => {
                    return Err(RowError::InvalidBatch(format!(
                        "rows map to views '{}' and '{}'",
                        first.view_name, resolved.view_name
                    )));
                }
                Some(_) => {}
            }
        }
        let chain = chain.ok_or_else(|| RowError::InvalidBatch("batch is empty".to_string()))?;

        let now = Utc::now();
        let rows = batch
            .operations()
            .iter()
            .map(|(operation, entity)| self.prepare(&chain, *operation, entity, now))
            .collect::<RowResult<Vec<_>>>()?;
        let etags = rows.iter().map(|row| row.metadata.etag()).collect();

        self.propagate(&chain, rows, Propagation::Write)?;
        Ok(etags)
    }
}
