//! Chain replication of single rows
//!
//! Writes lock and version the row at the head, propagate the new copy
//! down every writable replica in chain order, write the tail copy
//! unlocked, then release the locks from the tail back to the head.
//! Reads are served by the tail.
//!
//! Propagation across chain positions is strictly sequential; operations
//! on different rows may run concurrently.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::entity::{
    PropertyMap, ReplicatedEntity, RowMetadata, RowOperation, TableEntity, ETAG_WILDCARD,
};
use super::errors::{ErrorClass, RowError, RowResult};
use super::store::{StoreOperation, StoreRegistry, StoreResult, TableStore, WriteCondition};
use crate::configuration::{ConfigurationHandle, InstalledConfiguration};
use crate::observability::{log_event, Event, MetricsRegistry};
use crate::replica::ReplicaInfo;
use crate::view::View;

/// Default time after which a row lock is considered abandoned
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
/// Default delay before retrying a retriable failure
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Partition routing pseudo-property naming the partition key
pub const PARTITION_KEY_PROPERTY: &str = "PartitionKey";
/// Partition routing pseudo-property naming the row key
pub const ROW_KEY_PROPERTY: &str = "RowKey";

/// Lock and retry timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSettings {
    pub lock_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for RowSettings {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RowSettings {
    /// How long to wait before retrying after `error`; `None` means give up.
    pub fn backoff_for(&self, error: &RowError) -> Option<Duration> {
        match error.class() {
            ErrorClass::LockConflict => Some(self.lock_timeout),
            ErrorClass::Retriable => Some(self.retry_delay),
            ErrorClass::Fatal => None,
        }
    }

    /// A lock held at least `lock_timeout` has been abandoned.
    pub fn lock_expired(&self, metadata: &RowMetadata, now: DateTime<Utc>) -> bool {
        match metadata.lock_acquisition_time {
            Some(acquired) => now
                .signed_duration_since(acquired)
                .to_std()
                .map(|held| held >= self.lock_timeout)
                .unwrap_or(false),
            None => true,
        }
    }
}

/// Outcome of [`ReplicatedTable::repair_row`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowRepair {
    NotFound,
    Clean,
    Repaired { version: u64 },
}

#[derive(Debug, Clone)]
pub(crate) struct Replica {
    pub account: String,
    pub store: Arc<dyn TableStore>,
}

/// Replicas of one resolved view
#[derive(Debug)]
pub(crate) struct Chain {
    pub view_name: String,
    pub view_id: u64,
    pub writers: Vec<Replica>,
    pub read_head: Option<Replica>,
    pub tail: Option<Replica>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Propagation {
    Write,
    Repair,
}

/// A table replicated along the chain of its configured view.
#[derive(Debug)]
pub struct ReplicatedTable {
    name: String,
    handle: Arc<ConfigurationHandle>,
    stores: StoreRegistry,
    settings: RowSettings,
    metrics: Arc<MetricsRegistry>,
}

impl ReplicatedTable {
    pub fn new(
        name: impl Into<String>,
        handle: Arc<ConfigurationHandle>,
        stores: StoreRegistry,
    ) -> Self {
        Self {
            name: name.into(),
            handle,
            stores,
            settings: RowSettings::default(),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn with_settings(mut self, settings: RowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &RowSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    // =====================================================================
    // Writes
    // =====================================================================

    pub fn insert(&self, entity: &ReplicatedEntity) -> RowResult<String> {
        self.write(RowOperation::Insert, entity)
    }

    pub fn replace(&self, entity: &ReplicatedEntity) -> RowResult<String> {
        self.write(RowOperation::Replace, entity)
    }

    pub fn merge(&self, entity: &ReplicatedEntity) -> RowResult<String> {
        self.write(RowOperation::Merge, entity)
    }

    /// Tombstone the row. The tombstone is propagated like any write.
    ///
    /// Tombstones are never removed from the stores. A later insert
    /// continues from the tombstone's version, so an ETag taken before the
    /// delete cannot match the re-inserted row, and a replica that missed
    /// the delete is caught up by the same version comparison as any write.
    pub fn delete(&self, entity: &ReplicatedEntity) -> RowResult<String> {
        self.write(RowOperation::Delete, entity)
    }

    pub fn insert_or_replace(&self, entity: &ReplicatedEntity) -> RowResult<String> {
        self.write(RowOperation::InsertOrReplace, entity)
    }

    pub fn insert_or_merge(&self, entity: &ReplicatedEntity) -> RowResult<String> {
        self.write(RowOperation::InsertOrMerge, entity)
    }

    fn write(&self, operation: RowOperation, entity: &ReplicatedEntity) -> RowResult<String> {
        log_event(
            Event::RowOpBegin,
            &[
                ("operation", operation.as_str()),
                ("partition_key", &entity.partition_key),
                ("row_key", &entity.row_key),
                ("table", &self.name),
            ],
        );

        let result = self
            .chain_for(&entity.partition_key, &entity.row_key, Some(&entity.properties))
            .and_then(|chain| {
                let row = self.prepare(&chain, operation, entity, Utc::now())?;
                let etag = row.metadata.etag();
                self.propagate(&chain, vec![row], Propagation::Write)?;
                Ok(etag)
            });

        if result.is_ok() {
            self.metrics.increment_row_writes();
        }
        self.record(
            operation.as_str(),
            &entity.partition_key,
            &entity.row_key,
            &result,
        );
        result
    }

    /// Check a write against the row's current state and build the new,
    /// locked copy.
    pub(crate) fn prepare(
        &self,
        chain: &Chain,
        operation: RowOperation,
        entity: &ReplicatedEntity,
        now: DateTime<Utc>,
    ) -> RowResult<TableEntity> {
        let pk = entity.partition_key.as_str();
        let rk = entity.row_key.as_str();

        if chain.writers.is_empty() {
            return Err(RowError::Retriable(format!(
                "view '{}' is read-only",
                chain.view_name
            )));
        }
        let read_head = chain.read_head.as_ref().ok_or_else(|| {
            RowError::Retriable(format!("view '{}' has no readable replica", chain.view_name))
        })?;

        // A write-only head may hold a newer locked copy than the read head.
        let mut current = read_head.store.get(&self.name, pk, rk)?.map(|row| row.entity);
        let head_copy = match chain.writers.first() {
            Some(head) if head.account != read_head.account => {
                head.store.get(&self.name, pk, rk)?.map(|row| row.entity)
            }
            _ => None,
        };
        let mut abandoned = false;
        for row in current.iter().chain(head_copy.iter()) {
            if !row.metadata.row_lock {
                continue;
            }
            if !self.settings.lock_expired(&row.metadata, now) {
                return Err(RowError::LockConflict {
                    partition_key: pk.to_string(),
                    row_key: rk.to_string(),
                    locked_since: row.metadata.lock_acquisition_time,
                });
            }
            abandoned = true;
        }
        if abandoned {
            self.repair_row_on(chain, pk, rk)?;
            current = read_head.store.get(&self.name, pk, rk)?.map(|row| row.entity);
        }

        if let Some(ref row) = current {
            if row.metadata.view_id > chain.view_id {
                return Err(RowError::Retriable(format!(
                    "row written under view {} but client holds view {}",
                    row.metadata.view_id, chain.view_id
                )));
            }
        }

        let live = current.as_ref().filter(|row| !row.metadata.tombstone);
        if operation.requires_existing() && live.is_none() {
            return Err(RowError::not_found(pk, rk));
        }
        if operation == RowOperation::Insert && live.is_some() {
            return Err(RowError::AlreadyExists {
                partition_key: pk.to_string(),
                row_key: rk.to_string(),
            });
        }
        if operation.checks_etag() {
            let expected = entity.etag.as_deref().filter(|e| *e != ETAG_WILDCARD);
            if let (Some(expected), Some(row)) = (expected, live) {
                if expected != row.metadata.etag() {
                    return Err(RowError::VersionConflict {
                        partition_key: pk.to_string(),
                        row_key: rk.to_string(),
                        expected: expected.to_string(),
                        actual: row.metadata.version,
                    });
                }
            }
        }

        let properties = match operation {
            RowOperation::Merge | RowOperation::InsertOrMerge => {
                let mut merged = live.map(|row| row.properties.clone()).unwrap_or_default();
                merged.extend(entity.properties.clone());
                merged
            }
            RowOperation::Delete => PropertyMap::new(),
            _ => entity.properties.clone(),
        };
        let version = current.as_ref().map_or(1, |row| row.metadata.version + 1);

        Ok(TableEntity {
            partition_key: pk.to_string(),
            row_key: rk.to_string(),
            metadata: RowMetadata::locked(
                version,
                chain.view_id,
                operation == RowOperation::Delete,
                operation,
                now,
            ),
            properties,
        })
    }

    /// Write locked `rows` head→tail (tail unlocked), then unlock tail→head.
    pub(crate) fn propagate(
        &self,
        chain: &Chain,
        rows: Vec<TableEntity>,
        mode: Propagation,
    ) -> RowResult<()> {
        let last = chain.writers.len().saturating_sub(1);
        let mut written = Vec::with_capacity(chain.writers.len());

        for (position, replica) in chain.writers.iter().enumerate() {
            let mut operations = Vec::with_capacity(rows.len());
            for row in &rows {
                let existing = replica
                    .store
                    .get(&self.name, &row.partition_key, &row.row_key)?;
                let condition = match existing {
                    Some(stored) => {
                        self.check_replica_copy(mode, &replica.account, &stored.entity, row)?;
                        stored.condition()
                    }
                    None => WriteCondition::IfAbsent,
                };
                let entity = if position == last {
                    row.with_metadata(row.metadata.unlocked())
                } else {
                    row.clone()
                };
                operations.push(StoreOperation::Put { entity, condition });
            }
            written.push(write_rows(replica.store.as_ref(), &self.name, operations)?);
        }

        for position in (0..last).rev() {
            let operations = rows
                .iter()
                .zip(&written[position])
                .map(|(row, etag)| StoreOperation::Put {
                    entity: row.with_metadata(row.metadata.unlocked()),
                    condition: WriteCondition::IfMatch(etag.clone()),
                })
                .collect();
            write_rows(chain.writers[position].store.as_ref(), &self.name, operations)?;
        }
        Ok(())
    }

    fn check_replica_copy(
        &self,
        mode: Propagation,
        account: &str,
        existing: &TableEntity,
        row: &TableEntity,
    ) -> RowResult<()> {
        let metadata = &existing.metadata;
        match mode {
            Propagation::Write => {
                if metadata.row_lock && !self.settings.lock_expired(metadata, Utc::now()) {
                    return Err(RowError::LockConflict {
                        partition_key: row.partition_key.clone(),
                        row_key: row.row_key.clone(),
                        locked_since: metadata.lock_acquisition_time,
                    });
                }
                if metadata.version >= row.metadata.version {
                    return Err(RowError::Retriable(format!(
                        "replica '{}' already holds version {} of {}/{}",
                        account, metadata.version, row.partition_key, row.row_key
                    )));
                }
            }
            Propagation::Repair => {
                if metadata.version > row.metadata.version {
                    return Err(RowError::Retriable(format!(
                        "replica '{}' is ahead of the repaired copy of {}/{}",
                        account, row.partition_key, row.row_key
                    )));
                }
            }
        }
        Ok(())
    }

    // =====================================================================
    // Reads
    // =====================================================================

    /// Read a row from the tail.
    pub fn retrieve(&self, partition_key: &str, row_key: &str) -> RowResult<ReplicatedEntity> {
        let result = self.chain_for(partition_key, row_key, None).and_then(|chain| {
            let tail = chain.tail.as_ref().ok_or_else(|| {
                RowError::Retriable(format!("view '{}' has no readable replica", chain.view_name))
            })?;
            match tail.store.get(&self.name, partition_key, row_key)? {
                Some(row) if !row.entity.metadata.tombstone => {
                    Ok(ReplicatedEntity::from_stored(&row.entity))
                }
                _ => Err(RowError::not_found(partition_key, row_key)),
            }
        });
        if result.is_ok() {
            self.metrics.increment_row_reads();
        }
        self.record("retrieve", partition_key, row_key, &result);
        result
    }

    /// Live rows of one partition, read from the tail.
    pub fn query_partition(&self, partition_key: &str) -> RowResult<Vec<ReplicatedEntity>> {
        let chain = self.chain_for(partition_key, "", None)?;
        let tail = chain.tail.as_ref().ok_or_else(|| {
            RowError::Retriable(format!("view '{}' has no readable replica", chain.view_name))
        })?;
        let rows = tail.store.scan(&self.name, Some(partition_key))?;
        self.metrics.increment_row_reads();
        Ok(rows
            .iter()
            .filter(|row| !row.entity.metadata.tombstone)
            .map(|row| ReplicatedEntity::from_stored(&row.entity))
            .collect())
    }

    /// Raw copy held by the replica at chain position `index`, metadata
    /// included. Operator path; any replica status is accepted.
    pub fn retrieve_from_replica(
        &self,
        index: usize,
        partition_key: &str,
        row_key: &str,
    ) -> RowResult<Option<TableEntity>> {
        self.with_view(partition_key, row_key, None, |_, _, view| {
            let info = view
                .replica_chain()
                .get(index)
                .ok_or(RowError::UnknownReplica(index))?;
            let replica = self.replica(info)?;
            Ok(replica
                .store
                .get(&self.name, partition_key, row_key)?
                .map(|row| row.entity))
        })
    }

    // =====================================================================
    // Row repair
    // =====================================================================

    /// Finish an abandoned write: re-propagate the locked copy and unlock it.
    pub fn repair_row(&self, partition_key: &str, row_key: &str) -> RowResult<RowRepair> {
        let chain = self.chain_for(partition_key, row_key, None)?;
        self.repair_row_on(&chain, partition_key, row_key)
    }

    pub(crate) fn repair_row_on(
        &self,
        chain: &Chain,
        partition_key: &str,
        row_key: &str,
    ) -> RowResult<RowRepair> {
        let head = chain.writers.first().ok_or_else(|| {
            RowError::Retriable(format!("view '{}' is read-only", chain.view_name))
        })?;

        let mut copies = Vec::with_capacity(2);
        if let Some(read_head) = &chain.read_head {
            copies.extend(read_head.store.get(&self.name, partition_key, row_key)?);
        }
        if chain.read_head.as_ref().map(|r| r.account.as_str()) != Some(head.account.as_str()) {
            copies.extend(head.store.get(&self.name, partition_key, row_key)?);
        }
        if copies.is_empty() {
            return Ok(RowRepair::NotFound);
        }

        let source = copies
            .into_iter()
            .filter(|row| row.entity.metadata.row_lock)
            .max_by_key(|row| row.entity.metadata.version);
        let Some(source) = source else {
            return Ok(RowRepair::Clean);
        };

        let metadata = RowMetadata {
            row_lock: true,
            view_id: chain.view_id,
            lock_acquisition_time: Some(Utc::now()),
            ..source.entity.metadata.clone()
        };
        let version = metadata.version;
        let row = source.entity.with_metadata(metadata);
        self.propagate(chain, vec![row], Propagation::Repair)?;

        self.metrics.add_rows_repaired(1);
        let version_text = version.to_string();
        log_event(
            Event::RowRepaired,
            &[
                ("partition_key", partition_key),
                ("row_key", row_key),
                ("table", &self.name),
                ("version", &version_text),
            ],
        );
        Ok(RowRepair::Repaired { version })
    }

    // =====================================================================
    // Chain resolution
    // =====================================================================

    /// Run `f` against the view serving this row.
    pub(crate) fn with_view<T>(
        &self,
        partition_key: &str,
        row_key: &str,
        properties: Option<&PropertyMap>,
        f: impl FnOnce(&InstalledConfiguration, &str, &View) -> RowResult<T>,
    ) -> RowResult<T> {
        let installed = self.handle.current()?;
        let config = installed.configuration();
        let partition = config
            .is_configured_table(&self.name)
            .and_then(|table| table.partition_on_property.as_deref())
            .and_then(|property| match property {
                PARTITION_KEY_PROPERTY => Some(partition_key.to_string()),
                ROW_KEY_PROPERTY => Some(row_key.to_string()),
                name => properties
                    .and_then(|p| p.get(name))
                    .map(ToString::to_string),
            });
        let (view_name, view) = config.resolve_view(&self.name, partition.as_deref())?;
        f(&installed, view_name, view)
    }

    /// Chain for this row; an expired view must be refreshed first.
    pub(crate) fn chain_for(
        &self,
        partition_key: &str,
        row_key: &str,
        properties: Option<&PropertyMap>,
    ) -> RowResult<Chain> {
        self.with_view(partition_key, row_key, properties, |installed, view_name, view| {
            if installed.is_view_expired(view, Utc::now()) {
                return Err(RowError::Retriable(format!(
                    "lease of view '{}' expired; refresh the configuration",
                    view_name
                )));
            }
            self.chain_from_view(view_name, view)
        })
    }

    pub(crate) fn chain_from_view(&self, view_name: &str, view: &View) -> RowResult<Chain> {
        let writers = view
            .write_view()
            .into_iter()
            .map(|info| self.replica(info))
            .collect::<RowResult<Vec<_>>>()?;
        let read_head = view.read_head().map(|info| self.replica(info)).transpose()?;
        let tail = view.tail().map(|info| self.replica(info)).transpose()?;
        Ok(Chain {
            view_name: view_name.to_string(),
            view_id: view.view_id(),
            writers,
            read_head,
            tail,
        })
    }

    pub(crate) fn replica(&self, info: &ReplicaInfo) -> RowResult<Replica> {
        let store = self
            .stores
            .get(&info.storage_account_name)
            .ok_or_else(|| RowError::UnknownAccount(info.storage_account_name.clone()))?;
        Ok(Replica {
            account: info.storage_account_name.clone(),
            store,
        })
    }

    pub(crate) fn handle(&self) -> &Arc<ConfigurationHandle> {
        &self.handle
    }

    pub(crate) fn record<T>(
        &self,
        operation: &str,
        partition_key: &str,
        row_key: &str,
        result: &RowResult<T>,
    ) {
        let fields = [
            ("operation", operation),
            ("partition_key", partition_key),
            ("row_key", row_key),
            ("table", self.name.as_str()),
        ];
        let error = match result {
            Ok(_) => {
                log_event(Event::RowOpComplete, &fields);
                return;
            }
            Err(error) => error,
        };

        match error {
            RowError::LockConflict { .. } => {
                self.metrics.increment_lock_conflicts();
                log_event(Event::RowLockConflict, &fields);
            }
            RowError::Retriable(reason) => {
                self.metrics.increment_retriable_failures();
                let mut with_reason = fields.to_vec();
                with_reason.push(("reason", reason.as_str()));
                log_event(Event::RowRetriable, &with_reason);
            }
            RowError::VersionConflict { .. } => {
                self.metrics.increment_version_conflicts();
                log_event(Event::RowVersionConflict, &fields);
            }
            _ => {}
        }
    }
}

/// One row through `put`, several through an atomic batch.
pub(crate) fn write_rows(
    store: &dyn TableStore,
    table: &str,
    mut operations: Vec<StoreOperation>,
) -> StoreResult<Vec<String>> {
    if operations.len() == 1 {
        match operations.pop() {
            Some(StoreOperation::Put { entity, condition }) => {
                return store.put(table, entity, condition).map(|etag| vec![etag]);
            }
            Some(other) => operations.push(other),
            None => {}
        }
    }
    store.execute_batch(table, operations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::{ConfiguredTable, ReplicatedTableConfiguration};
    use crate::replica::ReplicaStatus;
    use crate::row::entity::PropertyValue;
    use crate::row::store::MemoryTableStore;

    struct Fixture {
        stores: Vec<Arc<MemoryTableStore>>,
        table: ReplicatedTable,
    }

    fn fixture(statuses: &[ReplicaStatus]) -> Fixture {
        let mut registry = StoreRegistry::new();
        let mut stores = Vec::new();
        let mut chain = Vec::new();
        for (i, status) in statuses.iter().enumerate() {
            let account = format!("account{}", i);
            let store = Arc::new(MemoryTableStore::new());
            registry.register(account.clone(), Arc::clone(&store) as Arc<dyn TableStore>);
            stores.push(store);
            chain.push(ReplicaInfo::new(account, "key", *status));
        }

        let mut config = ReplicatedTableConfiguration::new();
        config.set_view("v1", View::with_chain(1, chain)).unwrap();
        config.set_table(ConfiguredTable::new("orders", "v1")).unwrap();
        let handle = ConfigurationHandle::with_configuration(config).unwrap();

        Fixture {
            stores,
            table: ReplicatedTable::new("orders", handle, registry),
        }
    }

    fn rw3() -> Fixture {
        fixture(&[
            ReplicaStatus::ReadWrite,
            ReplicaStatus::ReadWrite,
            ReplicaStatus::ReadWrite,
        ])
    }

    fn order(rk: &str, qty: i64) -> ReplicatedEntity {
        ReplicatedEntity::new("p1", rk).with_property("Qty", qty)
    }

    #[test]
    fn test_insert_reaches_every_replica_unlocked() {
        let f = rw3();
        assert_eq!(f.table.insert(&order("r1", 1)).unwrap(), "1");

        for store in &f.stores {
            let row = store.get("orders", "p1", "r1").unwrap().unwrap();
            assert_eq!(row.entity.metadata.version, 1);
            assert!(!row.entity.metadata.row_lock);
            assert_eq!(row.entity.metadata.view_id, 1);
        }
        let read = f.table.retrieve("p1", "r1").unwrap();
        assert_eq!(read.get("Qty"), Some(&PropertyValue::Int64(1)));
    }

    #[test]
    fn test_etag_conflict_keeps_version() {
        let f = rw3();
        f.table.insert(&order("r1", 1)).unwrap();
        f.table.replace(&order("r1", 2).with_etag("1")).unwrap();

        assert_eq!(f.table.replace(&order("r1", 3).with_etag("2")).unwrap(), "3");
        let err = f.table.replace(&order("r1", 4).with_etag("2")).unwrap_err();
        assert!(matches!(err, RowError::VersionConflict { actual: 3, .. }));
        assert_eq!(f.table.retrieve("p1", "r1").unwrap().etag.as_deref(), Some("3"));
    }

    #[test]
    fn test_insert_existing_row_fails() {
        let f = rw3();
        f.table.insert(&order("r1", 1)).unwrap();
        assert!(matches!(
            f.table.insert(&order("r1", 1)),
            Err(RowError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_merge_keeps_other_properties() {
        let f = rw3();
        f.table
            .insert(&order("r1", 1).with_property("Note", "first"))
            .unwrap();
        f.table.merge(&order("r1", 5)).unwrap();
        let row = f.table.retrieve("p1", "r1").unwrap();
        assert_eq!(row.get("Qty"), Some(&PropertyValue::Int64(5)));
        assert!(row.get("Note").is_some());
    }

    #[test]
    fn test_delete_then_insert() {
        let f = rw3();
        f.table.insert(&order("r1", 1)).unwrap();
        assert_eq!(f.table.delete(&order("r1", 0)).unwrap(), "2");

        assert!(matches!(
            f.table.retrieve("p1", "r1"),
            Err(RowError::NotFound { .. })
        ));
        let tail = f.stores[2].get("orders", "p1", "r1").unwrap().unwrap();
        assert!(tail.entity.metadata.tombstone);

        assert_eq!(f.table.insert(&order("r1", 9)).unwrap(), "3");
        assert!(f.table.retrieve("p1", "r1").is_ok());
    }

    #[test]
    fn test_replace_missing_row() {
        let f = rw3();
        assert!(matches!(
            f.table.replace(&order("nope", 1)),
            Err(RowError::NotFound { .. })
        ));
    }

    #[test]
    fn test_live_lock_conflicts() {
        let f = rw3();
        f.table.insert(&order("r1", 1)).unwrap();

        // An in-flight write that has only reached the head.
        let head = f.stores[0].get("orders", "p1", "r1").unwrap().unwrap();
        let locked = head.entity.with_metadata(RowMetadata::locked(
            2,
            1,
            false,
            RowOperation::Replace,
            Utc::now(),
        ));
        f.stores[0]
            .put("orders", locked, head.condition())
            .unwrap();

        let err = f.table.replace(&order("r1", 2)).unwrap_err();
        assert_eq!(err.class(), ErrorClass::LockConflict);
        assert_eq!(f.table.metrics().snapshot().lock_conflicts, 1);
        assert_eq!(
            f.table.settings().backoff_for(&err),
            Some(DEFAULT_LOCK_TIMEOUT)
        );
    }

    #[test]
    fn test_abandoned_lock_is_taken_over() {
        let mut f = rw3();
        f.table = f.table.with_settings(RowSettings {
            lock_timeout: Duration::ZERO,
            retry_delay: DEFAULT_RETRY_DELAY,
        });
        f.table.insert(&order("r1", 1)).unwrap();

        // Write died after the head.
        f.stores[1].set_available(false);
        let err = f.table.replace(&order("r1", 2)).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Retriable);
        f.stores[1].set_available(true);
        let head = f.stores[0].get("orders", "p1", "r1").unwrap().unwrap();
        assert!(head.entity.metadata.row_lock);

        assert_eq!(f.table.replace(&order("r1", 3)).unwrap(), "3");
        for store in &f.stores {
            let row = store.get("orders", "p1", "r1").unwrap().unwrap();
            assert_eq!(row.entity.metadata.version, 3);
            assert!(!row.entity.metadata.row_lock);
        }
        assert_eq!(f.table.metrics().snapshot().rows_repaired, 1);
    }

    #[test]
    fn test_live_lock_at_write_only_head_conflicts() {
        let f = fixture(&[ReplicaStatus::WriteOnly, ReplicaStatus::ReadWrite]);
        f.table.insert(&order("r1", 1)).unwrap();

        let head = f.stores[0].get("orders", "p1", "r1").unwrap().unwrap();
        let locked = head.entity.with_metadata(RowMetadata::locked(
            2,
            1,
            false,
            RowOperation::Replace,
            Utc::now(),
        ));
        f.stores[0].put("orders", locked, head.condition()).unwrap();

        let err = f.table.replace(&order("r1", 3)).unwrap_err();
        assert_eq!(err.class(), ErrorClass::LockConflict);
        let read_head = f.stores[1].get("orders", "p1", "r1").unwrap().unwrap();
        assert_eq!(read_head.entity.metadata.version, 1);
    }

    #[test]
    fn test_repair_row_states() {
        let f = rw3();
        assert_eq!(f.table.repair_row("p1", "r1").unwrap(), RowRepair::NotFound);
        f.table.insert(&order("r1", 1)).unwrap();
        assert_eq!(f.table.repair_row("p1", "r1").unwrap(), RowRepair::Clean);
    }

    #[test]
    fn test_read_only_view_refuses_writes() {
        let f = fixture(&[ReplicaStatus::ReadOnly, ReplicaStatus::ReadOnly]);
        let err = f.table.insert(&order("r1", 1)).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Retriable);
    }

    #[test]
    fn test_write_only_head_receives_writes() {
        let f = fixture(&[ReplicaStatus::WriteOnly, ReplicaStatus::ReadWrite]);
        f.table.insert(&order("r1", 1)).unwrap();
        let head = f.stores[0].get("orders", "p1", "r1").unwrap().unwrap();
        assert_eq!(head.entity.metadata.version, 1);
        assert!(!head.entity.metadata.row_lock);
    }

    #[test]
    fn test_retrieve_from_replica() {
        let f = rw3();
        f.table.insert(&order("r1", 1)).unwrap();
        let raw = f.table.retrieve_from_replica(1, "p1", "r1").unwrap().unwrap();
        assert_eq!(raw.metadata.version, 1);
        assert!(matches!(
            f.table.retrieve_from_replica(9, "p1", "r1"),
            Err(RowError::UnknownReplica(9))
        ));
    }

    #[test]
    fn test_unconfigured_table_is_fatal() {
        let f = rw3();
        let other = ReplicatedTable::new("other", Arc::clone(f.table.handle()), StoreRegistry::new());
        let err = other.insert(&order("r1", 1)).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal);
    }
}
