//! Chain consistency checks and table catch-up
//!
//! For every row of a view, compared between the read head and the tail:
//!
//! - head version ≥ tail version
//! - a row at the head but missing at the tail is locked at the head
//! - a row at the tail also exists at the head
//! - once the head copy is unlocked, the tail copy is identical to it

use std::collections::BTreeMap;

use super::errors::{RowError, RowResult};
use super::protocol::ReplicatedTable;
use super::store::{StoreError, StoredRow, WriteCondition};
use crate::configuration::ConfigurationError;
use crate::observability::{log_event, Event};
use crate::replica::ReplicaStatus;
use crate::view::View;

/// What is wrong with one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InconsistencyKind {
    TailAhead { head_version: u64, tail_version: u64 },
    MissingAtTail { head_version: u64 },
    MissingAtHead { tail_version: u64 },
    Diverged { head_version: u64, tail_version: u64 },
}

/// A row violating the head/tail invariant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInconsistency {
    pub view: String,
    pub partition_key: String,
    pub row_key: String,
    pub kind: InconsistencyKind,
}

/// Result of [`ReplicatedTable::repair_table`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TableRepairReport {
    /// Rows copied to a catching-up head
    pub rows_copied: u64,
    /// Rows already current
    pub rows_current: u64,
    /// Locked rows, or rows changed during the copy
    pub rows_skipped: u64,
}

type Rows = BTreeMap<(String, String), StoredRow>;

impl ReplicatedTable {
    /// Report every head/tail invariant violation across the table's views.
    pub fn check_chain_consistency(&self) -> RowResult<Vec<ChainInconsistency>> {
        let mut found = Vec::new();
        for (view_name, view) in self.table_views()? {
            let chain = self.chain_from_view(&view_name, &view)?;
            let (Some(head), Some(tail)) = (chain.read_head, chain.tail) else {
                continue;
            };
            if head.account == tail.account {
                continue;
            }

            let head_rows = index(head.store.scan(self.name(), None)?);
            let tail_rows = index(tail.store.scan(self.name(), None)?);

            for (key, head_row) in &head_rows {
                let head_meta = &head_row.entity.metadata;
                let kind = match tail_rows.get(key) {
                    None if head_meta.row_lock => None,
                    None => Some(InconsistencyKind::MissingAtTail {
                        head_version: head_meta.version,
                    }),
                    Some(tail_row) => {
                        let tail_meta = &tail_row.entity.metadata;
                        if tail_meta.version > head_meta.version {
                            Some(InconsistencyKind::TailAhead {
                                head_version: head_meta.version,
                                tail_version: tail_meta.version,
                            })
                        } else if !head_meta.row_lock && tail_row.entity != head_row.entity {
                            Some(InconsistencyKind::Diverged {
                                head_version: head_meta.version,
                                tail_version: tail_meta.version,
                            })
                        } else {
                            None
                        }
                    }
                };
                if let Some(kind) = kind {
                    found.push(self.inconsistency(&view_name, key, kind));
                }
            }

            for (key, tail_row) in &tail_rows {
                if !head_rows.contains_key(key) {
                    let kind = InconsistencyKind::MissingAtHead {
                        tail_version: tail_row.entity.metadata.version,
                    };
                    found.push(self.inconsistency(&view_name, key, kind));
                }
            }
        }
        Ok(found)
    }

    /// Copy rows from the read head to a `WriteOnly` head that is missing
    /// them or holds an older version.
    ///
    /// Run before `enable_read_write_on_replica` promotes the head.
    pub fn repair_table(&self) -> RowResult<TableRepairReport> {
        let mut report = TableRepairReport::default();

        for (view_name, view) in self.table_views()? {
            let Some(target) = view.active_replicas().next() else {
                continue;
            };
            if target.status != ReplicaStatus::WriteOnly {
                continue;
            }
            let Some(source) = view.read_head() else {
                continue;
            };
            let target = self.replica(target)?;
            let source = self.replica(source)?;

            for row in source.store.scan(self.name(), None)? {
                let entity = row.entity;
                if entity.metadata.row_lock {
                    report.rows_skipped += 1;
                    continue;
                }
                let existing = target
                    .store
                    .get(self.name(), &entity.partition_key, &entity.row_key)?;
                let condition = match existing {
                    Some(ref copy) if copy.entity == entity => {
                        report.rows_current += 1;
                        continue;
                    }
                    Some(ref copy) if copy.entity.metadata.version > entity.metadata.version => {
                        report.rows_skipped += 1;
                        continue;
                    }
                    Some(copy) => copy.condition(),
                    None => WriteCondition::IfAbsent,
                };
                match target.store.put(self.name(), entity, condition) {
                    Ok(_) => report.rows_copied += 1,
                    Err(StoreError::PreconditionFailed { .. }) | Err(StoreError::NotFound { .. }) => {
                        report.rows_skipped += 1
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let copied = report.rows_copied.to_string();
            let skipped = report.rows_skipped.to_string();
            log_event(
                Event::TableRepaired,
                &[
                    ("copied", &copied),
                    ("skipped", &skipped),
                    ("table", self.name()),
                    ("target", &target.account),
                    ("view", &view_name),
                ],
            );
        }

        self.metrics().add_rows_repaired(report.rows_copied);
        Ok(report)
    }

    /// Every view the table's binding can route to.
    fn table_views(&self) -> RowResult<Vec<(String, View)>> {
        let installed = self.handle().current()?;
        let config = installed.configuration();
        let binding = config
            .is_configured_table(self.name())
            .ok_or_else(|| ConfigurationError::TableNotConfigured(self.name().to_string()))?;

        binding
            .referenced_views()
            .into_iter()
            .map(|name| {
                config
                    .get_view(name)
                    .map(|view| (name.to_string(), view.clone()))
                    .ok_or_else(|| {
                        RowError::from(ConfigurationError::TableViewNotFound {
                            table: self.name().to_string(),
                            view: name.to_string(),
                        })
                    })
            })
            .collect()
    }

    fn inconsistency(
        &self,
        view: &str,
        key: &(String, String),
        kind: InconsistencyKind,
    ) -> ChainInconsistency {
        log_event(
            Event::ChainInconsistent,
            &[
                ("partition_key", &key.0),
                ("row_key", &key.1),
                ("table", self.name()),
                ("view", view),
            ],
        );
        ChainInconsistency {
            view: view.to_string(),
            partition_key: key.0.clone(),
            row_key: key.1.clone(),
            kind,
        }
    }
}

fn index(rows: Vec<StoredRow>) -> Rows {
    rows.into_iter()
        .map(|row| {
            (
                (row.entity.partition_key.clone(), row.entity.row_key.clone()),
                row,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::configuration::{ConfigurationHandle, ConfiguredTable, ReplicatedTableConfiguration};
    use crate::replica::ReplicaInfo;
    use crate::row::entity::ReplicatedEntity;
    use crate::row::store::{MemoryTableStore, StoreRegistry, TableStore};

    fn table(statuses: &[ReplicaStatus]) -> (Vec<Arc<MemoryTableStore>>, ReplicatedTable) {
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
        (stores, ReplicatedTable::new("orders", handle, registry))
    }

    #[test]
    fn test_clean_chain_has_no_inconsistencies() {
        let (_stores, table) = table(&[ReplicaStatus::ReadWrite, ReplicaStatus::ReadWrite]);
        table.insert(&ReplicatedEntity::new("p", "a")).unwrap();
        table.insert(&ReplicatedEntity::new("p", "b")).unwrap();
        assert!(table.check_chain_consistency().unwrap().is_empty());
    }

    #[test]
    fn test_detects_unlocked_row_missing_at_tail() {
        let (stores, table) = table(&[ReplicaStatus::ReadWrite, ReplicaStatus::ReadWrite]);
        table.insert(&ReplicatedEntity::new("p", "a")).unwrap();
        stores[1].delete("orders", "p", "a", WriteCondition::Any).unwrap();

        let found = table.check_chain_consistency().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, InconsistencyKind::MissingAtTail { head_version: 1 });
    }

    #[test]
    fn test_repair_table_catches_up_write_only_head() {
        let (stores, table) = table(&[ReplicaStatus::None, ReplicaStatus::ReadOnly]);
        let row = crate::row::entity::TableEntity {
            partition_key: "p".into(),
            row_key: "a".into(),
            metadata: crate::row::entity::RowMetadata {
                version: 4,
                view_id: 1,
                ..Default::default()
            },
            properties: Default::default(),
        };
        stores[1].put("orders", row, WriteCondition::Any).unwrap();

        // Re-admit account0 at the head.
        let mut config = table.handle().current().unwrap().configuration().clone();
        assert!(config.enable_write_on_replicas("v1", "account0").unwrap());
        table.handle().install(config).unwrap();

        let report = table.repair_table().unwrap();
        assert_eq!(report.rows_copied, 1);
        let copy = stores[0].get("orders", "p", "a").unwrap().unwrap();
        assert_eq!(copy.entity.metadata.version, 4);

        assert_eq!(table.repair_table().unwrap().rows_current, 1);
    }
}
