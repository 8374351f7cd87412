//! Multi-view, multi-table configuration
//!
//! Invariants held after every successful mutation:
//! - every view chain is read-only or a valid write rollout
//! - every table's view and partition views exist
//! - a partition map implies a default view
//! - at most one default binding
//! - a conversion-mode table only reaches views with at most one active replica
//!
//! A rejected mutation leaves the configuration untouched. Any accepted
//! semantic change regenerates `id`.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{ConfigurationError, ConfigurationResult};
use super::table::{ConfiguredTable, DEFAULT_TABLE_NAME};
use crate::observability::{log_event, Event};
use crate::view::{default_lease_duration, lease_from_secs, View};

/// View name given to a legacy single-view document.
pub const LEGACY_VIEW_NAME: &str = "Default";

/// Named views plus named table bindings.
///
/// Deliberately not `PartialEq`: two configurations are distinct epochs even
/// with identical content. Use [`same_content`](Self::same_content).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicatedTableConfiguration {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,

    /// Seconds
    #[serde(default = "default_lease_duration")]
    lease_duration: u64,

    #[serde(default)]
    view_map: BTreeMap<String, View>,

    #[serde(default)]
    table_list: BTreeMap<String, ConfiguredTable>,
}

impl Default for ReplicatedTableConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

fn reject(err: ConfigurationError) -> ConfigurationError {
    log_event(
        Event::ConfigRejected,
        &[("code", err.code()), ("reason", &err.to_string())],
    );
    err
}

impl ReplicatedTableConfiguration {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            lease_duration: default_lease_duration(),
            view_map: BTreeMap::new(),
            table_list: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn lease_duration(&self) -> Duration {
        lease_from_secs(self.lease_duration)
    }

    pub fn set_lease_duration_secs(&mut self, secs: u64) {
        self.lease_duration = secs;
        self.regenerate_id();
    }

    fn regenerate_id(&mut self) {
        self.id = Uuid::new_v4();
    }

    /// Align every view with its namesake in `current` before publishing
    /// over it, so ViewIds never move backwards.
    pub fn sanitize_with_current_configuration(&mut self, current: Option<&Self>) {
        for (name, view) in self.view_map.iter_mut() {
            view.sanitize_with_current_view(current.and_then(|c| c.view_map.get(name)));
        }
        self.regenerate_id();
    }

    // =====================================================================
    // Views
    // =====================================================================

    pub fn get_view(&self, name: &str) -> Option<&View> {
        self.view_map.get(name)
    }

    pub fn views(&self) -> impl Iterator<Item = (&str, &View)> {
        self.view_map.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn view_names(&self) -> impl Iterator<Item = &str> {
        self.view_map.keys().map(String::as_str)
    }

    /// Add or replace a view.
    ///
    /// The view is sanitized against the one it replaces, so its ViewId
    /// only moves forward.
    pub fn set_view(&mut self, name: &str, view: View) -> ConfigurationResult<()> {
        if name.is_empty() {
            return Err(reject(ConfigurationError::EmptyViewName));
        }
        let mut view = view;
        Self::validate_replicas(name, &view).map_err(reject)?;
        view.sanitize_with_current_view(self.view_map.get(name));
        view.throw_if_chain_is_not_valid(name).map_err(reject)?;
        self.check_conversion_mode_for_view(name, &view)
            .map_err(reject)?;

        self.view_map.insert(name.to_string(), view);
        self.regenerate_id();
        Ok(())
    }

    /// Remove a view no table refers to. Removing a missing view is a no-op.
    pub fn remove_view(&mut self, name: &str) -> ConfigurationResult<()> {
        if let Some(table) = self.table_list.values().find(|t| t.references_view(name)) {
            return Err(reject(ConfigurationError::ViewReferenced {
                view: name.to_string(),
                table: table.table_name.clone(),
            }));
        }
        if self.view_map.remove(name).is_some() {
            self.regenerate_id();
        }
        Ok(())
    }

    fn validate_replicas(name: &str, view: &View) -> ConfigurationResult<()> {
        let chain = view.replica_chain();
        for (i, replica) in chain.iter().enumerate() {
            replica.validate(name)?;
            if chain[..i]
                .iter()
                .any(|r| r.storage_account_name == replica.storage_account_name)
            {
                return Err(ConfigurationError::DuplicateReplica {
                    view: name.to_string(),
                    account: replica.storage_account_name.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_conversion_mode_for_view(&self, name: &str, view: &View) -> ConfigurationResult<()> {
        let replicas = view.active_count();
        if replicas <= 1 {
            return Ok(());
        }
        match self
            .table_list
            .values()
            .find(|t| t.convert_to_rtable && t.references_view(name))
        {
            Some(table) => Err(ConfigurationError::ConversionModeViolation {
                table: table.table_name.clone(),
                view: name.to_string(),
                replicas,
            }),
            None => Ok(()),
        }
    }

    // =====================================================================
    // Tables
    // =====================================================================

    pub fn get_table(&self, name: &str) -> Option<&ConfiguredTable> {
        self.table_list.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &ConfiguredTable> {
        self.table_list.values()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.table_list.keys().map(String::as_str)
    }

    /// Add or replace a table binding.
    ///
    /// Setting a default binding clears the flag on the previous default.
    pub fn set_table(&mut self, table: ConfiguredTable) -> ConfigurationResult<()> {
        self.check_table(&table).map_err(reject)?;

        if table.use_as_default {
            for other in self.table_list.values_mut() {
                if other.table_name != table.table_name {
                    other.use_as_default = false;
                }
            }
        }
        self.table_list.insert(table.table_name.clone(), table);
        self.regenerate_id();
        Ok(())
    }

    /// Remove a table binding; no referential side effects.
    pub fn remove_table(&mut self, name: &str) -> Option<ConfiguredTable> {
        let removed = self.table_list.remove(name);
        if removed.is_some() {
            self.regenerate_id();
        }
        removed
    }

    fn check_table(&self, table: &ConfiguredTable) -> ConfigurationResult<()> {
        if table.table_name.is_empty() {
            return Err(ConfigurationError::EmptyTableName);
        }
        if table.has_partitions() && table.view_name.is_none() {
            return Err(ConfigurationError::PartitionWithoutDefaultView(
                table.table_name.clone(),
            ));
        }
        for view_name in table.referenced_views() {
            let view = self.view_map.get(view_name).ok_or_else(|| {
                ConfigurationError::TableViewNotFound {
                    table: table.table_name.clone(),
                    view: view_name.to_string(),
                }
            })?;
            if table.convert_to_rtable && view.active_count() > 1 {
                return Err(ConfigurationError::ConversionModeViolation {
                    table: table.table_name.clone(),
                    view: view_name.to_string(),
                    replicas: view.active_count(),
                });
            }
        }
        Ok(())
    }

    /// Binding for `name`: exact match, else the default binding.
    pub fn is_configured_table(&self, name: &str) -> Option<&ConfiguredTable> {
        self.table_list
            .get(name)
            .or_else(|| self.get_default_configured_table())
    }

    pub fn get_default_configured_table(&self) -> Option<&ConfiguredTable> {
        self.table_list.values().find(|t| t.use_as_default)
    }

    /// View serving `table_name` for a row with `partition_value`.
    pub fn resolve_view(
        &self,
        table_name: &str,
        partition_value: Option<&str>,
    ) -> ConfigurationResult<(&str, &View)> {
        let table = self
            .is_configured_table(table_name)
            .ok_or_else(|| ConfigurationError::TableNotConfigured(table_name.to_string()))?;
        let view_name = table
            .view_for_partition(partition_value)
            .ok_or_else(|| ConfigurationError::TableHasNoView(table_name.to_string()))?;
        self.view_map
            .get_key_value(view_name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigurationError::TableViewNotFound {
                table: table_name.to_string(),
                view: view_name.to_string(),
            })
    }

    // =====================================================================
    // Repair primitives
    // =====================================================================

    /// See [`View::move_replica_to_head_and_set_view_to_read_only`].
    pub fn move_replica_to_head_and_set_view_to_read_only(
        &mut self,
        view_name: &str,
        account: &str,
    ) -> ConfigurationResult<bool> {
        let mut view = self.view_for_repair(view_name)?;
        let changed = view
            .move_replica_to_head_and_set_view_to_read_only(view_name, account)
            .map_err(reject)?;
        self.commit_repair(view_name, view, changed, "move_replica_to_head")
    }

    /// See [`View::enable_write_on_replicas`]. Rejected when a conversion-mode
    /// table bound to the view would see more than one replica.
    pub fn enable_write_on_replicas(
        &mut self,
        view_name: &str,
        head_account: &str,
    ) -> ConfigurationResult<bool> {
        let mut view = self.view_for_repair(view_name)?;
        let changed = view.enable_write_on_replicas(head_account);
        self.commit_repair(view_name, view, changed, "enable_write")
    }

    /// See [`View::enable_read_write_on_replica`].
    pub fn enable_read_write_on_replica(
        &mut self,
        view_name: &str,
        head_account: &str,
    ) -> ConfigurationResult<bool> {
        let mut view = self.view_for_repair(view_name)?;
        let changed = view.enable_read_write_on_replica(head_account);
        self.commit_repair(view_name, view, changed, "enable_read_write")
    }

    fn view_for_repair(&self, view_name: &str) -> ConfigurationResult<View> {
        self.view_map
            .get(view_name)
            .cloned()
            .ok_or_else(|| reject(ConfigurationError::ViewNotFound(view_name.to_string())))
    }

    fn commit_repair(
        &mut self,
        view_name: &str,
        view: View,
        changed: bool,
        operation: &str,
    ) -> ConfigurationResult<bool> {
        if !changed {
            log_event(
                Event::ViewUnchanged,
                &[("operation", operation), ("view", view_name)],
            );
            return Ok(false);
        }
        if let Err(err) = view.throw_if_chain_is_not_valid(view_name) {
            log_event(
                Event::ChainRejected,
                &[("operation", operation), ("view", view_name)],
            );
            return Err(reject(err));
        }
        self.check_conversion_mode_for_view(view_name, &view)
            .map_err(reject)?;

        let view_id = view.view_id().to_string();
        let signature = view.chain_signature();
        self.view_map.insert(view_name.to_string(), view);
        self.regenerate_id();
        log_event(
            Event::ViewMutated,
            &[
                ("operation", operation),
                ("signature", &signature),
                ("view", view_name),
                ("view_id", &view_id),
            ],
        );
        Ok(true)
    }

    // =====================================================================
    // Whole-configuration checks, identity and documents
    // =====================================================================

    /// Re-check every invariant; run before persisting.
    pub fn validate(&self) -> ConfigurationResult<()> {
        for (name, view) in &self.view_map {
            Self::validate_replicas(name, view)?;
            view.throw_if_chain_is_not_valid(name)?;
        }
        let mut default: Option<&str> = None;
        for table in self.table_list.values() {
            self.check_table(table)?;
            if table.use_as_default {
                if let Some(first) = default {
                    return Err(ConfigurationError::DuplicateDefaultTable {
                        first: first.to_string(),
                        second: table.table_name.clone(),
                    });
                }
                default = Some(table.table_name.as_str());
            }
        }
        Ok(())
    }

    /// Content-identical copy under a fresh id.
    pub fn generate_new_config_id(&self) -> Self {
        let mut copy = self.clone();
        copy.regenerate_id();
        copy
    }

    /// Same views, tables and lease, whatever the ids.
    pub fn same_content(&self, other: &Self) -> bool {
        self.lease_duration == other.lease_duration
            && self.view_map == other.view_map
            && self.table_list == other.table_list
    }

    /// Highest ViewId across all views.
    pub fn max_view_id(&self) -> u64 {
        self.view_map.values().map(View::view_id).max().unwrap_or(0)
    }

    pub fn to_json(&self) -> ConfigurationResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a configuration document.
    ///
    /// Fields added by later revisions default when absent. A legacy
    /// single-view document becomes view [`LEGACY_VIEW_NAME`] under a
    /// default table binding.
    pub fn from_json(json: &str) -> ConfigurationResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let is_legacy_view = value.get("ReplicaChain").is_some()
            && value.get("ViewMap").is_none()
            && value.get("TableList").is_none();

        if !is_legacy_view {
            return Ok(serde_json::from_value(value)?);
        }

        let view: View = serde_json::from_value(value)?;
        let mut table_list = BTreeMap::new();
        table_list.insert(
            DEFAULT_TABLE_NAME.to_string(),
            ConfiguredTable::default_binding(LEGACY_VIEW_NAME),
        );
        let lease_duration = u64::try_from(view.lease_duration().num_seconds()).unwrap_or(0);
        let mut view_map = BTreeMap::new();
        view_map.insert(LEGACY_VIEW_NAME.to_string(), view);

        Ok(Self {
            id: Uuid::new_v4(),
            lease_duration,
            view_map,
            table_list,
        })
    }
}
