//! Table bindings
//!
//! A binding says which view a table uses, optionally routing rows to
//! per-partition views by the value of one property.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name conventionally used by the default binding.
pub const DEFAULT_TABLE_NAME: &str = "*";

/// A table's binding to views.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfiguredTable {
    pub table_name: String,

    #[serde(default)]
    pub view_name: Option<String>,

    /// Table is still a single live store being adopted into replication.
    #[serde(rename = "ConvertToRTable", default)]
    pub convert_to_rtable: bool,

    #[serde(default)]
    pub partition_on_property: Option<String>,

    /// Partition value → view name. The empty key is ignored.
    #[serde(default)]
    pub partitions_to_view_map: BTreeMap<String, String>,

    #[serde(default)]
    pub use_as_default: bool,
}

impl ConfiguredTable {
    pub fn new(table_name: impl Into<String>, view_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            view_name: Some(view_name.into()),
            ..Default::default()
        }
    }

    /// The default binding, used for tables with no binding of their own.
    pub fn default_binding(view_name: impl Into<String>) -> Self {
        Self {
            use_as_default: true,
            ..Self::new(DEFAULT_TABLE_NAME, view_name)
        }
    }

    pub fn with_conversion_mode(mut self, enabled: bool) -> Self {
        self.convert_to_rtable = enabled;
        self
    }

    pub fn with_partition(
        mut self,
        property: impl Into<String>,
        partitions: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.partition_on_property = Some(property.into());
        self.partitions_to_view_map = partitions.into_iter().collect();
        self
    }

    /// Partition entries with a non-empty key.
    pub fn partition_views(&self) -> impl Iterator<Item = (&str, &str)> {
        self.partitions_to_view_map
            .iter()
            .filter(|(k, _)| !k.is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn has_partitions(&self) -> bool {
        self.partition_views().next().is_some()
    }

    /// Every view name this binding can route to: the default view first,
    /// then partition views.
    pub fn referenced_views(&self) -> Vec<&str> {
        let mut views: Vec<&str> = self.view_name.iter().map(String::as_str).collect();
        for (_, view) in self.partition_views() {
            if !views.contains(&view) {
                views.push(view);
            }
        }
        views
    }

    pub fn references_view(&self, view_name: &str) -> bool {
        self.referenced_views().contains(&view_name)
    }

    /// View for a row whose partition property has `partition_value`.
    pub fn view_for_partition(&self, partition_value: Option<&str>) -> Option<&str> {
        partition_value
            .filter(|v| !v.is_empty())
            .and_then(|v| self.partitions_to_view_map.get(v))
            .map(String::as_str)
            .or(self.view_name.as_deref())
    }
}
