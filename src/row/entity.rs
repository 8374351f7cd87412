//! Rows, property bags and replication metadata

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// ETag accepted for any version
pub const ETAG_WILDCARD: &str = "*";

/// A typed property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Int64(i64),
    Double(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Guid(Uuid),
    DateTimeOffset(DateTime<Utc>),
}

impl PropertyValue {
    /// Approximate stored size in bytes.
    pub fn size(&self) -> usize {
        match self {
            PropertyValue::String(s) => s.len() * 2,
            PropertyValue::Bytes(b) => b.len(),
            PropertyValue::Int64(_) | PropertyValue::Double(_) => 8,
            PropertyValue::Bool(_) => 1,
            PropertyValue::Guid(_) => 16,
            PropertyValue::DateTimeOffset(_) => 8,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "{}", s),
            PropertyValue::Int64(v) => write!(f, "{}", v),
            PropertyValue::Double(v) => write!(f, "{}", v),
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Bytes(b) => {
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            PropertyValue::Guid(g) => write!(f, "{}", g),
            PropertyValue::DateTimeOffset(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int64(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

/// Named properties of a row
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Row operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowOperation {
    Insert,
    Replace,
    Merge,
    Delete,
    InsertOrReplace,
    InsertOrMerge,
}

impl RowOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowOperation::Insert => "insert",
            RowOperation::Replace => "replace",
            RowOperation::Merge => "merge",
            RowOperation::Delete => "delete",
            RowOperation::InsertOrReplace => "insert_or_replace",
            RowOperation::InsertOrMerge => "insert_or_merge",
        }
    }

    /// Operations that require the row to exist.
    pub fn requires_existing(&self) -> bool {
        matches!(
            self,
            RowOperation::Replace | RowOperation::Merge | RowOperation::Delete
        )
    }

    /// Operations that honour a caller ETag.
    pub fn checks_etag(&self) -> bool {
        self.requires_existing()
    }
}

/// Replication metadata stored with every row.
///
/// Field names are part of the stored row schema.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RowMetadata {
    #[serde(rename = "_rtable_Version")]
    pub version: u64,

    #[serde(rename = "_rtable_RowLock")]
    pub row_lock: bool,

    #[serde(rename = "_rtable_Tombstone")]
    pub tombstone: bool,

    #[serde(rename = "_rtable_ViewId")]
    pub view_id: u64,

    #[serde(rename = "_rtable_LockAcquisitionTime", default)]
    pub lock_acquisition_time: Option<DateTime<Utc>>,

    #[serde(rename = "_rtable_Operation", default)]
    pub operation: Option<RowOperation>,
}

impl RowMetadata {
    /// Metadata for an in-flight write of `version`.
    pub fn locked(
        version: u64,
        view_id: u64,
        tombstone: bool,
        operation: RowOperation,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            version,
            row_lock: true,
            tombstone,
            view_id,
            lock_acquisition_time: Some(now),
            operation: Some(operation),
        }
    }

    /// Same version with the lock released.
    pub fn unlocked(&self) -> Self {
        Self {
            row_lock: false,
            lock_acquisition_time: None,
            operation: None,
            ..self.clone()
        }
    }

    pub fn etag(&self) -> String {
        self.version.to_string()
    }
}

/// A row as held by one replica's table store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntity {
    #[serde(rename = "PartitionKey")]
    pub partition_key: String,

    #[serde(rename = "RowKey")]
    pub row_key: String,

    #[serde(flatten)]
    pub metadata: RowMetadata,

    #[serde(rename = "Properties", default)]
    pub properties: PropertyMap,
}

impl TableEntity {
    /// Approximate stored size in bytes.
    pub fn size(&self) -> usize {
        let keys = (self.partition_key.len() + self.row_key.len()) * 2;
        let properties: usize = self
            .properties
            .iter()
            .map(|(name, value)| name.len() * 2 + value.size())
            .sum();
        keys + properties + 64
    }

    pub fn with_metadata(&self, metadata: RowMetadata) -> Self {
        Self {
            metadata,
            ..self.clone()
        }
    }
}

/// A row as seen by callers of the replicated table.
///
/// `etag` is the row's replication version; `None` or `"*"` skips the
/// optimistic concurrency check.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReplicatedEntity {
    pub partition_key: String,
    pub row_key: String,
    pub properties: PropertyMap,
    pub etag: Option<String>,
}

impl ReplicatedEntity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: PropertyMap::new(),
            etag: None,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Caller view of a stored row.
    pub fn from_stored(entity: &TableEntity) -> Self {
        Self {
            partition_key: entity.partition_key.clone(),
            row_key: entity.row_key.clone(),
            properties: entity.properties.clone(),
            etag: Some(entity.metadata.etag()),
        }
    }
}
