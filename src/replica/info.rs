//! Replica identity and status

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::configuration::{ConfigurationError, ConfigurationResult};

/// Role of a replica inside its chain.
///
/// `None` parks a replica: it stays in the chain as a placeholder but takes
/// no traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReplicaStatus {
    #[default]
    None,
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl ReplicaStatus {
    /// Serves reads.
    pub fn is_readable(&self) -> bool {
        matches!(self, ReplicaStatus::ReadOnly | ReplicaStatus::ReadWrite)
    }

    /// Accepts writes.
    pub fn is_writable(&self) -> bool {
        matches!(self, ReplicaStatus::WriteOnly | ReplicaStatus::ReadWrite)
    }

    /// Takes part in the chain at all.
    pub fn is_active(&self) -> bool {
        *self != ReplicaStatus::None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaStatus::None => "None",
            ReplicaStatus::ReadOnly => "ReadOnly",
            ReplicaStatus::WriteOnly => "WriteOnly",
            ReplicaStatus::ReadWrite => "ReadWrite",
        }
    }

    fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(ReplicaStatus::None),
            1 => Some(ReplicaStatus::ReadOnly),
            2 => Some(ReplicaStatus::WriteOnly),
            3 => Some(ReplicaStatus::ReadWrite),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "None" => Some(ReplicaStatus::None),
            "ReadOnly" => Some(ReplicaStatus::ReadOnly),
            "WriteOnly" => Some(ReplicaStatus::WriteOnly),
            "ReadWrite" => Some(ReplicaStatus::ReadWrite),
            _ => None,
        }
    }
}

impl fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ReplicaStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// Older documents store the status as its numeric code.
impl<'de> Deserialize<'de> for ReplicaStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Code(u64),
        }

        let parsed = match Repr::deserialize(deserializer)? {
            Repr::Name(name) => ReplicaStatus::from_name(&name),
            Repr::Code(code) => ReplicaStatus::from_code(code),
        };
        parsed.ok_or_else(|| serde::de::Error::custom("unknown replica status"))
    }
}

/// One store in a replica chain.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicaInfo {
    pub storage_account_name: String,

    #[serde(default)]
    pub storage_account_key: String,

    #[serde(default)]
    pub status: ReplicaStatus,

    /// ViewId at which this replica entered the chain
    #[serde(default)]
    pub view_in_which_added_to_chain: u64,
}

const ACCOUNT_NAME_PATTERN: &str = r"^[a-z0-9]{3,24}$";

fn account_name_pattern() -> Result<&'static Regex, regex::Error> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let compiled = Regex::new(ACCOUNT_NAME_PATTERN)?;
    Ok(PATTERN.get_or_init(|| compiled))
}

impl ReplicaInfo {
    pub fn new(
        storage_account_name: impl Into<String>,
        storage_account_key: impl Into<String>,
        status: ReplicaStatus,
    ) -> Self {
        Self {
            storage_account_name: storage_account_name.into(),
            storage_account_key: storage_account_key.into(),
            status,
            view_in_which_added_to_chain: 0,
        }
    }

    pub fn is_readable(&self) -> bool {
        self.status.is_readable()
    }

    pub fn is_writable(&self) -> bool {
        self.status.is_writable()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Account names follow the store's naming rule: 3 to 24 lowercase
    /// letters or digits.
    pub fn validate(&self, view_name: &str) -> ConfigurationResult<()> {
        if self.storage_account_name.is_empty() {
            return Err(ConfigurationError::InvalidReplica {
                view: view_name.to_string(),
                reason: "storage account name is empty".to_string(),
            });
        }
        let pattern = account_name_pattern().map_err(|e| ConfigurationError::InvalidReplica {
            view: view_name.to_string(),
            reason: format!("account name rule: {}", e),
        })?;
        if !pattern.is_match(&self.storage_account_name) {
            return Err(ConfigurationError::InvalidReplica {
                view: view_name.to_string(),
                reason: format!(
                    "storage account name '{}' must be 3-24 lowercase letters or digits",
                    self.storage_account_name
                ),
            });
        }
        Ok(())
    }
}

// Keys stay out of Debug output, and therefore out of logs.
impl fmt::Debug for ReplicaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaInfo")
            .field("storage_account_name", &self.storage_account_name)
            .field("storage_account_key", &"<redacted>")
            .field("status", &self.status)
            .field(
                "view_in_which_added_to_chain",
                &self.view_in_which_added_to_chain,
            )
            .finish()
    }
}
