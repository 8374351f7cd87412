//! Persisted configuration document
//!
//! `{ "Crc32": <u32>, "Configuration": "<configuration json>" }`
//!
//! The checksum covers the configuration text byte for byte. A document
//! without the envelope is read as a bare configuration (older writers).

use serde::{Deserialize, Serialize};

use crate::configuration::{ConfigurationResult, ReplicatedTableConfiguration};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope {
    crc32: u32,
    configuration: String,
}

/// Serialize `configuration` into a blob body.
pub fn encode(configuration: &ReplicatedTableConfiguration) -> ConfigurationResult<Vec<u8>> {
    let text = configuration.to_json()?;
    let envelope = Envelope {
        crc32: crc32fast::hash(text.as_bytes()),
        configuration: text,
    };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}

/// Parse a blob body. The error string describes the corruption.
pub fn decode(bytes: &[u8]) -> Result<ReplicatedTableConfiguration, String> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| format!("not a JSON document: {}", e))?;

    if value.get("Crc32").is_none() {
        let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
        return ReplicatedTableConfiguration::from_json(text).map_err(|e| e.to_string());
    }

    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| format!("malformed envelope: {}", e))?;
    let actual = crc32fast::hash(envelope.configuration.as_bytes());
    if actual != envelope.crc32 {
        return Err(format!(
            "checksum mismatch: stored {:08x}, computed {:08x}",
            envelope.crc32, actual
        ));
    }
    ReplicatedTableConfiguration::from_json(&envelope.configuration).map_err(|e| e.to_string())
}
