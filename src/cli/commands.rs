//! CLI command implementations
//!
//! Every command loads client settings, talks to the configuration blob
//! locations through [`ConfigurationService`] and writes one JSON
//! response to stdout. Log lines go to stderr.

use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::configuration::ReplicatedTableConfiguration;
use crate::observability::MetricsRegistry;
use crate::quorum::{
    ConfigurationService, QuorumReadResult, QuorumResult, QuorumWriteResult, ReadStatus,
    WriteStatus,
};
use crate::settings::ClientSettings;

use super::args::{Command, RepairTarget};
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Chain repair applied by a repair command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepairOp {
    MoveToHead,
    EnableWrite,
    EnableReadWrite,
}

impl RepairOp {
    fn as_str(&self) -> &'static str {
        match self {
            RepairOp::MoveToHead => "move_replica_to_head",
            RepairOp::EnableWrite => "enable_write",
            RepairOp::EnableReadWrite => "enable_read_write",
        }
    }

    fn apply(
        &self,
        configuration: &mut ReplicatedTableConfiguration,
        view: &str,
        account: &str,
    ) -> CliResult<bool> {
        let changed = match self {
            RepairOp::MoveToHead => {
                configuration.move_replica_to_head_and_set_view_to_read_only(view, account)?
            }
            RepairOp::EnableWrite => configuration.enable_write_on_replicas(view, account)?,
            RepairOp::EnableReadWrite => {
                configuration.enable_read_write_on_replica(view, account)?
            }
        };
        Ok(changed)
    }
}

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Validate { config } => validate(&config),
        Command::Show { settings } => show(&settings),
        Command::Publish { settings, config } => publish(&settings, &config),
        Command::MoveToHead(target) => repair(&target, RepairOp::MoveToHead),
        Command::EnableWrite(target) => repair(&target, RepairOp::EnableWrite),
        Command::EnableReadWrite(target) => repair(&target, RepairOp::EnableReadWrite),
        Command::ReadRepair { settings } => read_repair(&settings),
        Command::History { settings, location } => history(&settings, location),
    }
}

/// Parse and validate a configuration document without touching any
/// blob location.
pub fn validate(config_path: &Path) -> CliResult<()> {
    let configuration = load_configuration(config_path)?;
    configuration.validate()?;
    write_response(summarize(&configuration))
}

/// Report every location's copy and the majority, if there is one.
pub fn show(settings_path: &Path) -> CliResult<()> {
    let (service, _) = connect(settings_path)?;
    let result = block_on(service.retrieve_configuration())?;

    let majority = match result.majority() {
        Ok(configuration) => summarize(configuration),
        Err(_) => Value::Null,
    };
    write_response(json!({
        "locations": describe_reads(&result),
        "majority": majority,
    }))
}

/// Publish an operator-edited configuration to every location.
///
/// Views are aligned with the currently published ones first, so a
/// changed chain always gets a higher ViewId. With no location holding a
/// configuration yet, the document is published as a first epoch.
pub fn publish(settings_path: &Path, config_path: &Path) -> CliResult<()> {
    let (service, metrics) = connect(settings_path)?;
    let mut configuration = load_configuration(config_path)?;

    let result = block_on(service.retrieve_configuration())?;
    let current = if result.success_count() == 0 {
        None
    } else {
        Some(result.majority()?.clone())
    };

    configuration.sanitize_with_current_configuration(current.as_ref());
    configuration.validate()?;

    let written = write_settled(&service, service.update_all(&configuration))?.into_result()?;
    write_response(json!({
        "configuration": summarize(&configuration),
        "writes": describe_writes(&written),
        "metrics": metrics.snapshot(),
    }))
}

fn repair(target: &RepairTarget, op: RepairOp) -> CliResult<()> {
    let (service, metrics) = connect(&target.settings)?;
    let mut configuration = block_on(service.read_majority())??;

    let changed = op.apply(&mut configuration, &target.view, &target.account)?;
    let writes = if changed {
        metrics.increment_view_mutations();
        let written = write_settled(&service, service.update_all(&configuration))?.into_result()?;
        describe_writes(&written)
    } else {
        Value::Array(Vec::new())
    };

    write_response(json!({
        "operation": op.as_str(),
        "view": target.view,
        "account": target.account,
        "changed": changed,
        "configuration": summarize(&configuration),
        "writes": writes,
        "metrics": metrics.snapshot(),
    }))
}

/// Rewrite locations that disagree with the majority.
pub fn read_repair(settings_path: &Path) -> CliResult<()> {
    let (service, metrics) = connect(settings_path)?;
    let result = block_on(service.retrieve_configuration())?;
    let (repaired, settled) = block_on(async {
        let repaired = service.read_repair(&result).await;
        (repaired, service.settle().await)
    })?;
    let repaired = repaired?.map(|mut written| {
        written.absorb(settled);
        written
    });

    let writes = match &repaired {
        Some(written) => describe_writes(written),
        None => Value::Array(Vec::new()),
    };
    write_response(json!({
        "repaired": repaired.is_some(),
        "writes": writes,
        "metrics": metrics.snapshot(),
    }))
}

/// List history entries at one location.
pub fn history(settings_path: &Path, location: usize) -> CliResult<()> {
    let (service, _) = connect(settings_path)?;
    let entries = block_on(service.history(location))??;
    write_response(json!({
        "location": location,
        "entries": entries,
    }))
}

/// Run a quorum write, then wait for its remaining locations on the same
/// runtime so none is cut short when the command exits.
fn write_settled<F>(service: &ConfigurationService, write: F) -> CliResult<QuorumWriteResult>
where
    F: Future<Output = QuorumResult<QuorumWriteResult>>,
{
    let (result, settled) = block_on(async {
        let result = write.await;
        (result, service.settle().await)
    })?;
    let mut result = result?;
    result.absorb(settled);
    Ok(result)
}

fn connect(settings_path: &Path) -> CliResult<(ConfigurationService, Arc<MetricsRegistry>)> {
    let settings = ClientSettings::load(settings_path)?;
    settings.apply_log_level()?;
    let metrics = Arc::new(MetricsRegistry::new());
    let service = settings
        .configuration_service()?
        .with_metrics(Arc::clone(&metrics));
    Ok((service, metrics))
}

fn load_configuration(path: &Path) -> CliResult<ReplicatedTableConfiguration> {
    let content = fs::read_to_string(path).map_err(|e| {
        CliError::config_error(format!("Failed to read {}: {}", path.display(), e))
    })?;
    Ok(ReplicatedTableConfiguration::from_json(&content)?)
}

/// Drive one service call to completion on a fresh runtime.
fn block_on<F: Future>(future: F) -> CliResult<F::Output> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::runtime_error(format!("Failed to start runtime: {}", e)))?;
    Ok(runtime.block_on(future))
}

fn summarize(configuration: &ReplicatedTableConfiguration) -> Value {
    let views: Vec<Value> = configuration
        .views()
        .map(|(name, view)| {
            json!({
                "name": name,
                "view_id": view.view_id(),
                "chain": view.chain_signature(),
            })
        })
        .collect();
    let tables: Vec<&str> = configuration.table_names().collect();
    json!({
        "id": configuration.id().to_string(),
        "max_view_id": configuration.max_view_id(),
        "lease_duration_secs": configuration.lease_duration().num_seconds(),
        "views": views,
        "tables": tables,
    })
}

fn describe_reads(result: &QuorumReadResult) -> Value {
    let reads: Vec<Value> = result
        .reads()
        .iter()
        .map(|read| {
            let mut entry = json!({
                "index": read.index,
                "account": read.account,
                "status": read.status.as_str(),
            });
            match &read.status {
                ReadStatus::Success(configuration) => {
                    entry["id"] = json!(configuration.id().to_string());
                    entry["max_view_id"] = json!(configuration.max_view_id());
                }
                ReadStatus::Corrupt(reason) | ReadStatus::Unreachable(reason) => {
                    entry["reason"] = json!(reason);
                }
                ReadStatus::NotFound => {}
            }
            entry
        })
        .collect();
    Value::Array(reads)
}

fn describe_writes(result: &QuorumWriteResult) -> Value {
    let writes: Vec<Value> = result
        .writes()
        .iter()
        .map(|write| match &write.status {
            WriteStatus::Success => json!({
                "index": write.index,
                "account": write.account,
                "status": "written",
            }),
            WriteStatus::Failed(reason) => json!({
                "index": write.index,
                "account": write.account,
                "status": "failed",
                "reason": reason,
            }),
            WriteStatus::Pending => json!({
                "index": write.index,
                "account": write.account,
                "status": "pending",
            }),
        })
        .collect();
    Value::Array(writes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::ConfiguredTable;
    use crate::replica::{ReplicaInfo, ReplicaStatus};
    use crate::view::View;
    use tempfile::TempDir;

    fn write_settings(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("rtable.json");
        fs::write(
            &path,
            r#"{
                "blob_locations": [
                    {"account": "c1", "root": "blobs/c1"},
                    {"account": "c2", "root": "blobs/c2"},
                    {"account": "c3", "root": "blobs/c3"}
                ],
                "log_level": "ERROR"
            }"#,
        )
        .unwrap();
        path
    }

    fn write_configuration(dir: &Path) -> std::path::PathBuf {
        let mut view = View::new(1);
        view.push_replica(ReplicaInfo::new("account1", "", ReplicaStatus::ReadWrite));
        view.push_replica(ReplicaInfo::new("account2", "", ReplicaStatus::ReadWrite));
        let mut configuration = ReplicatedTableConfiguration::new();
        configuration.set_view("v1", view).unwrap();
        configuration
            .set_table(ConfiguredTable::new("orders", "v1"))
            .unwrap();

        let path = dir.join("config.json");
        fs::write(&path, configuration.to_json().unwrap()).unwrap();
        path
    }

    #[test]
    fn test_validate_command() {
        let temp = TempDir::new().unwrap();
        let config = write_configuration(temp.path());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validate_missing_file() {
        let err = validate(Path::new("/nonexistent/config.json")).unwrap_err();
        assert_eq!(err.code_str(), "RT_CLI_CONFIG_ERROR");
    }

    #[test]
    fn test_publish_then_repair() {
        let temp = TempDir::new().unwrap();
        let settings = write_settings(temp.path());
        let config = write_configuration(temp.path());

        publish(&settings, &config).unwrap();

        let (service, _) = connect(&settings).unwrap();
        let published = block_on(service.read_majority()).unwrap().unwrap();
        assert_eq!(published.get_view("v1").unwrap().view_id(), 1);

        let target = RepairTarget {
            settings: settings.clone(),
            view: "v1".to_string(),
            account: "account2".to_string(),
        };
        repair(&target, RepairOp::MoveToHead).unwrap();

        let repaired = block_on(service.read_majority()).unwrap().unwrap();
        let view = repaired.get_view("v1").unwrap();
        assert_eq!(view.view_id(), 2);
        assert_eq!(view.replica_chain()[0].storage_account_name, "account2");
        assert_ne!(repaired.id(), published.id());
    }

    #[test]
    fn test_repair_without_quorum_fails() {
        let temp = TempDir::new().unwrap();
        let settings = write_settings(temp.path());
        let target = RepairTarget {
            settings,
            view: "v1".to_string(),
            account: "account1".to_string(),
        };
        let err = repair(&target, RepairOp::EnableWrite).unwrap_err();
        assert_eq!(err.code_str(), "RT_QUORUM_LOSS");
    }
}
