//! Configuration distribution service
//!
//! The authoritative configuration is whatever a strict majority of blob
//! locations hold. Every location is contacted in parallel; each call is
//! bounded by the read timeout, and a timed-out location counts as a
//! failed vote.
//!
//! Reads wait for every location, since read repair needs each answer.
//! Writes return as soon as a strict majority has acknowledged; the
//! remaining locations are reported as pending and finish in the
//! background until [`ConfigurationService::settle`] collects them.
//!
//! Layout per location:
//!
//! ```text
//! <blob_name>/current.json
//! <blob_name>/history/<yyyyMMddHHmmssfff>-<id>.json
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::blob::{BlobError, BlobResult, BlobStore};
use super::document;
use super::errors::{majority_of, QuorumError, QuorumResult};
use super::outcome::{
    LocationRead, LocationWrite, QuorumReadResult, QuorumWriteCode, QuorumWriteResult,
    ReadStatus, WriteStatus,
};
use crate::configuration::{
    ConfigurationHandle, InstalledConfiguration, ReplicatedTableConfiguration,
};
use crate::observability::{log_event, Event, MetricsRegistry};

/// Default per-location call timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// One storage account holding a configuration copy
#[derive(Debug, Clone)]
pub struct BlobLocation {
    pub account: String,
    pub store: Arc<dyn BlobStore>,
}

impl BlobLocation {
    pub fn new(account: impl Into<String>, store: Arc<dyn BlobStore>) -> Self {
        Self {
            account: account.into(),
            store,
        }
    }
}

/// Reads and writes the configuration across all blob locations.
#[derive(Debug)]
pub struct ConfigurationService {
    blob_name: String,
    locations: Vec<BlobLocation>,
    timeout: Duration,
    metrics: Arc<MetricsRegistry>,
    stragglers: Mutex<Vec<Straggler>>,
}

/// A location write still running after its quorum returned
#[derive(Debug)]
struct Straggler {
    index: usize,
    account: String,
    task: JoinHandle<LocationWrite>,
}

impl ConfigurationService {
    pub fn new(blob_name: impl Into<String>, locations: Vec<BlobLocation>) -> QuorumResult<Self> {
        if locations.is_empty() {
            return Err(QuorumError::NoLocations);
        }
        Ok(Self {
            blob_name: blob_name.into(),
            locations,
            timeout: DEFAULT_READ_TIMEOUT,
            metrics: Arc::new(MetricsRegistry::new()),
            stragglers: Mutex::new(Vec::new()),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn locations(&self) -> &[BlobLocation] {
        &self.locations
    }

    pub fn current_path(&self) -> String {
        format!("{}/current.json", self.blob_name)
    }

    pub fn history_prefix(&self) -> String {
        format!("{}/history", self.blob_name)
    }

    fn history_path(&self, configuration: &ReplicatedTableConfiguration) -> String {
        format!(
            "{}/{}-{}.json",
            self.history_prefix(),
            Utc::now().format("%Y%m%d%H%M%S%3f"),
            configuration.id()
        )
    }

    /// Read the current configuration from every location.
    pub async fn retrieve_configuration(&self) -> QuorumReadResult {
        self.metrics.increment_quorum_reads();
        let path = self.current_path();

        let reads = self.locations.iter().enumerate().map(|(index, location)| {
            let path = path.clone();
            let store = Arc::clone(&location.store);
            async move {
                let status = match self.call(move || store.read(&path)).await {
                    Ok(bytes) => match document::decode(&bytes) {
                        Ok(configuration) => match configuration.validate() {
                            Ok(()) => ReadStatus::Success(configuration),
                            Err(e) => ReadStatus::Corrupt(e.to_string()),
                        },
                        Err(reason) => ReadStatus::Corrupt(reason),
                    },
                    Err(BlobError::NotFound(_)) => ReadStatus::NotFound,
                    Err(e) => ReadStatus::Unreachable(e.to_string()),
                };
                log_event(
                    Event::BlobRead,
                    &[("account", &location.account), ("status", status.as_str())],
                );
                LocationRead {
                    index,
                    account: location.account.clone(),
                    status,
                }
            }
        });

        QuorumReadResult::new(join_all(reads).await)
    }

    /// Majority configuration, or `QuorumLoss` naming every location.
    pub async fn read_majority(&self) -> QuorumResult<ReplicatedTableConfiguration> {
        let result = self.retrieve_configuration().await;
        match result.majority() {
            Ok(configuration) => Ok(configuration.clone()),
            Err(e) => {
                self.metrics.increment_quorum_failures();
                log_event(Event::QuorumLost, &[("operation", "read"), ("error", &e.to_string())]);
                Err(e)
            }
        }
    }

    /// Publish `configuration` to the locations in `targets`.
    ///
    /// A dated copy is written to each location's history before the
    /// current document is replaced. The write code is `Success` when a
    /// strict majority of the targets acknowledged.
    pub async fn update_configuration(
        &self,
        configuration: &ReplicatedTableConfiguration,
        targets: &[usize],
    ) -> QuorumResult<QuorumWriteResult> {
        self.publish(configuration, targets, true).await
    }

    /// Publish to every location.
    pub async fn update_all(
        &self,
        configuration: &ReplicatedTableConfiguration,
    ) -> QuorumResult<QuorumWriteResult> {
        let targets: Vec<usize> = (0..self.locations.len()).collect();
        self.update_configuration(configuration, &targets).await
    }

    /// Overwrite the current document at `indexes` without a history entry.
    pub async fn upload_configuration_to_blobs(
        &self,
        indexes: &[usize],
        configuration: &ReplicatedTableConfiguration,
    ) -> QuorumResult<QuorumWriteResult> {
        self.publish(configuration, indexes, false).await
    }

    /// Bring minority locations back in line with the majority copy.
    ///
    /// Returns `None` when every location already agrees.
    pub async fn read_repair(
        &self,
        result: &QuorumReadResult,
    ) -> QuorumResult<Option<QuorumWriteResult>> {
        let majority = result.majority()?;
        let stale = result.locations_missing(majority.id());
        if stale.is_empty() {
            return Ok(None);
        }

        let id = majority.id().to_string();
        let locations = stale
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        log_event(Event::ReadRepair, &[("id", &id), ("locations", &locations)]);

        self.upload_configuration_to_blobs(&stale, majority)
            .await
            .map(Some)
    }

    /// Read the majority configuration and install it into `handle`.
    pub async fn refresh(
        &self,
        handle: &ConfigurationHandle,
    ) -> QuorumResult<Arc<InstalledConfiguration>> {
        let configuration = self.read_majority().await?;
        Ok(handle.install(configuration)?)
    }

    /// History entries at one location, oldest first.
    pub async fn history(&self, index: usize) -> QuorumResult<Vec<String>> {
        let location = self
            .locations
            .get(index)
            .ok_or(QuorumError::UnknownLocation(index))?;
        let store = Arc::clone(&location.store);
        let prefix = self.history_prefix();
        self.call(move || store.list(&prefix))
            .await
            .map_err(|e| QuorumError::Location {
                index,
                reason: e.to_string(),
            })
    }

    async fn publish(
        &self,
        configuration: &ReplicatedTableConfiguration,
        targets: &[usize],
        keep_history: bool,
    ) -> QuorumResult<QuorumWriteResult> {
        if targets.is_empty() {
            return Err(QuorumError::NoLocations);
        }
        if let Some(&bad) = targets.iter().find(|&&i| i >= self.locations.len()) {
            return Err(QuorumError::UnknownLocation(bad));
        }
        configuration.validate()?;

        // A location's writes never overtake each other.
        self.settle().await;

        let body = Arc::new(document::encode(configuration)?);
        let current = self.current_path();
        let history = keep_history.then(|| self.history_path(configuration));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks: Vec<Straggler> = targets
            .iter()
            .map(|&index| Straggler {
                index,
                account: self.locations[index].account.clone(),
                task: self.spawn_write(
                    index,
                    Arc::clone(&body),
                    current.clone(),
                    history.clone(),
                    tx.clone(),
                ),
            })
            .collect();
        drop(tx);

        let required = majority_of(targets.len());
        let mut writes = Vec::with_capacity(targets.len());
        let mut acknowledged = 0;
        while writes.len() < targets.len() && acknowledged < required {
            let Some(write) = rx.recv().await else {
                break;
            };
            if write.status == WriteStatus::Success {
                acknowledged += 1;
            }
            writes.push(write);
        }

        tasks.retain(|t| !writes.iter().any(|w| w.index == t.index));
        for straggler in &tasks {
            writes.push(LocationWrite {
                index: straggler.index,
                account: straggler.account.clone(),
                status: WriteStatus::Pending,
            });
        }
        self.lock_stragglers().extend(tasks);

        let result = QuorumWriteResult::new(writes);
        self.metrics.increment_quorum_writes();

        let id = configuration.id().to_string();
        let acknowledged = result.success_count().to_string();
        let total = targets.len().to_string();
        match result.code() {
            QuorumWriteCode::Success => log_event(
                Event::QuorumWriteCommitted,
                &[("id", &id), ("acknowledged", &acknowledged), ("targets", &total)],
            ),
            QuorumWriteCode::QuorumNotReached => {
                self.metrics.increment_quorum_failures();
                log_event(
                    Event::QuorumWriteFailed,
                    &[("id", &id), ("acknowledged", &acknowledged), ("targets", &total)],
                );
            }
        }
        Ok(result)
    }

    /// Wait for location writes that were still running when their
    /// quorum write returned, and report how they ended.
    pub async fn settle(&self) -> Vec<LocationWrite> {
        let stragglers = std::mem::take(&mut *self.lock_stragglers());
        let mut settled = Vec::with_capacity(stragglers.len());
        for straggler in stragglers {
            settled.push(match straggler.task.await {
                Ok(write) => write,
                Err(join) => LocationWrite {
                    index: straggler.index,
                    account: straggler.account,
                    status: WriteStatus::Failed(join.to_string()),
                },
            });
        }
        settled
    }

    fn lock_stragglers(&self) -> MutexGuard<'_, Vec<Straggler>> {
        self.stragglers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write one location on its own task; the outcome is both sent on
    /// `done` and returned from the task.
    fn spawn_write(
        &self,
        index: usize,
        body: Arc<Vec<u8>>,
        current: String,
        history: Option<String>,
        done: mpsc::UnboundedSender<LocationWrite>,
    ) -> JoinHandle<LocationWrite> {
        let location = self.locations[index].clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let store = Arc::clone(&location.store);
            let outcome = call_with_timeout(timeout, move || {
                if let Some(history) = history {
                    store.write(&history, &body)?;
                }
                store.write(&current, &body)
            })
            .await;
            let status = match outcome {
                Ok(()) => WriteStatus::Success,
                Err(e) => WriteStatus::Failed(e.to_string()),
            };
            log_event(
                Event::BlobWrite,
                &[
                    ("account", &location.account),
                    ("ok", if status == WriteStatus::Success { "true" } else { "false" }),
                ],
            );
            let write = LocationWrite {
                index,
                account: location.account,
                status,
            };
            let _ = done.send(write.clone());
            write
        })
    }

    async fn call<T, F>(&self, f: F) -> BlobResult<T>
    where
        F: FnOnce() -> BlobResult<T> + Send + 'static,
        T: Send + 'static,
    {
        call_with_timeout(self.timeout, f).await
    }
}

/// Run a blocking store call on the blocking pool under `timeout`.
async fn call_with_timeout<T, F>(timeout: Duration, f: F) -> BlobResult<T>
where
    F: FnOnce() -> BlobResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(BlobError::Unavailable(join.to_string())),
        Err(_) => Err(BlobError::Unavailable(format!(
            "timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quorum::MemoryBlobStore;
    use crate::replica::{ReplicaInfo, ReplicaStatus};
    use crate::view::View;

    fn stores(n: usize) -> (Vec<Arc<MemoryBlobStore>>, ConfigurationService) {
        let stores: Vec<Arc<MemoryBlobStore>> =
            (0..n).map(|_| Arc::new(MemoryBlobStore::new())).collect();
        let locations = stores
            .iter()
            .enumerate()
            .map(|(i, s)| {
                BlobLocation::new(format!("acct{}", i), Arc::clone(s) as Arc<dyn BlobStore>)
            })
            .collect();
        let service = ConfigurationService::new("RTableConfig", locations)
            .unwrap()
            .with_timeout(Duration::from_millis(500));
        (stores, service)
    }

    fn config() -> ReplicatedTableConfiguration {
        let mut config = ReplicatedTableConfiguration::new();
        config
            .set_view(
                "v1",
                View::with_chain(
                    1,
                    vec![ReplicaInfo::new("account1", "k", ReplicaStatus::ReadWrite)],
                ),
            )
            .unwrap();
        config
    }

    #[test]
    fn test_requires_locations() {
        assert!(matches!(
            ConfigurationService::new("RTableConfig", vec![]),
            Err(QuorumError::NoLocations)
        ));
    }

    #[tokio::test]
    async fn test_update_then_read_majority() {
        let (_stores, service) = stores(3);
        let config = config();

        let mut result = service.update_all(&config).await.unwrap();
        assert_eq!(result.code(), QuorumWriteCode::Success);
        assert!(result.success_count() >= 2);
        result.absorb(service.settle().await);
        assert_eq!(result.success_count(), 3);
        assert!(result.pending().is_empty());

        let read = service.read_majority().await.unwrap();
        assert_eq!(read.id(), config.id());
        assert_eq!(service.history(0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let (_stores, service) = stores(3);
        let err = service.update_configuration(&config(), &[0, 7]).await.unwrap_err();
        assert_eq!(err, QuorumError::UnknownLocation(7));
    }

    #[tokio::test]
    async fn test_upload_skips_history() {
        let (_stores, service) = stores(3);
        service
            .upload_configuration_to_blobs(&[1], &config())
            .await
            .unwrap();
        assert!(service.history(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_location_times_out() {
        let (stores, service) = stores(3);
        service.update_all(&config()).await.unwrap();
        service.settle().await;
        stores[2].set_latency(Duration::from_secs(2));

        let result = service.retrieve_configuration().await;
        assert!(matches!(result.reads()[2].status, ReadStatus::Unreachable(_)));
        assert!(result.majority().is_ok());
    }

    #[tokio::test]
    async fn test_next_write_waits_for_stragglers() {
        let (stores, service) = stores(3);
        stores[2].set_latency(Duration::from_millis(100));
        let first = config();
        let result = service.update_all(&first).await.unwrap();
        assert_eq!(result.pending(), vec![2]);

        stores[2].set_latency(Duration::ZERO);
        let second = config();
        let result = service.update_all(&second).await.unwrap();
        result.into_result().unwrap();
        service.settle().await;

        let read = service.retrieve_configuration().await;
        assert!(read.locations_missing(second.id()).is_empty());
    }
}
