//! Per-location outcomes of quorum reads and writes

use uuid::Uuid;

use super::errors::{majority_of, QuorumError, QuorumResult};
use crate::configuration::ReplicatedTableConfiguration;

/// What one location returned on read
#[derive(Debug, Clone)]
pub enum ReadStatus {
    Success(ReplicatedTableConfiguration),
    NotFound,
    Corrupt(String),
    Unreachable(String),
}

impl ReadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadStatus::Success(_) => "success",
            ReadStatus::NotFound => "not_found",
            ReadStatus::Corrupt(_) => "corrupt",
            ReadStatus::Unreachable(_) => "unreachable",
        }
    }

    pub fn configuration(&self) -> Option<&ReplicatedTableConfiguration> {
        match self {
            ReadStatus::Success(config) => Some(config),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocationRead {
    pub index: usize,
    pub account: String,
    pub status: ReadStatus,
}

impl LocationRead {
    fn describe(&self) -> String {
        match &self.status {
            ReadStatus::Success(config) => format!("{}: id {}", self.account, config.id()),
            ReadStatus::NotFound => format!("{}: not found", self.account),
            ReadStatus::Corrupt(reason) => format!("{}: corrupt ({})", self.account, reason),
            ReadStatus::Unreachable(reason) => {
                format!("{}: unreachable ({})", self.account, reason)
            }
        }
    }
}

/// Every location's answer to one quorum read, in location order.
#[derive(Debug, Clone)]
pub struct QuorumReadResult {
    reads: Vec<LocationRead>,
}

impl QuorumReadResult {
    pub(crate) fn new(mut reads: Vec<LocationRead>) -> Self {
        reads.sort_by_key(|r| r.index);
        Self { reads }
    }

    pub fn reads(&self) -> &[LocationRead] {
        &self.reads
    }

    pub fn location_count(&self) -> usize {
        self.reads.len()
    }

    pub fn success_count(&self) -> usize {
        self.reads
            .iter()
            .filter(|r| r.status.configuration().is_some())
            .count()
    }

    /// Configuration held by a strict majority of all locations.
    ///
    /// Copies agree when they carry the same configuration id.
    pub fn majority(&self) -> QuorumResult<&ReplicatedTableConfiguration> {
        let required = majority_of(self.reads.len());
        let mut best: Option<(&ReplicatedTableConfiguration, usize)> = None;

        for read in &self.reads {
            if let Some(config) = read.status.configuration() {
                let votes = self.votes_for(config.id());
                if best.map_or(true, |(_, b)| votes > b) {
                    best = Some((config, votes));
                }
            }
        }

        match best {
            Some((config, votes)) if votes >= required => Ok(config),
            other => Err(QuorumError::QuorumLoss {
                operation: "read",
                required,
                reached: other.map_or(0, |(_, votes)| votes),
                detail: self.reads.iter().map(LocationRead::describe).collect(),
            }),
        }
    }

    /// Successfully read copy with the highest view id.
    ///
    /// Ties go to the lowest location index.
    pub fn most_recent(&self) -> Option<&ReplicatedTableConfiguration> {
        let mut best: Option<&ReplicatedTableConfiguration> = None;
        for config in self.reads.iter().filter_map(|r| r.status.configuration()) {
            if best.map_or(true, |b| config.max_view_id() > b.max_view_id()) {
                best = Some(config);
            }
        }
        best
    }

    /// Locations that do not hold configuration `id`.
    pub fn locations_missing(&self, id: Uuid) -> Vec<usize> {
        self.reads
            .iter()
            .filter(|r| r.status.configuration().map(|c| c.id()) != Some(id))
            .map(|r| r.index)
            .collect()
    }

    fn votes_for(&self, id: Uuid) -> usize {
        self.reads
            .iter()
            .filter(|r| r.status.configuration().map(|c| c.id()) == Some(id))
            .count()
    }
}

/// What one location returned on write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    Success,
    Failed(String),
    /// Still running when the majority acknowledged
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationWrite {
    pub index: usize,
    pub account: String,
    pub status: WriteStatus,
}

/// Overall outcome of a quorum write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumWriteCode {
    Success,
    QuorumNotReached,
}

/// Per-location outcomes of one quorum write.
///
/// A failed write at a minority is not rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumWriteResult {
    writes: Vec<LocationWrite>,
    code: QuorumWriteCode,
}

impl QuorumWriteResult {
    pub(crate) fn new(mut writes: Vec<LocationWrite>) -> Self {
        writes.sort_by_key(|w| w.index);
        let successes = writes
            .iter()
            .filter(|w| w.status == WriteStatus::Success)
            .count();
        let code = if successes >= majority_of(writes.len()) {
            QuorumWriteCode::Success
        } else {
            QuorumWriteCode::QuorumNotReached
        };
        Self { writes, code }
    }

    pub fn writes(&self) -> &[LocationWrite] {
        &self.writes
    }

    pub fn code(&self) -> QuorumWriteCode {
        self.code
    }

    pub fn success_count(&self) -> usize {
        self.writes
            .iter()
            .filter(|w| w.status == WriteStatus::Success)
            .count()
    }

    /// Locations whose write had not finished when the result was built.
    pub fn pending(&self) -> Vec<usize> {
        self.writes
            .iter()
            .filter(|w| w.status == WriteStatus::Pending)
            .map(|w| w.index)
            .collect()
    }

    /// Replace pending entries with the outcomes of their settled writes.
    pub fn absorb(&mut self, settled: Vec<LocationWrite>) {
        for write in settled {
            let slot = self
                .writes
                .iter_mut()
                .find(|w| w.index == write.index && w.status == WriteStatus::Pending);
            if let Some(slot) = slot {
                *slot = write;
            }
        }
    }

    /// Turn a missed quorum into an error.
    pub fn into_result(self) -> QuorumResult<Self> {
        if self.code == QuorumWriteCode::Success {
            return Ok(self);
        }
        Err(QuorumError::QuorumLoss {
            operation: "write",
            required: majority_of(self.writes.len()),
            reached: self.success_count(),
            detail: self
                .writes
                .iter()
                .map(|w| match &w.status {
                    WriteStatus::Success => format!("{}: written", w.account),
                    WriteStatus::Failed(reason) => format!("{}: {}", w.account, reason),
                    WriteStatus::Pending => format!("{}: pending", w.account),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(index: usize, status: ReadStatus) -> LocationRead {
        LocationRead {
            index,
            account: format!("acct{}", index),
            status,
        }
    }

    #[test]
    fn test_majority_two_of_three() {
        let a = ReplicatedTableConfiguration::new();
        let result = QuorumReadResult::new(vec![
            read(0, ReadStatus::Success(a.clone())),
            read(1, ReadStatus::Success(a.clone())),
            read(2, ReadStatus::NotFound),
        ]);
        assert_eq!(result.majority().unwrap().id(), a.id());
        assert_eq!(result.locations_missing(a.id()), vec![2]);
    }

    #[test]
    fn test_split_vote_is_quorum_loss() {
        let a = ReplicatedTableConfiguration::new();
        let b = ReplicatedTableConfiguration::new();
        let result = QuorumReadResult::new(vec![
            read(0, ReadStatus::Success(a)),
            read(1, ReadStatus::Success(b)),
            read(2, ReadStatus::Unreachable("timeout".into())),
        ]);
        match result.majority() {
            Err(QuorumError::QuorumLoss {
                required, reached, ..
            }) => {
                assert_eq!(required, 2);
                assert_eq!(reached, 1);
            }
            other => panic!("expected quorum loss, got {:?}", other),
        }
    }

    #[test]
    fn test_write_code() {
        let ok = |index| LocationWrite {
            index,
            account: format!("acct{}", index),
            status: WriteStatus::Success,
        };
        let failed = |index| LocationWrite {
            index,
            account: format!("acct{}", index),
            status: WriteStatus::Failed("offline".into()),
        };

        let result = QuorumWriteResult::new(vec![ok(0), ok(1), failed(2)]);
        assert_eq!(result.code(), QuorumWriteCode::Success);

        let result = QuorumWriteResult::new(vec![ok(0), failed(1), failed(2)]);
        assert_eq!(result.code(), QuorumWriteCode::QuorumNotReached);
        assert!(result.into_result().is_err());

        // Two of four is not a strict majority.
        let result = QuorumWriteResult::new(vec![ok(0), ok(1), failed(2), failed(3)]);
        assert_eq!(result.code(), QuorumWriteCode::QuorumNotReached);
    }
}
