//! Quorum Configuration Distribution
//!
//! - Blob stores, one per storage account
//! - Checksummed configuration documents with history
//! - Majority reads, quorum writes, read repair
//!
//! Writers are expected to be a single control loop; two concurrent
//! publishers are not arbitrated here.

mod blob;
mod document;
mod errors;
mod outcome;
mod service;

pub use blob::{BlobError, BlobResult, BlobStore, LocalBlobStore, MemoryBlobStore};
pub use document::{decode as decode_document, encode as encode_document};
pub use errors::{majority_of, QuorumError, QuorumResult};
pub use outcome::{
    LocationRead, LocationWrite, QuorumReadResult, QuorumWriteCode, QuorumWriteResult,
    ReadStatus, WriteStatus,
};
pub use service::{BlobLocation, ConfigurationService, DEFAULT_READ_TIMEOUT};
