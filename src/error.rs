//! Error types for the record store.

use crate::types::{RecordId, VersionId};
use thiserror::Error;

/// Errors raised by a [`VersionStore`](crate::storage::VersionStore) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Version {version} for record {record} is not newer than {latest}")]
    NonMonotonic {
        record: RecordId,
        version: VersionId,
        latest: VersionId,
    },

    #[error("Record {0} has run out of version ids")]
    VersionOverflow(RecordId),
}

impl From<rmp_serde::encode::Error> for StorageError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StorageError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StorageError::Deserialization(e.to_string())
    }
}

/// Errors returned by [`RecordService`](crate::service::RecordService).
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Invalid record id: {0} (must be a positive number)")]
    InvalidId(RecordId),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Version not found: record {0}, version {1}")]
    VersionNotFound(RecordId, VersionId),

    #[error("Record already exists: {0}")]
    AlreadyExists(RecordId),

    #[error("Corrupt version: record {0}, version {1} has no stored fields")]
    CorruptVersion(RecordId, VersionId),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl RecordError {
    /// Whether the caller is at fault (a 4xx-class condition).
    ///
    /// Everything else is a server-side fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RecordError::InvalidId(_)
                | RecordError::InvalidField(_)
                | RecordError::RecordNotFound(_)
                | RecordError::VersionNotFound(..)
                | RecordError::AlreadyExists(_)
        )
    }
}

/// Result type for storage backends.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type for record service operations.
pub type Result<T> = std::result::Result<T, RecordError>;
