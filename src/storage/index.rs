//! In-memory version index.

use crate::error::{StorageError, StorageResult};
use crate::types::{RecordId, Timestamp, VersionId, VersionInfo};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Location and commit time of one stored version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub version: VersionId,
    pub offset: u64,
    pub created: Timestamp,
}

/// Index mapping `(record, version)` to log offsets.
///
/// Entries per record are kept in ascending version order, which the index
/// enforces on insert.
#[derive(Default)]
pub struct VersionIndex {
    entries: RwLock<HashMap<RecordId, Vec<IndexEntry>>>,
}

impl VersionIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a version to the index.
    ///
    /// Fails if `version` is not newer than the record's latest version.
    pub fn add(
        &self,
        record: RecordId,
        version: VersionId,
        offset: u64,
        created: Timestamp,
    ) -> StorageResult<()> {
        let mut entries = self.entries.write();
        let versions = entries.entry(record).or_default();

        if let Some(latest) = versions.last() {
            if version <= latest.version {
                return Err(StorageError::NonMonotonic {
                    record,
                    version,
                    latest: latest.version,
                });
            }
        }

        versions.push(IndexEntry {
            version,
            offset,
            created,
        });
        Ok(())
    }

    /// Latest version of a record.
    pub fn latest(&self, record: RecordId) -> Option<VersionId> {
        self.entries
            .read()
            .get(&record)
            .and_then(|versions| versions.last())
            .map(|entry| entry.version)
    }

    /// Look up exactly `(record, version)`.
    pub fn get(&self, record: RecordId, version: VersionId) -> Option<IndexEntry> {
        let entries = self.entries.read();
        let versions = entries.get(&record)?;
        versions
            .binary_search_by_key(&version, |entry| entry.version)
            .ok()
            .map(|pos| versions[pos])
    }

    /// All version ids of a record, ascending.
    pub fn versions(&self, record: RecordId) -> Vec<VersionId> {
        self.entries
            .read()
            .get(&record)
            .map(|versions| versions.iter().map(|entry| entry.version).collect())
            .unwrap_or_default()
    }

    /// Version ids with commit times, ascending.
    pub fn history(&self, record: RecordId) -> Vec<VersionInfo> {
        self.entries
            .read()
            .get(&record)
            .map(|versions| {
                versions
                    .iter()
                    .map(|entry| VersionInfo {
                        record,
                        version: entry.version,
                        created: entry.created,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of records with at least one version.
    pub fn record_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Total number of indexed versions.
    pub fn version_count(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }
}
