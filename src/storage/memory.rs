//! In-memory version store.

use super::{to_rows, VersionStore};
use crate::error::{StorageError, StorageResult};
use crate::types::{FieldRow, FieldSet, RecordId, StoreStats, Timestamp, VersionId, VersionInfo};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// One immutable version held in memory.
#[derive(Clone, Debug)]
struct StoredVersion {
    version: VersionId,
    created: Timestamp,
    rows: Vec<FieldRow>,
}

/// Version store that keeps every record's full history in memory.
///
/// Each record maps to the sequence of its field-set snapshots; nothing is
/// ever overwritten. A single lock guards the map, and each append happens
/// entirely under the write lock.
#[derive(Default)]
pub struct MemoryVersionStore {
    records: RwLock<HashMap<RecordId, Vec<StoredVersion>>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionStore for MemoryVersionStore {
    fn append_version(&self, record: RecordId, fields: &FieldSet) -> StorageResult<VersionInfo> {
        let rows = to_rows(fields);

        let mut records = self.records.write();
        let versions = records.entry(record).or_default();

        let version = match versions.last() {
            Some(latest) => latest
                .version
                .next()
                .ok_or(StorageError::VersionOverflow(record))?,
            None => VersionId::FIRST,
        };
        let created = Timestamp::now();

        versions.push(StoredVersion {
            version,
            created,
            rows,
        });

        debug!(%record, %version, fields = fields.len(), "appended version in memory");

        Ok(VersionInfo {
            record,
            version,
            created,
        })
    }

    fn latest_version_id(&self, record: RecordId) -> StorageResult<Option<VersionId>> {
        Ok(self
            .records
            .read()
            .get(&record)
            .and_then(|versions| versions.last())
            .map(|stored| stored.version))
    }

    fn fields_for_version(
        &self,
        record: RecordId,
        version: VersionId,
    ) -> StorageResult<Option<Vec<FieldRow>>> {
        let records = self.records.read();
        let Some(versions) = records.get(&record) else {
            return Ok(None);
        };

        Ok(versions
            .binary_search_by_key(&version, |stored| stored.version)
            .ok()
            .map(|pos| versions[pos].rows.clone()))
    }

    fn all_version_ids(&self, record: RecordId) -> StorageResult<Vec<VersionId>> {
        Ok(self
            .records
            .read()
            .get(&record)
            .map(|versions| versions.iter().map(|stored| stored.version).collect())
            .unwrap_or_default())
    }

    fn version_history(&self, record: RecordId) -> StorageResult<Vec<VersionInfo>> {
        Ok(self
            .records
            .read()
            .get(&record)
            .map(|versions| {
                versions
                    .iter()
                    .map(|stored| VersionInfo {
                        record,
                        version: stored.version,
                        created: stored.created,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn version_info(
        &self,
        record: RecordId,
        version: VersionId,
    ) -> StorageResult<Option<VersionInfo>> {
        let records = self.records.read();
        let Some(versions) = records.get(&record) else {
            return Ok(None);
        };

        Ok(versions
            .binary_search_by_key(&version, |stored| stored.version)
            .ok()
            .map(|pos| VersionInfo {
                record,
                version,
                created: versions[pos].created,
            }))
    }

    fn stats(&self) -> StorageResult<StoreStats> {
        let records = self.records.read();
        Ok(StoreStats {
            record_count: records.len() as u64,
            version_count: records.values().map(|v| v.len() as u64).sum(),
            total_size_bytes: records
                .values()
                .flatten()
                .flat_map(|stored| stored.rows.iter())
                .map(|(key, value)| (key.len() + value.len()) as u64)
                .sum(),
        })
    }
}
