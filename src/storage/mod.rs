//! Version storage.
//!
//! A [`VersionStore`] is an append-only ledger of `(record, version, key, value)`
//! facts plus a `(record, version)` index. It owns no business rules: the
//! [`RecordService`](crate::service::RecordService) decides what to append,
//! stores only persist and retrieve rows.
//!
//! Two backends implement the same contract:
//! - [`MemoryVersionStore`]: full history kept in memory.
//! - [`FileVersionStore`]: append-only version log on disk with an
//!   in-memory index rebuilt on open.

mod file;
mod index;
mod memory;

pub use file::{FileVersionStore, StoreConfig};
pub use index::{IndexEntry, VersionIndex};
pub use memory::MemoryVersionStore;

use crate::error::StorageResult;
use crate::types::{FieldRow, FieldSet, RecordId, StoreStats, VersionId, VersionInfo};

/// Persistence contract consumed by the record service.
///
/// Implementations must guarantee:
/// - `append_version` is atomic: a reader never observes a version with a
///   partial field set.
/// - the version id issued by `append_version` is strictly greater than
///   every id previously issued for that record.
pub trait VersionStore: Send + Sync {
    /// Persist `fields` as the complete field set of a new version.
    fn append_version(&self, record: RecordId, fields: &FieldSet) -> StorageResult<VersionInfo>;

    /// Highest version id stored for `record`, if any.
    fn latest_version_id(&self, record: RecordId) -> StorageResult<Option<VersionId>>;

    /// Rows of exactly `(record, version)`.
    ///
    /// Returns `None` if no such version is stored.
    fn fields_for_version(
        &self,
        record: RecordId,
        version: VersionId,
    ) -> StorageResult<Option<Vec<FieldRow>>>;

    /// All version ids of `record` in ascending order.
    fn all_version_ids(&self, record: RecordId) -> StorageResult<Vec<VersionId>>;

    /// Version ids of `record` with their commit times, ascending.
    fn version_history(&self, record: RecordId) -> StorageResult<Vec<VersionInfo>>;

    /// Commit time of `(record, version)`, if stored.
    fn version_info(&self, record: RecordId, version: VersionId)
        -> StorageResult<Option<VersionInfo>>;

    /// Record and version counts.
    fn stats(&self) -> StorageResult<StoreStats>;

    /// Flush pending writes to durable storage.
    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Rows of a field set, sorted by key.
pub(crate) fn to_rows(fields: &FieldSet) -> Vec<FieldRow> {
    let mut rows: Vec<FieldRow> = fields
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    rows.sort();
    rows
}
