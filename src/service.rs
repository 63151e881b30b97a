//! Record service: the public contract over a version store.

use crate::engine;
use crate::error::{RecordError, Result};
use crate::storage::VersionStore;
use crate::types::{
    FieldSet, Record, RecordId, StoreStats, UpdateRequest, VersionId, VersionInfo,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What `update` does for a record id with no versions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissingRecordPolicy {
    /// Fail with `RecordNotFound`; records must be created first.
    #[default]
    Reject,

    /// Start the record's history from an empty field set.
    CreateOnFirstUpdate,
}

/// Service configuration.
#[derive(Clone, Debug, Default)]
pub struct ServiceConfig {
    pub missing_record_policy: MissingRecordPolicy,
}

/// The versioned record store.
///
/// Provides a unified interface for:
/// - Reading the latest or a specific version of a record
/// - Listing a record's version history
/// - Creating records and appending new versions
///
/// Writers to the same record are serialized by a per-record lock held
/// across read-latest, derive and append. Writers to different records do
/// not share that lock.
pub struct RecordService<S: VersionStore> {
    store: S,

    config: ServiceConfig,

    /// Per-record write locks. An entry lives only while some writer holds
    /// or waits on it.
    record_locks: Mutex<HashMap<RecordId, Arc<Mutex<()>>>>,
}

impl<S: VersionStore> RecordService<S> {
    /// Create a service with the default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, ServiceConfig::default())
    }

    pub fn with_config(store: S, config: ServiceConfig) -> Self {
        Self {
            store,
            config,
            record_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // --- Reads ---

    /// Get the latest version of a record.
    pub fn get_latest(&self, id: RecordId) -> Result<Record> {
        Self::check_id(id)?;

        let latest = self
            .store
            .latest_version_id(id)?
            .ok_or(RecordError::RecordNotFound(id))?;

        debug!(record = %id, version = %latest, "reading latest version");
        self.load_snapshot(id, latest, RecordError::CorruptVersion(id, latest))
    }

    /// Get a specific version of a record.
    ///
    /// An unknown record and an unknown version of a known record both
    /// fail with `VersionNotFound`.
    pub fn get_version(&self, id: RecordId, version: VersionId) -> Result<Record> {
        Self::check_id(id)?;

        debug!(record = %id, %version, "reading version");
        self.load_snapshot(id, version, RecordError::VersionNotFound(id, version))
    }

    /// All version ids of a record, ascending. Empty if it has no history.
    pub fn list_version_ids(&self, id: RecordId) -> Result<Vec<VersionId>> {
        Self::check_id(id)?;
        Ok(self.store.all_version_ids(id)?)
    }

    /// Version ids with their commit times, ascending.
    pub fn history(&self, id: RecordId) -> Result<Vec<VersionInfo>> {
        Self::check_id(id)?;
        Ok(self.store.version_history(id)?)
    }

    /// Whether a record has at least one version.
    pub fn exists(&self, id: RecordId) -> Result<bool> {
        if !id.is_valid() {
            return Ok(false);
        }
        Ok(self.store.latest_version_id(id)?.is_some())
    }

    // --- Writes ---

    /// Create a record with `fields` as the complete field set of its first version.
    pub fn create(&self, id: RecordId, fields: &FieldSet) -> Result<Record> {
        Self::check_id(id)?;
        Self::check_keys(fields.keys())?;

        self.with_record_lock(id, || {
            if self.store.latest_version_id(id)?.is_some() {
                warn!(record = %id, "create rejected: record already exists");
                return Err(RecordError::AlreadyExists(id));
            }

            let data = engine::initial_field_set(fields);
            self.commit(id, data)
        })
    }

    /// Apply a partial update, producing a new version.
    ///
    /// A record with no versions is handled per
    /// [`ServiceConfig::missing_record_policy`].
    pub fn update(&self, id: RecordId, request: &UpdateRequest) -> Result<Record> {
        Self::check_id(id)?;
        Self::check_keys(request.keys())?;

        self.with_record_lock(id, || {
            let previous = match self.store.latest_version_id(id)? {
                Some(latest) => {
                    self.load_snapshot(id, latest, RecordError::CorruptVersion(id, latest))?
                        .data
                }
                None => match self.config.missing_record_policy {
                    MissingRecordPolicy::Reject => {
                        warn!(record = %id, "update rejected: record does not exist");
                        return Err(RecordError::RecordNotFound(id));
                    }
                    MissingRecordPolicy::CreateOnFirstUpdate => FieldSet::new(),
                },
            };

            let data = engine::derive_next_field_set(&previous, request);
            self.commit(id, data)
        })
    }

    // --- Maintenance ---

    /// Store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats()?)
    }

    /// Flush the store to durable storage.
    pub fn sync(&self) -> Result<()> {
        Ok(self.store.sync()?)
    }

    // --- Private Helpers ---

    /// Append `data` as the next version. Caller holds the record lock.
    fn commit(&self, id: RecordId, data: FieldSet) -> Result<Record> {
        let info = self.store.append_version(id, &data)?;

        info!(record = %id, version = %info.version, fields = data.len(), "committed version");

        Ok(Record {
            id,
            version: info.version,
            created: info.created,
            data,
        })
    }

    /// Reconstruct `(id, version)`, failing with `missing` if the store
    /// doesn't know the version.
    fn load_snapshot(&self, id: RecordId, version: VersionId, missing: RecordError) -> Result<Record> {
        let info = self.store.version_info(id, version)?.ok_or(missing)?;
        let rows = self.store.fields_for_version(id, version)?;
        engine::reconstruct_snapshot(id, version, info.created, rows)
    }

    /// Run `op` while holding the write lock of record `id`.
    fn with_record_lock<T>(&self, id: RecordId, op: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = Arc::clone(self.record_locks.lock().entry(id).or_default());

        let result = {
            let _guard = lock.lock();
            op()
        };

        // Every clone is taken and dropped under the table lock, so a count of
        // one means the table holds the last reference.
        let mut locks = self.record_locks.lock();
        drop(lock);
        if locks
            .get(&id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&id);
        }

        result
    }

    fn check_id(id: RecordId) -> Result<()> {
        if id.is_valid() {
            Ok(())
        } else {
            Err(RecordError::InvalidId(id))
        }
    }

    fn check_keys<'a>(mut keys: impl Iterator<Item = &'a String>) -> Result<()> {
        if keys.any(|key| key.is_empty()) {
            return Err(RecordError::InvalidField("field keys must not be empty".into()));
        }
        Ok(())
    }
}
