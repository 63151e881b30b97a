//! Core types for the record store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a record. Valid ids are strictly positive.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct RecordId(pub i64);

impl RecordId {
    /// Whether this id may name a record.
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a version, unique and strictly increasing within a record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct VersionId(pub i64);

impl VersionId {
    /// The id given to the first version of a record.
    pub const FIRST: VersionId = VersionId(1);

    /// The following id, or `None` once ids are exhausted.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(VersionId)
    }
}

impl fmt::Debug for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.0)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// The string-to-string mapping held by one version.
pub type FieldSet = HashMap<String, String>;

/// A partial update: `Some` sets a key, `None` removes it, absent keys carry forward.
pub type UpdateRequest = HashMap<String, Option<String>>;

/// One stored `(key, value)` fact of a version.
pub type FieldRow = (String, String);

/// A snapshot of one version of a record.
///
/// Snapshots are owned copies; mutating one never touches stored state.
/// Only `id` and `data` take part in the JSON shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,

    /// Version this snapshot was reconstructed from.
    #[serde(skip)]
    pub version: VersionId,

    /// When the version was committed.
    #[serde(skip)]
    pub created: Timestamp,

    pub data: FieldSet,
}

impl Record {
    /// Value of a field, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

/// Identity and commit time of a stored version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub record: RecordId,
    pub version: VersionId,
    pub created: Timestamp,
}

/// Store statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub record_count: u64,
    pub version_count: u64,
    pub total_size_bytes: u64,
}
