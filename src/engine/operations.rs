//! Field-set operations.

use crate::error::{RecordError, Result};
use crate::types::{FieldRow, FieldSet, Record, RecordId, Timestamp, UpdateRequest, VersionId};

/// Compute the field set of the next version.
///
/// Starts from a copy of `previous`, then for each key in `update`:
/// `Some(value)` inserts or overwrites, `None` removes the key if present.
/// Keys not mentioned in `update` carry forward unchanged.
pub fn derive_next_field_set(previous: &FieldSet, update: &UpdateRequest) -> FieldSet {
    let mut next = previous.clone();

    for (key, value) in update {
        match value {
            Some(value) => {
                next.insert(key.clone(), value.clone());
            }
            None => {
                next.remove(key);
            }
        }
    }

    next
}

/// Field set of a record's first version.
///
/// Same as deriving from an empty field set with every field as a set.
pub fn initial_field_set(fields: &FieldSet) -> FieldSet {
    let update: UpdateRequest = fields
        .iter()
        .map(|(key, value)| (key.clone(), Some(value.clone())))
        .collect();
    derive_next_field_set(&FieldSet::new(), &update)
}

/// Rebuild a snapshot from the rows stored for a version.
///
/// `rows` is `None` when the store indexes the version but has no row set
/// for it, which is an internal consistency failure. An empty row set is a
/// version whose fields were all removed. If a key repeats, the last row wins.
pub fn reconstruct_snapshot(
    id: RecordId,
    version: VersionId,
    created: Timestamp,
    rows: Option<Vec<FieldRow>>,
) -> Result<Record> {
    let rows = rows.ok_or(RecordError::CorruptVersion(id, version))?;

    let data: FieldSet = rows.into_iter().collect();

    Ok(Record {
        id,
        version,
        created,
        data,
    })
}
