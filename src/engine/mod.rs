//! Version derivation and snapshot reconstruction.
//!
//! Everything here is pure: a new version's field set is computed from the
//! previous field set and an update request, and a snapshot is rebuilt from
//! the rows a store hands back. No storage access happens in this module.

mod operations;

pub use operations::{derive_next_field_set, initial_field_set, reconstruct_snapshot};
