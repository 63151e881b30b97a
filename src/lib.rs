//! # Timetravel
//!
//! A versioned key-value record store. Every update produces a new immutable
//! version instead of overwriting history.
//!
//! ## Core Concepts
//!
//! - **Records**: identified by a positive integer id, exist once they have a version
//! - **Versions**: immutable field sets with per-record, strictly increasing ids
//! - **Updates**: partial; a key is set, removed, or carried forward
//! - **Stores**: in-memory or an append-only log on disk, behind one trait
//!
//! ## Example
//!
//! ```ignore
//! use timetravel::{FileVersionStore, RecordId, RecordService, StoreConfig, VersionId};
//!
//! let store = FileVersionStore::open_or_create(StoreConfig {
//!     path: "./records".into(),
//!     ..Default::default()
//! })?;
//! let service = RecordService::new(store);
//!
//! service.create(RecordId(5), &[("name".into(), "a".into())].into())?;
//! service.update(RecordId(5), &[("age".into(), Some("30".into()))].into())?;
//!
//! let first = service.get_version(RecordId(5), VersionId(1))?;
//! let versions = service.list_version_ids(RecordId(5))?;
//! ```

pub mod engine;
pub mod error;
pub mod service;
pub mod storage;
pub mod types;

// Re-exports
pub use engine::{derive_next_field_set, initial_field_set, reconstruct_snapshot};
pub use error::{RecordError, Result, StorageError, StorageResult};
pub use service::{MissingRecordPolicy, RecordService, ServiceConfig};
pub use storage::{FileVersionStore, MemoryVersionStore, StoreConfig, VersionIndex, VersionStore};
pub use types::*;
