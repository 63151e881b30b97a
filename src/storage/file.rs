//! File-backed version store.
//!
//! Layout inside the store directory:
//! ```text
//! MANIFEST       - store magic and format version
//! LOCK           - exclusive process lock
//! versions.log   - append-only log, one entry per version
//! ```
//!
//! Each log entry holds a whole field set, so appending a version is a single
//! write. The `(record, version) -> offset` index lives in memory and is
//! rebuilt by scanning the log on open.

use super::index::VersionIndex;
use super::{to_rows, VersionStore};
use crate::error::{StorageError, StorageResult};
use crate::types::{FieldRow, FieldSet, RecordId, StoreStats, Timestamp, VersionId, VersionInfo};
use fs2::FileExt;
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"TTS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Magic bytes for each log entry.
const ENTRY_MAGIC: &[u8; 4] = b"VER\0";

/// Current log entry format version.
const ENTRY_VERSION: u8 = 1;

/// Name of the version log inside the store directory.
const LOG_FILE: &str = "versions.log";

/// Entry header size (fixed part).
const ENTRY_HEADER_SIZE: usize = 4 + 1 + 1 + 8 + 8 + 8 + 4; // magic + version + flags + record + version id + timestamp + payload len

/// Trailing checksum size. The CRC32 covers the header and the payload.
const ENTRY_CHECKSUM_SIZE: usize = 4;

/// File store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Sync every N appends (0 and 1 both mean every append).
    pub sync_interval: u64,

    /// Number of decoded versions kept in the read cache.
    pub cache_size: usize,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./records"),
            sync_interval: 100,
            cache_size: 1000,
            create_if_missing: true,
        }
    }
}

/// A decoded log entry.
struct LogEntry {
    record: RecordId,
    version: VersionId,
    created: Timestamp,
    rows: Vec<FieldRow>,
    encoded_len: u64,
}

/// Append handle on the log file.
struct LogFile {
    file: File,
    size: u64,
    writes_since_sync: u64,
}

impl LogFile {
    /// Write `bytes` at the end of the log and return their offset.
    ///
    /// Any failure, including a failed sync, cuts the log back to its
    /// previous size, so nothing of a failed append survives a reopen.
    fn append(
        &mut self,
        bytes: &[u8],
        sync_interval: u64,
        sync: impl FnOnce(&File) -> io::Result<()>,
    ) -> StorageResult<u64> {
        let offset = self.size;
        let sync_due = self.writes_since_sync + 1 >= sync_interval.max(1);

        if let Err(e) = self.write_at(offset, bytes, sync_due, sync) {
            if let Err(truncate_err) = self.file.set_len(offset) {
                warn!(offset, error = %truncate_err, "failed to roll back partial append");
            }
            return Err(e.into());
        }

        self.size = offset + bytes.len() as u64;
        self.writes_since_sync = if sync_due {
            0
        } else {
            self.writes_since_sync + 1
        };

        Ok(offset)
    }

    fn write_at(
        &mut self,
        offset: u64,
        bytes: &[u8],
        sync_due: bool,
        sync: impl FnOnce(&File) -> io::Result<()>,
    ) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        if sync_due {
            sync(&self.file)?;
        }
        Ok(())
    }
}

/// Version store persisted in an append-only log.
pub struct FileVersionStore {
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Log file for appends and syncs.
    log: Mutex<LogFile>,

    /// Separate read handle, so cold reads don't wait on appends.
    reader: Mutex<File>,

    index: VersionIndex,

    /// Decoded rows of recently read versions. Versions are immutable, so
    /// entries never go stale.
    cache: Mutex<LruCache<(RecordId, VersionId), Vec<FieldRow>>>,
}

impl FileVersionStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> StorageResult<Self> {
        if config.path.exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(config.path.join(LOG_FILE))?;
        let reader = File::open(config.path.join(LOG_FILE))?;

        info!(path = %config.path.display(), "created version store");

        Ok(Self::assemble(
            config,
            lock_file,
            file,
            reader,
            0,
            VersionIndex::new(),
        ))
    }

    /// Open an existing store, rebuilding the index from the log.
    pub fn open(config: StoreConfig) -> StorageResult<Self> {
        Self::verify_manifest(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(config.path.join(LOG_FILE))?;
        let reader = File::open(config.path.join(LOG_FILE))?;

        let index = VersionIndex::new();
        let size = Self::rebuild_index(&file, &index)?;

        info!(
            path = %config.path.display(),
            records = index.record_count(),
            versions = index.version_count(),
            "opened version store"
        );

        Ok(Self::assemble(config, lock_file, file, reader, size, index))
    }

    fn assemble(
        config: StoreConfig,
        lock_file: File,
        file: File,
        reader: File,
        size: u64,
        index: VersionIndex,
    ) -> Self {
        let cache_size = NonZeroUsize::new(config.cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            config,
            _lock_file: lock_file,
            log: Mutex::new(LogFile {
                file,
                size,
                writes_since_sync: 0,
            }),
            reader: Mutex::new(reader),
            index,
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Scan the log and index every complete entry.
    ///
    /// An entry that fails to decode with no intact entry after it is a torn
    /// tail (crash during append, zero-filled blocks) and is truncated away.
    /// A bad entry followed by intact ones is corruption and fails the open.
    /// Returns the size of the valid log.
    fn rebuild_index(file: &File, index: &VersionIndex) -> StorageResult<u64> {
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut offset = 0u64;
        while offset < file_size {
            match read_entry(&mut reader, file_size - offset) {
                Ok(entry) => {
                    index.add(entry.record, entry.version, offset, entry.created)?;
                    offset += entry.encoded_len;
                }
                Err(StorageError::Io(e)) if e.kind() != ErrorKind::UnexpectedEof => {
                    return Err(StorageError::Io(e));
                }
                Err(e) => {
                    reader.seek(SeekFrom::Start(offset))?;
                    if intact_entry_follows(&mut reader, file_size - offset)? {
                        return Err(e);
                    }

                    warn!(
                        offset,
                        discarded = file_size - offset,
                        error = %e,
                        "truncating torn entry at end of version log"
                    );
                    file.set_len(offset)?;
                    file.sync_all()?;
                    break;
                }
            }
        }

        Ok(offset)
    }

    /// Read and verify the entry at `offset`.
    fn read_at(&self, offset: u64) -> StorageResult<LogEntry> {
        let mut reader = self.reader.lock();
        let available = reader.metadata()?.len().saturating_sub(offset);
        reader.seek(SeekFrom::Start(offset))?;
        read_entry(&mut *reader, available)
    }

    fn write_manifest(path: &Path) -> StorageResult<()> {
        let mut file = File::create(path.join("MANIFEST"))?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> StorageResult<()> {
        let manifest_path = path.join("MANIFEST");
        if !manifest_path.exists() {
            return Err(StorageError::NotInitialized);
        }
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StorageError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StorageError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> StorageResult<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StorageError::Locked)?;

        Ok(lock_file)
    }
}

impl VersionStore for FileVersionStore {
    fn append_version(&self, record: RecordId, fields: &FieldSet) -> StorageResult<VersionInfo> {
        let rows = to_rows(fields);
        let payload = rmp_serde::to_vec(&rows)?;

        let mut log = self.log.lock();

        let version = match self.index.latest(record) {
            Some(latest) => latest.next().ok_or(StorageError::VersionOverflow(record))?,
            None => VersionId::FIRST,
        };
        let created = Timestamp::now();
        let bytes = encode_entry(record, version, created, &payload)?;

        let offset = log.append(&bytes, self.config.sync_interval, File::sync_all)?;

        // Indexed only once fully written, so readers never see a partial version.
        self.index.add(record, version, offset, created)?;
        drop(log);

        self.cache.lock().put((record, version), rows);

        debug!(%record, %version, offset, fields = fields.len(), "appended version to log");

        Ok(VersionInfo {
            record,
            version,
            created,
        })
    }

    fn latest_version_id(&self, record: RecordId) -> StorageResult<Option<VersionId>> {
        Ok(self.index.latest(record))
    }

    fn fields_for_version(
        &self,
        record: RecordId,
        version: VersionId,
    ) -> StorageResult<Option<Vec<FieldRow>>> {
        let Some(entry) = self.index.get(record, version) else {
            return Ok(None);
        };

        if let Some(rows) = self.cache.lock().get(&(record, version)) {
            return Ok(Some(rows.clone()));
        }

        let decoded = self.read_at(entry.offset)?;
        if decoded.record != record || decoded.version != version {
            return Err(StorageError::InvalidFormat(format!(
                "index entry for record {} version {} points at record {} version {}",
                record, version, decoded.record, decoded.version
            )));
        }

        self.cache
            .lock()
            .put((record, version), decoded.rows.clone());

        Ok(Some(decoded.rows))
    }

    fn all_version_ids(&self, record: RecordId) -> StorageResult<Vec<VersionId>> {
        Ok(self.index.versions(record))
    }

    fn version_history(&self, record: RecordId) -> StorageResult<Vec<VersionInfo>> {
        Ok(self.index.history(record))
    }

    fn version_info(
        &self,
        record: RecordId,
        version: VersionId,
    ) -> StorageResult<Option<VersionInfo>> {
        Ok(self.index.get(record, version).map(|entry| VersionInfo {
            record,
            version,
            created: entry.created,
        }))
    }

    fn stats(&self) -> StorageResult<StoreStats> {
        Ok(StoreStats {
            record_count: self.index.record_count() as u64,
            version_count: self.index.version_count() as u64,
            total_size_bytes: self.log.lock().size,
        })
    }

    fn sync(&self) -> StorageResult<()> {
        let mut log = self.log.lock();
        log.file.sync_all()?;
        log.writes_since_sync = 0;
        Ok(())
    }
}

impl Drop for FileVersionStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

/// Serialize one entry: header, MessagePack payload, CRC32 of both.
fn encode_entry(
    record: RecordId,
    version: VersionId,
    created: Timestamp,
    payload: &[u8],
) -> StorageResult<Vec<u8>> {
    let payload_len = u32::try_from(payload.len()).map_err(|_| {
        StorageError::Serialization(format!(
            "field set of {} bytes exceeds the entry size limit",
            payload.len()
        ))
    })?;

    let mut buf = Vec::with_capacity(ENTRY_HEADER_SIZE + payload.len() + ENTRY_CHECKSUM_SIZE);
    buf.extend_from_slice(ENTRY_MAGIC);
    buf.push(ENTRY_VERSION);
    buf.push(0u8); // flags (reserved)
    buf.extend_from_slice(&record.0.to_le_bytes());
    buf.extend_from_slice(&version.0.to_le_bytes());
    buf.extend_from_slice(&created.0.to_le_bytes());
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(payload);
    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());

    Ok(buf)
}

/// Read one entry from the current position.
///
/// `available` is the number of log bytes from the entry's start to the end
/// of the log; a length field pointing past it is rejected before reading.
fn read_entry<R: Read>(reader: &mut R, available: u64) -> StorageResult<LogEntry> {
    let mut header = [0u8; ENTRY_HEADER_SIZE];
    reader.read_exact(&mut header)?;

    if &header[0..4] != ENTRY_MAGIC {
        return Err(StorageError::InvalidFormat("Invalid entry magic".into()));
    }
    if header[4] != ENTRY_VERSION {
        return Err(StorageError::InvalidFormat(format!(
            "Unsupported entry version: {}",
            header[4]
        )));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&header[30..34]);
    let payload_len = u32::from_le_bytes(len_bytes) as usize;

    let encoded_len = (ENTRY_HEADER_SIZE + payload_len + ENTRY_CHECKSUM_SIZE) as u64;
    if encoded_len > available {
        return Err(StorageError::InvalidFormat(format!(
            "entry of {} bytes overruns the {} bytes left in the log",
            encoded_len, available
        )));
    }

    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload)?;

    let mut checksum_bytes = [0u8; ENTRY_CHECKSUM_SIZE];
    reader.read_exact(&mut checksum_bytes)?;
    let stored_checksum = u32::from_le_bytes(checksum_bytes);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header);
    hasher.update(&payload);
    let computed_checksum = hasher.finalize();

    if stored_checksum != computed_checksum {
        return Err(StorageError::ChecksumMismatch {
            expected: stored_checksum,
            got: computed_checksum,
        });
    }

    let rows: Vec<FieldRow> = rmp_serde::from_slice(&payload)?;

    Ok(LogEntry {
        record: RecordId(le_i64(&header[6..14])),
        version: VersionId(le_i64(&header[14..22])),
        created: Timestamp(le_i64(&header[22..30])),
        rows,
        encoded_len,
    })
}

/// Whether an intact entry starts anywhere in the next `len` bytes after
/// the current position (skipping the position itself).
fn intact_entry_follows<R: Read>(reader: &mut R, len: u64) -> StorageResult<bool> {
    let mut tail = Vec::new();
    reader.take(len).read_to_end(&mut tail)?;

    Ok((1..tail.len())
        .filter(|&pos| tail[pos..].starts_with(ENTRY_MAGIC))
        .any(|pos| {
            let mut rest = &tail[pos..];
            let available = rest.len() as u64;
            read_entry(&mut rest, available).is_ok()
        }))
}

fn le_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    i64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> StoreConfig {
        StoreConfig {
            path: dir.path().join("store"),
            sync_interval: 1,
            cache_size: 16,
            create_if_missing: true,
        }
    }

    fn fields(pairs: &[(&str, &str)]) -> FieldSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_create_store() {
        let dir = TempDir::new().unwrap();
        let store = FileVersionStore::create(test_config(&dir)).unwrap();

        assert!(store.path().join("MANIFEST").exists());
        assert!(store.path().join(LOG_FILE).exists());
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let store = FileVersionStore::create(test_config(&dir)).unwrap();

        let info = store
            .append_version(RecordId(1), &fields(&[("b", "2"), ("a", "1")]))
            .unwrap();
        assert_eq!(info.version, VersionId(1));

        let rows = store.fields_for_version(RecordId(1), info.version).unwrap().unwrap();
        assert_eq!(
            rows,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();

        {
            let store = FileVersionStore::create(test_config(&dir)).unwrap();
            for i in 1..=5 {
                store
                    .append_version(RecordId(1), &fields(&[("n", i.to_string().as_str())]))
                    .unwrap();
            }
            store.append_version(RecordId(2), &FieldSet::new()).unwrap();
        }

        {
            let store = FileVersionStore::open(test_config(&dir)).unwrap();
            assert_eq!(store.all_version_ids(RecordId(1)).unwrap().len(), 5);
            assert_eq!(store.latest_version_id(RecordId(2)).unwrap(), Some(VersionId(1)));

            let rows = store.fields_for_version(RecordId(1), VersionId(3)).unwrap().unwrap();
            assert_eq!(rows, vec![("n".to_string(), "3".to_string())]);

            // Should continue from the latest version
            let info = store.append_version(RecordId(1), &FieldSet::new()).unwrap();
            assert_eq!(info.version, VersionId(6));
        }
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("store").join(LOG_FILE);

        let valid_size = {
            let store = FileVersionStore::create(test_config(&dir)).unwrap();
            store.append_version(RecordId(1), &fields(&[("a", "1")])).unwrap();
            store.append_version(RecordId(1), &fields(&[("a", "2")])).unwrap();
            store.stats().unwrap().total_size_bytes
        };

        // Simulate a crash halfway through a third append
        {
            let bytes = encode_entry(RecordId(1), VersionId(3), Timestamp(0), b"\x90").unwrap();
            let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
            file.write_all(&bytes[..bytes.len() / 2]).unwrap();
        }

        let store = FileVersionStore::open(test_config(&dir)).unwrap();
        assert_eq!(
            store.all_version_ids(RecordId(1)).unwrap(),
            vec![VersionId(1), VersionId(2)]
        );
        assert_eq!(fs::metadata(&log_path).unwrap().len(), valid_size);

        let info = store.append_version(RecordId(1), &FieldSet::new()).unwrap();
        assert_eq!(info.version, VersionId(3));
    }

    /// Write two versions of record 1 and return the log path and the
    /// offset where the second entry starts.
    fn two_entry_log(dir: &TempDir) -> (PathBuf, u64) {
        let store = FileVersionStore::create(test_config(dir)).unwrap();
        store
            .append_version(RecordId(1), &fields(&[("key", "value")]))
            .unwrap();
        let second = store.stats().unwrap().total_size_bytes;
        store
            .append_version(RecordId(1), &fields(&[("key", "other")]))
            .unwrap();

        (store.path().join(LOG_FILE), second)
    }

    fn corrupt(path: &Path, at: usize) {
        let mut bytes = fs::read(path).unwrap();
        bytes[at] ^= 0xff;
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let (log_path, _) = two_entry_log(&dir);

        // Flip a payload byte of the first entry; the second is still intact.
        corrupt(&log_path, ENTRY_HEADER_SIZE + 2);

        let result = FileVersionStore::open(test_config(&dir));
        assert!(matches!(result, Err(StorageError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_header_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let (log_path, _) = two_entry_log(&dir);

        // Record id and version id of the first entry.
        corrupt(&log_path, 6);
        corrupt(&log_path, 14);

        let result = FileVersionStore::open(test_config(&dir));
        assert!(matches!(result, Err(StorageError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_corrupt_final_entry_is_truncated() {
        let dir = TempDir::new().unwrap();
        let (log_path, second) = two_entry_log(&dir);

        corrupt(&log_path, second as usize + ENTRY_HEADER_SIZE + 1);

        let store = FileVersionStore::open(test_config(&dir)).unwrap();
        assert_eq!(store.all_version_ids(RecordId(1)).unwrap(), vec![VersionId(1)]);
        assert_eq!(fs::metadata(&log_path).unwrap().len(), second);
    }

    #[test]
    fn test_zero_filled_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("store").join(LOG_FILE);

        let valid_size = {
            let store = FileVersionStore::create(test_config(&dir)).unwrap();
            store.append_version(RecordId(1), &fields(&[("a", "1")])).unwrap();
            store.stats().unwrap().total_size_bytes
        };

        {
            let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
            file.write_all(&[0u8; 64]).unwrap();
        }

        let store = FileVersionStore::open(test_config(&dir)).unwrap();
        assert_eq!(store.all_version_ids(RecordId(1)).unwrap(), vec![VersionId(1)]);
        assert_eq!(fs::metadata(&log_path).unwrap().len(), valid_size);

        let info = store.append_version(RecordId(1), &FieldSet::new()).unwrap();
        assert_eq!(info.version, VersionId(2));
    }

    #[test]
    fn test_oversized_length_is_not_trusted() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("store").join(LOG_FILE);

        let valid_size = {
            let store = FileVersionStore::create(test_config(&dir)).unwrap();
            store.append_version(RecordId(1), &fields(&[("a", "1")])).unwrap();
            store.stats().unwrap().total_size_bytes
        };

        // A header claiming a ~4 GiB payload, followed by a few bytes.
        {
            let mut bytes = encode_entry(RecordId(1), VersionId(2), Timestamp(0), b"\x90").unwrap();
            bytes[30..34].copy_from_slice(&u32::MAX.to_le_bytes());
            let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
            file.write_all(&bytes).unwrap();
        }

        let store = FileVersionStore::open(test_config(&dir)).unwrap();
        assert_eq!(store.all_version_ids(RecordId(1)).unwrap(), vec![VersionId(1)]);
        assert_eq!(fs::metadata(&log_path).unwrap().len(), valid_size);
    }

    #[test]
    fn test_failed_sync_rolls_back_append() {
        let dir = TempDir::new().unwrap();
        let store = FileVersionStore::create(test_config(&dir)).unwrap();
        let log_path = store.path().join(LOG_FILE);

        store.append_version(RecordId(1), &fields(&[("a", "1")])).unwrap();
        let size = store.stats().unwrap().total_size_bytes;

        {
            let payload = rmp_serde::to_vec(&to_rows(&fields(&[("a", "lost")]))).unwrap();
            let bytes = encode_entry(RecordId(1), VersionId(2), Timestamp(0), &payload).unwrap();

            let mut log = store.log.lock();
            let result = log.append(&bytes, 1, |_| {
                Err(io::Error::new(ErrorKind::Other, "fsync failed"))
            });
            assert!(matches!(result, Err(StorageError::Io(_))));
            assert_eq!(log.size, size);
        }
        assert_eq!(fs::metadata(&log_path).unwrap().len(), size);

        let info = store.append_version(RecordId(1), &fields(&[("a", "2")])).unwrap();
        assert_eq!(info.version, VersionId(2));
        drop(store);

        let store = FileVersionStore::open(test_config(&dir)).unwrap();
        assert_eq!(
            store.all_version_ids(RecordId(1)).unwrap(),
            vec![VersionId(1), VersionId(2)]
        );
        let rows = store.fields_for_version(RecordId(1), VersionId(2)).unwrap().unwrap();
        assert_eq!(rows, vec![("a".to_string(), "2".to_string())]);
    }

    #[test]
    fn test_exhausted_version_ids() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("store").join(LOG_FILE);

        drop(FileVersionStore::create(test_config(&dir)).unwrap());
        {
            let payload = rmp_serde::to_vec(&Vec::<FieldRow>::new()).unwrap();
            let bytes =
                encode_entry(RecordId(1), VersionId(i64::MAX), Timestamp(0), &payload).unwrap();
            let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
            file.write_all(&bytes).unwrap();
        }

        let store = FileVersionStore::open(test_config(&dir)).unwrap();
        let result = store.append_version(RecordId(1), &FieldSet::new());
        assert!(matches!(
            result,
            Err(StorageError::VersionOverflow(RecordId(1)))
        ));
        assert_eq!(
            store.latest_version_id(RecordId(1)).unwrap(),
            Some(VersionId(i64::MAX))
        );
    }

    #[test]
    fn test_cold_read_does_not_wait_on_appends() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            cache_size: 1,
            ..test_config(&dir)
        };

        let store = FileVersionStore::create(config).unwrap();
        store.append_version(RecordId(1), &fields(&[("a", "1")])).unwrap();
        store.append_version(RecordId(1), &fields(&[("a", "2")])).unwrap();

        // Version 1 was evicted from the cache, so this reads the log while
        // the append side is held.
        let _log = store.log.lock();
        let rows = store.fields_for_version(RecordId(1), VersionId(1)).unwrap().unwrap();
        assert_eq!(rows, vec![("a".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_missing_store_without_create() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            create_if_missing: false,
            ..test_config(&dir)
        };

        let result = FileVersionStore::open_or_create(config);
        assert!(matches!(result, Err(StorageError::NotInitialized)));
    }

    #[test]
    fn test_reads_fall_back_to_disk() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            cache_size: 1,
            ..test_config(&dir)
        };

        let store = FileVersionStore::create(config).unwrap();
        for i in 0..4 {
            store
                .append_version(RecordId(9), &fields(&[("i", i.to_string().as_str())]))
                .unwrap();
        }

        // Only the latest version is cached; earlier ones come from disk.
        for (i, version) in store.all_version_ids(RecordId(9)).unwrap().into_iter().enumerate() {
            let rows = store.fields_for_version(RecordId(9), version).unwrap().unwrap();
            assert_eq!(rows, vec![("i".to_string(), i.to_string())]);
        }
    }
}
