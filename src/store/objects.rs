//! Append-only, type-partitioned object store.

use crate::error::{BrokerError, Result};
use crate::types::Ts;
use fs2::FileExt;
use lru::LruCache;
use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"TPC\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Magic bytes for segment files.
const SEGMENT_MAGIC: &[u8; 4] = b"OBJ\0";

/// Current segment format version.
const SEGMENT_VERSION: u8 = 1;

/// Segment header size (magic + version).
const SEGMENT_HEADER_SIZE: u64 = 5;

/// Upper bound on a single encoded entry.
const MAX_ENTRY_SIZE: usize = 256 * 1024 * 1024;

/// Object store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Object content cache size (number of objects).
    pub cache_size: usize,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./topics"),
            cache_size: 1000,
            create_if_missing: true,
        }
    }
}

/// An object as returned by queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub typ: String,
    pub id: Option<String>,
    pub ts: Ts,
    pub content: Vec<u8>,
}

/// On-disk entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ObjectEntry {
    typ: String,
    id: Option<String>,
    ts: Ts,
    content: Vec<u8>,
}

impl From<ObjectEntry> for StoredObject {
    fn from(e: ObjectEntry) -> Self {
        Self {
            typ: e.typ,
            id: e.id,
            ts: e.ts,
            content: e.content,
        }
    }
}

/// In-memory index entry for one object.
#[derive(Clone, Debug)]
struct IndexEntry {
    ts: Ts,
    id: Option<String>,
    offset: u64,
}

/// One file per type.
struct Segment {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
    /// Sorted by ts; equal ts keep insertion order.
    entries: Vec<IndexEntry>,
}

#[derive(Default)]
struct Inner {
    segments: HashMap<String, Segment>,
    /// Object id to owning type.
    ids: HashMap<String, String>,
}

/// Append-only object store grouped by type.
///
/// Objects of a type are kept in timestamp order and can be seeked, fetched
/// by id, fetched latest-first, compacted down to the newest object, or
/// removed.
pub struct ObjectStore {
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    inner: RwLock<Inner>,

    /// Recently read entries keyed by (type, offset).
    cache: Mutex<LruCache<(String, u64), Arc<ObjectEntry>>>,
}

impl ObjectStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(BrokerError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(config.path.join("objects"))?;
        Self::write_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        Ok(Self::assemble(config, lock_file, Inner::default()))
    }

    /// Open an existing store, rebuilding the index from segment files.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let objects_dir = config.path.join("objects");
        fs::create_dir_all(&objects_dir)?;

        let mut inner = Inner::default();
        for dir_entry in fs::read_dir(&objects_dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("seg") {
                continue;
            }
            let Some(typ) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| hex::decode(s).ok())
                .and_then(|b| String::from_utf8(b).ok())
            else {
                tracing::warn!(path = %path.display(), "skipping segment with unreadable name");
                continue;
            };

            let segment = Self::load_segment(&path)?;
            for entry in &segment.entries {
                if let Some(id) = &entry.id {
                    inner.ids.insert(id.clone(), typ.clone());
                }
            }
            tracing::debug!(%typ, objects = segment.entries.len(), "loaded segment");
            inner.segments.insert(typ, segment);
        }

        Ok(Self::assemble(config, lock_file, inner))
    }

    fn assemble(config: StoreConfig, lock_file: File, inner: Inner) -> Self {
        let cache_size = NonZeroUsize::new(config.cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            _lock_file: lock_file,
            inner: RwLock::new(inner),
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Base path of the store.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Writes ---

    /// Insert an object of type `typ` at timestamp `ts`.
    ///
    /// `id` can be omitted when the object never needs to be fetched by id.
    /// Fails with `Duplicate` when an object with the same id exists.
    pub fn insert(&self, typ: &str, id: Option<&str>, ts: Ts, content: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();

        if let Some(id) = id {
            if inner.ids.contains_key(id) {
                return Err(BrokerError::Duplicate(id.to_string()));
            }
        }

        if !inner.segments.contains_key(typ) {
            let segment = Self::create_segment(&self.segment_path(typ))?;
            inner.segments.insert(typ.to_string(), segment);
        }
        let segment = inner
            .segments
            .get_mut(typ)
            .ok_or_else(|| BrokerError::NotFound(typ.to_string()))?;

        let entry = ObjectEntry {
            typ: typ.to_string(),
            id: id.map(str::to_string),
            ts,
            content: content.to_vec(),
        };
        let encoded = rmp_serde::to_vec(&entry)?;
        frame_len(encoded.len())?;

        let offset = segment.size;
        {
            let mut file = segment.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            write_frame(&mut *file, &encoded)?;
            file.sync_all()?;
            segment.size = file.stream_position()?;
        }

        let pos = segment.entries.partition_point(|e| e.ts <= ts);
        segment.entries.insert(
            pos,
            IndexEntry {
                ts,
                id: entry.id.clone(),
                offset,
            },
        );

        if let Some(id) = entry.id {
            inner.ids.insert(id, typ.to_string());
        }

        tracing::trace!(%typ, %ts, offset, "inserted object");
        Ok(())
    }

    /// Delete all but the newest object of a type. Returns the number removed.
    pub fn compact(&self, typ: &str) -> Result<usize> {
        self.retain(typ, |idx, len, _| idx + 1 == len)
    }

    /// Delete every object of a type with `ts <= through`. Returns the number removed.
    pub fn remove_through(&self, typ: &str, through: Ts) -> Result<usize> {
        self.retain(typ, |_, _, e| e.ts > through)
    }

    /// Delete all objects of a type.
    pub fn remove(&self, typ: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(segment) = inner.segments.remove(typ) {
            for id in segment.entries.iter().filter_map(|e| e.id.as_ref()) {
                inner.ids.remove(id);
            }
            drop(segment.file);
            fs::remove_file(&segment.path)?;
            self.invalidate(typ);
        }
        Ok(())
    }

    /// Delete one object by id.
    pub fn remove_id(&self, id: &str) -> Result<()> {
        let typ = self
            .inner
            .read()
            .ids
            .get(id)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(id.to_string()))?;

        self.retain(&typ, |_, _, e| e.id.as_deref() != Some(id))?;
        Ok(())
    }

    /// Force sync all segment files.
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.read();
        for segment in inner.segments.values() {
            segment.file.lock().sync_all()?;
        }
        Ok(())
    }

    // --- Queries ---

    /// All objects of a type newer than `from` (or all, for `None`), oldest first.
    pub fn seek(&self, typ: &str, from: Option<Ts>) -> Result<Vec<StoredObject>> {
        self.collect(typ, |e| from.map_or(true, |from| e.ts > from))
    }

    /// Objects of a type strictly between `from` and `to`, oldest first.
    pub fn seek_range(&self, typ: &str, from: Ts, to: Ts) -> Result<Vec<StoredObject>> {
        self.collect(typ, |e| e.ts > from && e.ts < to)
    }

    /// The newest object of a type.
    pub fn find_latest(&self, typ: &str) -> Result<StoredObject> {
        let inner = self.inner.read();
        let segment = inner
            .segments
            .get(typ)
            .ok_or_else(|| BrokerError::NotFound(typ.to_string()))?;
        let entry = segment
            .entries
            .last()
            .ok_or_else(|| BrokerError::NotFound(typ.to_string()))?;

        Ok(self.read_cached(typ, segment, entry.offset)?.as_ref().clone().into())
    }

    /// One object by id.
    pub fn find_id(&self, id: &str) -> Result<StoredObject> {
        let inner = self.inner.read();
        let not_found = || BrokerError::NotFound(id.to_string());

        let typ = inner.ids.get(id).ok_or_else(not_found)?;
        let segment = inner.segments.get(typ).ok_or_else(not_found)?;
        let entry = segment
            .entries
            .iter()
            .find(|e| e.id.as_deref() == Some(id))
            .ok_or_else(not_found)?;

        Ok(self.read_cached(typ, segment, entry.offset)?.as_ref().clone().into())
    }

    /// Number of objects of a type.
    pub fn count(&self, typ: &str) -> usize {
        self.inner
            .read()
            .segments
            .get(typ)
            .map_or(0, |s| s.entries.len())
    }

    /// All types with at least one segment.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.inner.read().segments.keys().cloned().collect();
        types.sort();
        types
    }

    // --- Internals ---

    fn collect<F>(&self, typ: &str, filter: F) -> Result<Vec<StoredObject>>
    where
        F: Fn(&IndexEntry) -> bool,
    {
        let inner = self.inner.read();
        let Some(segment) = inner.segments.get(typ) else {
            return Ok(Vec::new());
        };

        segment
            .entries
            .iter()
            .filter(|e| filter(e))
            .map(|e| -> Result<StoredObject> {
                Ok(self.read_cached(typ, segment, e.offset)?.as_ref().clone().into())
            })
            .collect()
    }

    /// Rewrite a segment keeping only entries for which `keep(index, len, entry)`
    /// holds. Returns the number of entries dropped.
    fn retain<F>(&self, typ: &str, keep: F) -> Result<usize>
    where
        F: Fn(usize, usize, &IndexEntry) -> bool,
    {
        let mut inner = self.inner.write();
        let Some(segment) = inner.segments.get(typ) else {
            return Ok(0);
        };

        let len = segment.entries.len();
        let (kept, dropped): (Vec<_>, Vec<_>) = segment
            .entries
            .iter()
            .enumerate()
            .partition(|(idx, e)| keep(*idx, len, e));
        if dropped.is_empty() {
            return Ok(0);
        }

        let mut payloads = Vec::with_capacity(kept.len());
        {
            let mut file = segment.file.lock();
            for (_, entry) in &kept {
                file.seek(SeekFrom::Start(entry.offset))?;
                payloads.push((read_frame(&mut *file)?, (*entry).clone()));
            }
        }
        let dropped_ids: Vec<String> = dropped.iter().filter_map(|(_, e)| e.id.clone()).collect();
        let removed = dropped.len();

        let path = segment.path.clone();
        let tmp_path = path.with_extension("tmp");
        let mut entries = Vec::with_capacity(payloads.len());
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(SEGMENT_MAGIC)?;
            tmp.write_all(&[SEGMENT_VERSION])?;
            for (encoded, mut entry) in payloads {
                entry.offset = tmp.stream_position()?;
                write_frame(&mut tmp, &encoded)?;
                entries.push(entry);
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len();
        inner.segments.insert(
            typ.to_string(),
            Segment {
                path,
                file: Mutex::new(file),
                size,
                entries,
            },
        );
        for id in dropped_ids {
            inner.ids.remove(&id);
        }
        self.invalidate(typ);

        tracing::debug!(%typ, removed, "rewrote segment");
        Ok(removed)
    }

    fn read_cached(&self, typ: &str, segment: &Segment, offset: u64) -> Result<Arc<ObjectEntry>> {
        let key = (typ.to_string(), offset);
        if let Some(entry) = self.cache.lock().get(&key) {
            return Ok(Arc::clone(entry));
        }

        let encoded = {
            let mut file = segment.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            read_frame(&mut *file)?
        };
        let entry: Arc<ObjectEntry> = Arc::new(rmp_serde::from_slice(&encoded)?);

        self.cache.lock().put(key, Arc::clone(&entry));
        Ok(entry)
    }

    /// Drop cached entries of a type whose offsets are no longer valid.
    fn invalidate(&self, typ: &str) {
        let mut cache = self.cache.lock();
        let stale: Vec<(String, u64)> = cache
            .iter()
            .filter(|(k, _)| k.0 == typ)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }

    fn segment_path(&self, typ: &str) -> PathBuf {
        self.config
            .path
            .join("objects")
            .join(format!("{}.seg", hex::encode(typ.as_bytes())))
    }

    fn create_segment(path: &Path) -> Result<Segment> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(SEGMENT_MAGIC)?;
        file.write_all(&[SEGMENT_VERSION])?;
        file.sync_all()?;

        Ok(Segment {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size: SEGMENT_HEADER_SIZE,
            entries: Vec::new(),
        })
    }

    /// Scan a segment file and rebuild its index. A torn or corrupt tail is
    /// cut off so later appends start from the last good entry.
    fn load_segment(path: &Path) -> Result<Segment> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < SEGMENT_HEADER_SIZE {
            return Err(BrokerError::InvalidFormat(format!(
                "Segment too short: {}",
                path.display()
            )));
        }

        // SAFETY: the store holds an exclusive lock on its directory, so no
        // other process modifies the file while it is mapped.
        let map = unsafe { Mmap::map(&file)? };

        if &map[0..4] != SEGMENT_MAGIC {
            return Err(BrokerError::InvalidFormat("Invalid segment magic".into()));
        }
        if map[4] != SEGMENT_VERSION {
            return Err(BrokerError::InvalidFormat(format!(
                "Unsupported segment version: {}",
                map[4]
            )));
        }

        let mut entries = Vec::new();
        let mut pos = SEGMENT_HEADER_SIZE as usize;
        while pos < map.len() {
            match parse_frame(&map[pos..]) {
                Ok((encoded, size)) => {
                    let entry: ObjectEntry = match rmp_serde::from_slice(encoded) {
                        Ok(entry) => entry,
                        Err(e) => {
                            tracing::warn!(path = %path.display(), offset = pos, error = %e, "undecodable entry, truncating segment");
                            break;
                        }
                    };
                    entries.push(IndexEntry {
                        ts: entry.ts,
                        id: entry.id,
                        offset: pos as u64,
                    });
                    pos += size;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), offset = pos, error = %e, "corrupt segment tail, truncating");
                    break;
                }
            }
        }
        drop(map);

        let size = pos as u64;
        if size < file_size {
            file.set_len(size)?;
        }

        // Appends may have arrived out of timestamp order.
        entries.sort_by_key(|e| e.ts);

        Ok(Segment {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size,
            entries,
        })
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(BrokerError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(BrokerError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| BrokerError::Locked)?;
        Ok(lock_file)
    }
}

/// `u32 len | bytes | crc32(bytes)`
fn write_frame(w: &mut impl Write, encoded: &[u8]) -> Result<()> {
    w.write_all(&frame_len(encoded.len())?.to_le_bytes())?;
    w.write_all(encoded)?;
    w.write_all(&crc32fast::hash(encoded).to_le_bytes())?;
    Ok(())
}

/// Length prefix for an entry, refusing anything a reopen would reject.
fn frame_len(len: usize) -> Result<u32> {
    if len > MAX_ENTRY_SIZE {
        return Err(BrokerError::InvalidFormat(format!(
            "Entry of {} bytes exceeds limit of {}",
            len, MAX_ENTRY_SIZE
        )));
    }
    Ok(len as u32)
}

fn read_frame(r: &mut impl Read) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_ENTRY_SIZE {
        return Err(BrokerError::Corruption("Entry too large".into()));
    }

    let mut encoded = vec![0u8; len];
    r.read_exact(&mut encoded)?;

    let mut checksum_bytes = [0u8; 4];
    r.read_exact(&mut checksum_bytes)?;
    let stored = u32::from_le_bytes(checksum_bytes);
    let computed = crc32fast::hash(&encoded);
    if stored != computed {
        return Err(BrokerError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    Ok(encoded)
}

/// Parse one frame from a mapped buffer. Returns the payload and the total
/// frame length.
fn parse_frame(buf: &[u8]) -> Result<(&[u8], usize)> {
    if buf.len() < 4 {
        return Err(BrokerError::Corruption("Truncated frame header".into()));
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_ENTRY_SIZE || buf.len() < 4 + len + 4 {
        return Err(BrokerError::Corruption("Truncated frame".into()));
    }

    let encoded = &buf[4..4 + len];
    let crc = &buf[4 + len..8 + len];
    let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
    let computed = crc32fast::hash(encoded);
    if stored != computed {
        return Err(BrokerError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    Ok((encoded, len + 8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> ObjectStore {
        ObjectStore::create(StoreConfig {
            path: dir.path().join("store"),
            cache_size: 16,
            create_if_missing: true,
        })
        .unwrap()
    }

    fn ts_of(objs: &[StoredObject]) -> Vec<i64> {
        objs.iter().map(|o| o.ts.0).collect()
    }

    #[test]
    fn test_insert_and_seek() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.insert("diff", None, Ts(3), b"c").unwrap();
        store.insert("diff", None, Ts(1), b"a").unwrap();
        store.insert("diff", None, Ts(2), b"b").unwrap();
        store.insert("full", None, Ts(1), b"F").unwrap();

        let all = store.seek("diff", None).unwrap();
        assert_eq!(ts_of(&all), vec![1, 2, 3]);
        assert_eq!(all[0].content, b"a");

        let newer = store.seek("diff", Some(Ts(1))).unwrap();
        assert_eq!(ts_of(&newer), vec![2, 3]);

        let range = store.seek_range("diff", Ts(1), Ts(3)).unwrap();
        assert_eq!(ts_of(&range), vec![2]);

        assert!(store.seek("missing", None).unwrap().is_empty());
        assert_eq!(store.types(), vec!["diff".to_string(), "full".to_string()]);
    }

    #[test]
    fn test_duplicate_id() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.insert("full", Some("a"), Ts(1), b"1").unwrap();
        let result = store.insert("full", Some("a"), Ts(2), b"2");
        assert!(matches!(result, Err(BrokerError::Duplicate(_))));
        assert_eq!(store.count("full"), 1);
    }

    #[test]
    fn test_find_latest_and_by_id() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        assert!(store.find_latest("full").unwrap_err().is_not_found());
        assert!(store.find_id("x").unwrap_err().is_not_found());

        store.insert("full", Some("x"), Ts(5), b"five").unwrap();
        store.insert("full", Some("y"), Ts(9), b"nine").unwrap();

        assert_eq!(store.find_latest("full").unwrap().content, b"nine");
        let x = store.find_id("x").unwrap();
        assert_eq!(x.ts, Ts(5));
        assert_eq!(x.typ, "full");
    }

    #[test]
    fn test_compact_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        for i in 1..=5 {
            store
                .insert("full", Some(&format!("f{}", i)), Ts(i), format!("{}", i).as_bytes())
                .unwrap();
        }
        // Warm the cache with offsets that compaction will invalidate
        store.seek("full", None).unwrap();

        assert_eq!(store.compact("full").unwrap(), 4);
        let left = store.seek("full", None).unwrap();
        assert_eq!(ts_of(&left), vec![5]);
        assert_eq!(left[0].content, b"5");
        assert!(store.find_id("f1").unwrap_err().is_not_found());
        assert_eq!(store.compact("full").unwrap(), 0);

        // Ids freed by compaction can be reused
        store.insert("full", Some("f1"), Ts(6), b"6").unwrap();
    }

    #[test]
    fn test_remove_and_remove_id() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.insert("diff", Some("a"), Ts(1), b"a").unwrap();
        store.insert("diff", Some("b"), Ts(2), b"b").unwrap();

        store.remove_id("a").unwrap();
        assert_eq!(ts_of(&store.seek("diff", None).unwrap()), vec![2]);
        assert!(store.remove_id("a").unwrap_err().is_not_found());

        store.remove("diff").unwrap();
        assert_eq!(store.count("diff"), 0);
        assert!(store.types().is_empty());
        assert!(store.find_id("b").unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_through() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        for i in 1..=4 {
            store.insert("diff", None, Ts(i), b"").unwrap();
        }
        assert_eq!(store.remove_through("diff", Ts(2)).unwrap(), 2);
        assert_eq!(ts_of(&store.seek("diff", None).unwrap()), vec![3, 4]);
    }

    #[test]
    fn test_reopen() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            path: dir.path().join("store"),
            cache_size: 4,
            create_if_missing: true,
        };

        {
            let store = ObjectStore::open_or_create(config.clone()).unwrap();
            store.insert("topic/diff", Some("d2"), Ts(2), b"two").unwrap();
            store.insert("topic/diff", None, Ts(1), b"one").unwrap();
        }

        let store = ObjectStore::open_or_create(config).unwrap();
        assert_eq!(store.types(), vec!["topic/diff".to_string()]);
        assert_eq!(ts_of(&store.seek("topic/diff", None).unwrap()), vec![1, 2]);
        assert_eq!(store.find_id("d2").unwrap().content, b"two");

        // Appends continue after the reloaded entries
        store.insert("topic/diff", None, Ts(3), b"three").unwrap();
        assert_eq!(store.count("topic/diff"), 3);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            path: dir.path().join("store"),
            cache_size: 4,
            create_if_missing: true,
        };

        let segment_path = {
            let store = ObjectStore::create(config.clone()).unwrap();
            store.insert("t", None, Ts(1), b"ok").unwrap();
            store.segment_path("t")
        };

        // Half-written frame at the end
        let mut file = OpenOptions::new().append(true).open(&segment_path).unwrap();
        file.write_all(&[42, 0, 0, 0, 1, 2]).unwrap();
        drop(file);

        let store = ObjectStore::open(config).unwrap();
        assert_eq!(store.count("t"), 1);
        store.insert("t", None, Ts(2), b"next").unwrap();
        assert_eq!(ts_of(&store.seek("t", None).unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_oversized_entry_is_refused() {
        assert_eq!(frame_len(MAX_ENTRY_SIZE).unwrap(), MAX_ENTRY_SIZE as u32);
        assert!(matches!(
            frame_len(MAX_ENTRY_SIZE + 1),
            Err(BrokerError::InvalidFormat(_))
        ));

        // Anything the limit lets through survives a reopen
        let mut frame = Vec::new();
        write_frame(&mut frame, b"payload").unwrap();
        let (encoded, len) = parse_frame(&frame).unwrap();
        assert_eq!(encoded, b"payload");
        assert_eq!(len, frame.len());
    }

    #[test]
    fn test_locked_store() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            path: dir.path().join("store"),
            cache_size: 4,
            create_if_missing: true,
        };

        let _store = ObjectStore::create(config.clone()).unwrap();
        assert!(matches!(ObjectStore::open(config), Err(BrokerError::Locked)));
    }

    #[test]
    fn test_missing_store_without_create() {
        let dir = TempDir::new().unwrap();
        let result = ObjectStore::open_or_create(StoreConfig {
            path: dir.path().join("nope"),
            cache_size: 4,
            create_if_missing: false,
        });
        assert!(matches!(result, Err(BrokerError::NotInitialized)));
    }
}
