//! Segment files on disk.

use super::metadata::{
    key_file_name, metadata_file_name, now_nanos, value_file_name, SegmentFileKind,
    SegmentMetadata,
};
use super::record::{self, LEN_SIZE};
use super::shard_for_key;
use crate::dir::{remove_file_if_exists, sync_directory, write_atomic};
use crate::error::{DbError, DbResult};
use crate::types::{Address, ScopedKey};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Size thresholds at which a segment reports itself full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLimits {
    /// Shard value file size.
    pub target_file_size: u64,
    /// Number of keys.
    pub max_key_count: u32,
    /// Key file size.
    pub target_key_file_size: u64,
}

/// Result of appending to a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record was written.
    Written {
        /// Where the value landed.
        address: Address,
        /// Whether the segment reached one of its limits.
        full: bool,
    },
    /// The shard cannot address another record; nothing was written.
    Full,
}

/// Files found on disk for one segment index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentFiles {
    /// Metadata file, if present.
    pub metadata: Option<PathBuf>,
    /// Key file, if present.
    pub keys: Option<PathBuf>,
    /// Value files by shard.
    pub values: BTreeMap<u32, PathBuf>,
}

impl SegmentFiles {
    /// Returns every file path.
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.metadata
            .iter()
            .chain(self.keys.iter())
            .chain(self.values.values())
    }
}

/// Scans table directories for segment files, grouped by index.
///
/// Directories that do not exist are skipped.
pub fn discover(table_dirs: &[PathBuf]) -> DbResult<BTreeMap<u32, SegmentFiles>> {
    let mut found: BTreeMap<u32, SegmentFiles> = BTreeMap::new();
    for dir in table_dirs {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let Some(kind) = entry.file_name().to_str().and_then(SegmentFileKind::parse) else {
                continue;
            };
            let files = found.entry(kind.index()).or_default();
            let path = entry.path();
            match kind {
                SegmentFileKind::Metadata(_) => files.metadata = Some(path),
                SegmentFileKind::Keys(_) => files.keys = Some(path),
                SegmentFileKind::Values(_, shard) => {
                    files.values.insert(shard, path);
                }
            }
        }
    }
    Ok(found)
}

#[derive(Debug)]
struct FileWriter {
    file: Option<BufWriter<File>>,
    size: u64,
}

impl FileWriter {
    fn open(path: &Path) -> DbResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Some(BufWriter::new(file)),
            size,
        })
    }

    fn sealed(path: &Path) -> Self {
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Self { file: None, size }
    }

    fn flush(&mut self, fsync: bool) -> DbResult<()> {
        if let Some(writer) = self.file.as_mut() {
            writer.flush()?;
            if fsync {
                writer.get_ref().sync_data()?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct SegmentState {
    metadata: SegmentMetadata,
    oldest_write_nanos: u64,
}

/// One segment: a metadata file, a key file and one value file per shard.
///
/// Writes to different shards proceed in parallel; each shard file and the
/// key file has its own lock. A sealed segment is read-only.
#[derive(Debug)]
pub struct Segment {
    index: u32,
    metadata_path: PathBuf,
    key_path: PathBuf,
    shard_paths: Vec<PathBuf>,
    limits: SegmentLimits,
    fsync: bool,
    state: Mutex<SegmentState>,
    shards: Vec<Mutex<FileWriter>>,
    keys: Mutex<FileWriter>,
    readers: Vec<Mutex<Option<File>>>,
}

impl Segment {
    /// Creates a new writable segment.
    ///
    /// The metadata and key file go to `table_dirs[index % n]`, shard `s` to
    /// `table_dirs[s % n]`. The metadata file is written first so a crash
    /// never leaves shard files that discovery cannot attribute.
    pub fn create(
        index: u32,
        table_dirs: &[PathBuf],
        sharding_factor: u32,
        limits: SegmentLimits,
        fsync: bool,
    ) -> DbResult<Self> {
        if table_dirs.is_empty() {
            return Err(DbError::invalid_config("at least one path is required"));
        }
        if sharding_factor == 0 {
            return Err(DbError::invalid_config("sharding factor must be at least 1"));
        }
        for dir in table_dirs {
            fs::create_dir_all(dir)?;
        }

        let home = &table_dirs[index as usize % table_dirs.len()];
        let metadata = SegmentMetadata::new(sharding_factor, rand::random());
        let metadata_path = home.join(metadata_file_name(index));
        metadata.store(&metadata_path, fsync)?;

        let key_path = home.join(key_file_name(index));
        let keys = FileWriter::open(&key_path)?;

        let shard_paths: Vec<PathBuf> = (0..sharding_factor)
            .map(|shard| {
                table_dirs[shard as usize % table_dirs.len()].join(value_file_name(index, shard))
            })
            .collect();
        let shards = shard_paths
            .iter()
            .map(|path| FileWriter::open(path).map(Mutex::new))
            .collect::<DbResult<Vec<_>>>()?;

        if fsync {
            for dir in table_dirs {
                sync_directory(dir)?;
            }
        }

        debug!(index, sharding_factor, "created segment");
        Ok(Self::assemble(
            index,
            metadata_path,
            key_path,
            shard_paths,
            limits,
            fsync,
            metadata,
            shards,
            keys,
        ))
    }

    /// Opens an existing segment read-only.
    ///
    /// An unsealed segment must be passed through [`Segment::recover`]
    /// before its keys are trusted.
    pub fn open(
        index: u32,
        files: &SegmentFiles,
        table_dirs: &[PathBuf],
        limits: SegmentLimits,
        fsync: bool,
    ) -> DbResult<Self> {
        let metadata_path = files.metadata.clone().ok_or_else(|| {
            DbError::segment_corruption(format!("segment {index} has no metadata file"))
        })?;
        let metadata = SegmentMetadata::load(&metadata_path)?;
        let home = metadata_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let key_path = files
            .keys
            .clone()
            .unwrap_or_else(|| home.join(key_file_name(index)));
        let shard_paths: Vec<PathBuf> = (0..metadata.sharding_factor)
            .map(|shard| {
                files.values.get(&shard).cloned().unwrap_or_else(|| {
                    let dir = table_dirs
                        .get(shard as usize % table_dirs.len().max(1))
                        .unwrap_or(&home);
                    dir.join(value_file_name(index, shard))
                })
            })
            .collect();

        let shards = shard_paths
            .iter()
            .map(|path| Mutex::new(FileWriter::sealed(path)))
            .collect();
        let keys = FileWriter::sealed(&key_path);

        Ok(Self::assemble(
            index,
            metadata_path,
            key_path,
            shard_paths,
            limits,
            fsync,
            metadata,
            shards,
            keys,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        index: u32,
        metadata_path: PathBuf,
        key_path: PathBuf,
        shard_paths: Vec<PathBuf>,
        limits: SegmentLimits,
        fsync: bool,
        metadata: SegmentMetadata,
        shards: Vec<Mutex<FileWriter>>,
        keys: FileWriter,
    ) -> Self {
        let readers = shard_paths.iter().map(|_| Mutex::new(None)).collect();
        Self {
            index,
            metadata_path,
            key_path,
            shard_paths,
            limits,
            fsync,
            state: Mutex::new(SegmentState {
                metadata,
                oldest_write_nanos: 0,
            }),
            shards,
            keys: Mutex::new(keys),
            readers,
        }
    }

    /// Returns the segment index.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns a copy of the current metadata.
    #[must_use]
    pub fn metadata(&self) -> SegmentMetadata {
        self.state.lock().metadata
    }

    /// Returns whether the segment is sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.state.lock().metadata.sealed
    }

    /// Returns the number of keys written.
    #[must_use]
    pub fn key_count(&self) -> u32 {
        self.state.lock().metadata.key_count
    }

    /// Returns the time of the first write since this process opened the
    /// segment, or `None` if nothing was written.
    #[must_use]
    pub fn oldest_write_nanos(&self) -> Option<u64> {
        let nanos = self.state.lock().oldest_write_nanos;
        (nanos != 0).then_some(nanos)
    }

    /// Returns every file of this segment.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.metadata_path.clone(), self.key_path.clone()];
        paths.extend(self.shard_paths.iter().cloned());
        paths
    }

    /// Returns the shard a key is written to.
    #[must_use]
    pub fn shard_of(&self, key: &[u8]) -> u32 {
        let metadata = self.state.lock().metadata;
        shard_for_key(key, metadata.salt, metadata.sharding_factor)
    }

    /// Appends a key-value pair.
    ///
    /// The value goes to the key's shard file and a key record to the key
    /// file. Neither is durable until [`Segment::flush`].
    pub fn write(&self, key: &[u8], value: &[u8]) -> DbResult<WriteOutcome> {
        let shard = self.shard_of(key) as usize;
        let value_record = record::encode_value(value)?;

        let (address, shard_size) = {
            let mut writer = self.shards[shard].lock();
            let Ok(offset) = u32::try_from(writer.size) else {
                return Ok(WriteOutcome::Full);
            };
            let file = writer
                .file
                .as_mut()
                .ok_or_else(|| DbError::invalid_operation("segment is sealed"))?;
            file.write_all(&value_record)?;
            writer.size += value_record.len() as u64;
            (Address::new(self.index, offset), writer.size)
        };

        let value_len = u32::try_from(value.len())
            .map_err(|_| DbError::invalid_operation("value is too large"))?;
        let key_record = record::encode_key(key, address, value_len)?;
        let key_file_size = {
            let mut writer = self.keys.lock();
            let file = writer
                .file
                .as_mut()
                .ok_or_else(|| DbError::invalid_operation("segment is sealed"))?;
            file.write_all(&key_record)?;
            writer.size += key_record.len() as u64;
            writer.size
        };

        let key_count = {
            let mut state = self.state.lock();
            let now = now_nanos();
            state.metadata.key_count += 1;
            state.metadata.newest_write_nanos = now;
            if state.oldest_write_nanos == 0 {
                state.oldest_write_nanos = now;
            }
            state.metadata.key_count
        };

        let full = shard_size >= self.limits.target_file_size
            || key_count >= self.limits.max_key_count
            || key_file_size >= self.limits.target_key_file_size;
        Ok(WriteOutcome::Written { address, full })
    }

    /// Makes every write so far visible to readers, and durable when fsync
    /// is enabled.
    ///
    /// Shard files are flushed before the key file so a durable key record
    /// never points at a missing value.
    pub fn flush(&self) -> DbResult<()> {
        for shard in &self.shards {
            shard.lock().flush(self.fsync)?;
        }
        let writable = {
            let mut keys = self.keys.lock();
            keys.flush(self.fsync)?;
            keys.file.is_some()
        };
        if writable {
            let state = self.state.lock();
            state.metadata.store(&self.metadata_path, self.fsync)?;
        }
        Ok(())
    }

    /// Flushes and permanently closes the segment for writing.
    pub fn seal(&self) -> DbResult<()> {
        if self.is_sealed() {
            return Ok(());
        }
        self.flush()?;
        for shard in &self.shards {
            shard.lock().file = None;
        }
        self.keys.lock().file = None;

        let mut state = self.state.lock();
        state.metadata.sealed = true;
        state.metadata.store(&self.metadata_path, self.fsync)?;
        debug!(index = self.index, keys = state.metadata.key_count, "sealed segment");
        Ok(())
    }

    /// Repairs and seals a segment left unsealed by a crash.
    ///
    /// Drops a torn key-file tail and any key whose value never reached its
    /// shard file, then seals. Returns the surviving keys.
    pub fn recover(&self) -> DbResult<Vec<ScopedKey>> {
        let data = read_or_empty(&self.key_path)?;
        let scan = record::scan_keys(&data)?;
        let metadata = self.metadata();

        let shard_lens: Vec<u64> = self
            .shard_paths
            .iter()
            .map(|path| fs::metadata(path).map(|m| m.len()).unwrap_or(0))
            .collect();
        let total = scan.keys.len();
        let keys: Vec<ScopedKey> = scan
            .keys
            .into_iter()
            .filter(|key| {
                let shard = shard_for_key(&key.key, metadata.salt, metadata.sharding_factor);
                let end = u64::from(key.address.offset())
                    + record::value_record_len(key.value_size as usize) as u64;
                end <= shard_lens[shard as usize]
            })
            .collect();

        if scan.torn || keys.len() != total {
            warn!(
                index = self.index,
                torn = scan.torn,
                dropped = total - keys.len(),
                "repairing key file of unsealed segment"
            );
            let mut rewritten = Vec::with_capacity(data.len());
            for key in &keys {
                rewritten.extend(record::encode_key(&key.key, key.address, key.value_size)?);
            }
            write_atomic(&self.key_path, &rewritten, self.fsync)?;
        }

        {
            let mut state = self.state.lock();
            state.metadata.key_count = u32::try_from(keys.len()).unwrap_or(u32::MAX);
            state.metadata.newest_write_nanos = now_nanos();
            state.metadata.sealed = true;
            state.metadata.store(&self.metadata_path, self.fsync)?;
        }
        self.keys.lock().size = fs::metadata(&self.key_path).map(|m| m.len()).unwrap_or(0);
        Ok(keys)
    }

    /// Reads the value a key points to.
    ///
    /// Returns `None` if the shard file no longer exists.
    pub fn read(&self, key: &[u8], address: Address) -> DbResult<Option<Vec<u8>>> {
        let shard = self.shard_of(key) as usize;
        let mut reader = self.readers[shard].lock();
        if reader.is_none() {
            match File::open(&self.shard_paths[shard]) {
                Ok(file) => *reader = Some(file),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        let Some(file) = reader.as_mut() else {
            return Ok(None);
        };

        file.seek(SeekFrom::Start(u64::from(address.offset())))?;
        let mut header = [0u8; LEN_SIZE];
        read_exact_or_corrupt(file, &mut header, address)?;
        let len = record::value_len(header);

        let mut buf = vec![0u8; record::value_record_len(len)];
        buf[..LEN_SIZE].copy_from_slice(&header);
        read_exact_or_corrupt(file, &mut buf[LEN_SIZE..], address)?;
        record::decode_value(&buf).map(Some)
    }

    /// Returns every key record in the segment.
    pub fn keys(&self) -> DbResult<Vec<ScopedKey>> {
        let data = read_or_empty(&self.key_path)?;
        let scan = record::scan_keys(&data)?;
        if scan.torn {
            warn!(index = self.index, "ignoring torn key file tail");
        }
        Ok(scan.keys)
    }

    /// Deletes every file of the segment.
    ///
    /// The metadata file goes first: leftover value or key files without
    /// metadata are cleaned up at the next open.
    pub fn delete(&self) -> DbResult<()> {
        for reader in &self.readers {
            *reader.lock() = None;
        }
        for shard in &self.shards {
            shard.lock().file = None;
        }
        self.keys.lock().file = None;

        remove_file_if_exists(&self.metadata_path)?;
        remove_file_if_exists(&self.key_path)?;
        for path in &self.shard_paths {
            remove_file_if_exists(path)?;
        }
        debug!(index = self.index, "deleted segment");
        Ok(())
    }
}

fn read_or_empty(path: &Path) -> DbResult<Vec<u8>> {
    match fs::read(path) {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn read_exact_or_corrupt(file: &mut File, buf: &mut [u8], address: Address) -> DbResult<()> {
    file.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            DbError::segment_corruption(format!("value at {address} extends past end of file"))
        } else {
            e.into()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const LIMITS: SegmentLimits = SegmentLimits {
        target_file_size: 1 << 20,
        max_key_count: 1000,
        target_key_file_size: 1 << 20,
    };

    fn written(outcome: WriteOutcome) -> (Address, bool) {
        match outcome {
            WriteOutcome::Written { address, full } => (address, full),
            WriteOutcome::Full => panic!("unexpected full segment"),
        }
    }

    #[test]
    fn write_flush_read() {
        let temp = tempdir().unwrap();
        let dirs = vec![temp.path().to_path_buf()];
        let segment = Segment::create(0, &dirs, 4, LIMITS, false).unwrap();

        let (a, _) = written(segment.write(b"alpha", b"one").unwrap());
        let (b, _) = written(segment.write(b"beta", b"two").unwrap());
        segment.flush().unwrap();

        assert_eq!(a.segment_index(), 0);
        assert_eq!(segment.read(b"alpha", a).unwrap().unwrap(), b"one");
        assert_eq!(segment.read(b"beta", b).unwrap().unwrap(), b"two");
        assert_eq!(segment.key_count(), 2);
    }

    #[test]
    fn reports_full_at_key_limit() {
        let temp = tempdir().unwrap();
        let dirs = vec![temp.path().to_path_buf()];
        let limits = SegmentLimits {
            max_key_count: 2,
            ..LIMITS
        };
        let segment = Segment::create(0, &dirs, 1, limits, false).unwrap();

        let (_, full) = written(segment.write(b"a", b"1").unwrap());
        assert!(!full);
        let (_, full) = written(segment.write(b"b", b"2").unwrap());
        assert!(full);
    }

    #[test]
    fn sealed_segment_rejects_writes_and_reopens() {
        let temp = tempdir().unwrap();
        let dirs = vec![temp.path().to_path_buf()];
        let segment = Segment::create(3, &dirs, 2, LIMITS, false).unwrap();
        let (address, _) = written(segment.write(b"k", b"v").unwrap());
        segment.seal().unwrap();
        assert!(segment.write(b"k2", b"v").is_err());

        let files = discover(&dirs).unwrap();
        let reopened = Segment::open(3, &files[&3], &dirs, LIMITS, false).unwrap();
        assert!(reopened.is_sealed());
        assert_eq!(reopened.key_count(), 1);
        assert_eq!(reopened.read(b"k", address).unwrap().unwrap(), b"v");
        let keys = reopened.keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].address, address);
    }

    #[test]
    fn files_spread_across_roots() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let dirs = vec![a.path().to_path_buf(), b.path().to_path_buf()];
        let segment = Segment::create(1, &dirs, 2, LIMITS, false).unwrap();
        segment.seal().unwrap();

        assert!(b.path().join(metadata_file_name(1)).exists());
        assert!(b.path().join(key_file_name(1)).exists());
        assert!(a.path().join(value_file_name(1, 0)).exists());
        assert!(b.path().join(value_file_name(1, 1)).exists());
    }

    #[test]
    fn recover_drops_torn_tail_and_seals() {
        let temp = tempdir().unwrap();
        let dirs = vec![temp.path().to_path_buf()];
        let address = {
            let segment = Segment::create(0, &dirs, 1, LIMITS, false).unwrap();
            let (address, _) = written(segment.write(b"kept", b"value").unwrap());
            segment.flush().unwrap();
            address
        };
        let key_path = temp.path().join(key_file_name(0));
        let mut file = OpenOptions::new().append(true).open(&key_path).unwrap();
        file.write_all(&[9, 0, 0, 0, b'x']).unwrap();
        drop(file);

        let files = discover(&dirs).unwrap();
        let segment = Segment::open(0, &files[&0], &dirs, LIMITS, false).unwrap();
        assert!(!segment.is_sealed());
        let keys = segment.recover().unwrap();

        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key, b"kept");
        assert!(segment.is_sealed());
        assert_eq!(segment.keys().unwrap().len(), 1);
        assert_eq!(segment.read(b"kept", address).unwrap().unwrap(), b"value");
    }

    #[test]
    fn recover_drops_keys_without_values() {
        let temp = tempdir().unwrap();
        let dirs = vec![temp.path().to_path_buf()];
        {
            let segment = Segment::create(0, &dirs, 1, LIMITS, false).unwrap();
            segment.write(b"a", b"value-a").unwrap();
            segment.write(b"b", b"value-b").unwrap();
            segment.flush().unwrap();
        }
        // Lose the second value record.
        let value_path = temp.path().join(value_file_name(0, 0));
        let len = fs::metadata(&value_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&value_path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let files = discover(&dirs).unwrap();
        let segment = Segment::open(0, &files[&0], &dirs, LIMITS, false).unwrap();
        let keys = segment.recover().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key, b"a");
        assert_eq!(segment.key_count(), 1);
    }

    #[test]
    fn delete_removes_files_and_reads_miss() {
        let temp = tempdir().unwrap();
        let dirs = vec![temp.path().to_path_buf()];
        let segment = Segment::create(0, &dirs, 2, LIMITS, false).unwrap();
        let (address, _) = written(segment.write(b"k", b"v").unwrap());
        segment.seal().unwrap();
        segment.delete().unwrap();

        assert!(discover(&dirs).unwrap().is_empty());
        assert_eq!(segment.read(b"k", address).unwrap(), None);
    }

    #[test]
    fn discover_ignores_foreign_files() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("table.metadata"), b"x").unwrap();
        fs::write(temp.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(temp.path().join("keymap")).unwrap();
        assert!(discover(&[temp.path().to_path_buf()]).unwrap().is_empty());
    }
}
