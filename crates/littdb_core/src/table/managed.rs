//! The storage-backed table.

use super::gc::GcWorker;
use super::metadata::{TableMetadata, TABLE_METADATA_FILE};
use super::{Table, TableState};
use crate::config::Config;
use crate::dir::{self, remove_dir_if_exists, remove_file_if_exists};
use crate::error::{DbError, DbResult};
use crate::keymap::{clear_initialized, load_keymap, mark_initialized, Keymap};
use crate::metrics::DbMetrics;
use crate::segment::metadata::now_nanos;
use crate::segment::{self, Segment, SegmentLimits, WriteOutcome};
use crate::snapshot::SnapshotDir;
use crate::types::{Address, KAPair, KVPair, ScopedKey};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Keys per keymap transaction when regenerating from segments.
const RELOAD_BATCH: usize = 1024;

/// Writes that are in segment buffers but not yet in the keymap.
#[derive(Debug, Default)]
struct WriteBuffer {
    /// Latest unflushed value per key.
    entries: HashMap<Vec<u8>, (Bytes, Address)>,
    /// Mappings to commit at the next flush, in write order.
    pending: Vec<KAPair>,
    /// Keys being written under double-write protection.
    reserved: HashSet<Vec<u8>>,
    /// Sum of key and value lengths in `entries`.
    weight: u64,
}

impl WriteBuffer {
    fn insert(&mut self, key: Vec<u8>, value: Bytes, address: Address) {
        self.pending.push(KAPair::new(key.clone(), address));
        let key_len = key.len() as u64;
        self.weight += key_len + value.len() as u64;
        if let Some((old, _)) = self.entries.insert(key, (value, address)) {
            self.weight = self.weight.saturating_sub(key_len + old.len() as u64);
        }
    }

    /// Drops entries whose latest write is now in the keymap.
    fn commit(&mut self, committed: &[KAPair]) {
        for pair in committed {
            let current = self
                .entries
                .get(&pair.key)
                .is_some_and(|(_, address)| *address == pair.address);
            if current {
                if let Some((value, _)) = self.entries.remove(&pair.key) {
                    let weight = (pair.key.len() + value.len()) as u64;
                    self.weight = self.weight.saturating_sub(weight);
                }
            }
        }
    }
}

struct TableInner {
    name: String,
    table_dirs: Vec<PathBuf>,
    metadata_path: PathBuf,
    limits: SegmentLimits,
    fsync: bool,
    double_write_protection: bool,
    settings: Mutex<TableMetadata>,
    /// Write buffer budget in bytes (0 = flush only on demand).
    cache_size: AtomicU64,
    keymap: Box<dyn Keymap>,
    keymap_dir: PathBuf,
    /// Whether the keymap sentinel is written only by a clean stop.
    mark_on_stop: bool,
    /// Every segment, including the active one.
    segments: RwLock<BTreeMap<u32, Arc<Segment>>>,
    /// Shared by writers, exclusive for flush and rotation.
    active: RwLock<Arc<Segment>>,
    buffer: Mutex<WriteBuffer>,
    snapshot: Option<SnapshotDir>,
    metrics: Arc<DbMetrics>,
    state: RwLock<TableState>,
}

/// A table backed by segments on disk and a keymap.
///
/// Writes go to the active segment, sharded by key, and are buffered in
/// memory until the next flush commits their addresses to the keymap.
/// Reads consult that buffer first, then the keymap.
///
/// # Concurrency
///
/// Writers share a read guard on the active segment and contend only on
/// their shard file. Flush and rotation take the guard exclusively.
pub struct ManagedTable {
    inner: Arc<TableInner>,
    gc_period: Duration,
    gc: Mutex<Option<GcWorker>>,
}

impl ManagedTable {
    /// Loads or creates a table.
    ///
    /// Restores settings, opens the keymap (migrating it if its type
    /// changed), repairs any segment left unsealed by a crash, regenerates
    /// the keymap from segments when required, and opens a fresh active
    /// segment. The table is returned in the built state.
    pub fn open(name: &str, config: &Config, metrics: Arc<DbMetrics>) -> DbResult<Self> {
        config.validate()?;
        dir::validate_table_name(name)?;

        let table_dirs = dir::table_dirs(&config.paths, name);
        for table_dir in &table_dirs {
            fs::create_dir_all(table_dir)?;
        }

        let metadata_path = TableMetadata::locate(&table_dirs)
            .unwrap_or_else(|| table_dirs[0].join(TABLE_METADATA_FILE));
        let settings = match TableMetadata::load(&metadata_path)? {
            Some(settings) => settings,
            None => {
                let settings = TableMetadata {
                    ttl: config.ttl,
                    sharding_factor: config.sharding_factor,
                };
                settings.store(&metadata_path, config.fsync)?;
                settings
            }
        };

        let loaded = load_keymap(
            &config.paths,
            name,
            config.keymap_type,
            config.double_write_protection,
        )?;

        let limits = SegmentLimits {
            target_file_size: config.target_segment_file_size,
            max_key_count: config.max_segment_key_count,
            target_key_file_size: config.target_segment_key_file_size,
        };
        let (mut segments, recovered) = load_segments(&table_dirs, limits, config.fsync)?;

        if loaded.requires_reload {
            info!(table = name, segments = segments.len(), "reloading keymap from segments");
            for segment in segments.values() {
                replace_in_batches(loaded.keymap.as_ref(), segment.keys()?)?;
            }
        } else {
            for keys in recovered {
                replace_in_batches(loaded.keymap.as_ref(), keys)?;
            }
        }
        // A keymap that can lose commits in a crash stays unmarked while
        // running, so an unclean shutdown forces a reload.
        let mark_on_stop = !config.keymap_type.is_crash_consistent();
        if mark_on_stop {
            clear_initialized(&loaded.directory)?;
        } else {
            mark_initialized(&loaded.directory)?;
        }

        let next_index = match segments.keys().next_back() {
            Some(last) => last
                .checked_add(1)
                .ok_or_else(|| DbError::invalid_operation("segment index space exhausted"))?,
            None => 0,
        };
        let active = Arc::new(Segment::create(
            next_index,
            &table_dirs,
            settings.sharding_factor,
            limits,
            config.fsync,
        )?);
        segments.insert(next_index, Arc::clone(&active));

        let snapshot = match &config.snapshot_directory {
            Some(root) => {
                let snapshot = SnapshotDir::open(root, name)?;
                snapshot.repair(segments.values())?;
                Some(snapshot)
            }
            None => None,
        };

        info!(
            table = name,
            segments = segments.len(),
            keymap = %config.keymap_type,
            ttl = ?settings.ttl,
            sharding_factor = settings.sharding_factor,
            "table loaded"
        );

        let inner = TableInner {
            name: name.to_string(),
            table_dirs,
            metadata_path,
            limits,
            fsync: config.fsync,
            double_write_protection: config.double_write_protection,
            settings: Mutex::new(settings),
            cache_size: AtomicU64::new(config.cache_size),
            keymap: loaded.keymap,
            keymap_dir: loaded.directory,
            mark_on_stop,
            segments: RwLock::new(segments),
            active: RwLock::new(active),
            buffer: Mutex::new(WriteBuffer::default()),
            snapshot,
            metrics,
            state: RwLock::new(TableState::Built),
        };
        Ok(Self {
            inner: Arc::new(inner),
            gc_period: config.gc_period,
            gc: Mutex::new(None),
        })
    }

    /// Returns the indices of all segments, oldest first.
    #[must_use]
    pub fn segment_indices(&self) -> Vec<u32> {
        self.inner.segments.read().keys().copied().collect()
    }

    /// Runs one garbage collection pass immediately.
    pub fn collect_garbage(&self) -> DbResult<()> {
        self.inner.collect_garbage()
    }

    pub(crate) fn ensure_started(&self) -> DbResult<()> {
        self.inner.ensure_started()
    }
}

impl TableInner {
    fn ensure_started(&self) -> DbResult<()> {
        if *self.state.read() == TableState::Started {
            Ok(())
        } else {
            Err(DbError::table_not_running(&self.name))
        }
    }

    /// Rejects a key that is mapped, buffered or being written.
    fn reserve(&self, key: &[u8]) -> DbResult<()> {
        let mut buffer = self.buffer.lock();
        if buffer.entries.contains_key(key)
            || buffer.reserved.contains(key)
            || self.keymap.get(key)?.is_some()
        {
            return Err(DbError::double_write(key));
        }
        buffer.reserved.insert(key.to_vec());
        Ok(())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.ensure_started()?;
        if self.double_write_protection {
            self.reserve(key)?;
        }
        if let Err(e) = self.write_value(key, value) {
            self.buffer.lock().reserved.remove(key);
            return Err(e);
        }
        self.metrics.record_put(value.len() as u64);
        self.flush_if_over_budget()
    }

    fn write_value(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        let value = Bytes::copy_from_slice(value);
        // A second attempt lands in a fresh segment.
        for _ in 0..2 {
            let (index, outcome) = {
                let active = self.active.read();
                let outcome = active.write(key, &value)?;
                if let WriteOutcome::Written { address, .. } = outcome {
                    let mut buffer = self.buffer.lock();
                    buffer.reserved.remove(key);
                    buffer.insert(key.to_vec(), value.clone(), address);
                }
                (active.index(), outcome)
            };
            match outcome {
                WriteOutcome::Written { full, .. } => {
                    if full {
                        self.rotate(index)?;
                    }
                    return Ok(());
                }
                WriteOutcome::Full => self.rotate(index)?,
            }
        }
        Err(DbError::invalid_operation(format!(
            "value of {} bytes does not fit in a segment",
            value.len()
        )))
    }

    fn flush_if_over_budget(&self) -> DbResult<()> {
        let budget = self.cache_size.load(Ordering::Relaxed);
        if budget > 0 && self.buffer.lock().weight > budget {
            self.flush()?;
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> DbResult<Option<Bytes>> {
        self.ensure_started()?;
        let buffered = self
            .buffer
            .lock()
            .entries
            .get(key)
            .map(|(value, _)| value.clone());
        let value = match buffered {
            Some(value) => Some(value),
            None => self.read_committed(key)?,
        };
        self.metrics
            .record_get(value.as_ref().map(|v| v.len() as u64));
        Ok(value)
    }

    fn read_committed(&self, key: &[u8]) -> DbResult<Option<Bytes>> {
        let Some(address) = self.keymap.get(key)? else {
            return Ok(None);
        };
        let segment = self
            .segments
            .read()
            .get(&address.segment_index())
            .cloned();
        // A missing segment was collected after the lookup.
        match segment {
            Some(segment) => Ok(segment.read(key, address)?.map(Bytes::from)),
            None => Ok(None),
        }
    }

    fn flush(&self) -> DbResult<()> {
        let active = self.active.write();
        self.flush_locked(&active)?;
        self.metrics.record_flush();
        Ok(())
    }

    /// Flushes the active segment and commits buffered mappings.
    ///
    /// The caller holds the active segment guard exclusively.
    fn flush_locked(&self, active: &Segment) -> DbResult<()> {
        let pending = std::mem::take(&mut self.buffer.lock().pending);
        let result = active.flush().and_then(|()| self.keymap.put(&pending));
        let mut buffer = self.buffer.lock();
        match result {
            Ok(()) => {
                buffer.commit(&pending);
                Ok(())
            }
            Err(e) => {
                // Retry these mappings at the next flush.
                buffer.pending.splice(0..0, pending);
                Err(e)
            }
        }
    }

    /// Seals the active segment and opens the next one, unless another
    /// thread already rotated past `expected`.
    fn rotate(&self, expected: u32) -> DbResult<()> {
        let sealed = {
            let mut active = self.active.write();
            if active.index() != expected {
                return Ok(());
            }
            self.flush_locked(&active)?;
            active.seal()?;
            self.metrics.record_segment_sealed();

            let next_index = active
                .index()
                .checked_add(1)
                .ok_or_else(|| DbError::invalid_operation("segment index space exhausted"))?;
            let sharding_factor = self.settings.lock().sharding_factor;
            let next = Arc::new(Segment::create(
                next_index,
                &self.table_dirs,
                sharding_factor,
                self.limits,
                self.fsync,
            )?);
            self.segments.write().insert(next_index, Arc::clone(&next));
            std::mem::replace(&mut *active, next)
        };

        if let Some(snapshot) = &self.snapshot {
            snapshot.link_segment(&sealed)?;
        }
        debug!(table = %self.name, sealed = sealed.index(), "rotated segment");
        Ok(())
    }

    fn collect_garbage(&self) -> DbResult<()> {
        if *self.state.read() != TableState::Started {
            return Ok(());
        }
        let ttl = self.settings.lock().ttl;
        if ttl.is_zero() {
            self.metrics.record_gc_pass();
            return Ok(());
        }
        let ttl_nanos = u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX);
        let now = now_nanos();
        let expired = |written: u64| written.saturating_add(ttl_nanos) <= now;

        // Seal an active segment holding expired data so it becomes collectable.
        let (active_index, oldest_write) = {
            let active = self.active.read();
            (active.index(), active.oldest_write_nanos())
        };
        if oldest_write.is_some_and(expired) {
            self.rotate(active_index)?;
        }

        let mut deleted = 0usize;
        loop {
            let Some(oldest) = self.segments.read().values().next().cloned() else {
                break;
            };
            if !oldest.is_sealed() {
                break;
            }
            let metadata = oldest.metadata();
            let newest_write = if metadata.newest_write_nanos == 0 {
                metadata.created_nanos
            } else {
                metadata.newest_write_nanos
            };
            if !expired(newest_write) {
                break;
            }
            self.delete_segment(&oldest)?;
            deleted += 1;
        }

        if deleted > 0 {
            debug!(table = %self.name, deleted, "garbage collected segments");
        }
        self.metrics.record_gc_pass();
        Ok(())
    }

    /// Removes a sealed segment and the mappings that still point into it.
    fn delete_segment(&self, segment: &Segment) -> DbResult<()> {
        let index = segment.index();
        let mut stale = Vec::new();
        {
            // Flushes commit mappings under this guard, so none can land
            // between the scan and the delete.
            let _active = self.active.write();
            for key in segment.keys()? {
                let mapped = self.keymap.get(&key.key)?;
                if mapped.is_some_and(|address| address.segment_index() == index) {
                    stale.push(key.key);
                }
            }
            self.keymap.delete(&stale)?;
        }

        if let Some(snapshot) = &self.snapshot {
            snapshot.unlink_segment(segment)?;
        }
        self.segments.write().remove(&index);
        segment.delete()?;
        self.metrics.record_segment_deleted(stale.len() as u64);
        Ok(())
    }

    fn key_count(&self) -> DbResult<u64> {
        let buffered = self.buffer.lock().entries.len() as u64;
        Ok(self.keymap.len()? + buffered)
    }

    /// Flushes and closes the active segment. An empty one is deleted
    /// rather than sealed.
    fn close_active(&self) -> DbResult<()> {
        let active = self.active.write();
        self.flush_locked(&active)?;
        if active.key_count() == 0 {
            self.segments.write().remove(&active.index());
            return active.delete();
        }
        active.seal()?;
        self.metrics.record_segment_sealed();
        if let Some(snapshot) = &self.snapshot {
            snapshot.link_segment(&active)?;
        }
        Ok(())
    }
}

/// Opens every segment on disk, sealing any left open by a crash.
///
/// Returns the segments and the surviving keys of each recovered one.
fn load_segments(
    table_dirs: &[PathBuf],
    limits: SegmentLimits,
    fsync: bool,
) -> DbResult<(BTreeMap<u32, Arc<Segment>>, Vec<Vec<ScopedKey>>)> {
    let mut segments = BTreeMap::new();
    let mut recovered = Vec::new();

    for (index, files) in segment::discover(table_dirs)? {
        if files.metadata.is_none() {
            warn!(index, "removing segment files without metadata");
            for path in files.paths() {
                remove_file_if_exists(path)?;
            }
            continue;
        }

        let segment = Segment::open(index, &files, table_dirs, limits, fsync)?;
        if !segment.is_sealed() {
            warn!(index, "recovering unsealed segment");
            let keys = segment.recover()?;
            if keys.is_empty() {
                segment.delete()?;
                continue;
            }
            recovered.push(keys);
        }
        segments.insert(index, Arc::new(segment));
    }
    Ok((segments, recovered))
}

fn replace_in_batches(keymap: &dyn Keymap, keys: Vec<ScopedKey>) -> DbResult<()> {
    let pairs: Vec<KAPair> = keys.into_iter().map(ScopedKey::into_ka_pair).collect();
    for batch in pairs.chunks(RELOAD_BATCH) {
        keymap.replace(batch)?;
    }
    Ok(())
}

fn spawn_gc(inner: Weak<TableInner>, name: &str, period: Duration) -> DbResult<GcWorker> {
    let worker = GcWorker::spawn(name, period, move || {
        let Some(inner) = inner.upgrade() else {
            return false;
        };
        if let Err(e) = inner.collect_garbage() {
            warn!(table = %inner.name, error = %e, "garbage collection failed");
        }
        true
    })?;
    Ok(worker)
}

impl Table for ManagedTable {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.inner.put(key, value)
    }

    fn put_batch(&self, batch: &[KVPair]) -> DbResult<()> {
        for pair in batch {
            self.inner.put(&pair.key, &pair.value)?;
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> DbResult<Option<Bytes>> {
        self.inner.get(key)
    }

    fn flush(&self) -> DbResult<()> {
        self.inner.ensure_started()?;
        self.inner.flush()
    }

    fn ttl(&self) -> Duration {
        self.inner.settings.lock().ttl
    }

    fn set_ttl(&self, ttl: Duration) -> DbResult<()> {
        let mut settings = self.inner.settings.lock();
        settings.ttl = ttl;
        settings.store(&self.inner.metadata_path, self.inner.fsync)?;
        info!(table = %self.inner.name, ?ttl, "ttl changed");
        Ok(())
    }

    fn sharding_factor(&self) -> u32 {
        self.inner.settings.lock().sharding_factor
    }

    fn set_sharding_factor(&self, sharding_factor: u32) -> DbResult<()> {
        if sharding_factor == 0 {
            return Err(DbError::invalid_config("sharding factor must be at least 1"));
        }
        let mut settings = self.inner.settings.lock();
        settings.sharding_factor = sharding_factor;
        settings.store(&self.inner.metadata_path, self.inner.fsync)?;
        info!(table = %self.inner.name, sharding_factor, "sharding factor changed");
        Ok(())
    }

    fn set_cache_size(&self, bytes: u64) -> DbResult<()> {
        self.inner.cache_size.store(bytes, Ordering::Relaxed);
        if self.state() == TableState::Started {
            self.inner.flush_if_over_budget()?;
        }
        Ok(())
    }

    fn key_count(&self) -> DbResult<u64> {
        self.inner.key_count()
    }

    fn state(&self) -> TableState {
        *self.inner.state.read()
    }

    fn start(&self) -> DbResult<()> {
        let mut state = self.inner.state.write();
        match *state {
            TableState::Started => return Ok(()),
            TableState::Built => {}
            other => {
                return Err(DbError::invalid_operation(format!(
                    "cannot start table {} in state {other:?}",
                    self.inner.name
                )))
            }
        }
        let worker = spawn_gc(Arc::downgrade(&self.inner), &self.inner.name, self.gc_period)?;
        *self.gc.lock() = Some(worker);
        *state = TableState::Started;
        info!(table = %self.inner.name, "table started");
        Ok(())
    }

    fn stop(&self) -> DbResult<()> {
        {
            let mut state = self.inner.state.write();
            if matches!(*state, TableState::Stopped | TableState::Destroyed) {
                return Ok(());
            }
            *state = TableState::Stopped;
        }
        // The collector checks the state, so it must not be joined under the lock.
        if let Some(worker) = self.gc.lock().take() {
            worker.stop();
        }

        let mut first_error = None;
        if let Err(e) = self.inner.close_active() {
            warn!(table = %self.inner.name, error = %e, "failed to close active segment");
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.inner.keymap.stop() {
            warn!(table = %self.inner.name, error = %e, "failed to stop keymap");
            first_error.get_or_insert(e);
        }
        if self.inner.mark_on_stop && first_error.is_none() {
            if let Err(e) = mark_initialized(&self.inner.keymap_dir) {
                first_error.get_or_insert(e);
            }
        }
        info!(table = %self.inner.name, "table stopped");
        first_error.map_or(Ok(()), Err)
    }

    fn destroy(&self) -> DbResult<()> {
        if self.state() == TableState::Destroyed {
            return Ok(());
        }
        let mut first_error = self.stop().err();

        let mut record = |result: DbResult<()>| {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        };
        record(self.inner.keymap.destroy());
        for table_dir in &self.inner.table_dirs {
            record(remove_dir_if_exists(table_dir));
        }
        if let Some(snapshot) = &self.inner.snapshot {
            record(snapshot.destroy());
        }

        *self.inner.state.write() = TableState::Destroyed;
        info!(table = %self.inner.name, "table destroyed");
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for ManagedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedTable")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("segments", &self.inner.segments.read().len())
            .finish()
    }
}
