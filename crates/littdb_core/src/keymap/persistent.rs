//! Durable keymap backed by redb.

use super::{check_batch_unique, Keymap, KeymapType};
use crate::error::{DbError, DbResult};
use crate::types::{Address, KAPair};
use parking_lot::RwLock;
use redb::{Database, Durability, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const KEYMAP_TABLE: TableDefinition<&[u8], u64> = TableDefinition::new("keymap");

/// File name of the redb database inside the keymap data directory.
pub const DATABASE_FILE: &str = "keymap.redb";

/// A keymap stored in a redb database.
///
/// With `sync_writes` every commit is durable before `put` returns. Without
/// it commits are buffered by redb and only made durable by the next
/// synchronous commit, which `stop` always issues.
pub struct RedbKeymap {
    db: RwLock<Option<Database>>,
    path: PathBuf,
    sync_writes: bool,
    double_write_protection: bool,
}

impl RedbKeymap {
    /// Opens or creates the database in `data_dir`.
    ///
    /// Returns the keymap and whether the database file was newly created,
    /// in which case it must be reloaded from segments.
    pub fn open(
        data_dir: &Path,
        sync_writes: bool,
        double_write_protection: bool,
    ) -> DbResult<(Self, bool)> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(DATABASE_FILE);
        let fresh = !path.exists();
        let db = Database::create(&path)?;

        // Create the table eagerly so read transactions never miss it.
        let txn = db.begin_write()?;
        {
            let _table = txn.open_table(KEYMAP_TABLE)?;
        }
        txn.commit()?;

        debug!(path = %path.display(), fresh, sync_writes, "opened redb keymap");

        let keymap = Self {
            db: RwLock::new(Some(db)),
            path,
            sync_writes,
            double_write_protection,
        };
        Ok((keymap, fresh))
    }

    /// Returns the database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn durability(&self) -> Durability {
        if self.sync_writes {
            Durability::Immediate
        } else {
            Durability::Eventual
        }
    }

    fn with_db<R>(&self, f: impl FnOnce(&Database) -> DbResult<R>) -> DbResult<R> {
        let guard = self.db.read();
        let db = guard
            .as_ref()
            .ok_or_else(|| DbError::invalid_operation("keymap is stopped"))?;
        f(db)
    }

    fn write(&self, pairs: &[KAPair], check_absent: bool) -> DbResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        self.with_db(|db| {
            let mut txn = db.begin_write()?;
            txn.set_durability(self.durability());
            {
                let mut table = txn.open_table(KEYMAP_TABLE)?;
                if check_absent {
                    for pair in pairs {
                        if table.get(pair.key.as_slice())?.is_some() {
                            // Dropping the transaction aborts it.
                            return Err(DbError::double_write(&pair.key));
                        }
                    }
                }
                for pair in pairs {
                    table.insert(pair.key.as_slice(), pair.address.as_u64())?;
                }
            }
            txn.commit()?;
            Ok(())
        })
    }

    /// Takes the database out of service after a final durable commit.
    fn close(&self) -> DbResult<()> {
        let mut guard = self.db.write();
        if let Some(db) = guard.as_ref() {
            let mut txn = db.begin_write()?;
            txn.set_durability(Durability::Immediate);
            txn.commit()?;
        }
        *guard = None;
        Ok(())
    }
}

impl Keymap for RedbKeymap {
    fn keymap_type(&self) -> KeymapType {
        if self.sync_writes {
            KeymapType::Redb
        } else {
            KeymapType::RedbUnsafe
        }
    }

    fn put(&self, pairs: &[KAPair]) -> DbResult<()> {
        if self.double_write_protection {
            check_batch_unique(pairs)?;
        }
        self.write(pairs, self.double_write_protection)
    }

    fn replace(&self, pairs: &[KAPair]) -> DbResult<()> {
        self.write(pairs, false)
    }

    fn get(&self, key: &[u8]) -> DbResult<Option<Address>> {
        self.with_db(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(KEYMAP_TABLE)?;
            let address = table.get(key)?.map(|guard| Address::from_u64(guard.value()));
            Ok(address)
        })
    }

    fn delete(&self, keys: &[Vec<u8>]) -> DbResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.with_db(|db| {
            let mut txn = db.begin_write()?;
            txn.set_durability(self.durability());
            {
                let mut table = txn.open_table(KEYMAP_TABLE)?;
                for key in keys {
                    table.remove(key.as_slice())?;
                }
            }
            txn.commit()?;
            Ok(())
        })
    }

    fn len(&self) -> DbResult<u64> {
        self.with_db(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(KEYMAP_TABLE)?;
            Ok(table.len()?)
        })
    }

    fn stop(&self) -> DbResult<()> {
        self.close()
    }

    fn destroy(&self) -> DbResult<()> {
        // Release the file handle before deleting the file.
        *self.db.write() = None;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for RedbKeymap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbKeymap")
            .field("path", &self.path)
            .field("keymap_type", &self.keymap_type())
            .field("open", &self.db.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn pair(key: &[u8], segment: u32, offset: u32) -> KAPair {
        KAPair::new(key.to_vec(), Address::new(segment, offset))
    }

    #[test]
    fn fresh_then_reopened() {
        let dir = tempdir().unwrap();
        let (keymap, fresh) = RedbKeymap::open(dir.path(), true, false).unwrap();
        assert!(fresh);
        keymap.put(&[pair(b"a", 1, 2)]).unwrap();
        keymap.stop().unwrap();

        let (keymap, fresh) = RedbKeymap::open(dir.path(), true, false).unwrap();
        assert!(!fresh);
        assert_eq!(keymap.get(b"a").unwrap(), Some(Address::new(1, 2)));
    }

    #[test]
    fn unsafe_variant_persists_after_stop() {
        let dir = tempdir().unwrap();
        let (keymap, _) = RedbKeymap::open(dir.path(), false, false).unwrap();
        assert_eq!(keymap.keymap_type(), KeymapType::RedbUnsafe);
        for i in 0..100u32 {
            keymap.put(&[pair(&i.to_le_bytes(), 0, i)]).unwrap();
        }
        keymap.stop().unwrap();

        let (keymap, _) = RedbKeymap::open(dir.path(), false, false).unwrap();
        assert_eq!(keymap.len().unwrap(), 100);
        assert_eq!(
            keymap.get(&7u32.to_le_bytes()).unwrap(),
            Some(Address::new(0, 7))
        );
    }

    #[test]
    fn double_write_aborts_transaction() {
        let dir = tempdir().unwrap();
        let (keymap, _) = RedbKeymap::open(dir.path(), true, true).unwrap();
        keymap.put(&[pair(b"a", 0, 0)]).unwrap();

        let result = keymap.put(&[pair(b"b", 0, 8), pair(b"a", 0, 16)]);
        assert!(matches!(result, Err(DbError::DoubleWrite { .. })));
        assert_eq!(keymap.get(b"b").unwrap(), None);
        assert_eq!(keymap.get(b"a").unwrap(), Some(Address::new(0, 0)));
    }

    #[test]
    fn delete_and_len() {
        let dir = tempdir().unwrap();
        let (keymap, _) = RedbKeymap::open(dir.path(), true, false).unwrap();
        keymap
            .put(&[pair(b"a", 0, 0), pair(b"b", 0, 1), pair(b"c", 0, 2)])
            .unwrap();
        keymap.delete(&[b"b".to_vec(), b"missing".to_vec()]).unwrap();
        assert_eq!(keymap.len().unwrap(), 2);
        assert_eq!(keymap.get(b"b").unwrap(), None);
    }

    #[test]
    fn stopped_keymap_rejects_operations() {
        let dir = tempdir().unwrap();
        let (keymap, _) = RedbKeymap::open(dir.path(), true, false).unwrap();
        keymap.stop().unwrap();
        assert!(keymap.get(b"a").is_err());
    }

    #[test]
    fn destroy_removes_file() {
        let dir = tempdir().unwrap();
        let (keymap, _) = RedbKeymap::open(dir.path(), true, false).unwrap();
        keymap.put(&[pair(b"a", 0, 0)]).unwrap();
        keymap.destroy().unwrap();
        assert!(!dir.path().join(DATABASE_FILE).exists());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn round_trip_survives_reopen(
            entries in prop::collection::hash_map(
                prop::collection::vec(any::<u8>(), 1..32),
                any::<u64>(),
                0..64,
            )
        ) {
            let dir = tempdir().unwrap();
            let pairs: Vec<KAPair> = entries
                .iter()
                .map(|(k, v)| KAPair::new(k.clone(), Address::from_u64(*v)))
                .collect();
            {
                let (keymap, _) = RedbKeymap::open(dir.path(), false, true).unwrap();
                keymap.put(&pairs).unwrap();
                keymap.stop().unwrap();
            }
            let (keymap, _) = RedbKeymap::open(dir.path(), true, true).unwrap();
            let mut seen = HashMap::new();
            for (key, raw) in &entries {
                let address = keymap.get(key).unwrap();
                prop_assert_eq!(address, Some(Address::from_u64(*raw)));
                seen.insert(key.clone(), *raw);
            }
            prop_assert_eq!(keymap.len().unwrap(), seen.len() as u64);
        }
    }
}
