//! In-memory keymap.

use super::{check_batch_unique, Keymap, KeymapType};
use crate::error::{DbError, DbResult};
use crate::types::{Address, KAPair};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A keymap backed by a locked hash map.
///
/// O(1) operations and nothing on disk: every start rebuilds it by scanning
/// all segments, trading startup time for simplicity.
#[derive(Debug, Default)]
pub struct MemKeymap {
    entries: RwLock<HashMap<Vec<u8>, Address>>,
    double_write_protection: bool,
}

impl MemKeymap {
    /// Creates an empty keymap.
    #[must_use]
    pub fn new(double_write_protection: bool) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            double_write_protection,
        }
    }
}

impl Keymap for MemKeymap {
    fn keymap_type(&self) -> KeymapType {
        KeymapType::InMemory
    }

    fn put(&self, pairs: &[KAPair]) -> DbResult<()> {
        let mut entries = self.entries.write();
        if self.double_write_protection {
            check_batch_unique(pairs)?;
            if let Some(pair) = pairs.iter().find(|p| entries.contains_key(&p.key)) {
                return Err(DbError::double_write(&pair.key));
            }
        }
        for pair in pairs {
            entries.insert(pair.key.clone(), pair.address);
        }
        Ok(())
    }

    fn replace(&self, pairs: &[KAPair]) -> DbResult<()> {
        let mut entries = self.entries.write();
        for pair in pairs {
            entries.insert(pair.key.clone(), pair.address);
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> DbResult<Option<Address>> {
        Ok(self.entries.read().get(key).copied())
    }

    fn delete(&self, keys: &[Vec<u8>]) -> DbResult<()> {
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    fn len(&self) -> DbResult<u64> {
        Ok(self.entries.read().len() as u64)
    }

    fn stop(&self) -> DbResult<()> {
        Ok(())
    }

    fn destroy(&self) -> DbResult<()> {
        self.entries.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(key: &[u8], segment: u32, offset: u32) -> KAPair {
        KAPair::new(key.to_vec(), Address::new(segment, offset))
    }

    #[test]
    fn put_get_delete() {
        let keymap = MemKeymap::new(true);
        keymap
            .put(&[pair(b"a", 0, 0), pair(b"b", 0, 16)])
            .unwrap();

        assert_eq!(keymap.get(b"a").unwrap(), Some(Address::new(0, 0)));
        assert_eq!(keymap.get(b"b").unwrap(), Some(Address::new(0, 16)));
        assert_eq!(keymap.get(b"c").unwrap(), None);

        keymap.delete(&[b"a".to_vec()]).unwrap();
        assert_eq!(keymap.get(b"a").unwrap(), None);
        assert_eq!(keymap.len().unwrap(), 1);
    }

    #[test]
    fn double_write_rejects_whole_batch() {
        let keymap = MemKeymap::new(true);
        keymap.put(&[pair(b"a", 0, 0)]).unwrap();

        let result = keymap.put(&[pair(b"new", 1, 0), pair(b"a", 1, 8)]);
        assert!(matches!(result, Err(DbError::DoubleWrite { .. })));

        assert_eq!(keymap.get(b"new").unwrap(), None);
        assert_eq!(keymap.get(b"a").unwrap(), Some(Address::new(0, 0)));
    }

    #[test]
    fn duplicate_within_batch_rejected() {
        let keymap = MemKeymap::new(true);
        let result = keymap.put(&[pair(b"x", 0, 0), pair(b"x", 0, 8)]);
        assert!(result.is_err());
        assert!(keymap.is_empty().unwrap());
    }

    #[test]
    fn unprotected_put_overwrites() {
        let keymap = MemKeymap::new(false);
        keymap.put(&[pair(b"a", 0, 0)]).unwrap();
        keymap.put(&[pair(b"a", 2, 4)]).unwrap();
        assert_eq!(keymap.get(b"a").unwrap(), Some(Address::new(2, 4)));
    }

    #[test]
    fn replace_ignores_protection() {
        let keymap = MemKeymap::new(true);
        keymap.put(&[pair(b"a", 0, 0)]).unwrap();
        keymap.replace(&[pair(b"a", 3, 3)]).unwrap();
        assert_eq!(keymap.get(b"a").unwrap(), Some(Address::new(3, 3)));
    }

    #[test]
    fn destroy_clears() {
        let keymap = MemKeymap::new(false);
        keymap.put(&[pair(b"a", 0, 0)]).unwrap();
        keymap.destroy().unwrap();
        assert!(keymap.is_empty().unwrap());
    }
}
