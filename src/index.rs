//! Primary-key index: an ordered map from key value to base RID.
//!
//! The index always reflects the latest committed key values; callers
//! maintain it on insert, key update, and delete. Persisted as a
//! bincode blob next to the table's page files.

use crate::storage::{Rid, StorageResult};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::ops::RangeInclusive;
use std::path::Path;

#[derive(Debug, Default)]
pub struct Index {
    key_to_rid: BTreeMap<i64, Rid>,
}

impl Index {
    pub fn new() -> Self {
        Self {
            key_to_rid: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> StorageResult<Self> {
        let file = File::open(path)?;
        let raw: BTreeMap<i64, u64> = bincode::deserialize_from(BufReader::new(file))?;
        Ok(Self {
            key_to_rid: raw.into_iter().map(|(k, v)| (k, Rid(v))).collect(),
        })
    }

    pub fn flush(&self, path: &Path) -> StorageResult<()> {
        let raw: BTreeMap<i64, u64> = self.key_to_rid.iter().map(|(k, v)| (*k, v.0)).collect();
        let file = File::create(path)?;
        bincode::serialize_into(BufWriter::new(file), &raw)?;
        Ok(())
    }

    pub fn locate(&self, key: i64) -> Option<Rid> {
        self.key_to_rid.get(&key).copied()
    }

    /// Base RIDs of every key in the inclusive range, in key order.
    pub fn locate_range(&self, range: RangeInclusive<i64>) -> Vec<Rid> {
        self.key_to_rid.range(range).map(|(_, rid)| *rid).collect()
    }

    /// Insert or retarget a key. A key update is `remove` + `update_index`.
    pub fn update_index(&mut self, key: i64, rid: Rid) {
        self.key_to_rid.insert(key, rid);
    }

    pub fn remove(&mut self, key: i64) -> Option<Rid> {
        self.key_to_rid.remove(&key)
    }

    pub fn contains(&self, key: i64) -> bool {
        self.key_to_rid.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.key_to_rid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_to_rid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_locate_and_range() {
        let mut index = Index::new();
        for key in [900, 901, 902, 903, 904] {
            index.update_index(key, Rid(key as u64));
        }
        assert_eq!(index.locate(901), Some(Rid(901)));
        assert_eq!(index.locate(905), None);
        assert_eq!(
            index.locate_range(901..=903),
            vec![Rid(901), Rid(902), Rid(903)]
        );
        assert!(index.locate_range(10..=20).is_empty());
    }

    #[test]
    fn test_remove() {
        let mut index = Index::new();
        index.update_index(7, Rid(1));
        assert_eq!(index.remove(7), Some(Rid(1)));
        assert_eq!(index.locate(7), None);
        assert_eq!(index.remove(7), None);
    }

    #[test]
    fn test_flush_and_load() -> StorageResult<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("index");
        let mut index = Index::new();
        index.update_index(1, Rid(10));
        index.update_index(-5, Rid(11));
        index.flush(&path)?;

        let restored = Index::load(&path)?;
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.locate(-5), Some(Rid(11)));
        Ok(())
    }
}
