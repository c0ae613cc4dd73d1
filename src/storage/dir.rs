//! Persistent RID -> physical location map.
//!
//! Entries are never removed: delete tombstones the row in place, so a
//! RID that ever existed always resolves to the bytes that held it.

use crate::storage::error::StorageResult;
use crate::storage::page::{PageKind, Rid};
use crate::storage::range::PageRange;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Physical location of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDirectoryEntry {
    pub kind: PageKind,
    pub page_id: u64,
    pub metadata_page_id: u64,
    pub slot: usize,
}

/// On-disk shape of the directory blob. The page-range table rides
/// along so tail-chain bookkeeping survives a reopen.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DirectoryBlob {
    entries: HashMap<u64, PageDirectoryEntry>,
    ranges: Vec<PageRange>,
}

/// In-memory directory with bincode persistence.
#[derive(Debug)]
pub struct PageDirectory {
    entries: DashMap<Rid, PageDirectoryEntry>,
    ranges: Mutex<Vec<PageRange>>,
}

impl PageDirectory {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ranges: Mutex::new(Vec::new()),
        }
    }

    pub fn load(path: &Path) -> StorageResult<Self> {
        let file = File::open(path)?;
        let blob: DirectoryBlob = bincode::deserialize_from(BufReader::new(file))?;
        let entries = DashMap::new();
        for (rid, entry) in blob.entries {
            entries.insert(Rid(rid), entry);
        }
        Ok(Self {
            entries,
            ranges: Mutex::new(blob.ranges),
        })
    }

    pub fn flush(&self, path: &Path) -> StorageResult<()> {
        let blob = DirectoryBlob {
            entries: self
                .entries
                .iter()
                .map(|e| (e.key().0, *e.value()))
                .collect(),
            ranges: self.ranges.lock().clone(),
        };
        let file = File::create(path)?;
        bincode::serialize_into(BufWriter::new(file), &blob)?;
        Ok(())
    }

    pub fn get(&self, rid: Rid) -> Option<PageDirectoryEntry> {
        self.entries.get(&rid).map(|e| *e.value())
    }

    pub fn insert(&self, rid: Rid, entry: PageDirectoryEntry) {
        self.entries.insert(rid, entry);
    }

    /// Drop an entry whose backing page has been reclaimed by merge.
    /// Soft delete never calls this; it tombstones the row in place.
    pub fn remove(&self, rid: Rid) {
        self.entries.remove(&rid);
    }

    /// Every base RID in ascending order; the full-scan read path.
    pub fn base_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self
            .entries
            .iter()
            .filter(|e| e.value().kind == PageKind::Base)
            .map(|e| *e.key())
            .collect();
        rids.sort();
        rids
    }

    /// All entries living on one page, as `(rid, entry)` pairs.
    pub fn entries_on_page(&self, kind: PageKind, page_id: u64) -> Vec<(Rid, PageDirectoryEntry)> {
        self.entries
            .iter()
            .filter(|e| e.value().kind == kind && e.value().page_id == page_id)
            .map(|e| (*e.key(), *e.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `f` with exclusive access to the page-range table.
    pub fn with_ranges<T>(&self, f: impl FnOnce(&mut Vec<PageRange>) -> T) -> T {
        f(&mut self.ranges.lock())
    }
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}
