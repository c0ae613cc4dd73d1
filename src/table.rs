//! Table: one named column family with its files, RID directory,
//! primary index, and a handle to the shared buffer pool.
//!
//! The table owns no record logic of its own; reads and version walks
//! go through the pool, appends through the file handler. What lives
//! here is lifecycle (create/open/flush/close) and the merge pass.

use crate::config::{INITIAL_TPS, NUM_METADATA_COLS};
use crate::index::Index;
use crate::storage::file::{FileKind, PageFileId};
use crate::storage::{
    Bufferpool, ColumnMask, DataColumn, FileHandler, MetaColumn, NullMask, PageDirectory,
    PageDirectoryEntry, PageKind, PhysicalPage, Rid, SchemaEncoding, StorageError, StorageResult,
    TableContext,
};
use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub struct Table {
    name: String,
    dir: PathBuf,
    num_columns: usize,
    key_index: DataColumn,
    file_handler: Mutex<FileHandler>,
    page_directory: PageDirectory,
    index: Mutex<Index>,
    bufferpool: Bufferpool,
}

impl Table {
    pub fn create(
        parent_dir: &Path,
        name: &str,
        num_columns: usize,
        key_index: DataColumn,
        bufferpool: Bufferpool,
    ) -> StorageResult<Self> {
        if key_index.0 >= num_columns {
            return Err(StorageError::InconsistentState(format!(
                "key column {} out of range for {} columns",
                key_index.0, num_columns
            )));
        }
        let dir = parent_dir.join(name);
        let file_handler = FileHandler::create(&dir, num_columns, key_index)?;
        let table = Self {
            name: name.to_string(),
            dir,
            num_columns,
            key_index,
            file_handler: Mutex::new(file_handler),
            page_directory: PageDirectory::new(),
            index: Mutex::new(Index::new()),
            bufferpool,
        };
        // Seed the blobs so a create-then-open without close works.
        table.page_directory.flush(&table.directory_path())?;
        table.index.lock().flush(&table.index_path())?;
        info!("created table {} ({} columns)", table.name, num_columns);
        Ok(table)
    }

    pub fn open(parent_dir: &Path, name: &str, bufferpool: Bufferpool) -> StorageResult<Self> {
        let dir = parent_dir.join(name);
        let file_handler = FileHandler::open(&dir)?;
        let num_columns = file_handler.catalog().num_columns;
        let key_index = file_handler.catalog().key_index;
        let page_directory = PageDirectory::load(&dir.join(crate::storage::file::PAGE_DIRECTORY_FILE))?;
        let index = Index::load(&dir.join(crate::storage::file::INDEX_FILE))?;
        Ok(Self {
            name: name.to_string(),
            dir,
            num_columns,
            key_index,
            file_handler: Mutex::new(file_handler),
            page_directory,
            index: Mutex::new(index),
            bufferpool,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn key_index(&self) -> DataColumn {
        self.key_index
    }

    pub fn pool(&self) -> &Bufferpool {
        &self.bufferpool
    }

    pub fn ctx(&self) -> TableContext<'_> {
        TableContext {
            table_dir: &self.dir,
            num_columns: self.num_columns,
            page_directory: &self.page_directory,
        }
    }

    pub fn index(&self) -> MutexGuard<'_, Index> {
        self.index.lock()
    }

    pub fn page_directory(&self) -> &PageDirectory {
        &self.page_directory
    }

    /// Append one base row and register it everywhere but the index
    /// (the query layer owns key bookkeeping).
    pub fn insert_row(&self, columns: &[Option<i64>]) -> StorageResult<Rid> {
        let mut handler = self.file_handler.lock();
        self.bufferpool
            .insert_base_record(self.ctx(), &mut handler, columns)
    }

    /// Append one tail row to `base_rid`'s version chain.
    pub fn append_tail(
        &self,
        indirection: Option<Rid>,
        schema_encoding: SchemaEncoding,
        base_rid: Rid,
        columns: &[Option<i64>],
    ) -> StorageResult<Rid> {
        let mut handler = self.file_handler.lock();
        self.bufferpool.insert_tail_record(
            self.ctx(),
            &mut handler,
            indirection,
            schema_encoding,
            base_rid,
            columns,
        )
    }

    /// Persist catalog counters, directory, and index.
    pub fn flush(&self) -> StorageResult<()> {
        self.file_handler.lock().flush()?;
        self.page_directory.flush(&self.directory_path())?;
        self.index.lock().flush(&self.index_path())?;
        Ok(())
    }

    /// Flush everything including this table's dirty frames, and drop
    /// them from the pool.
    pub fn close(&self) -> StorageResult<()> {
        self.flush()?;
        self.bufferpool.flush_table(&self.dir)
    }

    /// Compact every eligible page range; returns how many were merged.
    ///
    /// Requires exclusive access to the table: no concurrent reads or
    /// writes. A range qualifies when its tail-page count is over the
    /// threshold and it does not contain the active append page (so
    /// every base page in it is full).
    pub fn merge(&self) -> StorageResult<usize> {
        let append_page = self.file_handler.lock().catalog().current_base_page_id;
        let candidates: Vec<usize> = self.page_directory.with_ranges(|ranges| {
            ranges
                .iter()
                .filter(|r| r.merge_eligible() && !r.base_page_ids().contains(&append_page))
                .map(|r| r.index())
                .collect()
        });
        for &range_index in &candidates {
            self.merge_range(range_index)?;
        }
        Ok(candidates.len())
    }

    /// Fold one range's version history into freshly allocated base
    /// pages and reclaim the superseded files.
    fn merge_range(&self, range_index: usize) -> StorageResult<()> {
        let ctx = self.ctx();
        let all_cols = ColumnMask::all(self.num_columns);
        let no_cols = ColumnMask::none(self.num_columns);

        let (old_base_ids, old_tail_ids) = self.page_directory.with_ranges(|ranges| {
            let range = &ranges[range_index];
            (
                range.base_page_ids().to_vec(),
                range.tail_page_ids().to_vec(),
            )
        });
        // A tail page also listed by another range holds live history
        // for that range's rows and must survive.
        let shared_tails: HashSet<u64> = self.page_directory.with_ranges(|ranges| {
            ranges
                .iter()
                .filter(|r| r.index() != range_index)
                .flat_map(|r| r.tail_page_ids().iter().copied())
                .collect()
        });
        let mut handler = self.file_handler.lock();
        // The active tail page is the append target for the very next
        // update; reclaiming it would strand the tail offset on a
        // deleted file.
        let active_tail = handler.catalog().current_tail_page_id;
        let reclaim_tail_ids: Vec<u64> = old_tail_ids
            .iter()
            .copied()
            .filter(|id| *id != active_tail && !shared_tails.contains(id))
            .collect();
        info!(
            "merging range {}: {} base pages, {} tail pages ({} reclaimable)",
            range_index,
            old_base_ids.len(),
            old_tail_ids.len(),
            reclaim_tail_ids.len()
        );

        let mut new_base_ids = Vec::with_capacity(old_base_ids.len());
        let mut absorbed_tails: Vec<Rid> = Vec::new();
        let mut old_base_meta_ids: HashSet<u64> = HashSet::new();
        let mut reclaim_tail_meta_ids: HashSet<u64> = HashSet::new();

        for &old_id in &old_base_ids {
            let mut rows = self.page_directory.entries_on_page(PageKind::Base, old_id);
            rows.sort_by_key(|(_, entry)| entry.slot);

            // Pass 1: walk every chain while the old pages are intact.
            let mut page_absorbed: Vec<Rid> = Vec::new();
            let mut merged_rows = Vec::with_capacity(rows.len());
            for (rid, entry) in &rows {
                old_base_meta_ids.insert(entry.metadata_page_id);
                let guard = self
                    .bufferpool
                    .get_record(ctx, *rid, &all_cols)?
                    .ok_or_else(|| {
                        StorageError::InconsistentState(format!(
                            "directory references {:?} but the row is unreadable",
                            rid
                        ))
                    })?;
                let record = guard.record().clone();
                drop(guard);

                let mut cursor = record.metadata.indirection;
                while let Some(tail_rid) = cursor {
                    if !tail_rid.is_tail() {
                        break;
                    }
                    page_absorbed.push(tail_rid);
                    let tail = self.bufferpool.get_record(ctx, tail_rid, &no_cols)?.ok_or_else(
                        || {
                            StorageError::InconsistentState(format!(
                                "version chain of {:?} references unknown {:?}",
                                rid, tail_rid
                            ))
                        },
                    )?;
                    cursor = tail.record().metadata.indirection;
                }

                let live = record.metadata.rid.is_some();
                let latest = if live && record.metadata.indirection.is_some() {
                    self.bufferpool
                        .get_updated_record(ctx, *rid, &all_cols)?
                        .unwrap_or(record.columns)
                } else {
                    record.columns
                };
                merged_rows.push((*rid, record.metadata.timestamp, live, latest));
            }

            // Pass 2: write the coalesced page and retarget the rows.
            let (new_id, new_meta_id) = handler.allocate_merge_base_page()?;
            let mut metadata_pages: Vec<PhysicalPage> =
                (0..NUM_METADATA_COLS).map(|_| PhysicalPage::new()).collect();
            let mut data_pages: Vec<PhysicalPage> =
                (0..self.num_columns).map(|_| PhysicalPage::new()).collect();
            for (rid, timestamp, live, latest) in &merged_rows {
                let mut null_mask = NullMask::from_row(latest, true);
                if !live {
                    null_mask = null_mask.with_tombstone(self.num_columns);
                }
                let rid_slot = if *live { rid.0 } else { 0 };
                metadata_pages[MetaColumn::Indirection.position()].push_raw(0)?;
                metadata_pages[MetaColumn::Rid.position()].push_raw(rid_slot)?;
                metadata_pages[MetaColumn::Timestamp.position()].push_raw(*timestamp)?;
                metadata_pages[MetaColumn::SchemaEncoding.position()]
                    .push_raw(SchemaEncoding::EMPTY.0)?;
                metadata_pages[MetaColumn::NullMask.position()].push_raw(null_mask.0)?;
                metadata_pages[MetaColumn::BaseRid.position()].push_raw(rid.0)?;
                for col in 0..self.num_columns {
                    data_pages[col].push_raw(latest[col].unwrap_or(0) as u64)?;
                }
            }
            // Tail RIDs descend, so the newest absorbed one is the
            // smallest value.
            let tps = page_absorbed.iter().map(|r| r.0).min().unwrap_or(INITIAL_TPS);
            handler.write_merged_base_page(
                new_id,
                new_meta_id,
                &metadata_pages,
                &data_pages,
                merged_rows.len(),
                tps,
            )?;
            debug!("range {}: page {} -> {} (tps {})", range_index, old_id, new_id, tps);

            for (slot, (rid, _, _, _)) in merged_rows.iter().enumerate() {
                self.page_directory.insert(
                    *rid,
                    PageDirectoryEntry {
                        kind: PageKind::Base,
                        page_id: new_id,
                        metadata_page_id: new_meta_id,
                        slot,
                    },
                );
            }
            new_base_ids.push(new_id);
            absorbed_tails.extend(page_absorbed);
        }

        // Drop the absorbed tail rows from the directory; their chains
        // are cut and (for unshared pages) their files are going away.
        for &tail_id in &reclaim_tail_ids {
            for (rid, entry) in self.page_directory.entries_on_page(PageKind::Tail, tail_id) {
                reclaim_tail_meta_ids.insert(entry.metadata_page_id);
                self.page_directory.remove(rid);
            }
        }
        for rid in absorbed_tails {
            self.page_directory.remove(rid);
        }

        let mut dead_files: Vec<PageFileId> = Vec::new();
        for id in &old_base_ids {
            dead_files.push(PageFileId { kind: FileKind::Base, id: *id });
        }
        for id in old_base_meta_ids {
            dead_files.push(PageFileId { kind: FileKind::BaseMetadata, id });
        }
        for id in &reclaim_tail_ids {
            dead_files.push(PageFileId { kind: FileKind::Tail, id: *id });
        }
        for id in reclaim_tail_meta_ids {
            dead_files.push(PageFileId { kind: FileKind::TailMetadata, id });
        }
        self.bufferpool.invalidate_files(&self.dir, &dead_files)?;
        handler.remove_page_files(&dead_files)?;

        self.page_directory.with_ranges(|ranges| {
            ranges[range_index].replace_after_merge(new_base_ids);
        });
        Ok(())
    }

    fn directory_path(&self) -> PathBuf {
        self.dir.join(crate::storage::file::PAGE_DIRECTORY_FILE)
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(crate::storage::file::INDEX_FILE)
    }
}
