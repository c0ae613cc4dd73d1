//! Per-table on-disk layout.
//!
//! Each table owns one directory:
//!
//! ```text
//! catalog                   fixed counters (8 big-endian u64 fields)
//! page_directory            bincode blob (see dir.rs)
//! index                     bincode blob (see index.rs)
//! base_<id>, tail_<id>      metadata-page ptr, byte offset, TPS,
//!                           then num_columns physical pages
//! base_metadata_<id>,
//! tail_metadata_<id>        byte offset, then 6 physical pages
//! ```
//!
//! All integers are 8-byte big-endian. Page headers (offsets) are
//! written eagerly on every append; the catalog counters are flushed
//! explicitly on close. A missing backing file for a page the directory
//! still references is corruption and fails fast.

use crate::config::{
    BYTES_PER_SLOT, INITIAL_TAIL_RID, INITIAL_TPS, NUM_METADATA_COLS, PHYSICAL_PAGE_SIZE,
};
use crate::storage::column::{DataColumn, ColumnMask, MetaColumn};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{NullMask, PageKind, PhysicalPage, Rid, SchemaEncoding};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// base/tail page header: metadata-page pointer, append offset, TPS.
const PAGE_HEADER_SIZE: u64 = 24;
const PAGE_METADATA_PTR_POS: u64 = 0;
const PAGE_OFFSET_POS: u64 = 8;
const PAGE_TPS_POS: u64 = 16;

/// metadata page header: append offset only.
const META_HEADER_SIZE: u64 = 8;
const META_OFFSET_POS: u64 = 0;

pub const CATALOG_FILE: &str = "catalog";
pub const PAGE_DIRECTORY_FILE: &str = "page_directory";
pub const INDEX_FILE: &str = "index";

/// Which physical file a page lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Base,
    Tail,
    BaseMetadata,
    TailMetadata,
}

impl FileKind {
    pub fn metadata_of(kind: PageKind) -> FileKind {
        match kind {
            PageKind::Base => FileKind::BaseMetadata,
            PageKind::Tail => FileKind::TailMetadata,
        }
    }

    pub fn data_of(kind: PageKind) -> FileKind {
        match kind {
            PageKind::Base => FileKind::Base,
            PageKind::Tail => FileKind::Tail,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            FileKind::Base => "base",
            FileKind::Tail => "tail",
            FileKind::BaseMetadata => "base_metadata",
            FileKind::TailMetadata => "tail_metadata",
        }
    }

    fn header_size(self) -> u64 {
        match self {
            FileKind::Base | FileKind::Tail => PAGE_HEADER_SIZE,
            FileKind::BaseMetadata | FileKind::TailMetadata => META_HEADER_SIZE,
        }
    }
}

/// One page file: kind plus id within that kind's sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageFileId {
    pub kind: FileKind,
    pub id: u64,
}

/// Persistent monotonic counters for one table, owned by the file
/// handler and flushed explicitly. Never relies on drop order.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub num_columns: usize,
    pub key_index: DataColumn,
    pub current_base_page_id: u64,
    pub current_tail_page_id: u64,
    pub current_base_metadata_page_id: u64,
    pub current_tail_metadata_page_id: u64,
    pub next_base_rid: u64,
    pub next_tail_rid: u64,
}

/// Everything a single append wrote, so the buffer pool can patch any
/// cached frames of the touched page without re-reading the file.
#[derive(Debug, Clone)]
pub struct AppendResult {
    pub rid: Rid,
    pub kind: PageKind,
    pub page_id: u64,
    pub metadata_page_id: u64,
    pub slot: usize,
    /// Slot values in `MetaColumn` order.
    pub metadata_values: [u64; NUM_METADATA_COLS],
    pub data_values: Vec<u64>,
    /// Set when this append rolled onto a freshly allocated page pair.
    pub opened_new_page: bool,
}

/// Column-projected page read: all metadata columns plus the requested
/// data columns.
#[derive(Debug)]
pub struct FilePageReadResult {
    pub metadata_page_id: u64,
    pub metadata_pages: Vec<PhysicalPage>,
    pub data_pages: Vec<Option<PhysicalPage>>,
}

/// Translates page ids to files, manages the catalog counters, appends
/// rows, and rolls to fresh pages on overflow.
#[derive(Debug)]
pub struct FileHandler {
    table_dir: PathBuf,
    catalog: Catalog,
    /// Byte offset of the next free slot row in the active base page.
    base_offset: u64,
    tail_offset: u64,
    flushed: bool,
}

impl FileHandler {
    /// Create a fresh table directory with its catalog and the first
    /// base/tail page pairs.
    pub fn create(table_dir: &Path, num_columns: usize, key_index: DataColumn) -> StorageResult<Self> {
        std::fs::create_dir_all(table_dir)?;
        let catalog = Catalog {
            num_columns,
            key_index,
            current_base_page_id: 1,
            current_tail_page_id: 1,
            current_base_metadata_page_id: 1,
            current_tail_metadata_page_id: 1,
            next_base_rid: 1,
            next_tail_rid: INITIAL_TAIL_RID,
        };
        let handler = Self {
            table_dir: table_dir.to_path_buf(),
            catalog,
            base_offset: 0,
            tail_offset: 0,
            flushed: false,
        };
        handler.write_catalog()?;
        handler.initialize_page_pair(PageKind::Base, 1, 1, num_columns)?;
        handler.initialize_page_pair(PageKind::Tail, 1, 1, num_columns)?;
        Ok(handler)
    }

    /// Open an existing table directory; offsets are recovered from the
    /// active page headers.
    pub fn open(table_dir: &Path) -> StorageResult<Self> {
        let catalog = Self::read_catalog(table_dir)?;
        let base_offset = Self::read_header_field(
            table_dir,
            PageFileId { kind: FileKind::Base, id: catalog.current_base_page_id },
            PAGE_OFFSET_POS,
        )?;
        let tail_offset = Self::read_header_field(
            table_dir,
            PageFileId { kind: FileKind::Tail, id: catalog.current_tail_page_id },
            PAGE_OFFSET_POS,
        )?;
        Ok(Self {
            table_dir: table_dir.to_path_buf(),
            catalog,
            base_offset,
            tail_offset,
            flushed: false,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn table_dir(&self) -> &Path {
        &self.table_dir
    }

    pub fn page_file_path(table_dir: &Path, file: PageFileId) -> PathBuf {
        table_dir.join(format!("{}_{}", file.kind.prefix(), file.id))
    }

    /// Append one base row. The caller records the directory entry and
    /// patches any cached frames from the returned `AppendResult`.
    pub fn insert_base_record(&mut self, columns: &[Option<i64>]) -> StorageResult<AppendResult> {
        if columns.len() != self.catalog.num_columns {
            return Err(StorageError::InconsistentState(format!(
                "expected {} columns, got {}",
                self.catalog.num_columns,
                columns.len()
            )));
        }
        let opened_new_page = self.roll_base_if_full()?;
        let rid = Rid(self.catalog.next_base_rid);
        self.catalog.next_base_rid += 1;

        let null_mask = NullMask::from_row(columns, true);
        let metadata_values = Self::metadata_slots(
            None,
            rid,
            SchemaEncoding::EMPTY,
            null_mask,
            rid,
        );
        let data_values: Vec<u64> = columns.iter().map(|c| c.unwrap_or(0) as u64).collect();

        let slot = (self.base_offset / BYTES_PER_SLOT as u64) as usize;
        self.write_row(
            PageKind::Base,
            self.catalog.current_base_page_id,
            self.catalog.current_base_metadata_page_id,
            self.base_offset,
            &metadata_values,
            &data_values,
        )?;
        self.base_offset += BYTES_PER_SLOT as u64;

        Ok(AppendResult {
            rid,
            kind: PageKind::Base,
            page_id: self.catalog.current_base_page_id,
            metadata_page_id: self.catalog.current_base_metadata_page_id,
            slot,
            metadata_values,
            data_values,
            opened_new_page,
        })
    }

    /// Append one tail row; tail RIDs are issued by decrementing from
    /// the initial TID. `indirection` is `None` on the oldest row of a
    /// version chain.
    pub fn insert_tail_record(
        &mut self,
        indirection: Option<Rid>,
        schema_encoding: SchemaEncoding,
        base_rid: Rid,
        columns: &[Option<i64>],
    ) -> StorageResult<AppendResult> {
        if columns.len() != self.catalog.num_columns {
            return Err(StorageError::InconsistentState(format!(
                "expected {} columns, got {}",
                self.catalog.num_columns,
                columns.len()
            )));
        }
        let opened_new_page = self.roll_tail_if_full()?;
        let rid = Rid(self.catalog.next_tail_rid);
        self.catalog.next_tail_rid -= 1;

        let null_mask = NullMask::from_row(columns, indirection.is_none());
        let metadata_values = Self::metadata_slots(
            indirection,
            rid,
            schema_encoding,
            null_mask,
            base_rid,
        );
        let data_values: Vec<u64> = columns.iter().map(|c| c.unwrap_or(0) as u64).collect();

        let slot = (self.tail_offset / BYTES_PER_SLOT as u64) as usize;
        self.write_row(
            PageKind::Tail,
            self.catalog.current_tail_page_id,
            self.catalog.current_tail_metadata_page_id,
            self.tail_offset,
            &metadata_values,
            &data_values,
        )?;
        self.tail_offset += BYTES_PER_SLOT as u64;

        Ok(AppendResult {
            rid,
            kind: PageKind::Tail,
            page_id: self.catalog.current_tail_page_id,
            metadata_page_id: self.catalog.current_tail_metadata_page_id,
            slot,
            metadata_values,
            data_values,
            opened_new_page,
        })
    }

    /// Read the requested data columns plus all metadata columns of one
    /// page, seeking past unrequested columns.
    pub fn read_projected_cols_of_page(
        table_dir: &Path,
        num_columns: usize,
        kind: PageKind,
        page_id: u64,
        mask: &ColumnMask,
    ) -> StorageResult<FilePageReadResult> {
        let page_path = Self::page_file_path(
            table_dir,
            PageFileId { kind: FileKind::data_of(kind), id: page_id },
        );
        let mut file = Self::open_existing(&page_path)?;

        file.seek(SeekFrom::Start(PAGE_METADATA_PTR_POS))?;
        let metadata_page_id = file.read_u64::<BigEndian>()?;
        file.seek(SeekFrom::Start(PAGE_OFFSET_POS))?;
        let offset = file.read_u64::<BigEndian>()?;

        let mut data_pages: Vec<Option<PhysicalPage>> = Vec::with_capacity(num_columns);
        file.seek(SeekFrom::Start(PAGE_HEADER_SIZE))?;
        let mut buf = vec![0u8; PHYSICAL_PAGE_SIZE];
        for col in 0..num_columns {
            if mask.contains(DataColumn(col)) {
                file.read_exact(&mut buf)?;
                data_pages.push(Some(PhysicalPage::from_bytes(&buf, offset)?));
            } else {
                file.seek(SeekFrom::Current(PHYSICAL_PAGE_SIZE as i64))?;
                data_pages.push(None);
            }
        }

        let meta_path = Self::page_file_path(
            table_dir,
            PageFileId { kind: FileKind::metadata_of(kind), id: metadata_page_id },
        );
        let mut meta_file = Self::open_existing(&meta_path)?;
        meta_file.seek(SeekFrom::Start(META_HEADER_SIZE))?;
        let mut metadata_pages = Vec::with_capacity(NUM_METADATA_COLS);
        for _ in 0..NUM_METADATA_COLS {
            meta_file.read_exact(&mut buf)?;
            metadata_pages.push(PhysicalPage::from_bytes(&buf, offset)?);
        }

        Ok(FilePageReadResult {
            metadata_page_id,
            metadata_pages,
            data_pages,
        })
    }

    /// Read a single column page out of a page file, cursor rehydrated
    /// from the file's append offset header.
    pub fn read_column_page(
        table_dir: &Path,
        file_id: PageFileId,
        column_pos: usize,
    ) -> StorageResult<PhysicalPage> {
        let path = Self::page_file_path(table_dir, file_id);
        let mut file = Self::open_existing(&path)?;
        let offset_pos = match file_id.kind {
            FileKind::Base | FileKind::Tail => PAGE_OFFSET_POS,
            FileKind::BaseMetadata | FileKind::TailMetadata => META_OFFSET_POS,
        };
        file.seek(SeekFrom::Start(offset_pos))?;
        let offset = file.read_u64::<BigEndian>()?;
        let at = file_id.kind.header_size() + (column_pos as u64) * PHYSICAL_PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(at))?;
        let mut buf = vec![0u8; PHYSICAL_PAGE_SIZE];
        file.read_exact(&mut buf)?;
        PhysicalPage::from_bytes(&buf, offset)
    }

    /// Write one cached column page back to its backing file.
    pub fn write_back_column(
        table_dir: &Path,
        file_id: PageFileId,
        column_pos: usize,
        page: &PhysicalPage,
    ) -> StorageResult<()> {
        let path = Self::page_file_path(table_dir, file_id);
        let mut file = OpenOptions::new().write(true).open(&path).map_err(|e| {
            StorageError::InconsistentState(format!(
                "dirty frame's backing file {:?} is missing: {}",
                path, e
            ))
        })?;
        let at = file_id.kind.header_size() + (column_pos as u64) * PHYSICAL_PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(at))?;
        file.write_all(page.as_bytes())?;
        Ok(())
    }

    pub fn read_tps(table_dir: &Path, page_id: u64) -> StorageResult<u64> {
        Self::read_header_field(
            table_dir,
            PageFileId { kind: FileKind::Base, id: page_id },
            PAGE_TPS_POS,
        )
    }

    /// Allocate a fresh base page pair (for merge) without routing any
    /// appends to it; the active append page is untouched.
    pub fn allocate_merge_base_page(&mut self) -> StorageResult<(u64, u64)> {
        self.catalog.current_base_page_id += 1;
        self.catalog.current_base_metadata_page_id += 1;
        let page_id = self.catalog.current_base_page_id;
        let meta_id = self.catalog.current_base_metadata_page_id;
        self.initialize_page_pair(PageKind::Base, page_id, meta_id, self.catalog.num_columns)?;
        // The freshly merged page is also the new active base page, so
        // future inserts append after the coalesced rows.
        Ok((page_id, meta_id))
    }

    /// Bulk-write a merged base page: full column arrays, headers, and
    /// the advanced TPS sentinel.
    pub fn write_merged_base_page(
        &mut self,
        page_id: u64,
        metadata_page_id: u64,
        metadata_pages: &[PhysicalPage],
        data_pages: &[PhysicalPage],
        num_rows: usize,
        tps: u64,
    ) -> StorageResult<()> {
        let byte_offset = (num_rows * BYTES_PER_SLOT) as u64;
        let page_path = Self::page_file_path(
            &self.table_dir,
            PageFileId { kind: FileKind::Base, id: page_id },
        );
        let mut file = Self::open_existing(&page_path)?;
        file.seek(SeekFrom::Start(PAGE_METADATA_PTR_POS))?;
        file.write_u64::<BigEndian>(metadata_page_id)?;
        file.write_u64::<BigEndian>(byte_offset)?;
        file.write_u64::<BigEndian>(tps)?;
        for page in data_pages {
            file.write_all(page.as_bytes())?;
        }

        let meta_path = Self::page_file_path(
            &self.table_dir,
            PageFileId { kind: FileKind::BaseMetadata, id: metadata_page_id },
        );
        let mut meta_file = Self::open_existing(&meta_path)?;
        meta_file.seek(SeekFrom::Start(META_OFFSET_POS))?;
        meta_file.write_u64::<BigEndian>(byte_offset)?;
        for page in metadata_pages {
            meta_file.write_all(page.as_bytes())?;
        }
        if self.catalog.current_base_page_id == page_id {
            self.base_offset = byte_offset;
        }
        Ok(())
    }

    /// Delete page files whose contents have been folded into a merged
    /// base page.
    pub fn remove_page_files(&self, files: &[PageFileId]) -> StorageResult<()> {
        for file in files {
            let path = Self::page_file_path(&self.table_dir, *file);
            debug!("reclaiming {:?}", path);
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Persist the catalog counters. Must be called before the handler
    /// is dropped; there is no finalizer fallback.
    pub fn flush(&mut self) -> StorageResult<()> {
        self.write_catalog()?;
        self.flushed = true;
        Ok(())
    }

    fn metadata_slots(
        indirection: Option<Rid>,
        rid: Rid,
        schema_encoding: SchemaEncoding,
        null_mask: NullMask,
        base_rid: Rid,
    ) -> [u64; NUM_METADATA_COLS] {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut slots = [0u64; NUM_METADATA_COLS];
        slots[MetaColumn::Indirection.position()] = indirection.map(|r| r.0).unwrap_or(0);
        slots[MetaColumn::Rid.position()] = rid.0;
        slots[MetaColumn::Timestamp.position()] = timestamp;
        slots[MetaColumn::SchemaEncoding.position()] = schema_encoding.0;
        slots[MetaColumn::NullMask.position()] = null_mask.0;
        slots[MetaColumn::BaseRid.position()] = base_rid.0;
        slots
    }

    fn roll_base_if_full(&mut self) -> StorageResult<bool> {
        if self.base_offset < PHYSICAL_PAGE_SIZE as u64 {
            return Ok(false);
        }
        self.catalog.current_base_page_id += 1;
        self.catalog.current_base_metadata_page_id += 1;
        debug!(
            "rolling to base page {} in {:?}",
            self.catalog.current_base_page_id, self.table_dir
        );
        self.initialize_page_pair(
            PageKind::Base,
            self.catalog.current_base_page_id,
            self.catalog.current_base_metadata_page_id,
            self.catalog.num_columns,
        )?;
        self.base_offset = 0;
        Ok(true)
    }

    fn roll_tail_if_full(&mut self) -> StorageResult<bool> {
        if self.tail_offset < PHYSICAL_PAGE_SIZE as u64 {
            return Ok(false);
        }
        self.catalog.current_tail_page_id += 1;
        self.catalog.current_tail_metadata_page_id += 1;
        debug!(
            "rolling to tail page {} in {:?}",
            self.catalog.current_tail_page_id, self.table_dir
        );
        self.initialize_page_pair(
            PageKind::Tail,
            self.catalog.current_tail_page_id,
            self.catalog.current_tail_metadata_page_id,
            self.catalog.num_columns,
        )?;
        self.tail_offset = 0;
        Ok(true)
    }

    /// Write one row: each column value lands at the same slot offset
    /// within its own column region, headers updated eagerly.
    fn write_row(
        &self,
        kind: PageKind,
        page_id: u64,
        metadata_page_id: u64,
        byte_offset: u64,
        metadata_values: &[u64; NUM_METADATA_COLS],
        data_values: &[u64],
    ) -> StorageResult<()> {
        let meta_path = Self::page_file_path(
            &self.table_dir,
            PageFileId { kind: FileKind::metadata_of(kind), id: metadata_page_id },
        );
        let mut meta_file = Self::open_existing(&meta_path)?;
        for (m, value) in metadata_values.iter().enumerate() {
            let at = META_HEADER_SIZE + (m as u64) * PHYSICAL_PAGE_SIZE as u64 + byte_offset;
            meta_file.seek(SeekFrom::Start(at))?;
            meta_file.write_u64::<BigEndian>(*value)?;
        }
        meta_file.seek(SeekFrom::Start(META_OFFSET_POS))?;
        meta_file.write_u64::<BigEndian>(byte_offset + BYTES_PER_SLOT as u64)?;

        let page_path = Self::page_file_path(
            &self.table_dir,
            PageFileId { kind: FileKind::data_of(kind), id: page_id },
        );
        let mut file = Self::open_existing(&page_path)?;
        for (i, value) in data_values.iter().enumerate() {
            let at = PAGE_HEADER_SIZE + (i as u64) * PHYSICAL_PAGE_SIZE as u64 + byte_offset;
            file.seek(SeekFrom::Start(at))?;
            file.write_u64::<BigEndian>(*value)?;
        }
        file.seek(SeekFrom::Start(PAGE_OFFSET_POS))?;
        file.write_u64::<BigEndian>(byte_offset + BYTES_PER_SLOT as u64)?;
        Ok(())
    }

    fn initialize_page_pair(
        &self,
        kind: PageKind,
        page_id: u64,
        metadata_page_id: u64,
        num_columns: usize,
    ) -> StorageResult<()> {
        let page_path = Self::page_file_path(
            &self.table_dir,
            PageFileId { kind: FileKind::data_of(kind), id: page_id },
        );
        let mut file = File::create(&page_path)?;
        file.write_u64::<BigEndian>(metadata_page_id)?;
        file.write_u64::<BigEndian>(0)?;
        file.write_u64::<BigEndian>(INITIAL_TPS)?;
        let zeroes = vec![0u8; PHYSICAL_PAGE_SIZE];
        for _ in 0..num_columns {
            file.write_all(&zeroes)?;
        }

        let meta_path = Self::page_file_path(
            &self.table_dir,
            PageFileId { kind: FileKind::metadata_of(kind), id: metadata_page_id },
        );
        let mut meta_file = File::create(&meta_path)?;
        meta_file.write_u64::<BigEndian>(0)?;
        for _ in 0..NUM_METADATA_COLS {
            meta_file.write_all(&zeroes)?;
        }
        Ok(())
    }

    fn write_catalog(&self) -> StorageResult<()> {
        let mut file = File::create(self.table_dir.join(CATALOG_FILE))?;
        let c = &self.catalog;
        for value in [
            c.num_columns as u64,
            c.key_index.0 as u64,
            c.current_base_page_id,
            c.current_tail_page_id,
            c.current_base_metadata_page_id,
            c.current_tail_metadata_page_id,
            c.next_base_rid,
            c.next_tail_rid,
        ] {
            file.write_u64::<BigEndian>(value)?;
        }
        Ok(())
    }

    fn read_catalog(table_dir: &Path) -> StorageResult<Catalog> {
        let path = table_dir.join(CATALOG_FILE);
        let mut file = Self::open_existing(&path)?;
        let mut fields = [0u64; 8];
        let mut buf = [0u8; 8];
        for field in fields.iter_mut() {
            file.read_exact(&mut buf)?;
            *field = BigEndian::read_u64(&buf);
        }
        Ok(Catalog {
            num_columns: fields[0] as usize,
            key_index: DataColumn(fields[1] as usize),
            current_base_page_id: fields[2],
            current_tail_page_id: fields[3],
            current_base_metadata_page_id: fields[4],
            current_tail_metadata_page_id: fields[5],
            next_base_rid: fields[6],
            next_tail_rid: fields[7],
        })
    }

    fn read_header_field(table_dir: &Path, file_id: PageFileId, pos: u64) -> StorageResult<u64> {
        let path = Self::page_file_path(table_dir, file_id);
        let mut file = Self::open_existing(&path)?;
        file.seek(SeekFrom::Start(pos))?;
        Ok(file.read_u64::<BigEndian>()?)
    }

    /// Backing files referenced by live state must exist; a miss is a
    /// programming error, not a tolerated runtime state.
    fn open_existing(path: &Path) -> StorageResult<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                StorageError::InconsistentState(format!("backing file {:?} missing: {}", path, e))
            })
    }
}

impl Drop for FileHandler {
    fn drop(&mut self) {
        if !self.flushed {
            // No finalizer-based flushing: losing counters here is a
            // caller bug worth hearing about.
            log::warn!(
                "file handler for {:?} dropped without flush; catalog counters not persisted",
                self.table_dir
            );
        }
    }
}
