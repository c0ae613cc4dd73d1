//! Physical page buffers, RIDs, bitmasks, and the transient record
//! view assembled from them.

use crate::config::{
    BYTES_PER_SLOT, PHYSICAL_PAGE_SIZE, SLOTS_PER_PAGE, TAIL_RID_THRESHOLD,
};
use crate::storage::column::DataColumn;
use crate::storage::error::{StorageError, StorageResult};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

/// Record identifier. Base RIDs count up from 1, tail RIDs count down
/// from 2^64 - 1; the magnitude alone tells the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rid(pub u64);

impl Rid {
    pub fn is_base(self) -> bool {
        self.0 < TAIL_RID_THRESHOLD
    }

    pub fn is_tail(self) -> bool {
        !self.is_base()
    }
}

/// Which append log a page belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageKind {
    Base,
    Tail,
}

/// Per-row bitmask of which data columns a physical row authoritatively
/// carries. Bit `i` covers data column `i`; bit `num_columns` tags the
/// snapshot row created on first update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaEncoding(pub u64);

impl SchemaEncoding {
    pub const EMPTY: SchemaEncoding = SchemaEncoding(0);

    pub fn snapshot_bit(num_columns: usize) -> u64 {
        1 << num_columns
    }

    /// The snapshot row carries every column's original value.
    pub fn snapshot(num_columns: usize) -> Self {
        SchemaEncoding(Self::snapshot_bit(num_columns) | ((1 << num_columns) - 1))
    }

    pub fn carries(self, col: DataColumn) -> bool {
        self.0 & (1 << col.0) != 0
    }

    pub fn with(mut self, col: DataColumn) -> Self {
        self.0 |= 1 << col.0;
        self
    }

    pub fn is_snapshot(self, num_columns: usize) -> bool {
        self.0 & Self::snapshot_bit(num_columns) != 0
    }
}

/// Per-row bitmask of logically null slots. Bit `i` covers data column
/// `i`; bit `num_columns` is the RID tombstone; bit `num_columns + 1`
/// marks a null indirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullMask(pub u64);

impl NullMask {
    pub const EMPTY: NullMask = NullMask(0);

    fn tombstone_bit(num_columns: usize) -> u64 {
        1 << num_columns
    }

    fn indirection_bit(num_columns: usize) -> u64 {
        1 << (num_columns + 1)
    }

    pub fn from_row(columns: &[Option<i64>], indirection_null: bool) -> Self {
        let mut bits = 0u64;
        for (i, col) in columns.iter().enumerate() {
            if col.is_none() {
                bits |= 1 << i;
            }
        }
        if indirection_null {
            bits |= Self::indirection_bit(columns.len());
        }
        NullMask(bits)
    }

    pub fn is_null(self, col: DataColumn) -> bool {
        self.0 & (1 << col.0) != 0
    }

    pub fn is_tombstone(self, num_columns: usize) -> bool {
        self.0 & Self::tombstone_bit(num_columns) != 0
    }

    pub fn with_tombstone(self, num_columns: usize) -> Self {
        NullMask(self.0 | Self::tombstone_bit(num_columns))
    }

    pub fn indirection_is_null(self, num_columns: usize) -> bool {
        self.0 & Self::indirection_bit(num_columns) != 0
    }

    /// Clear the indirection-null bit once the base row's indirection
    /// has been pointed at its first tail row.
    pub fn without_indirection_null(self, num_columns: usize) -> Self {
        NullMask(self.0 & !Self::indirection_bit(num_columns))
    }
}

/// Fixed-size byte buffer holding an array of 8-byte big-endian slots
/// plus an append cursor. One per column per page.
///
/// The zero byte pattern encodes both literal 0 and null; only the
/// row's NULL bitmask tells them apart.
#[derive(Debug, Clone)]
pub struct PhysicalPage {
    data: Box<[u8; PHYSICAL_PAGE_SIZE]>,
    num_slots: usize,
}

impl PhysicalPage {
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PHYSICAL_PAGE_SIZE]),
            num_slots: 0,
        }
    }

    /// Rehydrate from bytes read off disk. `byte_offset` is the page
    /// header's append offset.
    pub fn from_bytes(bytes: &[u8], byte_offset: u64) -> StorageResult<Self> {
        if bytes.len() != PHYSICAL_PAGE_SIZE {
            return Err(StorageError::InconsistentState(format!(
                "physical page must be {} bytes, got {}",
                PHYSICAL_PAGE_SIZE,
                bytes.len()
            )));
        }
        let mut data = Box::new([0u8; PHYSICAL_PAGE_SIZE]);
        data.copy_from_slice(bytes);
        Ok(Self {
            data,
            num_slots: byte_offset as usize / BYTES_PER_SLOT,
        })
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn is_full(&self) -> bool {
        self.num_slots >= SLOTS_PER_PAGE
    }

    /// Append one slot. `None` is stored as the zero pattern.
    pub fn insert(&mut self, value: Option<i64>) -> StorageResult<usize> {
        self.push_raw(value.unwrap_or(0) as u64)
    }

    /// Append one raw slot; metadata columns hold unsigned values.
    pub fn push_raw(&mut self, value: u64) -> StorageResult<usize> {
        if self.is_full() {
            return Err(StorageError::PageFull);
        }
        let slot = self.num_slots;
        self.write_slot_raw(slot, value);
        self.num_slots += 1;
        Ok(slot)
    }

    /// Decode the slot at `slot`, or `None` past the append cursor.
    pub fn read(&self, slot: usize) -> Option<u64> {
        if slot >= self.num_slots {
            return None;
        }
        let at = slot * BYTES_PER_SLOT;
        Some(BigEndian::read_u64(&self.data[at..at + BYTES_PER_SLOT]))
    }

    /// Overwrite an existing slot in place (version-chain maintenance
    /// and soft delete only).
    pub fn write_slot(&mut self, slot: usize, value: u64) -> StorageResult<()> {
        if slot >= self.num_slots {
            return Err(StorageError::InconsistentState(format!(
                "slot {} is past the append cursor ({})",
                slot, self.num_slots
            )));
        }
        self.write_slot_raw(slot, value);
        Ok(())
    }

    /// Patch a slot that was appended to the backing file behind this
    /// cached copy, advancing the cursor if needed.
    pub fn patch_appended(&mut self, slot: usize, value: u64) {
        self.write_slot_raw(slot, value);
        if slot >= self.num_slots {
            self.num_slots = slot + 1;
        }
    }

    pub fn as_bytes(&self) -> &[u8; PHYSICAL_PAGE_SIZE] {
        &self.data
    }

    fn write_slot_raw(&mut self, slot: usize, value: u64) {
        let at = slot * BYTES_PER_SLOT;
        BigEndian::write_u64(&mut self.data[at..at + BYTES_PER_SLOT], value);
    }
}

impl Default for PhysicalPage {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded metadata columns of one physical row.
#[derive(Debug, Clone, Copy)]
pub struct RecordMetadata {
    /// `None` once the row has been tombstoned.
    pub rid: Option<Rid>,
    /// RID of the next-newer version, `None` on a fresh base row.
    pub indirection: Option<Rid>,
    pub timestamp: u64,
    pub schema_encoding: SchemaEncoding,
    pub null_mask: NullMask,
    /// Owning base record; equals `rid` on base rows.
    pub base_rid: Rid,
}

/// Transient in-memory view of one physical row. Unprojected and null
/// columns are both `None`; the null mask tells them apart when it
/// matters.
#[derive(Debug, Clone)]
pub struct Record {
    pub metadata: RecordMetadata,
    pub is_base: bool,
    pub columns: Vec<Option<i64>>,
}

impl Record {
    pub fn column(&self, col: DataColumn) -> Option<i64> {
        self.columns[col.0]
    }
}
