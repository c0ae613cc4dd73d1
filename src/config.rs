//! Engine-wide constants.

/// Size in bytes of one column's slot array within a page file.
pub const PHYSICAL_PAGE_SIZE: usize = 4096;

/// Every slot is one big-endian 64-bit integer.
pub const BYTES_PER_SLOT: usize = 8;

/// Rows per page: one slot per row per column.
pub const SLOTS_PER_PAGE: usize = PHYSICAL_PAGE_SIZE / BYTES_PER_SLOT;

/// INDIRECTION, RID, TIMESTAMP, SCHEMA_ENCODING, NULL, BASE_RID.
pub const NUM_METADATA_COLS: usize = 6;

/// Default number of single-column frames held by the buffer pool.
pub const DEFAULT_BUFFERPOOL_SIZE: usize = 64;

/// First tail RID ever issued; tail RIDs count down from here.
pub const INITIAL_TAIL_RID: u64 = u64::MAX;

/// RIDs at or above this value are tail RIDs, below it base RIDs.
/// Base RIDs count up from 1 and tail RIDs down from 2^64 - 1, so the
/// two ranges can never meet in any realistic workload.
pub const TAIL_RID_THRESHOLD: u64 = 1 << 63;

/// TPS sentinel written to fresh base pages: no tail has been merged.
pub const INITIAL_TPS: u64 = u64::MAX;

/// Base pages grouped into one page range.
pub const BASE_PAGES_PER_RANGE: usize = 16;

/// A page range becomes merge-eligible once its tail chain spans more
/// than this many tail pages.
pub const MERGE_TAIL_PAGE_THRESHOLD: usize = 4;
