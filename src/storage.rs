//! Storage layer: the log-structured, column-oriented engine core.
//!
//! Components:
//!
//! - **PhysicalPage**: fixed-size array of 8-byte big-endian slots, the
//!   unit of caching and I/O (one per column per page)
//! - **FileHandler**: per-table on-disk layout; appends rows and rolls
//!   pages on overflow
//! - **PageDirectory**: persistent RID -> physical location map
//! - **Bufferpool**: bounded, pin-counted, clock-evicted cache of
//!   single-column pages; the only component that assembles logical
//!   records and resolves multi-version chains
//!
//! Durability is flush-on-close; there is no write-ahead log, so a
//! crash between an append and the matching header write can leave a
//! page offset behind its data.

pub mod buffer;
pub mod column;
pub mod dir;
pub mod error;
pub mod file;
pub mod page;
pub mod range;

pub use buffer::{BufferedRecord, Bufferpool, TableContext};
pub use column::{ColumnMask, DataColumn, MetaColumn};
pub use dir::{PageDirectory, PageDirectoryEntry};
pub use error::{StorageError, StorageResult};
pub use file::FileHandler;
pub use page::{NullMask, PageKind, PhysicalPage, Record, RecordMetadata, Rid, SchemaEncoding};
pub use range::PageRange;
