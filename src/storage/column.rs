//! Strongly typed column positions.
//!
//! Data columns and metadata columns live in different files and are
//! indexed independently; keeping them as distinct types means an index
//! into one can never silently be used against the other.

use crate::config::NUM_METADATA_COLS;

/// Position of a user data column within a table (0-based, metadata
/// columns excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataColumn(pub usize);

/// The fixed metadata columns, in their physical order within a
/// metadata page file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaColumn {
    Indirection,
    Rid,
    Timestamp,
    SchemaEncoding,
    NullMask,
    BaseRid,
}

impl MetaColumn {
    pub const ALL: [MetaColumn; NUM_METADATA_COLS] = [
        MetaColumn::Indirection,
        MetaColumn::Rid,
        MetaColumn::Timestamp,
        MetaColumn::SchemaEncoding,
        MetaColumn::NullMask,
        MetaColumn::BaseRid,
    ];

    /// Slot-array position within a metadata page file. This is the
    /// single place a metadata column becomes a raw index.
    pub fn position(self) -> usize {
        match self {
            MetaColumn::Indirection => 0,
            MetaColumn::Rid => 1,
            MetaColumn::Timestamp => 2,
            MetaColumn::SchemaEncoding => 3,
            MetaColumn::NullMask => 4,
            MetaColumn::BaseRid => 5,
        }
    }
}

/// Projection over a table's data columns. Metadata columns are always
/// implicitly requested and never appear in a mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMask(Vec<bool>);

impl ColumnMask {
    pub fn all(num_columns: usize) -> Self {
        Self(vec![true; num_columns])
    }

    pub fn none(num_columns: usize) -> Self {
        Self(vec![false; num_columns])
    }

    pub fn only(num_columns: usize, col: DataColumn) -> Self {
        let mut mask = Self::none(num_columns);
        mask.0[col.0] = true;
        mask
    }

    pub fn from_flags(flags: &[bool]) -> Self {
        Self(flags.to_vec())
    }

    pub fn set(&mut self, col: DataColumn) {
        self.0[col.0] = true;
    }

    pub fn contains(&self, col: DataColumn) -> bool {
        self.0[col.0]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&b| b).count()
    }

    /// Iterate the requested columns in order.
    pub fn iter(&self) -> impl Iterator<Item = DataColumn> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, &b)| b)
            .map(|(i, _)| DataColumn(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_only() {
        let mask = ColumnMask::only(4, DataColumn(2));
        assert!(!mask.contains(DataColumn(0)));
        assert!(mask.contains(DataColumn(2)));
        assert_eq!(mask.count(), 1);
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![DataColumn(2)]);
    }

    #[test]
    fn test_mask_all() {
        let mask = ColumnMask::all(3);
        assert_eq!(mask.count(), 3);
        assert_eq!(mask.len(), 3);
    }

    #[test]
    fn test_meta_positions_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for col in MetaColumn::ALL {
            assert!(seen.insert(col.position()));
        }
        assert_eq!(seen.len(), NUM_METADATA_COLS);
    }
}
