//! Record-level operations over one table.
//!
//! `Query` is a thin, borrow-only handle; all state lives in the table
//! and the shared pool. Semantics worth calling out:
//!
//! - `update` takes one `Option` per column where `None` means "leave
//!   unchanged". The first update of a record writes a snapshot tail
//!   row carrying every original value, so version walks always
//!   terminate at a row that answers for all columns.
//! - `delete` is soft: the whole version chain is tombstoned in place
//!   and the key leaves the index; bytes are reclaimed by merge.
//! - `sum` over a key range with no live records is `None`, which is
//!   not the same thing as `Some(0)`.

use crate::storage::{
    ColumnMask, DataColumn, MetaColumn, NullMask, Rid, SchemaEncoding, StorageError, StorageResult,
};
use crate::table::Table;

/// One projected row returned by a select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
    pub rid: Rid,
    pub columns: Vec<Option<i64>>,
}

pub struct Query<'a> {
    table: &'a Table,
}

impl<'a> Query<'a> {
    pub fn new(table: &'a Table) -> Self {
        Self { table }
    }

    /// Insert one row. Returns `false` when the key is null or already
    /// present; a wrong column count is a caller bug and errors.
    pub fn insert(&self, columns: &[Option<i64>]) -> StorageResult<bool> {
        if columns.len() != self.table.num_columns() {
            return Err(StorageError::InconsistentState(format!(
                "insert expected {} columns, got {}",
                self.table.num_columns(),
                columns.len()
            )));
        }
        let key = match columns[self.table.key_index().0] {
            Some(key) => key,
            None => return Ok(false),
        };
        let mut index = self.table.index();
        if index.contains(key) {
            return Ok(false);
        }
        let rid = self.table.insert_row(columns)?;
        index.update_index(key, rid);
        Ok(true)
    }

    /// Latest-version select on any column. Key-column searches use the
    /// index; everything else scans.
    pub fn select(
        &self,
        search_key: i64,
        search_col: DataColumn,
        mask: &ColumnMask,
    ) -> StorageResult<Vec<RecordView>> {
        self.select_version(search_key, search_col, mask, 0)
    }

    /// Select as of `relative_version` (0 newest, -1 one older, ...).
    pub fn select_version(
        &self,
        search_key: i64,
        search_col: DataColumn,
        mask: &ColumnMask,
        relative_version: i64,
    ) -> StorageResult<Vec<RecordView>> {
        self.check_column(search_col)?;
        if mask.len() != self.table.num_columns() {
            return Err(StorageError::InconsistentState(format!(
                "projection mask covers {} columns, table has {}",
                mask.len(),
                self.table.num_columns()
            )));
        }
        let pool = self.table.pool();
        let ctx = self.table.ctx();
        let candidates: Vec<Rid> = if search_col == self.table.key_index() {
            self.table.index().locate(search_key).into_iter().collect()
        } else {
            self.table.page_directory().base_rids()
        };

        let mut out = Vec::new();
        for rid in candidates {
            let matched = match pool.get_version_col(ctx, rid, search_col, relative_version)? {
                Some(Some(value)) => value == search_key,
                // Null never matches, and deleted records are invisible.
                Some(None) | None => false,
            };
            if !matched {
                continue;
            }
            if let Some(columns) = pool.get_version_record(ctx, rid, relative_version, mask)? {
                out.push(RecordView { rid, columns });
            }
        }
        Ok(out)
    }

    /// Update the record with the given primary key. One `Option` per
    /// column; `None` leaves the column unchanged. Returns `false` when
    /// the key does not exist, or when a key change collides with
    /// another record.
    pub fn update(&self, primary_key: i64, columns: &[Option<i64>]) -> StorageResult<bool> {
        let n = self.table.num_columns();
        if columns.len() != n {
            return Err(StorageError::InconsistentState(format!(
                "update expected {} columns, got {}",
                n,
                columns.len()
            )));
        }
        let rid = match self.table.index().locate(primary_key) {
            Some(rid) => rid,
            None => return Ok(false),
        };
        if columns.iter().all(|c| c.is_none()) {
            return Ok(true);
        }

        let key_col = self.table.key_index();
        if let Some(new_key) = columns[key_col.0] {
            if new_key != primary_key && self.table.index().contains(new_key) {
                return Ok(false);
            }
        }

        let pool = self.table.pool();
        let ctx = self.table.ctx();
        let all = ColumnMask::all(n);
        let base = match pool.get_record(ctx, rid, &all)? {
            Some(guard) => guard,
            None => return Ok(false),
        };
        if base.record().metadata.rid.is_none() {
            return Ok(false);
        }
        let prior = base.record().metadata.indirection;
        let originals = base.record().columns.clone();
        drop(base);

        // First update: pin the chain's far end with a snapshot row
        // that carries every original value.
        let newest_prior = match prior {
            Some(tail) => tail,
            None => self.table.append_tail(
                None,
                SchemaEncoding::snapshot(n),
                rid,
                &originals,
            )?,
        };

        let mut schema_encoding = SchemaEncoding::EMPTY;
        for (i, col) in columns.iter().enumerate() {
            if col.is_some() {
                schema_encoding = schema_encoding.with(DataColumn(i));
            }
        }
        let tail_rid =
            self.table
                .append_tail(Some(newest_prior), schema_encoding, rid, columns)?;

        pool.update_metadata(ctx, rid, MetaColumn::Indirection, tail_rid.0)?;
        let null_bits = pool.read_metadata(ctx, rid, MetaColumn::NullMask)?;
        pool.update_metadata(
            ctx,
            rid,
            MetaColumn::NullMask,
            NullMask(null_bits).without_indirection_null(n).0,
        )?;

        if let Some(new_key) = columns[key_col.0] {
            if new_key != primary_key {
                let mut index = self.table.index();
                index.remove(primary_key);
                index.update_index(new_key, rid);
            }
        }
        Ok(true)
    }

    /// Soft-delete by primary key. Returns `false` if the key is absent.
    pub fn delete(&self, primary_key: i64) -> StorageResult<bool> {
        let rid = match self.table.index().locate(primary_key) {
            Some(rid) => rid,
            None => return Ok(false),
        };
        if !self.table.pool().tombstone_chain(self.table.ctx(), rid)? {
            return Ok(false);
        }
        self.table.index().remove(primary_key);
        Ok(true)
    }

    /// Sum one column over the inclusive primary-key range, at the
    /// latest version. `None` when no live record falls in the range.
    pub fn sum(&self, start_key: i64, end_key: i64, col: DataColumn) -> StorageResult<Option<i64>> {
        self.sum_version(start_key, end_key, col, 0)
    }

    pub fn sum_version(
        &self,
        start_key: i64,
        end_key: i64,
        col: DataColumn,
        relative_version: i64,
    ) -> StorageResult<Option<i64>> {
        self.check_column(col)?;
        let rids = self.table.index().locate_range(start_key..=end_key);
        let pool = self.table.pool();
        let ctx = self.table.ctx();
        let mut total = 0i64;
        let mut found = false;
        for rid in rids {
            match pool.get_version_col(ctx, rid, col, relative_version)? {
                Some(value) => {
                    // A live record with a null value contributes zero
                    // but still makes the sum exist.
                    found = true;
                    total += value.unwrap_or(0);
                }
                None => {}
            }
        }
        Ok(if found { Some(total) } else { None })
    }

    /// Add one to a single column of the record with the given key.
    /// A null value counts as zero.
    pub fn increment(&self, primary_key: i64, col: DataColumn) -> StorageResult<bool> {
        self.check_column(col)?;
        let rid = match self.table.index().locate(primary_key) {
            Some(rid) => rid,
            None => return Ok(false),
        };
        let value = match self
            .table
            .pool()
            .get_updated_col(self.table.ctx(), rid, col)?
        {
            Some(value) => value.unwrap_or(0),
            None => return Ok(false),
        };
        let mut columns = vec![None; self.table.num_columns()];
        columns[col.0] = Some(value + 1);
        self.update(primary_key, &columns)
    }

    fn check_column(&self, col: DataColumn) -> StorageResult<()> {
        if col.0 >= self.table.num_columns() {
            return Err(StorageError::InconsistentState(format!(
                "column {} out of range for {} columns",
                col.0,
                self.table.num_columns()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Bufferpool;
    use tempfile::tempdir;

    fn make_table(tmp: &std::path::Path) -> Table {
        Table::create(tmp, "grades", 4, DataColumn(0), Bufferpool::new(64)).unwrap()
    }

    #[test]
    fn test_insert_rejects_duplicates_and_bad_shape() {
        let tmp = tempdir().unwrap();
        let table = make_table(tmp.path());
        let query = Query::new(&table);

        assert!(query.insert(&[Some(900), Some(1), Some(2), Some(3)]).unwrap());
        assert!(!query.insert(&[Some(900), Some(9), Some(9), Some(9)]).unwrap());
        assert!(!query.insert(&[None, Some(1), Some(2), Some(3)]).unwrap());
        assert!(query.insert(&[Some(901), None, None, None]).unwrap());
        assert!(query.insert(&[Some(900), Some(1)]).is_err());
    }

    #[test]
    fn test_out_of_range_column_is_an_error() {
        let tmp = tempdir().unwrap();
        let table = make_table(tmp.path());
        let query = Query::new(&table);
        query.insert(&[Some(900), Some(1), Some(2), Some(3)]).unwrap();

        let mask = ColumnMask::all(4);
        assert!(query.select(900, DataColumn(9), &mask).is_err());
        assert!(query
            .select_version(900, DataColumn(4), &mask, -1)
            .is_err());
        assert!(query.sum(900, 901, DataColumn(9)).is_err());
        assert!(query.increment(900, DataColumn(9)).is_err());
        // A mask sized for a different table is rejected too.
        assert!(query
            .select(900, DataColumn(0), &ColumnMask::all(2))
            .is_err());
    }

    #[test]
    fn test_select_by_key_and_by_scan() {
        let tmp = tempdir().unwrap();
        let table = make_table(tmp.path());
        let query = Query::new(&table);
        query.insert(&[Some(900), Some(5), Some(1), None]).unwrap();
        query.insert(&[Some(901), Some(5), Some(2), None]).unwrap();
        query.insert(&[Some(902), Some(6), Some(3), None]).unwrap();

        let mask = ColumnMask::all(4);
        let hit = query.select(901, DataColumn(0), &mask).unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].columns, vec![Some(901), Some(5), Some(2), None]);

        // Non-key search scans and can match many rows.
        let hits = query.select(5, DataColumn(1), &mask).unwrap();
        assert_eq!(hits.len(), 2);

        // Null never matches a search value.
        assert!(query.select(0, DataColumn(3), &mask).unwrap().is_empty());
        assert!(query.select(999, DataColumn(0), &mask).unwrap().is_empty());
    }

    #[test]
    fn test_update_and_version_select() {
        let tmp = tempdir().unwrap();
        let table = make_table(tmp.path());
        let query = Query::new(&table);
        query.insert(&[Some(901), Some(50), Some(7), Some(8)]).unwrap();

        assert!(query
            .update(901, &[None, Some(60), None, None])
            .unwrap());

        let mask = ColumnMask::all(4);
        let now = query.select(901, DataColumn(0), &mask).unwrap();
        assert_eq!(now[0].columns, vec![Some(901), Some(60), Some(7), Some(8)]);

        let before = query
            .select_version(901, DataColumn(0), &mask, -1)
            .unwrap();
        assert_eq!(before[0].columns, vec![Some(901), Some(50), Some(7), Some(8)]);
        // Older than the history clamps to the original.
        let clamped = query
            .select_version(901, DataColumn(0), &mask, -2)
            .unwrap();
        assert_eq!(clamped[0].columns, before[0].columns);

        assert!(!query.update(999, &[None, Some(1), None, None]).unwrap());
    }

    #[test]
    fn test_update_can_move_primary_key() {
        let tmp = tempdir().unwrap();
        let table = make_table(tmp.path());
        let query = Query::new(&table);
        query.insert(&[Some(900), Some(1), None, None]).unwrap();
        query.insert(&[Some(901), Some(2), None, None]).unwrap();

        // Collision is rejected, a free key moves.
        assert!(!query.update(900, &[Some(901), None, None, None]).unwrap());
        assert!(query.update(900, &[Some(950), None, None, None]).unwrap());

        let mask = ColumnMask::all(4);
        assert!(query.select(900, DataColumn(0), &mask).unwrap().is_empty());
        let moved = query.select(950, DataColumn(0), &mask).unwrap();
        assert_eq!(moved[0].columns, vec![Some(950), Some(1), None, None]);
    }

    #[test]
    fn test_delete_hides_all_versions() {
        let tmp = tempdir().unwrap();
        let table = make_table(tmp.path());
        let query = Query::new(&table);
        query.insert(&[Some(903), Some(1), None, None]).unwrap();
        query.update(903, &[None, Some(2), None, None]).unwrap();

        assert!(query.delete(903).unwrap());
        assert!(!query.delete(903).unwrap());

        let mask = ColumnMask::all(4);
        assert!(query.select(903, DataColumn(0), &mask).unwrap().is_empty());
        assert!(query
            .select_version(903, DataColumn(0), &mask, -1)
            .unwrap()
            .is_empty());
        // The key can be reused after the delete.
        assert!(query.insert(&[Some(903), Some(9), None, None]).unwrap());
    }

    #[test]
    fn test_sum_none_vs_zero() {
        let tmp = tempdir().unwrap();
        let table = make_table(tmp.path());
        let query = Query::new(&table);
        query.insert(&[Some(900), Some(0), None, None]).unwrap();
        query.insert(&[Some(901), Some(-3), Some(4), None]).unwrap();

        assert_eq!(query.sum(900, 901, DataColumn(1)).unwrap(), Some(-3));
        // Live records summing to zero are still Some.
        assert_eq!(query.sum(900, 900, DataColumn(1)).unwrap(), Some(0));
        // Null values contribute zero without erasing the sum.
        assert_eq!(query.sum(900, 901, DataColumn(2)).unwrap(), Some(4));
        // Empty key range: no sum at all.
        assert_eq!(query.sum(100, 200, DataColumn(1)).unwrap(), None);

        query.delete(900).unwrap();
        query.delete(901).unwrap();
        assert_eq!(query.sum(900, 901, DataColumn(1)).unwrap(), None);
    }

    #[test]
    fn test_sum_version_sees_history() {
        let tmp = tempdir().unwrap();
        let table = make_table(tmp.path());
        let query = Query::new(&table);
        query.insert(&[Some(900), Some(10), None, None]).unwrap();
        query.insert(&[Some(901), Some(20), None, None]).unwrap();
        query.update(901, &[None, Some(25), None, None]).unwrap();

        assert_eq!(query.sum(900, 901, DataColumn(1)).unwrap(), Some(35));
        assert_eq!(
            query.sum_version(900, 901, DataColumn(1), -1).unwrap(),
            Some(30)
        );
    }

    #[test]
    fn test_increment() {
        let tmp = tempdir().unwrap();
        let table = make_table(tmp.path());
        let query = Query::new(&table);
        query.insert(&[Some(900), Some(7), None, None]).unwrap();

        assert!(query.increment(900, DataColumn(1)).unwrap());
        assert!(query.increment(900, DataColumn(2)).unwrap());
        let mask = ColumnMask::all(4);
        let row = query.select(900, DataColumn(0), &mask).unwrap();
        assert_eq!(row[0].columns, vec![Some(900), Some(8), Some(1), None]);
        assert!(!query.increment(999, DataColumn(1)).unwrap());
    }
}
