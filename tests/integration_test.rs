use lstore::config::{BASE_PAGES_PER_RANGE, INITIAL_TPS, SLOTS_PER_PAGE};
use lstore::database::Database;
use lstore::query::Query;
use lstore::storage::{ColumnMask, DataColumn, FileHandler};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tempfile::tempdir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_insert_update_version_delete_scenario() {
    init_logging();
    let tmp = tempdir().unwrap();
    let db = Database::open(tmp.path()).unwrap();
    let table = db.create_table("grades", 5, DataColumn(0)).unwrap();
    let query = Query::new(&table);

    for key in 900..905 {
        assert!(query
            .insert(&[Some(key), Some(key * 10), Some(0), None, Some(1)])
            .unwrap());
    }

    // Update one record; the others keep a bare base row.
    assert!(query
        .update(901, &[None, Some(-5), None, Some(42), None])
        .unwrap());

    let mask = ColumnMask::all(5);
    let now = query.select(901, DataColumn(0), &mask).unwrap();
    assert_eq!(now.len(), 1);
    assert_eq!(
        now[0].columns,
        vec![Some(901), Some(-5), Some(0), Some(42), Some(1)]
    );

    // One version back is the pre-update state; anything older clamps.
    for relative_version in [-1, -2, -7] {
        let old = query
            .select_version(901, DataColumn(0), &mask, relative_version)
            .unwrap();
        assert_eq!(
            old[0].columns,
            vec![Some(901), Some(9010), Some(0), None, Some(1)]
        );
    }

    // Unupdated records answer every version with their only state.
    let only = query
        .select_version(904, DataColumn(0), &mask, -3)
        .unwrap();
    assert_eq!(
        only[0].columns,
        vec![Some(904), Some(9040), Some(0), None, Some(1)]
    );

    assert!(query.delete(903).unwrap());
    assert!(query.select(903, DataColumn(0), &mask).unwrap().is_empty());
    assert!(query
        .select_version(903, DataColumn(0), &mask, -1)
        .unwrap()
        .is_empty());

    // Sum skips the deleted record; an empty range has no sum.
    assert_eq!(
        query.sum(900, 904, DataColumn(0)).unwrap(),
        Some(900 + 901 + 902 + 904)
    );
    assert_eq!(query.sum(2000, 3000, DataColumn(0)).unwrap(), None);
    assert_eq!(
        query.sum_version(900, 902, DataColumn(1), -1).unwrap(),
        Some(9000 + 9010 + 9020)
    );

    db.close().unwrap();
}

#[test]
fn test_reopen_preserves_records_and_history() {
    let tmp = tempdir().unwrap();
    {
        let db = Database::open(tmp.path()).unwrap();
        let table = db.create_table("accounts", 3, DataColumn(0)).unwrap();
        let query = Query::new(&table);
        for key in 0..100 {
            query.insert(&[Some(key), Some(key * 2), None]).unwrap();
        }
        query.update(7, &[None, Some(-1), Some(3)]).unwrap();
        query.delete(9).unwrap();
        db.close().unwrap();
    }

    let db = Database::open(tmp.path()).unwrap();
    let table = db.get_table("accounts").unwrap();
    let query = Query::new(&table);
    let mask = ColumnMask::all(3);

    let hit = query.select(7, DataColumn(0), &mask).unwrap();
    assert_eq!(hit[0].columns, vec![Some(7), Some(-1), Some(3)]);
    let old = query.select_version(7, DataColumn(0), &mask, -1).unwrap();
    assert_eq!(old[0].columns, vec![Some(7), Some(14), None]);

    assert!(query.select(9, DataColumn(0), &mask).unwrap().is_empty());
    assert_eq!(query.sum(0, 4, DataColumn(1)).unwrap(), Some(0 + 2 + 4 + 6 + 8));

    // New writes continue the RID and page sequences.
    assert!(query.insert(&[Some(100), Some(200), None]).unwrap());
    let fresh = query.select(100, DataColumn(0), &mask).unwrap();
    assert_eq!(fresh[0].columns, vec![Some(100), Some(200), None]);
    db.close().unwrap();
}

#[test]
fn test_merge_coalesces_and_reclaims_tail_pages() {
    init_logging();
    let tmp = tempdir().unwrap();
    let db = Database::open(tmp.path()).unwrap();
    let table = db.create_table("bank", 2, DataColumn(0)).unwrap();
    let query = Query::new(&table);

    // Close out the first page range entirely, plus a little spill so
    // the append page is outside it.
    let range_rows = (BASE_PAGES_PER_RANGE * SLOTS_PER_PAGE) as i64;
    for key in 0..range_rows + 10 {
        assert!(query.insert(&[Some(key), Some(key)]).unwrap());
    }
    // Enough updates to pile up tail pages past the merge threshold.
    for key in 0..1400 {
        assert!(query.update(key, &[None, Some(key + 1_000_000)]).unwrap());
    }
    assert!(query.delete(5).unwrap());

    assert_eq!(table.merge().unwrap(), 1);

    // The active tail page is the append target: updates must keep
    // flowing the moment the reclaim pass is done.
    assert!(query.update(1398, &[None, Some(-1)]).unwrap());
    assert!(query
        .update(1398, &[None, Some(1398 + 1_000_000)])
        .unwrap());

    // Latest values survive the merge; the deleted row stays deleted.
    let mask = ColumnMask::all(2);
    for key in [0, 1, 777, 1399] {
        let hit = query.select(key, DataColumn(0), &mask).unwrap();
        assert_eq!(hit[0].columns, vec![Some(key), Some(key + 1_000_000)]);
    }
    let untouched = query.select(2000, DataColumn(0), &mask).unwrap();
    assert_eq!(untouched[0].columns, vec![Some(2000), Some(2000)]);
    assert!(query.select(5, DataColumn(0), &mask).unwrap().is_empty());

    // Pre-merge history is folded away: version reads now clamp to the
    // coalesced state.
    let clamped = query.select_version(1, DataColumn(0), &mask, -1).unwrap();
    assert_eq!(clamped[0].columns, vec![Some(1), Some(1_000_001)]);

    // The superseded files are gone and the new page carries a real TPS.
    assert!(!table.dir().join("tail_1").exists());
    assert!(!table.dir().join("base_1").exists());
    let entry = table
        .page_directory()
        .get(table.index().locate(0).unwrap())
        .unwrap();
    let tps = FileHandler::read_tps(table.dir(), entry.page_id).unwrap();
    assert!(tps < INITIAL_TPS);

    // The table keeps working after the merge.
    assert!(query.update(0, &[None, Some(7)]).unwrap());
    let hit = query.select(0, DataColumn(0), &mask).unwrap();
    assert_eq!(hit[0].columns, vec![Some(0), Some(7)]);
    let prev = query.select_version(0, DataColumn(0), &mask, -1).unwrap();
    assert_eq!(prev[0].columns, vec![Some(0), Some(1_000_000)]);

    db.close().unwrap();
}

#[test]
fn test_random_workload_under_tiny_pool() {
    let tmp = tempdir().unwrap();
    // 10 frames: barely more than one record read needs (6 metadata +
    // requested data columns), so every operation churns the clock.
    let db = Database::open_with_pool_size(tmp.path(), 10).unwrap();
    let table = db.create_table("stress", 3, DataColumn(0)).unwrap();
    let query = Query::new(&table);

    let mut rng = StdRng::seed_from_u64(20260828);
    let mut model: HashMap<i64, Vec<Option<i64>>> = HashMap::new();
    for key in 0..600 {
        let row = vec![Some(key), Some(rng.gen_range(-100..100)), None];
        assert!(query.insert(&row).unwrap());
        model.insert(key, row);
    }

    for _ in 0..1000 {
        let key = rng.gen_range(0..600);
        if rng.gen_bool(0.3) {
            let value = rng.gen_range(-1000..1000);
            let col = rng.gen_range(1..3);
            let mut update = vec![None, None, None];
            update[col] = Some(value);
            assert!(query.update(key, &update).unwrap());
            if let Some(row) = model.get_mut(&key) {
                row[col] = Some(value);
            }
        } else {
            let mask = ColumnMask::all(3);
            let hit = query.select(key, DataColumn(0), &mask).unwrap();
            assert_eq!(hit.len(), 1);
            assert_eq!(&hit[0].columns, model.get(&key).unwrap());
        }
    }

    let expected: i64 = (0..600)
        .map(|k| model[&k][1].unwrap_or(0) + model[&k][2].unwrap_or(0))
        .sum();
    let got = query.sum(0, 599, DataColumn(1)).unwrap().unwrap()
        + query.sum(0, 599, DataColumn(2)).unwrap().unwrap();
    assert_eq!(got, expected);

    db.close().unwrap();
}
