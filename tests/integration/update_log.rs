//! Logged shape of updates and deletes, and update-chain pruning.

#![allow(missing_docs)]

use std::sync::Arc;

use stratum::primitives::wal::{MemoryWal, WalRecord};
use stratum::storage::{ColumnScanState, DataChunk, DataTable, DataTableInfo, StorageOptions, Vector};
use stratum::transaction::TransactionManager;
use stratum::types::{LogicalType, StratumError, TableId, Value};

fn setup(options: StorageOptions) -> (TransactionManager, Arc<DataTable>) {
    let options = Arc::new(options);
    let table = DataTable::new(
        DataTableInfo::new(TableId(3), "main", "readings"),
        &[LogicalType::Integer],
        Arc::clone(&options),
    )
    .unwrap();
    let manager = TransactionManager::new(options);
    let mut txn = manager.begin().unwrap();
    table.append(&mut txn, &ints(&(0..16).map(|v| v * 2).collect::<Vec<_>>())).unwrap();
    manager.commit(txn, None).unwrap();
    (manager, table)
}

fn ints(values: &[i32]) -> DataChunk {
    let vector = Vector::from_values(
        LogicalType::Integer,
        values.iter().map(|&v| Value::Integer(v)).collect(),
    )
    .unwrap();
    DataChunk::from_vectors(vec![vector]).unwrap()
}

fn logged_updates(wal: &MemoryWal) -> Vec<(Vec<Value>, Vec<Value>, usize)> {
    wal.committed_records()
        .iter()
        .filter_map(|record| match record {
            WalRecord::Update {
                chunk,
                column_index,
            } => Some((
                chunk.column(0).values().to_vec(),
                chunk.column(1).values().to_vec(),
                *column_index,
            )),
            _ => None,
        })
        .collect()
}

fn update(manager: &TransactionManager, table: &Arc<DataTable>, rows: &[u64], values: &[i32], wal: &mut MemoryWal) {
    let mut txn = manager.begin().unwrap();
    table.update(&mut txn, &[0], &ints(values), rows).unwrap();
    manager.commit(txn, Some(wal)).unwrap();
}

#[test]
fn update_log_carries_the_pre_image() {
    let (manager, table) = setup(StorageOptions::new().vector_size(8));
    assert_eq!(
        table.fetch_row(manager.snapshot(), 5, &[0]).unwrap(),
        Some(vec![Value::Integer(10)])
    );
    let mut wal = MemoryWal::new();
    update(&manager, &table, &[5], &[20], &mut wal);
    assert_eq!(
        logged_updates(&wal),
        vec![(vec![Value::Integer(10)], vec![Value::BigInt(5)], 0)]
    );

    let mut wal = MemoryWal::new();
    update(&manager, &table, &[5], &[30], &mut wal);
    assert_eq!(
        logged_updates(&wal),
        vec![(vec![Value::Integer(20)], vec![Value::BigInt(5)], 0)]
    );
    assert_eq!(
        table.fetch_row(manager.snapshot(), 5, &[0]).unwrap(),
        Some(vec![Value::Integer(30)])
    );
}

#[test]
fn updates_are_logged_per_vector_in_row_order() {
    let (manager, table) = setup(StorageOptions::new().vector_size(8));
    let mut wal = MemoryWal::new();
    update(&manager, &table, &[9, 1, 5], &[-9, -1, -5], &mut wal);
    assert_eq!(
        logged_updates(&wal),
        vec![
            (
                vec![Value::Integer(2), Value::Integer(10)],
                vec![Value::BigInt(1), Value::BigInt(5)],
                0
            ),
            (vec![Value::Integer(18)], vec![Value::BigInt(9)], 0),
        ]
    );
    let kinds: Vec<&str> = wal.committed_records().iter().map(WalRecord::kind).collect();
    assert_eq!(kinds, vec!["set_table", "update", "update"]);
}

#[test]
fn delete_batch_lists_row_ids_in_order() {
    let (manager, table) = setup(StorageOptions::default());
    let mut txn = manager.begin().unwrap();
    assert_eq!(table.delete(&mut txn, &[9, 3, 7]).unwrap(), 3);
    let mut wal = MemoryWal::new();
    manager.commit(txn, Some(&mut wal)).unwrap();
    let batches: Vec<Vec<Value>> = wal
        .committed_records()
        .iter()
        .filter_map(|record| match record {
            WalRecord::Delete(chunk) => Some(chunk.column(0).values().to_vec()),
            _ => None,
        })
        .collect();
    assert_eq!(
        batches,
        vec![vec![Value::BigInt(3), Value::BigInt(7), Value::BigInt(9)]]
    );
}

#[test]
fn concurrent_updates_of_one_row_conflict() {
    let (manager, table) = setup(StorageOptions::new().vector_size(8));
    let mut first = manager.begin().unwrap();
    let mut second = manager.begin().unwrap();
    table.update(&mut first, &[0], &ints(&[1]), &[4]).unwrap();
    assert!(matches!(
        table.update(&mut second, &[0], &ints(&[2]), &[4]),
        Err(StratumError::Conflict(_))
    ));
    table.update(&mut second, &[0], &ints(&[2]), &[3]).unwrap();
    manager.commit(first, None).unwrap();
    manager.commit(second, None).unwrap();

    let mut late = manager.begin().unwrap();
    table.update(&mut late, &[0], &ints(&[7]), &[4]).unwrap();
    manager.commit(late, None).unwrap();
    assert_eq!(
        table.fetch_row(manager.snapshot(), 4, &[0]).unwrap(),
        Some(vec![Value::Integer(7)])
    );
}

#[test]
fn pruning_keeps_history_visible_to_open_readers() {
    let (manager, table) = setup(StorageOptions::new().vector_size(8).prune_on_commit(true));
    let column = || table.column(0).unwrap();
    let mut wal = MemoryWal::new();

    let reader = manager.begin().unwrap();
    update(&manager, &table, &[5], &[20], &mut wal);
    update(&manager, &table, &[5], &[30], &mut wal);
    assert_eq!(column().update_node_count(), 2);
    assert_eq!(
        table.fetch_row(reader.snapshot(), 5, &[0]).unwrap(),
        Some(vec![Value::Integer(10)])
    );
    manager.rollback(reader).unwrap();

    update(&manager, &table, &[6], &[60], &mut wal);
    assert_eq!(column().update_node_count(), 2);
    let current = manager.snapshot();
    assert_eq!(
        table.fetch_row(current, 5, &[0]).unwrap(),
        Some(vec![Value::Integer(30)])
    );
    assert_eq!(
        table.fetch_row(current, 6, &[0]).unwrap(),
        Some(vec![Value::Integer(60)])
    );
}

#[test]
fn pruning_can_be_disabled() {
    let (manager, table) = setup(StorageOptions::new().vector_size(8).prune_on_commit(false));
    let mut wal = MemoryWal::new();
    for value in [1, 2, 3] {
        update(&manager, &table, &[2], &[value], &mut wal);
    }
    assert_eq!(table.column(0).unwrap().update_node_count(), 3);
    assert_eq!(table.prune_versions(manager.oldest_visible()).unwrap(), 2);
    assert_eq!(
        table.fetch_row(manager.snapshot(), 2, &[0]).unwrap(),
        Some(vec![Value::Integer(3)])
    );
}

#[test]
fn index_scan_waits_until_updates_reach_every_snapshot() {
    let (manager, table) = setup(StorageOptions::new().vector_size(8));
    let column = table.column(0).unwrap();
    let reader = manager.begin().unwrap();
    let mut wal = MemoryWal::new();
    update(&manager, &table, &[5], &[21], &mut wal);

    let mut state = ColumnScanState::default();
    let mut out = Vector::new(LogicalType::Integer);
    column.initialize_scan(&mut state);
    assert!(matches!(
        column.index_scan(&mut state, &mut out, manager.oldest_visible(), false),
        Err(StratumError::Uncommitted(_))
    ));
    column.initialize_scan(&mut state);
    assert_eq!(
        column
            .index_scan(&mut state, &mut out, manager.oldest_visible(), true)
            .unwrap(),
        8
    );
    assert_eq!(out.values()[5], Value::Integer(21));

    manager.rollback(reader).unwrap();
    let expected: Vec<Value> = [0, 2, 4, 6, 8, 21, 12, 14]
        .into_iter()
        .map(Value::Integer)
        .collect();
    column.initialize_scan(&mut state);
    assert_eq!(
        column
            .index_scan(&mut state, &mut out, manager.oldest_visible(), false)
            .unwrap(),
        8
    );
    assert_eq!(out.values(), expected.as_slice());

    let mut writer = manager.begin().unwrap();
    table.update(&mut writer, &[0], &ints(&[-1]), &[12]).unwrap();
    assert!(column
        .index_scan(&mut state, &mut out, manager.oldest_visible(), false)
        .is_err());
    manager.rollback(writer).unwrap();
}
