//! Commit, abort and failed-commit behavior observed through scans.
//!
//! Covers:
//! - Pending rows stay private until commit and later snapshots see them
//! - Rollback restores data, cardinality and the append lease, including
//!   deletes of rows the aborted transaction appended itself
//! - A commit whose log fails is reverted completely and its id reused

#![allow(missing_docs)]

use std::sync::{Arc, Once};

use stratum::primitives::wal::{MemoryWal, WalRecord, WriteAheadLog};
use stratum::catalog::{AlterInfo, MacroDefinition, SchemaDefinition, SequenceDefinition, TableDefinition, ViewDefinition};
use stratum::storage::{DataChunk, DataTable, DataTableInfo, StorageOptions, TableScanState, Vector};
use stratum::transaction::TransactionManager;
use stratum::types::{LogicalType, Result, Snapshot, StratumError, TableId, Value};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn setup() -> (TransactionManager, Arc<DataTable>) {
    init_tracing();
    let options = Arc::new(StorageOptions::new().vector_size(8).vectors_per_segment(2));
    let table = DataTable::new(
        DataTableInfo::new(TableId(1), "main", "numbers"),
        &[LogicalType::Integer],
        Arc::clone(&options),
    )
    .unwrap();
    (TransactionManager::new(options), table)
}

fn ints(values: &[i32]) -> DataChunk {
    let vector = Vector::from_values(
        LogicalType::Integer,
        values.iter().map(|&v| Value::Integer(v)).collect(),
    )
    .unwrap();
    DataChunk::from_vectors(vec![vector]).unwrap()
}

fn scan(table: &DataTable, snapshot: Snapshot) -> Vec<i32> {
    let mut state = TableScanState::default();
    table.initialize_scan(&mut state, vec![0], vec![]).unwrap();
    let mut chunk = DataChunk::default();
    let mut out = Vec::new();
    while table.scan(snapshot, &mut state, &mut chunk).unwrap() > 0 {
        for value in chunk.column(0).values() {
            match value {
                Value::Integer(v) => out.push(*v),
                other => panic!("unexpected value {other:?}"),
            }
        }
    }
    out
}

fn seed(manager: &TransactionManager, table: &Arc<DataTable>, values: &[i32]) {
    let mut txn = manager.begin().unwrap();
    table.append(&mut txn, &ints(values)).unwrap();
    manager.commit(txn, None).unwrap();
}

/// Fails the first update record it receives; everything else goes to `inner`.
struct FailingWal {
    inner: MemoryWal,
}

impl WriteAheadLog for FailingWal {
    fn write_set_table(&mut self, schema: &str, table: &str) -> Result<()> {
        self.inner.write_set_table(schema, table)
    }
    fn write_create_table(&mut self, table: &TableDefinition) -> Result<()> {
        self.inner.write_create_table(table)
    }
    fn write_alter(&mut self, info: &AlterInfo) -> Result<()> {
        self.inner.write_alter(info)
    }
    fn write_create_schema(&mut self, schema: &SchemaDefinition) -> Result<()> {
        self.inner.write_create_schema(schema)
    }
    fn write_create_view(&mut self, view: &ViewDefinition) -> Result<()> {
        self.inner.write_create_view(view)
    }
    fn write_create_sequence(&mut self, sequence: &SequenceDefinition) -> Result<()> {
        self.inner.write_create_sequence(sequence)
    }
    fn write_create_macro(&mut self, definition: &MacroDefinition) -> Result<()> {
        self.inner.write_create_macro(definition)
    }
    fn write_drop_table(&mut self, table: &TableDefinition) -> Result<()> {
        self.inner.write_drop_table(table)
    }
    fn write_drop_schema(&mut self, schema: &SchemaDefinition) -> Result<()> {
        self.inner.write_drop_schema(schema)
    }
    fn write_drop_view(&mut self, view: &ViewDefinition) -> Result<()> {
        self.inner.write_drop_view(view)
    }
    fn write_drop_sequence(&mut self, sequence: &SequenceDefinition) -> Result<()> {
        self.inner.write_drop_sequence(sequence)
    }
    fn write_drop_macro(&mut self, definition: &MacroDefinition) -> Result<()> {
        self.inner.write_drop_macro(definition)
    }
    fn write_insert(&mut self, chunk: &DataChunk) -> Result<()> {
        self.inner.write_insert(chunk)
    }
    fn write_delete(&mut self, row_ids: &DataChunk) -> Result<()> {
        self.inner.write_delete(row_ids)
    }
    fn write_update(&mut self, _chunk: &DataChunk, _column_index: usize) -> Result<()> {
        Err(StratumError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }
    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

#[test]
fn pending_rows_are_private_until_commit() {
    let (manager, table) = setup();
    seed(&manager, &table, &[1, 2, 3]);

    let before = manager.begin().unwrap();
    let mut writer = manager.begin().unwrap();
    table.append(&mut writer, &ints(&[4, 5])).unwrap();
    assert_eq!(scan(&table, writer.snapshot()), vec![1, 2, 3, 4, 5]);
    assert_eq!(scan(&table, before.snapshot()), vec![1, 2, 3]);

    let commit_id = manager.commit(writer, None).unwrap().unwrap();
    assert_eq!(commit_id, 2);
    assert_eq!(scan(&table, before.snapshot()), vec![1, 2, 3]);
    assert_eq!(scan(&table, Snapshot::committed(1)), vec![1, 2, 3]);

    let after = manager.begin().unwrap();
    assert_eq!(after.start_time(), 2);
    assert_eq!(scan(&table, after.snapshot()), vec![1, 2, 3, 4, 5]);
    manager.commit(before, None).unwrap();
    manager.commit(after, None).unwrap();
    assert_eq!(manager.stats().active, 0);
}

#[test]
fn committed_delete_hides_rows_from_later_snapshots() {
    let (manager, table) = setup();
    seed(&manager, &table, &[10, 20, 30, 40]);

    let reader = manager.begin().unwrap();
    let mut txn = manager.begin().unwrap();
    assert_eq!(table.delete(&mut txn, &[1, 3]).unwrap(), 2);
    assert_eq!(table.info().cardinality(), 2);

    let mut rival = manager.begin().unwrap();
    assert!(matches!(
        table.delete(&mut rival, &[3]),
        Err(StratumError::Conflict(_))
    ));
    manager.rollback(rival).unwrap();

    let mut wal = MemoryWal::new();
    manager.commit(txn, Some(&mut wal)).unwrap();
    assert_eq!(scan(&table, reader.snapshot()), vec![10, 20, 30, 40]);
    assert_eq!(scan(&table, manager.snapshot()), vec![10, 30]);

    let deleted: Vec<Value> = wal
        .committed_records()
        .iter()
        .filter_map(|record| match record {
            WalRecord::Delete(chunk) => Some(chunk.column(0).values().to_vec()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(deleted, vec![Value::BigInt(1), Value::BigInt(3)]);
    manager.rollback(reader).unwrap();
}

#[test]
fn rollback_restores_previous_state() {
    let (manager, table) = setup();
    seed(&manager, &table, &[1, 2, 3, 4]);

    let mut txn = manager.begin().unwrap();
    table.append(&mut txn, &ints(&[5, 6, 7])).unwrap();
    table.delete(&mut txn, &[0, 5]).unwrap();
    table
        .update(&mut txn, &[0], &ints(&[99]), &[2])
        .unwrap();
    assert_eq!(scan(&table, txn.snapshot()), vec![2, 99, 4, 5, 7]);
    assert_eq!(table.info().cardinality(), 5);

    manager.rollback(txn).unwrap();
    assert_eq!(scan(&table, manager.snapshot()), vec![1, 2, 3, 4]);
    assert_eq!(table.row_count(), 4);
    assert_eq!(table.info().cardinality(), 4);
    assert_eq!(table.append_lease(), None);
    assert_eq!(table.column(0).unwrap().update_node_count(), 0);

    let mut next = manager.begin().unwrap();
    table.delete(&mut next, &[0]).unwrap();
    assert_eq!(manager.commit(next, None).unwrap(), Some(2));
}

#[test]
fn failed_commit_is_reverted_and_its_id_reused() {
    let (manager, table) = setup();
    seed(&manager, &table, &[10, 20, 30]);

    let mut txn = manager.begin().unwrap();
    table.append(&mut txn, &ints(&[40])).unwrap();
    table.delete(&mut txn, &[0]).unwrap();
    table.update(&mut txn, &[0], &ints(&[21]), &[1]).unwrap();

    let mut wal = FailingWal {
        inner: MemoryWal::new(),
    };
    let err = manager.commit(txn, Some(&mut wal)).unwrap_err();
    assert!(matches!(err, StratumError::Io(_)));
    assert!(wal.inner.committed_records().is_empty());
    assert_eq!(wal.inner.stats().flushes, 0);

    assert_eq!(manager.last_commit(), 1);
    assert_eq!(scan(&table, manager.snapshot()), vec![10, 20, 30]);
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.info().cardinality(), 3);
    assert_eq!(table.append_lease(), None);
    assert_eq!(manager.stats().failed_commits, 1);

    let mut retry = manager.begin().unwrap();
    table.append(&mut retry, &ints(&[41])).unwrap();
    assert_eq!(manager.commit(retry, None).unwrap(), Some(2));
    assert_eq!(scan(&table, manager.snapshot()), vec![10, 20, 30, 41]);
}

#[test]
fn temporary_tables_commit_without_log_records() {
    init_tracing();
    let options = Arc::new(StorageOptions::new().vector_size(8));
    let manager = TransactionManager::new(Arc::clone(&options));
    let table = DataTable::new(
        DataTableInfo::new(TableId(7), "temp", "scratch").temporary(true),
        &[LogicalType::Integer],
        options,
    )
    .unwrap();
    let mut txn = manager.begin().unwrap();
    table.append(&mut txn, &ints(&[1, 2])).unwrap();
    let mut wal = MemoryWal::new();
    assert_eq!(manager.commit(txn, Some(&mut wal)).unwrap(), Some(1));
    assert!(wal.records().is_empty());
    assert_eq!(scan(&table, manager.snapshot()), vec![1, 2]);
}

#[test]
fn aborting_deletes_of_own_appended_rows_restores_cardinality() {
    let (manager, table) = setup();
    seed(&manager, &table, &[1, 2, 3]);

    let mut txn = manager.begin().unwrap();
    table.append(&mut txn, &ints(&[4, 5, 6, 7])).unwrap();
    assert_eq!(table.delete(&mut txn, &[4, 5]).unwrap(), 2);
    assert_eq!(table.info().cardinality(), 5);
    manager.rollback(txn).unwrap();
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.info().cardinality(), 3);

    let mut txn = manager.begin().unwrap();
    table.append(&mut txn, &ints(&[8, 9])).unwrap();
    table.delete(&mut txn, &[0, 4]).unwrap();
    table.update(&mut txn, &[0], &ints(&[22]), &[1]).unwrap();
    let mut wal = FailingWal {
        inner: MemoryWal::new(),
    };
    assert!(manager.commit(txn, Some(&mut wal)).is_err());
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.info().cardinality(), 3);

    let mut txn = manager.begin().unwrap();
    table.append(&mut txn, &ints(&[10, 11])).unwrap();
    manager.commit(txn, None).unwrap();
    let mut txn = manager.begin().unwrap();
    assert_eq!(table.delete(&mut txn, &[4]).unwrap(), 1);
    manager.commit(txn, None).unwrap();
    assert_eq!(scan(&table, manager.snapshot()), vec![1, 2, 3, 10]);
    assert_eq!(table.info().cardinality(), 4);
}
