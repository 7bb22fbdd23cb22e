//! Concurrent writers and readers over one table.
//!
//! Validates:
//! - Snapshot reads are repeatable while other transactions commit and abort
//! - Conflicts surface as errors and are cleaned up by rollback
//! - Cardinality, leases and reader registrations balance out at the end

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use stratum::primitives::wal::MemoryWal;
use stratum::storage::{
    DataChunk, DataTable, DataTableInfo, StorageOptions, TableScanState, Vector, ROW_ID_COLUMN,
};
use stratum::transaction::TransactionManager;
use stratum::types::{LogicalType, Snapshot, TableId, Value};

const WRITERS: usize = 4;
const READERS: usize = 2;
const ITERATIONS: usize = 200;

fn ints(values: impl IntoIterator<Item = i32>) -> DataChunk {
    let vector = Vector::from_values(
        LogicalType::Integer,
        values.into_iter().map(Value::Integer).collect(),
    )
    .unwrap();
    DataChunk::from_vectors(vec![vector]).unwrap()
}

fn scan(table: &DataTable, snapshot: Snapshot) -> Vec<Value> {
    let mut state = TableScanState::default();
    table.initialize_scan(&mut state, vec![0], vec![]).unwrap();
    let mut chunk = DataChunk::default();
    let mut out = Vec::new();
    while table.scan(snapshot, &mut state, &mut chunk).unwrap() > 0 {
        out.extend(chunk.column(0).values().iter().cloned());
    }
    out
}

#[test]
fn mixed_workload_keeps_snapshots_stable() {
    let options = Arc::new(StorageOptions::new().vector_size(16).vectors_per_segment(4));
    let manager = Arc::new(TransactionManager::new(Arc::clone(&options)));
    let table = DataTable::new(
        DataTableInfo::new(TableId(1), "main", "stress"),
        &[LogicalType::Integer],
        options,
    )
    .unwrap();
    {
        let mut txn = manager.begin().unwrap();
        table.append(&mut txn, &ints(0..64)).unwrap();
        manager.commit(txn, None).unwrap();
    }

    let barrier = Arc::new(Barrier::new(WRITERS + READERS));
    let done = Arc::new(AtomicBool::new(false));
    let committed = Arc::new(AtomicU64::new(0));

    let writers: Vec<_> = (0..WRITERS)
        .map(|worker| {
            let manager = Arc::clone(&manager);
            let table = Arc::clone(&table);
            let barrier = Arc::clone(&barrier);
            let committed = Arc::clone(&committed);
            thread::spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(0x5eed + worker as u64);
                let mut wal = MemoryWal::new();
                barrier.wait();
                for _ in 0..ITERATIONS {
                    let mut txn = manager.begin().unwrap();
                    let rows = table.row_count().max(1);
                    let outcome = match rng.gen_range(0..3) {
                        0 => table
                            .append(&mut txn, &ints(0..rng.gen_range(1..8)))
                            .map(|_| ()),
                        1 => table
                            .delete(&mut txn, &[rng.gen_range(0..rows)])
                            .map(|_| ()),
                        _ => {
                            let value = rng.gen_range(-1000..1000);
                            table.update(&mut txn, &[0], &ints([value]), &[rng.gen_range(0..rows)])
                        }
                    };
                    if outcome.is_err() || rng.gen_bool(0.2) {
                        manager.rollback(txn).unwrap();
                        continue;
                    }
                    if manager.commit(txn, Some(&mut wal)).unwrap().is_some() {
                        committed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let table = Arc::clone(&table);
            let barrier = Arc::clone(&barrier);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                barrier.wait();
                let mut rounds = 0;
                while !done.load(Ordering::Acquire) || rounds == 0 {
                    let txn = manager.begin().unwrap();
                    let first = scan(&table, txn.snapshot());
                    thread::yield_now();
                    let second = scan(&table, txn.snapshot());
                    assert_eq!(first, second, "snapshot at {} changed", txn.start_time());
                    manager.commit(txn, None).unwrap();
                    rounds += 1;
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().expect("writer panicked");
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().expect("reader panicked");
    }

    let stats = manager.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.last_commit, committed.load(Ordering::Relaxed) + 1);
    assert_eq!(table.append_lease(), None);
    let visible = scan(&table, manager.snapshot());
    assert_eq!(visible.len() as u64, table.info().cardinality());
    let mut state = TableScanState::default();
    table
        .initialize_scan(&mut state, vec![ROW_ID_COLUMN], vec![])
        .unwrap();
    let mut chunk = DataChunk::default();
    let mut row_ids = Vec::new();
    while table.scan(manager.snapshot(), &mut state, &mut chunk).unwrap() > 0 {
        row_ids.extend(chunk.column(0).values().iter().map(|value| match value {
            Value::BigInt(row) => *row as u64,
            other => panic!("unexpected row id {other:?}"),
        }));
    }
    assert!(row_ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(row_ids.last().map_or(true, |&row| row < table.row_count()));
    assert_eq!(row_ids.len(), visible.len());
}
