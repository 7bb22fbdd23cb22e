//! Property tests for segment layout under appends, reverts and promotion
//! of persistent blocks.

#![allow(missing_docs)]

use std::sync::Arc;

use proptest::prelude::*;
use stratum::storage::{
    BlockManager, ColumnSegment, ColumnSegmentType, DataChunk, DataTable, DataTableInfo,
    EncodedBlock, StorageOptions, TableScanState, Vector,
};
use stratum::transaction::TransactionManager;
use stratum::types::{LogicalType, Snapshot, TableId, Value};

fn options() -> Arc<StorageOptions> {
    Arc::new(StorageOptions::new().vector_size(4).vectors_per_segment(2))
}

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

fn assert_contiguous(table: &DataTable) {
    let column = table.column(0).unwrap();
    let ranges = column.segment_ranges();
    if let Some(first) = ranges.first() {
        assert_eq!(first.0, 0);
    }
    for pair in ranges.windows(2) {
        assert_eq!(pair[1].0, pair[0].1, "gap or overlap in {ranges:?}");
        assert!(pair[1].0 > pair[0].0, "start rows must increase: {ranges:?}");
    }
    assert_eq!(ranges.last().map_or(0, |r| r.1), column.total_rows());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn segments_stay_contiguous(ops in prop::collection::vec((1usize..20, any::<bool>()), 1..30)) {
        let options = options();
        let manager = TransactionManager::new(Arc::clone(&options));
        let table = DataTable::new(
            DataTableInfo::new(TableId(1), "main", "t"),
            &[LogicalType::Integer],
            options,
        )
        .unwrap();
        let mut model: Vec<Value> = Vec::new();
        let mut next = 0i32;
        for (len, commit) in ops {
            let values: Vec<i32> = (next..next + len as i32).collect();
            next += len as i32;
            let mut txn = manager.begin().unwrap();
            table.append(&mut txn, &ints(values.iter().copied())).unwrap();
            assert_contiguous(&table);
            if commit {
                manager.commit(txn, None).unwrap();
                model.extend(values.into_iter().map(Value::Integer));
            } else {
                manager.rollback(txn).unwrap();
            }
            assert_contiguous(&table);
            prop_assert_eq!(table.row_count(), model.len() as u64);
            prop_assert_eq!(table.info().cardinality(), model.len() as u64);
        }
        prop_assert_eq!(scan(&table, manager.snapshot()), model);
    }

    #[test]
    fn persistent_blocks_are_never_mutated(
        persisted in 1usize..12,
        spare in 0usize..6,
        extra in 0usize..10,
    ) {
        let blocks = BlockManager::new();
        let mut block = EncodedBlock::new(LogicalType::Integer, persisted + spare);
        for v in 0..persisted as i32 {
            block.push(&Value::Integer(v)).unwrap();
        }
        let (id, shared) = blocks.register(block);
        let original = shared.numeric_bytes().map(<[u8]>::to_vec);

        let options = options();
        let manager = TransactionManager::new(Arc::clone(&options));
        let table = DataTable::new(
            DataTableInfo::new(TableId(2), "main", "p"),
            &[LogicalType::Integer],
            options,
        )
        .unwrap();
        table
            .initialize_persistent(vec![vec![ColumnSegment::persistent(Arc::clone(&shared), 0, None).unwrap()]])
            .unwrap();

        let mut txn = manager.begin().unwrap();
        table.append(&mut txn, &ints(100..100 + extra as i32)).unwrap();
        table.update(&mut txn, &[0], &ints([-1]), &[0]).unwrap();
        manager.commit(txn, None).unwrap();

        let registered = blocks.get(id).unwrap();
        prop_assert_eq!(registered.len(), persisted);
        prop_assert_eq!(registered.numeric_bytes().map(<[u8]>::to_vec), original.clone());
        prop_assert_eq!(shared.numeric_bytes().map(<[u8]>::to_vec), original);

        let types = table.column(0).unwrap().segment_types();
        let expected_head = if spare > 0 && extra > 0 {
            ColumnSegmentType::Transient
        } else {
            ColumnSegmentType::Persistent
        };
        prop_assert_eq!(types[0], expected_head);

        let mut expected: Vec<Value> = (0..persisted as i32).map(Value::Integer).collect();
        expected[0] = Value::Integer(-1);
        expected.extend((100..100 + extra as i32).map(Value::Integer));
        prop_assert_eq!(scan(&table, manager.snapshot()), expected);
        assert_contiguous(&table);
    }
}
