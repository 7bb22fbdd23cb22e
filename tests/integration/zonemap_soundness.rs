//! Segment skipping must never drop a row that passes the filter.

#![allow(missing_docs)]

use std::sync::Arc;

use proptest::prelude::*;
use stratum::storage::{
    BaseStatistics, ComparisonOp, DataChunk, DataTable, DataTableInfo, FilterPropagateResult,
    StorageOptions, TableFilter, TableScanState, Vector, ROW_ID_COLUMN,
};
use stratum::transaction::TransactionManager;
use stratum::types::{LogicalType, TableId, Value};

fn arb_op() -> impl Strategy<Value = ComparisonOp> {
    prop_oneof![
        Just(ComparisonOp::Equal),
        Just(ComparisonOp::NotEqual),
        Just(ComparisonOp::LessThan),
        Just(ComparisonOp::LessThanOrEqual),
        Just(ComparisonOp::GreaterThan),
        Just(ComparisonOp::GreaterThanOrEqual),
    ]
}

fn arb_filter() -> impl Strategy<Value = TableFilter> {
    prop_oneof![
        4 => (arb_op(), -50i32..50).prop_map(|(op, c)| TableFilter::compare(op, c)),
        1 => Just(TableFilter::IsNull),
        1 => Just(TableFilter::IsNotNull),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        8 => (-50i32..50).prop_map(Value::Integer),
        1 => Just(Value::Null),
    ]
}

fn filtered_scan(table: &DataTable, snapshot: stratum::types::Snapshot, filter: TableFilter) -> (Vec<Value>, usize) {
    let mut state = TableScanState::default();
    table
        .initialize_scan(&mut state, vec![ROW_ID_COLUMN], vec![(0, filter)])
        .unwrap();
    let mut chunk = DataChunk::default();
    let mut rows = Vec::new();
    while table.scan(snapshot, &mut state, &mut chunk).unwrap() > 0 {
        rows.extend(chunk.column(0).values().iter().cloned());
    }
    (rows, state.skipped_segments())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn statistics_verdicts_are_sound(
        values in prop::collection::vec(arb_value(), 0..24),
        filter in arb_filter(),
    ) {
        let stats = BaseStatistics::from_values(LogicalType::Integer, &values);
        match stats.check_filter(&filter) {
            FilterPropagateResult::AlwaysFalse => {
                prop_assert!(values.iter().all(|v| !filter.matches(v)));
            }
            FilterPropagateResult::AlwaysTrue => {
                prop_assert!(values.iter().all(|v| filter.matches(v)));
            }
            FilterPropagateResult::NoPruningPossible => {}
        }
    }

    #[test]
    fn filtered_scans_match_brute_force(
        values in prop::collection::vec(arb_value(), 1..60),
        updates in prop::collection::vec((0usize..60, -80i32..80), 0..8),
        filter in arb_filter(),
    ) {
        let options = Arc::new(StorageOptions::new().vector_size(4).vectors_per_segment(2));
        let manager = TransactionManager::new(Arc::clone(&options));
        let table = DataTable::new(
            DataTableInfo::new(TableId(9), "main", "z"),
            &[LogicalType::Integer],
            options,
        )
        .unwrap();
        let mut txn = manager.begin().unwrap();
        let vector = Vector::from_values(LogicalType::Integer, values.clone()).unwrap();
        table.append(&mut txn, &DataChunk::from_vectors(vec![vector]).unwrap()).unwrap();
        manager.commit(txn, None).unwrap();

        let mut model = values;
        let mut txn = manager.begin().unwrap();
        let mut touched = std::collections::BTreeMap::new();
        for (row, value) in updates {
            touched.insert((row % model.len()) as u64, value);
        }
        if !touched.is_empty() {
            let rows: Vec<u64> = touched.keys().copied().collect();
            let new_values: Vec<Value> = touched.values().map(|&v| Value::Integer(v)).collect();
            for (row, value) in rows.iter().zip(&new_values) {
                model[*row as usize] = value.clone();
            }
            let chunk = DataChunk::from_vectors(vec![
                Vector::from_values(LogicalType::Integer, new_values).unwrap(),
            ])
            .unwrap();
            table.update(&mut txn, &[0], &chunk, &rows).unwrap();
        }

        let expected: Vec<Value> = model
            .iter()
            .enumerate()
            .filter(|(_, v)| filter.matches(v))
            .map(|(row, _)| Value::BigInt(row as i64))
            .collect();
        let (rows, _) = filtered_scan(&table, txn.snapshot(), filter.clone());
        prop_assert_eq!(rows, expected);
        manager.commit(txn, None).unwrap();
        let (rows, _) = filtered_scan(&table, manager.snapshot(), filter.clone());
        let expected: Vec<Value> = model
            .iter()
            .enumerate()
            .filter(|(_, v)| filter.matches(v))
            .map(|(row, _)| Value::BigInt(row as i64))
            .collect();
        prop_assert_eq!(rows, expected);
    }
}

#[test]
fn disjoint_segments_are_skipped() {
    let options = Arc::new(StorageOptions::new().vector_size(4).vectors_per_segment(2));
    let manager = TransactionManager::new(Arc::clone(&options));
    let table = DataTable::new(
        DataTableInfo::new(TableId(10), "main", "sorted"),
        &[LogicalType::Integer],
        options,
    )
    .unwrap();
    let mut txn = manager.begin().unwrap();
    let vector = Vector::from_values(LogicalType::Integer, (0..32).map(Value::Integer).collect()).unwrap();
    table.append(&mut txn, &DataChunk::from_vectors(vec![vector]).unwrap()).unwrap();
    manager.commit(txn, None).unwrap();

    let filter = TableFilter::compare(ComparisonOp::LessThan, 3);
    let (rows, skipped) = filtered_scan(&table, manager.snapshot(), filter);
    assert_eq!(rows, vec![Value::BigInt(0), Value::BigInt(1), Value::BigInt(2)]);
    assert_eq!(skipped, 3);
}
