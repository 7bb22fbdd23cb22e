//! Loading storage options from disk and their effect on table layout.

#![allow(missing_docs)]

use std::fs;
use std::sync::Arc;

use stratum::storage::{ConfigError, DataChunk, DataTable, DataTableInfo, StorageOptions, Vector};
use stratum::transaction::TransactionManager;
use stratum::types::{LogicalType, TableId, Value};
use tempfile::tempdir;

#[test]
fn load_reads_a_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("storage.toml");
    fs::write(
        &path,
        "vector_size = 4\nvectors_per_segment = 2\nprune_on_commit = false\n",
    )
    .unwrap();
    let options = StorageOptions::load(&path).unwrap();
    assert_eq!(
        options,
        StorageOptions::new()
            .vector_size(4)
            .vectors_per_segment(2)
            .prune_on_commit(false)
    );
    assert_eq!(options.segment_capacity(), 8);
}

#[test]
fn missing_file_reports_its_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = StorageOptions::load(&path).unwrap_err();
    match &err {
        ConfigError::Read { path: reported, .. } => assert_eq!(reported, &path),
        other => panic!("expected a read error, got {other:?}"),
    }
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn invalid_values_in_a_file_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("storage.toml");
    fs::write(&path, "vector_size = 0\n").unwrap();
    assert!(matches!(
        StorageOptions::load(&path),
        Err(ConfigError::Invalid {
            field: "vector_size",
            ..
        })
    ));

    fs::write(&path, "vector_size = \"big\"\n").unwrap();
    match StorageOptions::load(&path) {
        Err(ConfigError::Parse { path: Some(p), .. }) => assert_eq!(p, path),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn loaded_options_shape_segments() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("storage.toml");
    fs::write(&path, "vector_size = 4\nvectors_per_segment = 2\n").unwrap();
    let options = Arc::new(StorageOptions::load(&path).unwrap());
    let manager = TransactionManager::new(Arc::clone(&options));
    let table = DataTable::new(
        DataTableInfo::new(TableId(1), "main", "shaped"),
        &[LogicalType::Integer],
        options,
    )
    .unwrap();

    let mut txn = manager.begin().unwrap();
    let vector = Vector::from_values(LogicalType::Integer, (0..20).map(Value::Integer).collect()).unwrap();
    table
        .append(&mut txn, &DataChunk::from_vectors(vec![vector]).unwrap())
        .unwrap();
    manager.commit(txn, None).unwrap();

    assert_eq!(
        table.column(0).unwrap().segment_ranges(),
        vec![(0, 8), (8, 16), (16, 20)]
    );
}
