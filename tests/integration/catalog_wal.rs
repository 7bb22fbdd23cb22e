//! Catalog changes committed through the transaction manager and the log
//! records they produce.

#![allow(missing_docs)]

use std::sync::Arc;

use stratum::catalog::{
    AlterInfo, Catalog, CatalogObject, CatalogType, ColumnDefinition, MacroDefinition,
    SchemaDefinition, SequenceDefinition, TableDefinition, ViewDefinition, DEFAULT_SCHEMA,
};
use stratum::primitives::wal::{MemoryWal, WalRecord};
use stratum::storage::StorageOptions;
use stratum::transaction::TransactionManager;
use stratum::types::{LogicalType, StratumError};

fn manager() -> TransactionManager {
    TransactionManager::new(Arc::new(StorageOptions::default()))
}

fn orders() -> TableDefinition {
    TableDefinition::new(
        DEFAULT_SCHEMA,
        "orders",
        vec![
            ColumnDefinition::new("id", LogicalType::BigInt),
            ColumnDefinition::new("note", LogicalType::Varchar),
        ],
    )
}

fn kinds(wal: &MemoryWal) -> Vec<&'static str> {
    wal.committed_records().iter().map(WalRecord::kind).collect()
}

fn create_orders(manager: &TransactionManager, catalog: &Arc<Catalog>) {
    let mut txn = manager.begin().unwrap();
    catalog
        .create_entry(&mut txn, CatalogObject::Table(orders()), false)
        .unwrap();
    manager.commit(txn, None).unwrap();
}

#[test]
fn creates_are_logged_in_write_order() {
    let manager = manager();
    let catalog = Catalog::new();
    let mut txn = manager.begin().unwrap();
    let objects = vec![
        CatalogObject::Schema(SchemaDefinition {
            name: "sales".into(),
            comment: None,
        }),
        CatalogObject::Table(TableDefinition::new(
            "sales",
            "items",
            vec![ColumnDefinition::new("sku", LogicalType::Varchar)],
        )),
        CatalogObject::View(ViewDefinition {
            schema: "sales".into(),
            name: "cheap_items".into(),
            query: "select sku from items".into(),
            aliases: vec![],
        }),
        CatalogObject::Sequence(SequenceDefinition {
            schema: "sales".into(),
            name: "item_ids".into(),
            start: 1,
            increment: 1,
        }),
        CatalogObject::Macro(MacroDefinition {
            schema: "sales".into(),
            name: "add".into(),
            parameters: vec!["a".into(), "b".into()],
            body: "a + b".into(),
        }),
        CatalogObject::Index {
            schema: "sales".into(),
            name: "items_sku".into(),
            table: "items".into(),
        },
    ];
    for object in objects {
        catalog.create_entry(&mut txn, object, false).unwrap();
    }
    let mut wal = MemoryWal::new();
    assert_eq!(manager.commit(txn, Some(&mut wal)).unwrap(), Some(1));
    assert_eq!(
        kinds(&wal),
        vec![
            "create_schema",
            "create_table",
            "create_view",
            "create_sequence",
            "create_macro"
        ]
    );
    let listed: Vec<String> = catalog
        .list_entries(manager.snapshot(), "sales")
        .iter()
        .map(|entry| entry.name().to_owned())
        .collect();
    assert_eq!(listed, vec!["add", "cheap_items", "item_ids", "items", "items_sku"]);
}

#[test]
fn rename_is_logged_as_alter_and_resolves_by_snapshot() {
    let manager = manager();
    let catalog = Catalog::new();
    create_orders(&manager, &catalog);

    let reader = manager.begin().unwrap();
    let mut txn = manager.begin().unwrap();
    let rename = AlterInfo::RenameTable {
        schema: DEFAULT_SCHEMA.into(),
        name: "orders".into(),
        new_name: "purchases".into(),
    };
    catalog.alter_entry(&mut txn, &rename).unwrap();
    let mut wal = MemoryWal::new();
    manager.commit(txn, Some(&mut wal)).unwrap();
    assert_eq!(wal.committed_records(), &[WalRecord::Alter(rename)]);

    let lookup = |snapshot, name| catalog.get_entry(snapshot, CatalogType::Table, DEFAULT_SCHEMA, name);
    assert!(lookup(reader.snapshot(), "orders").is_ok());
    assert!(lookup(reader.snapshot(), "purchases").is_err());
    assert!(matches!(
        lookup(manager.snapshot(), "orders"),
        Err(StratumError::NotFound)
    ));
    let renamed = lookup(manager.snapshot(), "purchases").unwrap();
    assert_eq!(renamed.timestamp(), 2);
    manager.rollback(reader).unwrap();
}

#[test]
fn add_column_alter_round_trips_through_the_log() {
    let manager = manager();
    let catalog = Catalog::new();
    create_orders(&manager, &catalog);

    let mut txn = manager.begin().unwrap();
    let add = AlterInfo::AddColumn {
        schema: DEFAULT_SCHEMA.into(),
        table: "orders".into(),
        column: ColumnDefinition::new("total", LogicalType::Double),
    };
    catalog.alter_entry(&mut txn, &add).unwrap();
    let mut wal = MemoryWal::new();
    manager.commit(txn, Some(&mut wal)).unwrap();
    assert_eq!(kinds(&wal), vec!["alter"]);

    let entry = catalog
        .get_entry(manager.snapshot(), CatalogType::Table, DEFAULT_SCHEMA, "orders")
        .unwrap();
    match entry.object() {
        CatalogObject::Table(def) => {
            assert_eq!(def.columns.len(), 3);
            assert_eq!(def.column_index("total"), Some(2));
        }
        other => panic!("expected a table, got {other:?}"),
    }
}

#[test]
fn drop_logs_the_dropped_definition() {
    let manager = manager();
    let catalog = Catalog::new();
    create_orders(&manager, &catalog);

    let mut txn = manager.begin().unwrap();
    catalog
        .drop_entry(&mut txn, CatalogType::Table, DEFAULT_SCHEMA, "orders")
        .unwrap();
    let mut wal = MemoryWal::new();
    manager.commit(txn, Some(&mut wal)).unwrap();
    assert_eq!(wal.committed_records(), &[WalRecord::DropTable(orders())]);
    assert!(catalog
        .get_entry(manager.snapshot(), CatalogType::Table, DEFAULT_SCHEMA, "orders")
        .is_err());
}

#[test]
fn rolled_back_create_leaves_no_trace() {
    let manager = manager();
    let catalog = Catalog::new();
    let mut txn = manager.begin().unwrap();
    catalog
        .create_entry(&mut txn, CatalogObject::Table(orders()), false)
        .unwrap();
    let mut rival = manager.begin().unwrap();
    assert!(matches!(
        catalog.create_entry(&mut rival, CatalogObject::Table(orders()), false),
        Err(StratumError::Conflict(_))
    ));
    manager.rollback(txn).unwrap();

    assert!(catalog.list_entries(manager.snapshot(), DEFAULT_SCHEMA).is_empty());
    catalog
        .create_entry(&mut rival, CatalogObject::Table(orders()), false)
        .unwrap();
    assert_eq!(manager.commit(rival, None).unwrap(), Some(1));
}

#[test]
fn temporary_and_derived_entries_are_not_logged() {
    let manager = manager();
    let catalog = Catalog::new();
    let mut txn = manager.begin().unwrap();
    catalog
        .create_entry(&mut txn, CatalogObject::Table(orders()), true)
        .unwrap();
    catalog
        .create_entry(
            &mut txn,
            CatalogObject::PreparedStatement {
                name: "q1".into(),
            },
            false,
        )
        .unwrap();
    let mut wal = MemoryWal::new();
    manager.commit(txn, Some(&mut wal)).unwrap();
    assert!(wal.records().is_empty());
    assert_eq!(wal.stats().flushes, 1);
}

#[test]
fn create_then_alter_in_one_transaction_logs_both() {
    let manager = manager();
    let catalog = Catalog::new();
    let mut txn = manager.begin().unwrap();
    catalog
        .create_entry(&mut txn, CatalogObject::Table(orders()), false)
        .unwrap();
    let add = AlterInfo::AddColumn {
        schema: DEFAULT_SCHEMA.into(),
        table: "orders".into(),
        column: ColumnDefinition::new("total", LogicalType::Double),
    };
    catalog.alter_entry(&mut txn, &add).unwrap();
    let mut wal = MemoryWal::new();
    manager.commit(txn, Some(&mut wal)).unwrap();
    assert_eq!(
        wal.committed_records(),
        &[WalRecord::CreateTable(orders()), WalRecord::Alter(add)]
    );
}

#[test]
fn dropping_an_index_fails_the_commit_and_keeps_it() {
    let manager = manager();
    let catalog = Catalog::new();
    create_orders(&manager, &catalog);
    let mut txn = manager.begin().unwrap();
    catalog
        .create_entry(
            &mut txn,
            CatalogObject::Index {
                schema: DEFAULT_SCHEMA.into(),
                name: "orders_id".into(),
                table: "orders".into(),
            },
            false,
        )
        .unwrap();
    manager.commit(txn, None).unwrap();

    let mut txn = manager.begin().unwrap();
    catalog
        .drop_entry(&mut txn, CatalogType::Index, DEFAULT_SCHEMA, "orders_id")
        .unwrap();
    let mut wal = MemoryWal::new();
    let err = manager.commit(txn, Some(&mut wal)).unwrap_err();
    assert!(err.is_internal());
    assert!(wal.committed_records().is_empty());
    assert_eq!(manager.stats().failed_commits, 1);
    assert!(catalog
        .get_entry(manager.snapshot(), CatalogType::Index, DEFAULT_SCHEMA, "orders_id")
        .is_ok());
}
