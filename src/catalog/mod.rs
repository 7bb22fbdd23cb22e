//! Versioned catalog of schemas, tables and the other named objects.
//!
//! Every object name resolves through a name binding to a slot, and every
//! slot holds a newest-first chain of versions. Writers stack a new version
//! stamped with their transaction id; the commit pass replaces that stamp
//! with the commit id, the rollback pass unlinks the version again.

mod alter;
mod entry;

pub use alter::AlterInfo;
pub use entry::{
    CatalogEntry, CatalogEntryId, CatalogObject, CatalogType, ColumnDefinition, FunctionKind,
    MacroDefinition, SchemaDefinition, SequenceDefinition, TableDefinition, ViewDefinition,
};

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::transaction::undo::{CatalogUndo, UndoRecord};
use crate::transaction::Transaction;
use crate::types::{is_pending_version, CommitId, Result, Snapshot, StratumError, TxnId};

/// Name of the schema every catalog starts with.
pub const DEFAULT_SCHEMA: &str = "main";

/// Lookup namespace; objects of different namespaces may share a name.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
enum Namespace {
    Schema,
    Relation,
    Sequence,
    Function,
    Index,
    Prepared,
    Collation,
}

impl Namespace {
    fn of(kind: CatalogType) -> Result<Self> {
        Ok(match kind {
            CatalogType::Schema => Namespace::Schema,
            CatalogType::Table | CatalogType::View => Namespace::Relation,
            CatalogType::Sequence => Namespace::Sequence,
            CatalogType::Macro
            | CatalogType::ScalarFunction
            | CatalogType::AggregateFunction
            | CatalogType::TableFunction
            | CatalogType::CopyFunction
            | CatalogType::PragmaFunction => Namespace::Function,
            CatalogType::Index => Namespace::Index,
            CatalogType::PreparedStatement => Namespace::Prepared,
            CatalogType::Collation => Namespace::Collation,
            CatalogType::Deleted => {
                return Err(StratumError::Invalid("tombstones have no namespace"))
            }
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct NameKey {
    namespace: Namespace,
    schema: String,
    name: String,
}

impl NameKey {
    fn new(namespace: Namespace, schema: &str, name: &str) -> Self {
        Self {
            namespace,
            schema: schema.to_owned(),
            name: name.to_owned(),
        }
    }
}

/// Binding of a name to a slot, valid from `timestamp` on.
#[derive(Clone, Debug)]
struct MappingValue {
    slot: usize,
    deleted: bool,
    timestamp: u64,
    created_by: TxnId,
}

#[derive(Clone, Debug)]
struct Slot {
    head: CatalogEntryId,
    namespace: Namespace,
}

#[derive(Debug, Default)]
struct CatalogState {
    entries: Vec<CatalogEntry>,
    slots: Vec<Slot>,
    names: FxHashMap<NameKey, Vec<MappingValue>>,
}

impl CatalogState {
    fn entry(&self, id: CatalogEntryId) -> Result<&CatalogEntry> {
        self.entries
            .get(id.0 as usize)
            .ok_or_else(|| StratumError::Internal(format!("catalog entry {id} missing")))
    }

    fn entry_mut(&mut self, id: CatalogEntryId) -> Result<&mut CatalogEntry> {
        self.entries
            .get_mut(id.0 as usize)
            .ok_or_else(|| StratumError::Internal(format!("catalog entry {id} missing")))
    }

    fn push_entry(&mut self, mut entry: CatalogEntry) -> Result<CatalogEntryId> {
        let id = CatalogEntryId(
            u32::try_from(self.entries.len())
                .map_err(|_| StratumError::Invalid("catalog arena exhausted"))?,
        );
        entry.id = id;
        self.entries.push(entry);
        Ok(id)
    }

    fn key_of(&self, entry: &CatalogEntry) -> Result<NameKey> {
        let slot = self
            .slots
            .get(entry.slot)
            .ok_or_else(|| StratumError::Internal("catalog slot missing".into()))?;
        Ok(NameKey::new(
            slot.namespace,
            entry.object.schema(),
            entry.object.name(),
        ))
    }

    /// Resolves `key` to the live version visible to `snapshot`.
    fn resolve(&self, snapshot: Snapshot, key: &NameKey) -> Option<CatalogEntryId> {
        let mapping = self
            .names
            .get(key)?
            .iter()
            .rev()
            .find(|mapping| snapshot.sees(mapping.timestamp))?;
        if mapping.deleted {
            return None;
        }
        let mut cursor = Some(self.slots.get(mapping.slot)?.head);
        while let Some(id) = cursor {
            let entry = self.entries.get(id.0 as usize)?;
            if snapshot.sees(entry.timestamp) {
                return (!entry.object.is_deleted()).then_some(id);
            }
            cursor = entry.child;
        }
        None
    }

    fn check_name_writable(&self, snapshot: Snapshot, key: &NameKey) -> Result<()> {
        if let Some(mapping) = self.names.get(key).and_then(|m| m.last()) {
            check_writable(snapshot, mapping.timestamp)?;
            if let Some(slot) = self.slots.get(mapping.slot) {
                check_writable(snapshot, self.entry(slot.head)?.timestamp)?;
            }
        }
        Ok(())
    }

    fn push_version(
        &mut self,
        old: CatalogEntryId,
        object: CatalogObject,
        txn: TxnId,
    ) -> Result<CatalogEntryId> {
        let (slot, temporary) = {
            let entry = self.entry(old)?;
            (entry.slot, entry.temporary)
        };
        let id = self.push_entry(CatalogEntry {
            id: CatalogEntryId(0),
            slot,
            object,
            temporary,
            timestamp: txn,
            created_by: txn,
            parent: None,
            child: Some(old),
        })?;
        self.entry_mut(old)?.parent = Some(id);
        self.slots[slot].head = id;
        Ok(id)
    }

    /// Pops the newest binding of `key` when `txn` wrote it for `slot`.
    fn pop_mapping(&mut self, key: &NameKey, slot: usize, txn: TxnId) {
        if let Some(mappings) = self.names.get_mut(key) {
            if mappings
                .last()
                .map_or(false, |m| m.created_by == txn && m.slot == slot)
            {
                mappings.pop();
            }
            if mappings.is_empty() {
                self.names.remove(key);
            }
        }
    }
}

fn check_writable(snapshot: Snapshot, timestamp: u64) -> Result<()> {
    if timestamp == snapshot.transaction_id {
        return Ok(());
    }
    if is_pending_version(timestamp) {
        return Err(StratumError::Conflict(
            "catalog entry written by a concurrent transaction",
        ));
    }
    if timestamp > snapshot.start_time {
        return Err(StratumError::Conflict(
            "catalog entry changed after the transaction started",
        ));
    }
    Ok(())
}

/// Transactional catalog.
#[derive(Debug)]
pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Catalog {
    /// Creates a catalog holding only the default schema.
    pub fn new() -> Arc<Self> {
        let mut state = CatalogState::default();
        let schema = CatalogObject::Schema(SchemaDefinition {
            name: DEFAULT_SCHEMA.to_owned(),
            comment: None,
        });
        state.entries.push(CatalogEntry {
            id: CatalogEntryId(0),
            slot: 0,
            object: schema,
            temporary: false,
            timestamp: 0,
            created_by: 0,
            parent: None,
            child: None,
        });
        state.slots.push(Slot {
            head: CatalogEntryId(0),
            namespace: Namespace::Schema,
        });
        state.names.insert(
            NameKey::new(Namespace::Schema, "", DEFAULT_SCHEMA),
            vec![MappingValue {
                slot: 0,
                deleted: false,
                timestamp: 0,
                created_by: 0,
            }],
        );
        Arc::new(Self {
            state: RwLock::new(state),
        })
    }

    /// Returns a copy of version `id`.
    pub fn entry(&self, id: CatalogEntryId) -> Result<CatalogEntry> {
        self.state.read().entry(id).cloned()
    }

    /// Returns a copy of the version that superseded `id`.
    pub fn parent_of(&self, id: CatalogEntryId) -> Result<CatalogEntry> {
        let state = self.state.read();
        let parent = state
            .entry(id)?
            .parent
            .ok_or_else(|| StratumError::Internal(format!("catalog entry {id} has no parent")))?;
        state.entry(parent).cloned()
    }

    /// Looks up the live object named `name` visible to `snapshot`.
    ///
    /// Schemas are looked up with an empty `schema`.
    pub fn get_entry(
        &self,
        snapshot: Snapshot,
        kind: CatalogType,
        schema: &str,
        name: &str,
    ) -> Result<CatalogEntry> {
        let key = NameKey::new(Namespace::of(kind)?, schema, name);
        let state = self.state.read();
        let id = state.resolve(snapshot, &key).ok_or(StratumError::NotFound)?;
        let entry = state.entry(id)?;
        if entry.catalog_type() != kind {
            return Err(StratumError::NotFound);
        }
        Ok(entry.clone())
    }

    /// Lists the live objects of `schema` visible to `snapshot`, sorted by name.
    pub fn list_entries(&self, snapshot: Snapshot, schema: &str) -> Vec<CatalogEntry> {
        let state = self.state.read();
        let mut out: Vec<CatalogEntry> = state
            .names
            .keys()
            .filter(|key| key.namespace != Namespace::Schema && key.schema == schema)
            .filter_map(|key| state.resolve(snapshot, key))
            .filter_map(|id| state.entry(id).ok().cloned())
            .collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    /// Adds `object` as a pending entry of `txn`.
    pub fn create_entry(
        self: &Arc<Self>,
        txn: &mut Transaction,
        object: CatalogObject,
        temporary: bool,
    ) -> Result<CatalogEntryId> {
        if object.name().is_empty() {
            return Err(StratumError::Invalid("catalog names must not be empty"));
        }
        let namespace = Namespace::of(object.catalog_type())?;
        let snapshot = txn.snapshot();
        let key = NameKey::new(namespace, object.schema(), object.name());
        let sentinel = {
            let mut state = self.state.write();
            if !matches!(namespace, Namespace::Schema | Namespace::Prepared) {
                let schema_key = NameKey::new(Namespace::Schema, "", object.schema());
                if state.resolve(snapshot, &schema_key).is_none() {
                    return Err(StratumError::NotFound);
                }
            }
            state.check_name_writable(snapshot, &key)?;
            if state.resolve(snapshot, &key).is_some() {
                return Err(StratumError::Invalid("catalog entry already exists"));
            }
            let slot = state.slots.len();
            let sentinel = state.push_entry(CatalogEntry {
                id: CatalogEntryId(0),
                slot,
                object: object.tombstone(),
                temporary,
                timestamp: 0,
                created_by: txn.id(),
                parent: None,
                child: None,
            })?;
            state.slots.push(Slot {
                head: sentinel,
                namespace,
            });
            let id = state.push_version(sentinel, object, txn.id())?;
            state.names.entry(key).or_default().push(MappingValue {
                slot,
                deleted: false,
                timestamp: txn.id(),
                created_by: txn.id(),
            });
            trace!(txn = txn.id(), entry = %id, slot, "catalog.create");
            sentinel
        };
        txn.push_undo(UndoRecord::CatalogEntry(CatalogUndo {
            catalog: Arc::downgrade(self),
            entry: sentinel,
            alter_payload: None,
        }));
        Ok(sentinel)
    }

    /// Applies `info` to its target as a pending change of `txn`.
    ///
    /// Returns the id of the new version.
    pub fn alter_entry(self: &Arc<Self>, txn: &mut Transaction, info: &AlterInfo) -> Result<CatalogEntryId> {
        let payload = info.encode()?;
        let snapshot = txn.snapshot();
        let namespace = Namespace::of(info.target_type())?;
        let key = NameKey::new(namespace, info.schema(), info.name());
        let (old, new) = {
            let mut state = self.state.write();
            state.check_name_writable(snapshot, &key)?;
            let old = state.resolve(snapshot, &key).ok_or(StratumError::NotFound)?;
            let (slot, altered) = {
                let entry = state.entry(old)?;
                (entry.slot, info.apply(&entry.object)?)
            };
            let renamed = altered.name() != info.name();
            let new_key = NameKey::new(namespace, altered.schema(), altered.name());
            if renamed {
                state.check_name_writable(snapshot, &new_key)?;
                if state.resolve(snapshot, &new_key).is_some() {
                    return Err(StratumError::Invalid("catalog entry already exists"));
                }
            }
            let new = state.push_version(old, altered, txn.id())?;
            if renamed {
                state.names.entry(new_key).or_default().push(MappingValue {
                    slot,
                    deleted: false,
                    timestamp: txn.id(),
                    created_by: txn.id(),
                });
                state.names.entry(key).or_default().push(MappingValue {
                    slot,
                    deleted: true,
                    timestamp: txn.id(),
                    created_by: txn.id(),
                });
            }
            (old, new)
        };
        trace!(txn = txn.id(), entry = %new, "catalog.alter");
        txn.push_undo(UndoRecord::CatalogEntry(CatalogUndo {
            catalog: Arc::downgrade(self),
            entry: old,
            alter_payload: Some(payload),
        }));
        Ok(new)
    }

    /// Replaces the object named `name` with a pending tombstone of `txn`.
    pub fn drop_entry(
        self: &Arc<Self>,
        txn: &mut Transaction,
        kind: CatalogType,
        schema: &str,
        name: &str,
    ) -> Result<()> {
        let snapshot = txn.snapshot();
        let namespace = Namespace::of(kind)?;
        let key = NameKey::new(namespace, schema, name);
        let old = {
            let mut state = self.state.write();
            state.check_name_writable(snapshot, &key)?;
            let old = state.resolve(snapshot, &key).ok_or(StratumError::NotFound)?;
            let tombstone = {
                let entry = state.entry(old)?;
                if entry.catalog_type() != kind {
                    return Err(StratumError::NotFound);
                }
                entry.object.tombstone()
            };
            if kind == CatalogType::Schema {
                if name == DEFAULT_SCHEMA {
                    return Err(StratumError::Invalid("cannot drop the default schema"));
                }
                let occupied = state
                    .names
                    .keys()
                    .filter(|k| k.namespace != Namespace::Schema && k.schema == name)
                    .any(|k| state.resolve(snapshot, k).is_some());
                if occupied {
                    return Err(StratumError::Invalid("schema is not empty"));
                }
            }
            state.push_version(old, tombstone, txn.id())?;
            old
        };
        trace!(txn = txn.id(), entry = %old, "catalog.drop");
        txn.push_undo(UndoRecord::CatalogEntry(CatalogUndo {
            catalog: Arc::downgrade(self),
            entry: old,
            alter_payload: None,
        }));
        Ok(())
    }

    /// Stamps `timestamp` on version `id` and on the newest binding of its
    /// name, each only when `txn` wrote it.
    pub fn update_timestamp(&self, id: CatalogEntryId, timestamp: CommitId, txn: TxnId) -> Result<()> {
        let mut state = self.state.write();
        let (key, slot) = {
            let entry = state.entry(id)?;
            (state.key_of(entry)?, entry.slot)
        };
        let entry = state.entry_mut(id)?;
        if entry.created_by == txn {
            entry.set_timestamp(timestamp);
        }
        if let Some(mapping) = state.names.get_mut(&key).and_then(|m| m.last_mut()) {
            if mapping.created_by == txn && mapping.slot == slot {
                mapping.timestamp = timestamp;
            }
        }
        Ok(())
    }

    /// Unlinks the pending version `txn` stacked on top of `id`, together
    /// with the name bindings it introduced.
    pub fn undo(&self, id: CatalogEntryId, txn: TxnId) -> Result<()> {
        let mut state = self.state.write();
        let entry = state.entry(id)?.clone();
        let parent_id = entry
            .parent
            .ok_or_else(|| StratumError::Internal(format!("catalog entry {id} has no parent")))?;
        let parent = state.entry(parent_id)?.clone();
        if parent.created_by != txn || parent.parent.is_some() {
            return Err(StratumError::Internal(format!(
                "catalog entry {parent_id} is not the pending head of txn {txn}"
            )));
        }
        let parent_key = state.key_of(&parent)?;
        let entry_key = state.key_of(&entry)?;
        if entry.is_sentinel() || parent_key != entry_key {
            state.pop_mapping(&parent_key, entry.slot, txn);
        }
        if parent_key != entry_key {
            state.pop_mapping(&entry_key, entry.slot, txn);
        }
        state.entry_mut(id)?.parent = None;
        state.entry_mut(parent_id)?.child = None;
        state.slots[entry.slot].head = id;
        trace!(txn, entry = %id, "catalog.undo");
        Ok(())
    }
}
