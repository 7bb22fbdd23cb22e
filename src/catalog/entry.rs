use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{CommitId, LogicalType, TxnId};

/// Index of a catalog entry version in the catalog arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct CatalogEntryId(pub(crate) u32);

impl fmt::Display for CatalogEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of object a catalog entry describes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CatalogType {
    /// Base table.
    Table,
    /// Schema namespace.
    Schema,
    /// Named query.
    View,
    /// Number generator.
    Sequence,
    /// Parameterized expression.
    Macro,
    /// Secondary index; rebuilt from table data.
    Index,
    /// Session-scoped prepared statement.
    PreparedStatement,
    /// Scalar function.
    ScalarFunction,
    /// Aggregate function.
    AggregateFunction,
    /// Table function.
    TableFunction,
    /// COPY handler.
    CopyFunction,
    /// Pragma handler.
    PragmaFunction,
    /// String collation.
    Collation,
    /// Tombstone left by a drop, or the empty slot beneath a create.
    Deleted,
}

impl CatalogType {
    /// Returns true for kinds whose changes never reach the log.
    pub fn is_derived(self) -> bool {
        matches!(
            self,
            CatalogType::Index
                | CatalogType::ScalarFunction
                | CatalogType::AggregateFunction
                | CatalogType::TableFunction
                | CatalogType::CopyFunction
                | CatalogType::PragmaFunction
                | CatalogType::Collation
        )
    }
}

/// Function families registered in the catalog.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    /// Row-at-a-time function.
    Scalar,
    /// Grouping function.
    Aggregate,
    /// Function producing a relation.
    Table,
    /// COPY handler.
    Copy,
    /// Pragma handler.
    Pragma,
}

/// Column of a table definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name, unique within the table.
    pub name: String,
    /// Stored type.
    pub logical_type: LogicalType,
}

impl ColumnDefinition {
    /// Creates a column definition.
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
        }
    }
}

/// Schema of a base table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Owning schema.
    pub schema: String,
    /// Table name.
    pub name: String,
    /// Columns in storage order.
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    /// Creates a table definition.
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<ColumnDefinition>,
    ) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns,
        }
    }

    /// Position of column `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Stored types in column order.
    pub fn types(&self) -> Vec<LogicalType> {
        self.columns.iter().map(|column| column.logical_type).collect()
    }
}

/// A schema namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Schema name.
    pub name: String,
    /// Free-form comment.
    pub comment: Option<String>,
}

/// A named query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    /// Owning schema.
    pub schema: String,
    /// View name.
    pub name: String,
    /// Query text.
    pub query: String,
    /// Output column aliases.
    pub aliases: Vec<String>,
}

/// A number generator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceDefinition {
    /// Owning schema.
    pub schema: String,
    /// Sequence name.
    pub name: String,
    /// First value handed out.
    pub start: i64,
    /// Step between values.
    pub increment: i64,
}

/// A parameterized expression.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroDefinition {
    /// Owning schema.
    pub schema: String,
    /// Macro name.
    pub name: String,
    /// Parameter names.
    pub parameters: Vec<String>,
    /// Expression text.
    pub body: String,
}

/// Any object the catalog can hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogObject {
    /// Base table.
    Table(TableDefinition),
    /// Schema namespace.
    Schema(SchemaDefinition),
    /// Named query.
    View(ViewDefinition),
    /// Number generator.
    Sequence(SequenceDefinition),
    /// Parameterized expression.
    Macro(MacroDefinition),
    /// Secondary index on `table`.
    Index {
        /// Owning schema.
        schema: String,
        /// Index name.
        name: String,
        /// Indexed table.
        table: String,
    },
    /// Prepared statement.
    PreparedStatement {
        /// Statement name.
        name: String,
    },
    /// Registered function.
    Function {
        /// Owning schema.
        schema: String,
        /// Function name.
        name: String,
        /// Function family.
        kind: FunctionKind,
    },
    /// String collation.
    Collation {
        /// Owning schema.
        schema: String,
        /// Collation name.
        name: String,
    },
    /// Tombstone for `(schema, name)`.
    Deleted {
        /// Schema of the removed object; empty for schemas.
        schema: String,
        /// Name of the removed object.
        name: String,
    },
}

impl CatalogObject {
    /// Kind of the object.
    pub fn catalog_type(&self) -> CatalogType {
        match self {
            CatalogObject::Table(_) => CatalogType::Table,
            CatalogObject::Schema(_) => CatalogType::Schema,
            CatalogObject::View(_) => CatalogType::View,
            CatalogObject::Sequence(_) => CatalogType::Sequence,
            CatalogObject::Macro(_) => CatalogType::Macro,
            CatalogObject::Index { .. } => CatalogType::Index,
            CatalogObject::PreparedStatement { .. } => CatalogType::PreparedStatement,
            CatalogObject::Function { kind, .. } => match kind {
                FunctionKind::Scalar => CatalogType::ScalarFunction,
                FunctionKind::Aggregate => CatalogType::AggregateFunction,
                FunctionKind::Table => CatalogType::TableFunction,
                FunctionKind::Copy => CatalogType::CopyFunction,
                FunctionKind::Pragma => CatalogType::PragmaFunction,
            },
            CatalogObject::Collation { .. } => CatalogType::Collation,
            CatalogObject::Deleted { .. } => CatalogType::Deleted,
        }
    }

    /// Owning schema; empty for schemas and prepared statements.
    pub fn schema(&self) -> &str {
        match self {
            CatalogObject::Table(def) => &def.schema,
            CatalogObject::View(def) => &def.schema,
            CatalogObject::Sequence(def) => &def.schema,
            CatalogObject::Macro(def) => &def.schema,
            CatalogObject::Index { schema, .. }
            | CatalogObject::Function { schema, .. }
            | CatalogObject::Collation { schema, .. }
            | CatalogObject::Deleted { schema, .. } => schema,
            CatalogObject::Schema(_) | CatalogObject::PreparedStatement { .. } => "",
        }
    }

    /// Object name.
    pub fn name(&self) -> &str {
        match self {
            CatalogObject::Table(def) => &def.name,
            CatalogObject::Schema(def) => &def.name,
            CatalogObject::View(def) => &def.name,
            CatalogObject::Sequence(def) => &def.name,
            CatalogObject::Macro(def) => &def.name,
            CatalogObject::Index { name, .. }
            | CatalogObject::PreparedStatement { name }
            | CatalogObject::Function { name, .. }
            | CatalogObject::Collation { name, .. }
            | CatalogObject::Deleted { name, .. } => name,
        }
    }

    /// Tombstone for this object's name.
    pub fn tombstone(&self) -> CatalogObject {
        CatalogObject::Deleted {
            schema: self.schema().to_owned(),
            name: self.name().to_owned(),
        }
    }

    /// Returns true for tombstones.
    pub fn is_deleted(&self) -> bool {
        matches!(self, CatalogObject::Deleted { .. })
    }
}

/// One version of a catalog object.
///
/// `parent` points at the next newer version and `child` at the older one.
#[derive(Clone, Debug)]
pub struct CatalogEntry {
    pub(crate) id: CatalogEntryId,
    pub(crate) slot: usize,
    pub(crate) object: CatalogObject,
    pub(crate) temporary: bool,
    pub(crate) timestamp: u64,
    pub(crate) created_by: TxnId,
    pub(crate) parent: Option<CatalogEntryId>,
    pub(crate) child: Option<CatalogEntryId>,
}

impl CatalogEntry {
    /// Arena index of this version.
    pub fn id(&self) -> CatalogEntryId {
        self.id
    }

    /// The object as of this version.
    pub fn object(&self) -> &CatalogObject {
        &self.object
    }

    /// Kind of the object.
    pub fn catalog_type(&self) -> CatalogType {
        self.object.catalog_type()
    }

    /// Object name.
    pub fn name(&self) -> &str {
        self.object.name()
    }

    /// Returns true for session-local objects that are never logged.
    pub fn temporary(&self) -> bool {
        self.temporary
    }

    /// Commit id of the version, or the writer's transaction id while pending.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Transaction that wrote the version.
    pub fn created_by(&self) -> TxnId {
        self.created_by
    }

    /// Next newer version.
    pub fn parent(&self) -> Option<CatalogEntryId> {
        self.parent
    }

    /// Next older version.
    pub fn child(&self) -> Option<CatalogEntryId> {
        self.child
    }

    /// Returns true for the empty tombstone a create is stacked on.
    pub(crate) fn is_sentinel(&self) -> bool {
        self.object.is_deleted() && self.child.is_none() && self.timestamp == 0
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: CommitId) {
        self.timestamp = timestamp;
    }
}
