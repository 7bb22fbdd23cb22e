//! Alter descriptions and their framed serialization.

use serde::{Deserialize, Serialize};

use super::entry::{CatalogObject, CatalogType, ColumnDefinition};
use crate::primitives::bytes::frame;
use crate::types::{Result, StratumError};

/// A change applied to an existing catalog object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlterInfo {
    /// Gives a table a new name.
    RenameTable {
        /// Owning schema.
        schema: String,
        /// Current name.
        name: String,
        /// Name after the change.
        new_name: String,
    },
    /// Appends a column to a table.
    AddColumn {
        /// Owning schema.
        schema: String,
        /// Table name.
        table: String,
        /// Column to add.
        column: ColumnDefinition,
    },
    /// Removes a column from a table.
    RemoveColumn {
        /// Owning schema.
        schema: String,
        /// Table name.
        table: String,
        /// Column to remove.
        column: String,
    },
    /// Renames a table column.
    RenameColumn {
        /// Owning schema.
        schema: String,
        /// Table name.
        table: String,
        /// Current column name.
        old_name: String,
        /// Column name after the change.
        new_name: String,
    },
    /// Gives a view a new name.
    RenameView {
        /// Owning schema.
        schema: String,
        /// Current name.
        name: String,
        /// Name after the change.
        new_name: String,
    },
    /// Sets or clears a schema comment.
    CommentOnSchema {
        /// Schema name.
        schema: String,
        /// New comment.
        comment: Option<String>,
    },
}

impl AlterInfo {
    /// Schema holding the target; empty for schema alters.
    pub fn schema(&self) -> &str {
        match self {
            AlterInfo::CommentOnSchema { .. } => "",
            AlterInfo::RenameTable { schema, .. }
            | AlterInfo::AddColumn { schema, .. }
            | AlterInfo::RemoveColumn { schema, .. }
            | AlterInfo::RenameColumn { schema, .. }
            | AlterInfo::RenameView { schema, .. } => schema,
        }
    }

    /// Name of the target object.
    pub fn name(&self) -> &str {
        match self {
            AlterInfo::RenameTable { name, .. } | AlterInfo::RenameView { name, .. } => name,
            AlterInfo::AddColumn { table, .. }
            | AlterInfo::RemoveColumn { table, .. }
            | AlterInfo::RenameColumn { table, .. } => table,
            AlterInfo::CommentOnSchema { schema, .. } => schema,
        }
    }

    /// Kind of object the alter applies to.
    pub fn target_type(&self) -> CatalogType {
        match self {
            AlterInfo::RenameTable { .. }
            | AlterInfo::AddColumn { .. }
            | AlterInfo::RemoveColumn { .. }
            | AlterInfo::RenameColumn { .. } => CatalogType::Table,
            AlterInfo::RenameView { .. } => CatalogType::View,
            AlterInfo::CommentOnSchema { .. } => CatalogType::Schema,
        }
    }

    /// Produces the altered copy of `object`.
    pub fn apply(&self, object: &CatalogObject) -> Result<CatalogObject> {
        if object.catalog_type() != self.target_type() {
            return Err(StratumError::Invalid("alter does not match the object kind"));
        }
        let mut altered = object.clone();
        match (self, &mut altered) {
            (AlterInfo::RenameTable { new_name, .. }, CatalogObject::Table(def)) => {
                def.name = new_name.clone();
            }
            (AlterInfo::AddColumn { column, .. }, CatalogObject::Table(def)) => {
                if def.column_index(&column.name).is_some() {
                    return Err(StratumError::Invalid("column already exists"));
                }
                def.columns.push(column.clone());
            }
            (AlterInfo::RemoveColumn { column, .. }, CatalogObject::Table(def)) => {
                let idx = def
                    .column_index(column)
                    .ok_or(StratumError::Invalid("column does not exist"))?;
                if def.columns.len() == 1 {
                    return Err(StratumError::Invalid("cannot remove the last column"));
                }
                def.columns.remove(idx);
            }
            (
                AlterInfo::RenameColumn {
                    old_name, new_name, ..
                },
                CatalogObject::Table(def),
            ) => {
                if def.column_index(new_name).is_some() {
                    return Err(StratumError::Invalid("column already exists"));
                }
                let idx = def
                    .column_index(old_name)
                    .ok_or(StratumError::Invalid("column does not exist"))?;
                def.columns[idx].name = new_name.clone();
            }
            (AlterInfo::RenameView { new_name, .. }, CatalogObject::View(def)) => {
                def.name = new_name.clone();
            }
            (AlterInfo::CommentOnSchema { comment, .. }, CatalogObject::Schema(def)) => {
                def.comment = comment.clone();
            }
            _ => return Err(StratumError::Invalid("alter does not match the object kind")),
        }
        Ok(altered)
    }

    /// Serializes the alter as a length-prefixed blob.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(self)?;
        let mut out = Vec::with_capacity(frame::PREFIX_LEN + body.len());
        frame::put(&mut out, &body);
        Ok(out)
    }

    /// Reads an alter back from a blob produced by [`AlterInfo::encode`].
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (body, consumed) = frame::split(payload)?;
        if consumed != payload.len() {
            return Err(StratumError::Corruption("trailing bytes after alter payload"));
        }
        Ok(serde_json::from_slice(body)?)
    }
}
