#![forbid(unsafe_code)]

//! Sink interface the commit pass writes through, plus an in-memory sink.

use std::fmt;

use tracing::trace;

use crate::catalog::{
    AlterInfo, MacroDefinition, SchemaDefinition, SequenceDefinition, TableDefinition,
    ViewDefinition,
};
use crate::storage::DataChunk;
use crate::types::Result;

/// Consumer of the logical changes made durable by a commit.
///
/// Calls arrive in commit order while the commit lock is held. `write_set_table`
/// names the table the following insert, delete and update records belong to.
pub trait WriteAheadLog {
    /// Selects the table subsequent row records apply to.
    fn write_set_table(&mut self, schema: &str, table: &str) -> Result<()>;
    /// Logs a new table.
    fn write_create_table(&mut self, table: &TableDefinition) -> Result<()>;
    /// Logs an alter of an existing object.
    fn write_alter(&mut self, info: &AlterInfo) -> Result<()>;
    /// Logs a new schema.
    fn write_create_schema(&mut self, schema: &SchemaDefinition) -> Result<()>;
    /// Logs a new view.
    fn write_create_view(&mut self, view: &ViewDefinition) -> Result<()>;
    /// Logs a new sequence.
    fn write_create_sequence(&mut self, sequence: &SequenceDefinition) -> Result<()>;
    /// Logs a new macro.
    fn write_create_macro(&mut self, definition: &MacroDefinition) -> Result<()>;
    /// Logs a dropped table.
    fn write_drop_table(&mut self, table: &TableDefinition) -> Result<()>;
    /// Logs a dropped schema.
    fn write_drop_schema(&mut self, schema: &SchemaDefinition) -> Result<()>;
    /// Logs a dropped view.
    fn write_drop_view(&mut self, view: &ViewDefinition) -> Result<()>;
    /// Logs a dropped sequence.
    fn write_drop_sequence(&mut self, sequence: &SequenceDefinition) -> Result<()>;
    /// Logs a dropped macro.
    fn write_drop_macro(&mut self, definition: &MacroDefinition) -> Result<()>;
    /// Logs appended rows, one column per vector.
    fn write_insert(&mut self, chunk: &DataChunk) -> Result<()>;
    /// Logs deleted rows as a single row-id column.
    fn write_delete(&mut self, row_ids: &DataChunk) -> Result<()>;
    /// Logs the pre-update values of one column followed by their row ids.
    fn write_update(&mut self, chunk: &DataChunk, column_index: usize) -> Result<()>;
    /// Makes everything written so far durable.
    fn flush(&mut self) -> Result<()>;
}

/// One record captured by [`MemoryWal`].
#[derive(Clone, Debug, PartialEq)]
pub enum WalRecord {
    /// Current table marker.
    SetTable {
        /// Schema of the table.
        schema: String,
        /// Table name.
        table: String,
    },
    /// Table creation.
    CreateTable(TableDefinition),
    /// Alter of an existing object.
    Alter(AlterInfo),
    /// Schema creation.
    CreateSchema(SchemaDefinition),
    /// View creation.
    CreateView(ViewDefinition),
    /// Sequence creation.
    CreateSequence(SequenceDefinition),
    /// Macro creation.
    CreateMacro(MacroDefinition),
    /// Table removal.
    DropTable(TableDefinition),
    /// Schema removal.
    DropSchema(SchemaDefinition),
    /// View removal.
    DropView(ViewDefinition),
    /// Sequence removal.
    DropSequence(SequenceDefinition),
    /// Macro removal.
    DropMacro(MacroDefinition),
    /// Appended rows.
    Insert(DataChunk),
    /// Deleted row ids.
    Delete(DataChunk),
    /// Pre-update values plus row ids of one column.
    Update {
        /// Values then row ids.
        chunk: DataChunk,
        /// Updated column.
        column_index: usize,
    },
}

impl WalRecord {
    /// Short tag naming the record kind.
    pub fn kind(&self) -> &'static str {
        match self {
            WalRecord::SetTable { .. } => "set_table",
            WalRecord::CreateTable(_) => "create_table",
            WalRecord::Alter(_) => "alter",
            WalRecord::CreateSchema(_) => "create_schema",
            WalRecord::CreateView(_) => "create_view",
            WalRecord::CreateSequence(_) => "create_sequence",
            WalRecord::CreateMacro(_) => "create_macro",
            WalRecord::DropTable(_) => "drop_table",
            WalRecord::DropSchema(_) => "drop_schema",
            WalRecord::DropView(_) => "drop_view",
            WalRecord::DropSequence(_) => "drop_sequence",
            WalRecord::DropMacro(_) => "drop_macro",
            WalRecord::Insert(_) => "insert",
            WalRecord::Delete(_) => "delete",
            WalRecord::Update { .. } => "update",
        }
    }
}

impl fmt::Display for WalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalRecord::SetTable { schema, table } => write!(f, "set_table {schema}.{table}"),
            WalRecord::Insert(chunk) | WalRecord::Delete(chunk) => {
                write!(f, "{} rows={}", self.kind(), chunk.size())
            }
            WalRecord::Update {
                chunk,
                column_index,
            } => write!(f, "update column={column_index} rows={}", chunk.size()),
            other => f.write_str(other.kind()),
        }
    }
}

/// Statistics tracking log activity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalStats {
    /// Records appended to the log.
    pub records_appended: u64,
    /// Rows carried by insert, delete and update records.
    pub rows_logged: u64,
    /// Number of flushes performed.
    pub flushes: u64,
}

/// Log sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryWal {
    records: Vec<WalRecord>,
    flushed: usize,
    stats: WalStats,
}

impl MemoryWal {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record written, flushed or not.
    pub fn records(&self) -> &[WalRecord] {
        &self.records
    }

    /// Records covered by the most recent flush.
    pub fn committed_records(&self) -> &[WalRecord] {
        &self.records[..self.flushed]
    }

    /// Activity counters.
    pub fn stats(&self) -> WalStats {
        self.stats.clone()
    }

    /// Discards records written after the last flush.
    pub fn discard_unflushed(&mut self) -> usize {
        let dropped = self.records.len() - self.flushed;
        self.records.truncate(self.flushed);
        dropped
    }

    fn push(&mut self, record: WalRecord) -> Result<()> {
        let rows = match &record {
            WalRecord::Insert(chunk) | WalRecord::Delete(chunk) => chunk.size(),
            WalRecord::Update { chunk, .. } => chunk.size(),
            _ => 0,
        };
        trace!(kind = record.kind(), rows, "wal.append");
        self.stats.records_appended += 1;
        self.stats.rows_logged += rows as u64;
        self.records.push(record);
        Ok(())
    }
}

impl WriteAheadLog for MemoryWal {
    fn write_set_table(&mut self, schema: &str, table: &str) -> Result<()> {
        self.push(WalRecord::SetTable {
            schema: schema.to_owned(),
            table: table.to_owned(),
        })
    }

    fn write_create_table(&mut self, table: &TableDefinition) -> Result<()> {
        self.push(WalRecord::CreateTable(table.clone()))
    }

    fn write_alter(&mut self, info: &AlterInfo) -> Result<()> {
        self.push(WalRecord::Alter(info.clone()))
    }

    fn write_create_schema(&mut self, schema: &SchemaDefinition) -> Result<()> {
        self.push(WalRecord::CreateSchema(schema.clone()))
    }

    fn write_create_view(&mut self, view: &ViewDefinition) -> Result<()> {
        self.push(WalRecord::CreateView(view.clone()))
    }

    fn write_create_sequence(&mut self, sequence: &SequenceDefinition) -> Result<()> {
        self.push(WalRecord::CreateSequence(sequence.clone()))
    }

    fn write_create_macro(&mut self, definition: &MacroDefinition) -> Result<()> {
        self.push(WalRecord::CreateMacro(definition.clone()))
    }

    fn write_drop_table(&mut self, table: &TableDefinition) -> Result<()> {
        self.push(WalRecord::DropTable(table.clone()))
    }

    fn write_drop_schema(&mut self, schema: &SchemaDefinition) -> Result<()> {
        self.push(WalRecord::DropSchema(schema.clone()))
    }

    fn write_drop_view(&mut self, view: &ViewDefinition) -> Result<()> {
        self.push(WalRecord::DropView(view.clone()))
    }

    fn write_drop_sequence(&mut self, sequence: &SequenceDefinition) -> Result<()> {
        self.push(WalRecord::DropSequence(sequence.clone()))
    }

    fn write_drop_macro(&mut self, definition: &MacroDefinition) -> Result<()> {
        self.push(WalRecord::DropMacro(definition.clone()))
    }

    fn write_insert(&mut self, chunk: &DataChunk) -> Result<()> {
        self.push(WalRecord::Insert(chunk.clone()))
    }

    fn write_delete(&mut self, row_ids: &DataChunk) -> Result<()> {
        self.push(WalRecord::Delete(row_ids.clone()))
    }

    fn write_update(&mut self, chunk: &DataChunk, column_index: usize) -> Result<()> {
        self.push(WalRecord::Update {
            chunk: chunk.clone(),
            column_index,
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.flushed = self.records.len();
        self.stats.flushes += 1;
        Ok(())
    }
}
