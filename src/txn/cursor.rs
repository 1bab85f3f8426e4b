//! Row cursor for update passes and typed column readers.

use std::sync::Arc;

use crate::chunk::Chunk;
use crate::collection::read_lock;
use crate::column::Column;
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::txn::Transaction;
use crate::value::Value;

// ── Cursor ──────────────────────────────────────────────────────────

/// Handle on one row during [`Transaction::range_column`]. The owning
/// chunk is write-locked for as long as the cursor lives.
pub struct Cursor<'c> {
    chunk: &'c mut Chunk,
    schema: &'c Schema,
    column: &'c Column,
    row: usize,
    offset: usize,
}

impl<'c> Cursor<'c> {
    pub(crate) fn new(
        chunk: &'c mut Chunk,
        schema: &'c Schema,
        column: &'c Column,
        row: usize,
        offset: usize,
    ) -> Self {
        Self {
            chunk,
            schema,
            column,
            row,
            offset,
        }
    }

    /// Collection-wide row index.
    pub fn row(&self) -> usize {
        self.row
    }

    /// Current value of the cursor's column.
    pub fn value(&self) -> Option<Value> {
        self.chunk.value(self.column, self.offset).ok().flatten()
    }

    pub fn float64(&self) -> Option<f64> {
        self.chunk
            .segment(self.column.slot())
            .and_then(|segment| segment.float_at(self.offset))
    }

    pub fn string(&self) -> Option<String> {
        match self.value()? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn bool(&self) -> Option<bool> {
        self.value()?.as_bool()
    }

    /// Value of another column on the same row.
    pub fn value_of(&self, column: &str) -> Result<Option<Value>> {
        let column = self
            .schema
            .column(column)
            .ok_or_else(|| Error::UnknownColumn(column.to_string()))?;
        self.chunk.value(column, self.offset)
    }

    /// Overwrite the cursor's column for this row. `Value::Null` clears
    /// it. Dependent indexes are re-evaluated before this returns.
    pub fn set(&mut self, value: impl Into<Value>) -> Result<()> {
        let column = self.column;
        self.write(column, value.into())
    }

    /// Same as [`Cursor::set`].
    pub fn update(&mut self, value: impl Into<Value>) -> Result<()> {
        self.set(value)
    }

    /// Overwrite a different column of the same row.
    pub fn update_column(&mut self, column: &str, value: impl Into<Value>) -> Result<()> {
        let schema = self.schema;
        let column = schema
            .column(column)
            .ok_or_else(|| Error::UnknownColumn(column.to_string()))?;
        self.write(column, value.into())
    }

    fn write(&mut self, column: &Column, value: Value) -> Result<()> {
        let cell = column.encode(&value)?;
        self.chunk.update(self.offset, column, cell, self.schema)
    }
}

// ── Readers ─────────────────────────────────────────────────────────

/// Typed access to a float64 column over a transaction's chunks.
pub struct Float64Reader<'t, 'a> {
    txn: &'t Transaction<'a>,
    column: Arc<Column>,
}

impl<'t, 'a> Float64Reader<'t, 'a> {
    pub(crate) fn new(txn: &'t Transaction<'a>, column: Arc<Column>) -> Self {
        Self { txn, column }
    }

    /// Value at `row`, `None` if absent or the row is not live.
    pub fn get(&self, row: usize) -> Option<f64> {
        let chunk_size = self.txn.chunk_size();
        let chunk = read_lock(self.txn.chunk(row / chunk_size)?);
        let offset = row % chunk_size;
        if !chunk.fill().contains(offset) {
            return None;
        }
        chunk.segment(self.column.slot())?.float_at(offset)
    }

    /// Sum over the transaction's current selection. Absent values are
    /// skipped.
    pub fn sum(&self) -> f64 {
        let mut total = 0.0;
        for (id, bits) in self.txn.working().iter().enumerate() {
            let Some(handle) = self.txn.chunk(id) else {
                continue;
            };
            let chunk = read_lock(handle);
            if let Some(segment) = chunk.segment(self.column.slot()) {
                bits.range(|offset| total += segment.float_at(offset).unwrap_or(0.0));
            }
        }
        total
    }
}

/// Typed access to a string column (enum or any) over a transaction's
/// chunks.
pub struct StringReader<'t, 'a> {
    txn: &'t Transaction<'a>,
    column: Arc<Column>,
}

impl std::fmt::Debug for StringReader<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringReader")
            .field("column", &self.column)
            .finish_non_exhaustive()
    }
}

impl<'t, 'a> StringReader<'t, 'a> {
    pub(crate) fn new(txn: &'t Transaction<'a>, column: Arc<Column>) -> Self {
        Self { txn, column }
    }

    pub fn get(&self, row: usize) -> Option<String> {
        let chunk_size = self.txn.chunk_size();
        let chunk = read_lock(self.txn.chunk(row / chunk_size)?);
        match chunk.value(&self.column, row % chunk_size).ok()?? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}
