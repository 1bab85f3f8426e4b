//! Copy-on-write registry of columns and indexes.
//!
//! Columns and indexes share one namespace. A schema is never mutated in
//! place: `with_column`/`with_index` return a new schema, and the
//! collection swaps the `Arc` it hands out to transactions. Slots are
//! append-only, so a slot taken from an older schema stays valid.

use std::collections::HashMap;
use std::sync::Arc;

use crate::column::{Column, ColumnKind};
use crate::error::{Error, Result};
use crate::index::Index;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Column(usize),
    Index(usize),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Schema {
    columns: Vec<Arc<Column>>,
    indexes: Vec<Arc<Index>>,
    names: HashMap<String, Slot>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }

    pub fn indexes(&self) -> &[Arc<Index>] {
        &self.indexes
    }

    pub fn lookup(&self, name: &str) -> Option<Slot> {
        self.names.get(name).copied()
    }

    pub fn column(&self, name: &str) -> Option<&Arc<Column>> {
        match self.lookup(name)? {
            Slot::Column(slot) => self.columns.get(slot),
            Slot::Index(_) => None,
        }
    }

    pub fn index(&self, name: &str) -> Option<&Arc<Index>> {
        match self.lookup(name)? {
            Slot::Index(slot) => self.indexes.get(slot),
            Slot::Column(_) => None,
        }
    }

    /// Indexes whose source is the column in `source_slot`.
    pub fn indexes_on(&self, source_slot: usize) -> impl Iterator<Item = &Arc<Index>> {
        self.indexes
            .iter()
            .filter(move |index| index.source_slot() == source_slot)
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if self.names.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn with_column(&self, name: &str, kind: ColumnKind) -> Result<Self> {
        self.ensure_unique(name)?;
        let slot = self.columns.len();
        self.with_column_def(Column::new(name, kind, slot))
    }

    /// Register a prebuilt column (used when restoring a snapshot).
    pub fn with_column_def(&self, column: Column) -> Result<Self> {
        self.ensure_unique(column.name())?;
        if column.slot() != self.columns.len() {
            return Err(Error::CorruptSnapshot(format!(
                "Column '{}' has slot {}, expected {}",
                column.name(),
                column.slot(),
                self.columns.len()
            )));
        }
        let mut next = self.clone();
        next.names
            .insert(column.name().to_string(), Slot::Column(column.slot()));
        next.columns.push(Arc::new(column));
        Ok(next)
    }

    /// Register a new index. Its slot must be the next free one.
    pub fn with_index(&self, index: Index) -> Result<Self> {
        self.ensure_unique(index.name())?;
        debug_assert_eq!(index.slot(), self.indexes.len());
        let mut next = self.clone();
        next.names
            .insert(index.name().to_string(), Slot::Index(index.slot()));
        next.indexes.push(Arc::new(index));
        Ok(next)
    }

    /// Replace the index occupying `index.slot()` (used to attach a
    /// predicate to a restored index).
    pub fn replacing_index(&self, index: Index) -> Self {
        let mut next = self.clone();
        let slot = index.slot();
        next.indexes[slot] = Arc::new(index);
        next
    }

    /// Columns sorted by name.
    pub fn sorted_columns(&self) -> Vec<&Arc<Column>> {
        let mut columns: Vec<&Arc<Column>> = self.columns.iter().collect();
        columns.sort_by(|a, b| a.name().cmp(b.name()));
        columns
    }

    /// Indexes sorted by name.
    pub fn sorted_indexes(&self) -> Vec<&Arc<Index>> {
        let mut indexes: Vec<&Arc<Index>> = self.indexes.iter().collect();
        indexes.sort_by(|a, b| a.name().cmp(b.name()));
        indexes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_with_column_is_copy_on_write() {
        let empty = Schema::new();
        let one = empty.with_column("age", ColumnKind::Float64).unwrap();
        assert!(empty.column("age").is_none());
        assert_eq!(one.column("age").unwrap().slot(), 0);
        assert_eq!(one.lookup("age"), Some(Slot::Column(0)));
    }

    #[test]
    fn test_shared_namespace() {
        let schema = Schema::new()
            .with_column("race", ColumnKind::Enum)
            .unwrap();
        let race = schema.column("race").unwrap().clone();
        let schema = schema
            .with_index(Index::new("human", &race, 0, Some(Arc::new(|v: &Value| v == "human"))))
            .unwrap();

        let err = schema.with_column("human", ColumnKind::Bool).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_NAME");
        let err = schema
            .with_index(Index::new("race", &race, 1, None))
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_NAME");

        assert!(schema.index("human").is_some());
        assert!(schema.column("human").is_none());
        assert_eq!(schema.indexes_on(0).count(), 1);
        assert_eq!(schema.indexes_on(1).count(), 0);
    }

    #[test]
    fn test_sorted_views() {
        let schema = Schema::new()
            .with_column("zeta", ColumnKind::Bool)
            .unwrap()
            .with_column("alpha", ColumnKind::Float64)
            .unwrap();
        let names: Vec<&str> = schema.sorted_columns().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_replacing_index_keeps_slot() {
        let schema = Schema::new()
            .with_column("class", ColumnKind::Enum)
            .unwrap();
        let class = schema.column("class").unwrap().clone();
        let schema = schema.with_index(Index::new("mage", &class, 0, None)).unwrap();
        let attached = schema
            .index("mage")
            .unwrap()
            .attach(Arc::new(|v: &Value| v == "mage"));
        let schema = schema.replacing_index(attached);
        assert!(schema.index("mage").unwrap().is_attached());
        assert_eq!(schema.lookup("mage"), Some(Slot::Index(0)));
    }
}
