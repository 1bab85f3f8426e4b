//! Fixed-size horizontal partition of a collection.
//!
//! Chunk `c` owns rows `[c * chunk_size, (c + 1) * chunk_size)`: one
//! segment per column, one bitmap per index and a fill bitmap of live
//! rows, all addressed by chunk-local offset. A chunk is the unit of
//! locking: the collection keeps each one behind its own `RwLock`.
//!
//! Segments and index bitmaps are indexed by schema slot. A chunk created
//! under an older schema catches up through [`Chunk::sync`] before any
//! write.

use crate::bitmap::Bitmap;
use crate::column::{Cell, Column, ColumnSegment};
use crate::error::{Error, Result};
use crate::schema::{Schema, Slot};
use crate::value::Value;

/// Smallest allocation for a chunk that is not pre-sized.
const MIN_CHUNK_CAPACITY: usize = 64;

#[derive(Debug)]
pub(crate) struct Chunk {
    id: usize,
    chunk_size: usize,
    capacity: usize,
    fill: Bitmap,
    columns: Vec<ColumnSegment>,
    indexes: Vec<Bitmap>,
}

impl Chunk {
    pub fn new(id: usize, chunk_size: usize, capacity: usize, schema: &Schema) -> Self {
        let capacity = capacity.clamp(MIN_CHUNK_CAPACITY.min(chunk_size), chunk_size);
        let mut chunk = Self {
            id,
            chunk_size,
            capacity,
            fill: Bitmap::with_capacity(capacity),
            columns: Vec::new(),
            indexes: Vec::new(),
        };
        chunk.sync(schema);
        chunk
    }

    /// Rebuild a chunk from restored parts, sized by the largest of them.
    pub fn restore(
        id: usize,
        chunk_size: usize,
        mut fill: Bitmap,
        mut columns: Vec<ColumnSegment>,
        mut indexes: Vec<Bitmap>,
    ) -> Self {
        let capacity = columns
            .iter()
            .map(ColumnSegment::capacity)
            .chain(indexes.iter().map(Bitmap::capacity))
            .fold(fill.capacity(), usize::max)
            .next_power_of_two()
            .clamp(MIN_CHUNK_CAPACITY.min(chunk_size), chunk_size);
        for segment in &mut columns {
            segment.grow(capacity);
        }
        for bitmap in &mut indexes {
            bitmap.grow(capacity);
        }
        fill.grow(capacity);
        Self {
            id,
            chunk_size,
            capacity,
            fill,
            columns,
            indexes,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live rows.
    pub fn fill(&self) -> &Bitmap {
        &self.fill
    }

    pub fn segment(&self, slot: usize) -> Option<&ColumnSegment> {
        self.columns.get(slot)
    }

    pub fn index(&self, slot: usize) -> Option<&Bitmap> {
        self.indexes.get(slot)
    }

    pub fn set_index(&mut self, slot: usize, bitmap: Bitmap) {
        if slot >= self.indexes.len() {
            self.indexes.resize_with(slot + 1, Bitmap::new);
        }
        self.indexes[slot] = bitmap;
    }

    /// Add empty segments and bitmaps for columns/indexes registered after
    /// this chunk was created.
    pub fn sync(&mut self, schema: &Schema) {
        for column in &schema.columns()[self.columns.len().min(schema.columns().len())..] {
            self.columns
                .push(ColumnSegment::new(column.kind(), self.capacity));
        }
        if self.indexes.len() < schema.indexes().len() {
            let capacity = self.capacity;
            self.indexes
                .resize_with(schema.indexes().len(), || Bitmap::with_capacity(capacity));
        }
    }

    /// Grow so that `offset` is addressable, doubling up to the chunk size.
    pub fn grow_for(&mut self, offset: usize) -> Result<()> {
        if offset < self.capacity {
            return Ok(());
        }
        if offset >= self.chunk_size {
            return Err(Error::OutOfRange {
                row: offset,
                capacity: self.chunk_size,
            });
        }
        let capacity = (offset + 1)
            .next_power_of_two()
            .max(MIN_CHUNK_CAPACITY)
            .min(self.chunk_size);
        for segment in &mut self.columns {
            segment.grow(capacity);
        }
        for bitmap in &mut self.indexes {
            bitmap.grow(capacity);
        }
        self.fill.grow(capacity);
        self.capacity = capacity;
        tracing::debug!(chunk = self.id, capacity, "Grew chunk");
        Ok(())
    }

    /// AND `selection` with the bitmap behind a `with` selector: the index
    /// bitmap, the true-rows of a bool column, or column presence.
    pub fn and_selector(&self, slot: Slot, selection: &mut Bitmap) {
        match slot {
            Slot::Index(i) => match self.indexes.get(i) {
                Some(bitmap) => selection.and(bitmap),
                None => selection.reset(),
            },
            Slot::Column(c) => match self.columns.get(c) {
                Some(segment) => selection.and(&segment.truthy()),
                None => selection.reset(),
            },
        }
    }

    /// Write a new row at `offset`. Every index whose source column is
    /// among `cells` is re-evaluated for the row.
    pub fn insert(&mut self, offset: usize, cells: Vec<(usize, Cell)>, schema: &Schema) -> Result<()> {
        self.sync(schema);
        self.grow_for(offset)?;

        let touched: Vec<usize> = cells.iter().map(|(slot, _)| *slot).collect();
        for (slot, cell) in cells {
            self.columns[slot].set_at(offset, cell)?;
        }
        self.fill.set(offset);
        for slot in touched {
            self.reindex(offset, slot, schema);
        }
        Ok(())
    }

    /// Overwrite (or clear, for `None`) one cell of a live row, then
    /// re-evaluate the indexes sourced from that column.
    pub fn update(
        &mut self,
        offset: usize,
        column: &Column,
        cell: Option<Cell>,
        schema: &Schema,
    ) -> Result<()> {
        self.sync(schema);
        let segment = self
            .columns
            .get_mut(column.slot())
            .ok_or_else(|| Error::UnknownColumn(column.name().to_string()))?;
        match cell {
            Some(cell) => segment.set_at(offset, cell).map_err(|e| match e {
                Error::TypeMismatch { expected, found, .. } => Error::TypeMismatch {
                    column: column.name().to_string(),
                    expected,
                    found,
                },
                other => other,
            })?,
            None => segment.clear_at(offset)?,
        }
        self.reindex(offset, column.slot(), schema);
        Ok(())
    }

    fn reindex(&mut self, offset: usize, source_slot: usize, schema: &Schema) {
        let Some(column) = schema.columns().get(source_slot) else {
            return;
        };
        let cell = self
            .columns
            .get(source_slot)
            .and_then(|segment| segment.value_at(offset).ok().flatten());
        for index in schema.indexes_on(source_slot) {
            // A detached index cannot re-evaluate, so the written row leaves it.
            let hit = index.evaluate_cell(column, cell.as_ref()).unwrap_or(false);
            if let Some(bitmap) = self.indexes.get_mut(index.slot()) {
                bitmap.assign(offset, hit);
            }
        }
    }

    /// Recompute one index bitmap from scratch.
    pub fn rebuild_index(&mut self, index: &crate::index::Index, column: &Column, lut: Option<&[bool]>) {
        if let Some(segment) = self.columns.get(column.slot()) {
            if let Some(bits) = index.compute(column, segment, lut) {
                self.set_index(index.slot(), bits);
            }
        }
    }

    /// Tombstone one row. Returns false if it was not live.
    pub fn delete(&mut self, offset: usize) -> bool {
        if !self.fill.contains(offset) {
            return false;
        }
        let mut doomed = Bitmap::new();
        doomed.set(offset);
        self.delete_selected(&doomed) == 1
    }

    /// Tombstone every live row in `selection`. Returns how many were
    /// removed.
    pub fn delete_selected(&mut self, selection: &Bitmap) -> usize {
        let mut doomed = selection.clone();
        doomed.and(&self.fill);
        let removed = doomed.count();
        if removed == 0 {
            return 0;
        }
        self.fill.and_not(&doomed);
        for segment in &mut self.columns {
            doomed.range(|offset| {
                let _ = segment.clear_at(offset);
            });
        }
        for bitmap in &mut self.indexes {
            bitmap.and_not(&doomed);
        }
        removed
    }

    /// Decoded value of `column` at `offset`.
    pub fn value(&self, column: &Column, offset: usize) -> Result<Option<Value>> {
        if offset >= self.chunk_size {
            return Err(Error::OutOfRange {
                row: offset,
                capacity: self.chunk_size,
            });
        }
        if !self.fill.contains(offset) {
            return Ok(None);
        }
        match self.columns.get(column.slot()) {
            Some(segment) if offset < segment.capacity() => {
                Ok(segment.value_at(offset)?.map(|cell| column.decode(&cell)))
            }
            _ => Ok(None),
        }
    }
}
