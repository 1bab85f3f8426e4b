//! Transactions: filter composition, iteration and update passes.
//!
//! A transaction pins the schema and the chunk list when it opens and
//! starts with one working bitmap per chunk, copied from the chunk's fill
//! bitmap. Filters only ever AND into these transaction-local bitmaps;
//! index and column storage is never aliased.
//!
//! Rows inserted after the transaction opened are not part of its
//! selection. Chunks may be observed at different versions when writers
//! run concurrently; there is no cross-chunk isolation.

mod cursor;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::bitmap::Bitmap;
use crate::collection::{read_lock, write_lock, ChunkHandle, Collection};
use crate::column::{Column, ColumnKind};
use crate::error::{Error, Result};
use crate::schema::{Schema, Slot};
use crate::value::{Record, Value};

pub use cursor::{Cursor, Float64Reader, StringReader};

pub struct Transaction<'a> {
    owner: &'a Collection,
    schema: Arc<Schema>,
    generation: u64,
    chunks: Vec<ChunkHandle>,
    working: Vec<Bitmap>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(owner: &'a Collection) -> Self {
        // `load` swaps all three under the schema write lock.
        let (generation, schema, chunks) = {
            let schema = read_lock(&owner.schema);
            (
                owner.generation.load(Ordering::SeqCst),
                Arc::clone(&schema),
                owner.chunk_handles(),
            )
        };
        let working = chunks
            .iter()
            .map(|handle| read_lock(handle).fill().clone())
            .collect();
        Self {
            owner,
            schema,
            generation,
            chunks,
            working,
        }
    }

    fn column(&self, name: &str) -> Result<Arc<Column>> {
        match self.schema.lookup(name) {
            Some(Slot::Column(slot)) => Ok(Arc::clone(&self.schema.columns()[slot])),
            _ => Err(Error::UnknownSelector(name.to_string())),
        }
    }

    fn typed_column(&self, name: &str, kind: ColumnKind) -> Result<Arc<Column>> {
        let column = self.column(name)?;
        if column.kind() != kind {
            return Err(Error::TypeMismatch {
                column: name.to_string(),
                expected: kind.name(),
                found: column.kind().name(),
            });
        }
        Ok(column)
    }

    // ── Filters ─────────────────────────────────────────────────────

    /// AND every named selector into the selection. A name may be an
    /// index, a bool column (rows holding `true`) or any other column
    /// (rows where it is present). All names are resolved before any
    /// filtering happens.
    pub fn with(&mut self, names: &[&str]) -> Result<&mut Self> {
        let slots = names
            .iter()
            .map(|name| {
                self.schema
                    .lookup(name)
                    .ok_or_else(|| Error::UnknownSelector(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        self.owner
            .scan_chunks(&self.chunks, &mut self.working, |chunk, bits| {
                for slot in &slots {
                    chunk.and_selector(*slot, bits);
                }
            });
        Ok(self)
    }

    /// Keep rows whose float64 `column` is present and satisfies `f`.
    pub fn with_float<F>(&mut self, column: &str, f: F) -> Result<&mut Self>
    where
        F: Fn(f64) -> bool + Send + Sync,
    {
        let column = self.typed_column(column, ColumnKind::Float64)?;
        let slot = column.slot();
        self.owner
            .scan_chunks(&self.chunks, &mut self.working, |chunk, bits| {
                match chunk.segment(slot) {
                    Some(segment) => segment.filter_float(bits, &f),
                    None => bits.reset(),
                }
            });
        Ok(self)
    }

    /// Keep rows whose string `column` is present and satisfies `f`.
    ///
    /// Works on enum columns (`f` runs once per distinct string) and on
    /// `Any` columns holding strings.
    pub fn with_string<F>(&mut self, column: &str, f: F) -> Result<&mut Self>
    where
        F: Fn(&str) -> bool + Send + Sync,
    {
        let column = self.column(column)?;
        let slot = column.slot();
        match column.kind() {
            ColumnKind::Enum => {
                let lut = column.evaluate_dictionary(&f).unwrap_or_default();
                self.owner
                    .scan_chunks(&self.chunks, &mut self.working, |chunk, bits| {
                        match chunk.segment(slot) {
                            Some(segment) => segment.filter_enum(bits, &lut),
                            None => bits.reset(),
                        }
                    });
            }
            ColumnKind::Any => {
                let column = &column;
                self.owner
                    .scan_chunks(&self.chunks, &mut self.working, |chunk, bits| {
                        match chunk.segment(slot) {
                            Some(segment) => segment
                                .filter_value(column, bits, |v| v.as_str().map_or(false, &f)),
                            None => bits.reset(),
                        }
                    });
            }
            kind => {
                return Err(Error::TypeMismatch {
                    column: column.name().to_string(),
                    expected: ColumnKind::Enum.name(),
                    found: kind.name(),
                })
            }
        }
        Ok(self)
    }

    /// Keep rows where `column` is present and `f` holds for its value.
    /// Works for every column kind.
    pub fn with_value<F>(&mut self, column: &str, f: F) -> Result<&mut Self>
    where
        F: Fn(&Value) -> bool + Send + Sync,
    {
        let column = self.column(column)?;
        let slot = column.slot();
        let column = &column;
        self.owner
            .scan_chunks(&self.chunks, &mut self.working, |chunk, bits| {
                match chunk.segment(slot) {
                    Some(segment) => segment.filter_value(column, bits, &f),
                    None => bits.reset(),
                }
            });
        Ok(self)
    }

    // ── Terminals ───────────────────────────────────────────────────

    /// Number of selected rows.
    pub fn count(&self) -> usize {
        self.working.iter().map(Bitmap::count).sum()
    }

    /// Visit selected rows in ascending order (chunk, then offset).
    pub fn range<F: FnMut(usize)>(&self, mut f: F) {
        let chunk_size = self.owner.chunk_size();
        for (id, bits) in self.working.iter().enumerate() {
            let base = id * chunk_size;
            bits.range(|offset| f(base + offset));
        }
    }

    /// Selected row indexes in ascending order.
    pub fn rows(&self) -> Vec<usize> {
        let mut rows = Vec::with_capacity(self.count());
        self.range(|row| rows.push(row));
        rows
    }

    /// Update pass over `column`: `f` gets a cursor on each selected row
    /// still live, in ascending order, and returns `Ok(false)` to stop.
    /// Each chunk is write-locked while its rows are visited, and every
    /// write re-evaluates the dependent indexes before the cursor moves on.
    ///
    /// The callback must not call back into the collection.
    pub fn range_column<F>(&mut self, column: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&mut Cursor<'_>) -> Result<bool>,
    {
        let column = self.column(column)?;
        let guard = read_lock(&self.owner.schema);
        // After a load the pinned chunks are detached from the collection;
        // keep writing them under the schema they were built with.
        let schema: &Schema = if self.owner.generation.load(Ordering::SeqCst) == self.generation {
            &guard
        } else {
            &self.schema
        };

        let chunk_size = self.owner.chunk_size();
        for (id, handle) in self.chunks.iter().enumerate() {
            if self.working[id].is_empty() {
                continue;
            }
            let mut chunk = write_lock(handle);
            let mut live = self.working[id].clone();
            live.and(chunk.fill());
            for offset in live.iter() {
                let mut cursor =
                    Cursor::new(&mut chunk, schema, &column, id * chunk_size + offset, offset);
                if !f(&mut cursor)? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Typed reader over a float64 column.
    pub fn float64(&self, column: &str) -> Result<Float64Reader<'_, 'a>> {
        let column = self.typed_column(column, ColumnKind::Float64)?;
        Ok(Float64Reader::new(self, column))
    }

    /// Typed reader over a string column (enum or any).
    pub fn string(&self, column: &str) -> Result<StringReader<'_, 'a>> {
        let column = self.column(column)?;
        match column.kind() {
            ColumnKind::Enum | ColumnKind::Any => Ok(StringReader::new(self, column)),
            kind => Err(Error::TypeMismatch {
                column: column.name().to_string(),
                expected: ColumnKind::Enum.name(),
                found: kind.name(),
            }),
        }
    }

    /// Tombstone every selected row. Returns how many were removed.
    pub fn delete_all(&mut self) -> Result<usize> {
        let _schema = read_lock(&self.owner.schema);
        let mut removed = 0;
        for (handle, bits) in self.chunks.iter().zip(self.working.iter_mut()) {
            if bits.is_empty() {
                continue;
            }
            removed += write_lock(handle).delete_selected(bits);
            bits.reset();
        }
        if self.owner.generation.load(Ordering::SeqCst) == self.generation {
            self.owner.count.fetch_sub(removed, Ordering::SeqCst);
        }
        tracing::debug!(rows = removed, "Deleted rows");
        Ok(removed)
    }

    /// Insert a record through the owning collection. The new row is not
    /// added to this transaction's selection.
    pub fn insert(&mut self, record: &Record) -> Result<usize> {
        self.owner.insert(record)
    }

    // ── Accessors used by readers ───────────────────────────────────

    pub(crate) fn chunk_size(&self) -> usize {
        self.owner.chunk_size()
    }

    pub(crate) fn chunk(&self, id: usize) -> Option<&ChunkHandle> {
        self.chunks.get(id)
    }

    pub(crate) fn working(&self) -> &[Bitmap] {
        &self.working
    }
}
