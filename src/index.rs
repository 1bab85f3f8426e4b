//! Derived boolean indexes.
//!
//! An index names a source column and a predicate. Its per-chunk bitmap
//! holds `predicate(value)` for every row present in the source column
//! and is recomputed eagerly on each insert/update touching that column,
//! so queries only AND bitmaps together.
//!
//! Indexes restored from a snapshot start *detached* (no predicate): their
//! bitmaps stay queryable but are not maintained until a predicate is
//! attached, which triggers a full recompute.

use std::fmt;
use std::sync::Arc;

use crate::bitmap::Bitmap;
use crate::column::{Cell, Column, ColumnKind, ColumnSegment};
use crate::value::Value;

/// Pure boolean function over a column value. Implemented for closures.
///
/// Must be deterministic: enum columns evaluate it once per distinct
/// string and reuse the answer for every row holding that string.
pub trait Predicate: Send + Sync {
    fn evaluate(&self, value: &Value) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    fn evaluate(&self, value: &Value) -> bool {
        self(value)
    }
}

pub struct Index {
    name: String,
    source: String,
    source_slot: usize,
    /// Position of this index's bitmap inside every chunk.
    slot: usize,
    predicate: Option<Arc<dyn Predicate>>,
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("slot", &self.slot)
            .field("attached", &self.predicate.is_some())
            .finish()
    }
}

impl Index {
    pub(crate) fn new(
        name: &str,
        source: &Column,
        slot: usize,
        predicate: Option<Arc<dyn Predicate>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            source: source.name().to_string(),
            source_slot: source.slot(),
            slot,
            predicate,
        }
    }

    /// Same index with `predicate` attached.
    pub(crate) fn attach(&self, predicate: Arc<dyn Predicate>) -> Self {
        Self {
            name: self.name.clone(),
            source: self.source.clone(),
            source_slot: self.source_slot,
            slot: self.slot,
            predicate: Some(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the source column.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn source_slot(&self) -> usize {
        self.source_slot
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_attached(&self) -> bool {
        self.predicate.is_some()
    }

    pub(crate) fn predicate(&self) -> Option<Arc<dyn Predicate>> {
        self.predicate.clone()
    }

    /// Predicate result per interned id, for enum sources.
    pub(crate) fn lookup_table(&self, column: &Column) -> Option<Vec<bool>> {
        let predicate = self.predicate.as_ref()?;
        if column.kind() != ColumnKind::Enum {
            return None;
        }
        column.evaluate_dictionary(|s| predicate.evaluate(&Value::String(s.to_string())))
    }

    /// Full pass over one chunk's source segment. `None` when detached.
    pub(crate) fn compute(
        &self,
        column: &Column,
        segment: &ColumnSegment,
        lut: Option<&[bool]>,
    ) -> Option<Bitmap> {
        let predicate = self.predicate.as_ref()?;
        let mut bits = Bitmap::with_capacity(segment.capacity());
        match lut {
            Some(lut) => segment.presence().range(|offset| {
                let hit = segment
                    .enum_at(offset)
                    .and_then(|id| lut.get(id as usize).copied())
                    .unwrap_or(false);
                if hit {
                    bits.set(offset);
                }
            }),
            None => segment.presence().range(|offset| {
                if let Ok(Some(cell)) = segment.value_at(offset) {
                    if predicate.evaluate(&column.decode(&cell)) {
                        bits.set(offset);
                    }
                }
            }),
        }
        Some(bits)
    }

    /// Predicate result for one stored cell; absent cells never match.
    /// `None` when detached.
    pub(crate) fn evaluate_cell(&self, column: &Column, cell: Option<&Cell>) -> Option<bool> {
        let predicate = self.predicate.as_ref()?;
        Some(cell.map_or(false, |cell| predicate.evaluate(&column.decode(cell))))
    }
}
