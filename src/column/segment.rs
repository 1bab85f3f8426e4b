//! One column's rows within one chunk.
//!
//! A segment holds typed values for chunk-local offsets `[0, capacity)`
//! plus a presence bitmap marking which offsets have been written.
//! Access past `capacity` is an error; growth is explicit via `grow`.
//!
//! Binary format:
//! ```text
//! [kind: u8]
//! [capacity: u32 LE]
//! [presence: Bitmap]
//! For each present offset, ascending:
//!   Float64: [f64 LE]
//!   Bool:    [u8]
//!   Enum:    [id: u32 LE]
//!   Any:     [len: u32 LE][bincode(Value)]
//! ```

use std::io::Write;

use crate::bitmap::Bitmap;
use crate::column::{Cell, Column, ColumnKind};
use crate::error::{Error, Result};
use crate::snapshot::ByteReader;
use crate::value::Value;

#[derive(Debug, Clone)]
enum SegmentData {
    Float64(Vec<f64>),
    /// Value bits; meaningful only where `presence` is set.
    Bool(Bitmap),
    Enum(Vec<u32>),
    Any(Vec<Value>),
}

#[derive(Debug, Clone)]
pub struct ColumnSegment {
    kind: ColumnKind,
    capacity: usize,
    presence: Bitmap,
    data: SegmentData,
}

impl ColumnSegment {
    pub fn new(kind: ColumnKind, capacity: usize) -> Self {
        let data = match kind {
            ColumnKind::Float64 => SegmentData::Float64(vec![0.0; capacity]),
            ColumnKind::Bool => SegmentData::Bool(Bitmap::with_capacity(capacity)),
            ColumnKind::Enum => SegmentData::Enum(vec![0; capacity]),
            ColumnKind::Any => SegmentData::Any(vec![Value::Null; capacity]),
        };
        Self {
            kind,
            capacity,
            presence: Bitmap::with_capacity(capacity),
            data,
        }
    }

    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn presence(&self) -> &Bitmap {
        &self.presence
    }

    /// Grow to hold at least `capacity` rows. Never shrinks.
    pub fn grow(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }
        match &mut self.data {
            SegmentData::Float64(v) => v.resize(capacity, 0.0),
            SegmentData::Bool(b) => b.grow(capacity),
            SegmentData::Enum(v) => v.resize(capacity, 0),
            SegmentData::Any(v) => v.resize(capacity, Value::Null),
        }
        self.presence.grow(capacity);
        self.capacity = capacity;
    }

    fn check_range(&self, offset: usize) -> Result<()> {
        if offset >= self.capacity {
            return Err(Error::OutOfRange {
                row: offset,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn set_at(&mut self, offset: usize, cell: Cell) -> Result<()> {
        self.check_range(offset)?;
        match (&mut self.data, cell) {
            (SegmentData::Float64(v), Cell::Float64(x)) => v[offset] = x,
            (SegmentData::Bool(b), Cell::Bool(x)) => b.assign(offset, x),
            (SegmentData::Enum(v), Cell::Enum(x)) => v[offset] = x,
            (SegmentData::Any(v), Cell::Any(x)) => v[offset] = x,
            (_, cell) => {
                return Err(Error::TypeMismatch {
                    column: String::new(),
                    expected: self.kind.name(),
                    found: cell.kind().name(),
                })
            }
        }
        self.presence.set(offset);
        Ok(())
    }

    pub fn clear_at(&mut self, offset: usize) -> Result<()> {
        self.check_range(offset)?;
        self.presence.clear(offset);
        if let SegmentData::Any(v) = &mut self.data {
            v[offset] = Value::Null;
        }
        Ok(())
    }

    pub fn is_present(&self, offset: usize) -> bool {
        self.presence.contains(offset)
    }

    pub fn value_at(&self, offset: usize) -> Result<Option<Cell>> {
        self.check_range(offset)?;
        if !self.presence.contains(offset) {
            return Ok(None);
        }
        let cell = match &self.data {
            SegmentData::Float64(v) => Cell::Float64(v[offset]),
            SegmentData::Bool(b) => Cell::Bool(b.contains(offset)),
            SegmentData::Enum(v) => Cell::Enum(v[offset]),
            SegmentData::Any(v) => Cell::Any(v[offset].clone()),
        };
        Ok(Some(cell))
    }

    /// Present float at `offset`; `None` if absent, out of range or not a
    /// float segment.
    pub fn float_at(&self, offset: usize) -> Option<f64> {
        match &self.data {
            SegmentData::Float64(v) if self.presence.contains(offset) => v.get(offset).copied(),
            _ => None,
        }
    }

    pub fn enum_at(&self, offset: usize) -> Option<u32> {
        match &self.data {
            SegmentData::Enum(v) if self.presence.contains(offset) => v.get(offset).copied(),
            _ => None,
        }
    }

    /// Offsets whose bool value is `true`. For other kinds, the presence
    /// bitmap.
    pub fn truthy(&self) -> Bitmap {
        match &self.data {
            SegmentData::Bool(b) => {
                let mut out = b.clone();
                out.and(&self.presence);
                out
            }
            _ => self.presence.clone(),
        }
    }

    /// Keep only selected offsets that are present and pass `keep`.
    fn retain(&self, selection: &mut Bitmap, mut keep: impl FnMut(usize) -> bool) {
        selection.and(&self.presence);
        let mut passed = Bitmap::with_capacity(self.capacity);
        selection.range(|offset| {
            if keep(offset) {
                passed.set(offset);
            }
        });
        selection.and(&passed);
    }

    pub fn filter_float<F: Fn(f64) -> bool>(&self, selection: &mut Bitmap, f: F) {
        match &self.data {
            SegmentData::Float64(v) => self.retain(selection, |o| f(v[o])),
            _ => selection.reset(),
        }
    }

    /// Filter an enum segment with a per-id lookup table.
    pub fn filter_enum(&self, selection: &mut Bitmap, lut: &[bool]) {
        match &self.data {
            SegmentData::Enum(v) => {
                self.retain(selection, |o| lut.get(v[o] as usize).copied().unwrap_or(false))
            }
            _ => selection.reset(),
        }
    }

    /// Filter on decoded values; works for every kind.
    pub fn filter_value<F: Fn(&Value) -> bool>(
        &self,
        column: &Column,
        selection: &mut Bitmap,
        f: F,
    ) {
        match &self.data {
            SegmentData::Any(v) => self.retain(selection, |o| f(&v[o])),
            _ => self.retain(selection, |o| {
                self.value_at(o)
                    .ok()
                    .flatten()
                    .map_or(false, |cell| f(&column.decode(&cell)))
            }),
        }
    }

    /// Serialize into the writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&[self.kind as u8])?;
        writer.write_all(&(self.capacity as u32).to_le_bytes())?;
        self.presence.write_to(writer)?;

        for offset in self.presence.iter() {
            match &self.data {
                SegmentData::Float64(v) => writer.write_all(&v[offset].to_le_bytes())?,
                SegmentData::Bool(b) => writer.write_all(&[b.contains(offset) as u8])?,
                SegmentData::Enum(v) => writer.write_all(&v[offset].to_le_bytes())?,
                SegmentData::Any(v) => {
                    let encoded = bincode::serialize(&v[offset])?;
                    writer.write_all(&(encoded.len() as u32).to_le_bytes())?;
                    writer.write_all(&encoded)?;
                }
            }
        }
        Ok(())
    }

    /// Parse a segment, checking it has the expected kind and fits in a
    /// chunk of `max_capacity` rows.
    pub(crate) fn read_from(
        reader: &mut ByteReader<'_>,
        expected: ColumnKind,
        max_capacity: usize,
    ) -> Result<Self> {
        let raw_kind = reader.u8("segment kind")?;
        let kind = ColumnKind::from_u8(raw_kind).ok_or_else(|| {
            Error::CorruptSnapshot(format!("Unknown column kind: {}", raw_kind))
        })?;
        if kind != expected {
            return Err(Error::CorruptSnapshot(format!(
                "Segment kind {} does not match column kind {}",
                kind.name(),
                expected.name()
            )));
        }
        let capacity = reader.u32("segment capacity")? as usize;
        if capacity > max_capacity {
            return Err(Error::CorruptSnapshot(format!(
                "Segment capacity {} exceeds chunk size {}",
                capacity, max_capacity
            )));
        }
        let presence = reader.bitmap()?;
        if presence.iter().any(|offset| offset >= capacity) {
            return Err(Error::CorruptSnapshot(
                "Segment presence exceeds capacity".into(),
            ));
        }

        let min_value_size = match kind {
            ColumnKind::Float64 => 8,
            ColumnKind::Bool => 1,
            ColumnKind::Enum | ColumnKind::Any => 4,
        };
        if presence.count().saturating_mul(min_value_size) > reader.remaining() {
            return Err(Error::CorruptSnapshot(
                "Segment values truncated".into(),
            ));
        }

        // Only allocate what the present values reach; the chunk grows the rest.
        let used = presence.iter().last().map_or(0, |offset| offset + 1);
        let mut segment = Self::new(kind, used);
        for offset in presence.iter() {
            let cell = match kind {
                ColumnKind::Float64 => Cell::Float64(reader.f64("float value")?),
                ColumnKind::Bool => Cell::Bool(reader.u8("bool value")? != 0),
                ColumnKind::Enum => Cell::Enum(reader.u32("enum value")?),
                ColumnKind::Any => {
                    let len = reader.u32("any value length")? as usize;
                    let raw = reader.take(len, "any value")?;
                    let value: Value = bincode::deserialize(raw).map_err(|e| {
                        Error::CorruptSnapshot(format!("Invalid any value: {}", e))
                    })?;
                    Cell::Any(value)
                }
            };
            segment.set_at(offset, cell)?;
        }
        Ok(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut seg = ColumnSegment::new(ColumnKind::Float64, 64);
        assert_eq!(seg.value_at(3).unwrap(), None);
        seg.set_at(3, Cell::Float64(25.0)).unwrap();
        assert_eq!(seg.value_at(3).unwrap(), Some(Cell::Float64(25.0)));
        assert_eq!(seg.float_at(3), Some(25.0));
        assert!(seg.is_present(3));
        assert!(!seg.is_present(4));
    }

    #[test]
    fn test_out_of_range_does_not_grow() {
        let mut seg = ColumnSegment::new(ColumnKind::Bool, 64);
        let err = seg.set_at(64, Cell::Bool(true)).unwrap_err();
        assert_eq!(err.code(), "OUT_OF_RANGE");
        assert_eq!(seg.capacity(), 64);
        assert_eq!(seg.value_at(100).unwrap_err().code(), "OUT_OF_RANGE");

        seg.grow(128);
        seg.set_at(64, Cell::Bool(true)).unwrap();
        assert_eq!(seg.value_at(64).unwrap(), Some(Cell::Bool(true)));
    }

    #[test]
    fn test_kind_mismatch() {
        let mut seg = ColumnSegment::new(ColumnKind::Enum, 8);
        let err = seg.set_at(0, Cell::Float64(1.0)).unwrap_err();
        assert_eq!(err.code(), "TYPE_MISMATCH");
        assert!(!seg.is_present(0));
    }

    #[test]
    fn test_clear_at() {
        let mut seg = ColumnSegment::new(ColumnKind::Any, 8);
        seg.set_at(1, Cell::Any(Value::from("x"))).unwrap();
        seg.clear_at(1).unwrap();
        assert_eq!(seg.value_at(1).unwrap(), None);
    }

    #[test]
    fn test_truthy_bool() {
        let mut seg = ColumnSegment::new(ColumnKind::Bool, 64);
        seg.set_at(0, Cell::Bool(true)).unwrap();
        seg.set_at(1, Cell::Bool(false)).unwrap();
        seg.set_at(5, Cell::Bool(true)).unwrap();
        assert_eq!(seg.truthy().iter().collect::<Vec<_>>(), vec![0, 5]);
    }

    #[test]
    fn test_filter_float_skips_absent() {
        let mut seg = ColumnSegment::new(ColumnKind::Float64, 64);
        seg.set_at(0, Cell::Float64(25.0)).unwrap();
        seg.set_at(1, Cell::Float64(40.0)).unwrap();
        seg.set_at(2, Cell::Float64(30.0)).unwrap();

        let mut selection = Bitmap::filled(4);
        seg.filter_float(&mut selection, |v| v >= 30.0);
        assert_eq!(selection.iter().collect::<Vec<_>>(), vec![1, 2]);

        // Absent offset 3 never matches, even for an always-true predicate.
        let mut all = Bitmap::filled(4);
        seg.filter_float(&mut all, |_| true);
        assert_eq!(all.count(), 3);
    }

    #[test]
    fn test_filter_enum_lut() {
        let mut seg = ColumnSegment::new(ColumnKind::Enum, 64);
        seg.set_at(0, Cell::Enum(0)).unwrap();
        seg.set_at(1, Cell::Enum(1)).unwrap();
        seg.set_at(2, Cell::Enum(0)).unwrap();
        let mut selection = Bitmap::filled(3);
        seg.filter_enum(&mut selection, &[true, false]);
        assert_eq!(selection.iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_filter_on_wrong_kind_selects_nothing() {
        let seg = ColumnSegment::new(ColumnKind::Bool, 64);
        let mut selection = Bitmap::filled(10);
        seg.filter_float(&mut selection, |_| true);
        assert!(selection.is_empty());
    }

    #[test]
    fn test_segment_roundtrip() {
        let mut seg = ColumnSegment::new(ColumnKind::Any, 128);
        seg.set_at(0, Cell::Any(Value::from("a"))).unwrap();
        seg.set_at(70, Cell::Any(Value::List(vec![Value::Bool(true)]))).unwrap();

        let mut buf = Vec::new();
        seg.write_to(&mut buf).unwrap();

        let mut reader = ByteReader::new(&buf);
        let loaded = ColumnSegment::read_from(&mut reader, ColumnKind::Any, 1024).unwrap();
        assert_eq!(reader.remaining(), 0);
        assert_eq!(loaded.capacity(), 71);
        assert_eq!(loaded.value_at(0).unwrap(), seg.value_at(0).unwrap());
        assert_eq!(loaded.value_at(70).unwrap(), seg.value_at(70).unwrap());
        assert_eq!(loaded.value_at(1).unwrap(), None);
    }

    #[test]
    fn test_read_sizes_by_present_values() {
        // Declared capacity is large but nothing is present.
        let mut buf = vec![ColumnKind::Any as u8];
        buf.extend_from_slice(&(1u32 << 20).to_le_bytes());
        Bitmap::new().write_to(&mut buf).unwrap();

        let mut reader = ByteReader::new(&buf);
        let loaded = ColumnSegment::read_from(&mut reader, ColumnKind::Any, 1 << 20).unwrap();
        assert_eq!(loaded.capacity(), 0);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_read_rejects_presence_without_values() {
        let mut buf = vec![ColumnKind::Float64 as u8];
        buf.extend_from_slice(&16384u32.to_le_bytes());
        Bitmap::filled(16384).write_to(&mut buf).unwrap();
        buf.extend_from_slice(&1.0f64.to_le_bytes());

        let err = ColumnSegment::read_from(&mut ByteReader::new(&buf), ColumnKind::Float64, 16384)
            .unwrap_err();
        assert_eq!(err.code(), "CORRUPT_SNAPSHOT");
        assert!(err.to_string().contains("truncated"), "unexpected error: {}", err);
    }

    #[test]
    fn test_read_wrong_kind() {
        let seg = ColumnSegment::new(ColumnKind::Float64, 8);
        let mut buf = Vec::new();
        seg.write_to(&mut buf).unwrap();
        let err = ColumnSegment::read_from(&mut ByteReader::new(&buf), ColumnKind::Bool, 1024)
            .unwrap_err();
        assert_eq!(err.code(), "CORRUPT_SNAPSHOT");
    }
}
