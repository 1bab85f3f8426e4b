//! Snapshot export and import.
//!
//! Predicates are code, not data: a snapshot carries index bitmaps only.
//! On load, an index whose name and source match a predicate already
//! registered on the target collection is re-validated against it (and
//! recomputed if it disagrees); any other index is restored *detached*.
//!
//! Binary format (all integers little-endian):
//! ```text
//! [magic: "KLSN"][version: u16][chunk_size: u32][chunk_count: u32]
//! [column_count: u32]
//! For each column, sorted by name:
//!   [name: u32 len + UTF-8][kind: u8]
//!   Enum only: [dictionary: StringTable]
//!   [segment: ColumnSegment] x chunk_count
//! [index_count: u32]
//! For each index, sorted by name:
//!   [name: u32 len + UTF-8][source: u32 len + UTF-8]
//!   [bitmap: Bitmap] x chunk_count
//! [row_watermark: u64][live_rows: u64]
//! [fill: Bitmap] x chunk_count
//! ```

mod reader;

use std::io::{BufWriter, Read, Write};
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};

use crate::bitmap::Bitmap;
use crate::chunk::Chunk;
use crate::collection::{read_lock, write_lock, Collection};
use crate::column::{Column, ColumnKind, ColumnSegment, StringTable};
use crate::error::{Error, Result};
use crate::index::Index;
use crate::schema::Schema;

pub(crate) use reader::ByteReader;

const MAGIC: &[u8; 4] = b"KLSN";
const FORMAT_VERSION: u16 = 1;

/// Smallest encoding of one chunk (its empty fill bitmap).
const MIN_CHUNK_BYTES: usize = 4;

fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    writer.write_all(&(s.len() as u32).to_le_bytes())?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

fn duplicate_to_corrupt(e: Error) -> Error {
    match e {
        Error::DuplicateName(name) => {
            Error::CorruptSnapshot(format!("Duplicate name in snapshot: '{}'", name))
        }
        other => other,
    }
}

/// Fully parsed snapshot, ready to be swapped in.
struct Restored {
    schema: Schema,
    chunks: Vec<Chunk>,
    watermark: usize,
    live: usize,
}

impl Collection {
    /// Write every column, index bitmap and the row bookkeeping to
    /// `writer`. Schema changes and writers are held off for the duration.
    pub fn snapshot<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = BufWriter::new(writer);
        let schema = read_lock(&self.schema);
        let handles = self.chunk_handles();
        let chunks: Vec<_> = handles.iter().map(|handle| read_lock(handle)).collect();
        let chunk_size = self.chunk_size();

        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(chunk_size as u32).to_le_bytes())?;
        writer.write_all(&(chunks.len() as u32).to_le_bytes())?;

        let columns = schema.sorted_columns();
        writer.write_all(&(columns.len() as u32).to_le_bytes())?;
        for column in &columns {
            write_string(&mut writer, column.name())?;
            writer.write_all(&[column.kind() as u8])?;
            column
                .with_dictionary_ref(|dict| dict.write_to(&mut writer))
                .transpose()?;
            for chunk in &chunks {
                match chunk.segment(column.slot()) {
                    Some(segment) => segment.write_to(&mut writer)?,
                    None => ColumnSegment::new(column.kind(), 0).write_to(&mut writer)?,
                }
            }
        }

        let indexes = schema.sorted_indexes();
        writer.write_all(&(indexes.len() as u32).to_le_bytes())?;
        for index in &indexes {
            write_string(&mut writer, index.name())?;
            write_string(&mut writer, index.source())?;
            for chunk in &chunks {
                match chunk.index(index.slot()) {
                    Some(bits) => bits.write_to(&mut writer)?,
                    None => Bitmap::new().write_to(&mut writer)?,
                }
            }
        }

        // Read after every chunk lock is held, so each fill bit is below it.
        let watermark = self
            .next_row
            .load(Ordering::SeqCst)
            .min(chunks.len() * chunk_size);
        let live: usize = chunks.iter().map(|chunk| chunk.fill().count()).sum();
        writer.write_all(&(watermark as u64).to_le_bytes())?;
        writer.write_all(&(live as u64).to_le_bytes())?;
        for chunk in &chunks {
            chunk.fill().write_to(&mut writer)?;
        }
        writer.flush()?;

        tracing::info!(
            columns = columns.len(),
            indexes = indexes.len(),
            chunks = chunks.len(),
            rows = live,
            "Wrote snapshot"
        );
        Ok(())
    }

    /// Replace this collection's contents with a snapshot. The snapshot is
    /// parsed and validated completely before anything is swapped, so on
    /// error the collection is untouched.
    pub fn load<R: Read>(&self, mut reader: R) -> Result<()> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let restored = self.decode(&bytes)?;

        let columns = restored.schema.columns().len();
        let indexes = restored.schema.indexes().len();
        let detached = restored
            .schema
            .indexes()
            .iter()
            .filter(|index| !index.is_attached())
            .count();
        let chunk_count = restored.chunks.len();

        let mut schema = write_lock(&self.schema);
        let mut chunks = write_lock(&self.chunks);
        *schema = Arc::new(restored.schema);
        *chunks = restored
            .chunks
            .into_iter()
            .map(|chunk| Arc::new(RwLock::new(chunk)))
            .collect();
        self.next_row.store(restored.watermark, Ordering::SeqCst);
        self.count.store(restored.live, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            columns,
            indexes,
            detached,
            chunks = chunk_count,
            rows = restored.live,
            bytes = bytes.len(),
            "Loaded snapshot"
        );
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Restored> {
        let mut r = ByteReader::new(bytes);

        if r.take(MAGIC.len(), "magic")? != MAGIC {
            return Err(Error::CorruptSnapshot("Invalid snapshot magic".into()));
        }
        let version = r.u16("version")?;
        if version != FORMAT_VERSION {
            return Err(Error::CorruptSnapshot(format!(
                "Unsupported snapshot version: {}",
                version
            )));
        }
        let chunk_size = r.u32("chunk size")? as usize;
        if chunk_size != self.chunk_size() {
            return Err(Error::CorruptSnapshot(format!(
                "Snapshot chunk size {} does not match collection chunk size {}",
                chunk_size,
                self.chunk_size()
            )));
        }
        let chunk_count = r.u32("chunk count")? as usize;
        if chunk_count > r.remaining() / MIN_CHUNK_BYTES {
            return Err(Error::CorruptSnapshot(format!(
                "Chunk count {} exceeds snapshot size",
                chunk_count
            )));
        }

        // ── Columns ──
        let mut schema = Schema::new();
        let mut segments: Vec<Vec<ColumnSegment>> = (0..chunk_count).map(|_| Vec::new()).collect();
        let column_count = r.u32("column count")? as usize;
        for slot in 0..column_count {
            let name = r.string("column name")?;
            let raw_kind = r.u8("column kind")?;
            let kind = ColumnKind::from_u8(raw_kind).ok_or_else(|| {
                Error::CorruptSnapshot(format!("Unknown column kind: {}", raw_kind))
            })?;
            let column = match kind {
                ColumnKind::Enum => Column::with_dictionary(&name, slot, r.string_table()?),
                _ => Column::new(&name, kind, slot),
            };
            let dictionary_len = column.with_dictionary_ref(StringTable::len);

            for per_chunk in segments.iter_mut() {
                let segment = ColumnSegment::read_from(&mut r, kind, chunk_size)?;
                if let Some(len) = dictionary_len {
                    let dangling = segment.presence().iter().any(|offset| {
                        segment
                            .enum_at(offset)
                            .map_or(true, |id| id as usize >= len)
                    });
                    if dangling {
                        return Err(Error::CorruptSnapshot(format!(
                            "Column '{}' references a string outside its dictionary",
                            name
                        )));
                    }
                }
                per_chunk.push(segment);
            }
            schema = schema.with_column_def(column).map_err(duplicate_to_corrupt)?;
        }

        // ── Indexes ──
        let registered = self.schema();
        let mut bitmaps: Vec<Vec<Bitmap>> = (0..chunk_count).map(|_| Vec::new()).collect();
        let index_count = r.u32("index count")? as usize;
        for slot in 0..index_count {
            let name = r.string("index name")?;
            let source = r.string("index source")?;
            let column = schema.column(&source).cloned().ok_or_else(|| {
                Error::CorruptSnapshot(format!(
                    "Index '{}' refers to unknown column '{}'",
                    name, source
                ))
            })?;
            let predicate = registered
                .index(&name)
                .filter(|index| index.source() == source)
                .and_then(|index| index.predicate());

            for per_chunk in bitmaps.iter_mut() {
                let bits = r.bitmap()?;
                if bits.capacity() > chunk_size {
                    return Err(Error::CorruptSnapshot(format!(
                        "Index '{}' bitmap exceeds chunk size",
                        name
                    )));
                }
                per_chunk.push(bits);
            }
            schema = schema
                .with_index(Index::new(&name, &column, slot, predicate))
                .map_err(duplicate_to_corrupt)?;
        }

        // ── Rows ──
        let watermark = r.u64("row watermark")? as usize;
        let live = r.u64("live count")? as usize;
        if watermark > chunk_count * chunk_size {
            return Err(Error::CorruptSnapshot(format!(
                "Row watermark {} exceeds {} chunks",
                watermark, chunk_count
            )));
        }

        let mut chunks = Vec::with_capacity(chunk_count);
        let mut counted = 0;
        for (id, (columns, indexes)) in segments.into_iter().zip(bitmaps).enumerate() {
            let fill = r.bitmap()?;
            if fill.capacity() > chunk_size {
                return Err(Error::CorruptSnapshot(format!(
                    "Chunk {} fill bitmap exceeds chunk size",
                    id
                )));
            }
            if fill.iter().any(|offset| id * chunk_size + offset >= watermark) {
                return Err(Error::CorruptSnapshot(format!(
                    "Chunk {} has rows beyond the row watermark",
                    id
                )));
            }
            counted += fill.count();
            chunks.push(Chunk::restore(id, chunk_size, fill, columns, indexes));
        }
        if counted != live {
            return Err(Error::CorruptSnapshot(format!(
                "Live row count {} does not match fill bitmaps ({})",
                live, counted
            )));
        }
        if r.remaining() != 0 {
            return Err(Error::CorruptSnapshot(format!(
                "{} trailing bytes after snapshot",
                r.remaining()
            )));
        }

        revalidate(&schema, &mut chunks);

        Ok(Restored {
            schema,
            chunks,
            watermark,
            live,
        })
    }
}

/// Check restored bitmaps of attached indexes against their predicates,
/// replacing any that disagree.
fn revalidate(schema: &Schema, chunks: &mut [Chunk]) {
    for index in schema.indexes() {
        if !index.is_attached() {
            tracing::warn!(
                index = index.name(),
                source = index.source(),
                "Restored index has no registered predicate, left detached"
            );
            continue;
        }
        let column = &schema.columns()[index.source_slot()];
        let lut = index.lookup_table(column);
        let mut mismatched = 0;
        for chunk in chunks.iter_mut() {
            let Some(computed) = chunk
                .segment(column.slot())
                .and_then(|segment| index.compute(column, segment, lut.as_deref()))
            else {
                continue;
            };
            let agrees = chunk
                .index(index.slot())
                .map_or(false, |restored| restored.iter().eq(computed.iter()));
            if !agrees {
                mismatched += 1;
                chunk.set_index(index.slot(), computed);
            }
        }
        if mismatched > 0 {
            tracing::warn!(
                index = index.name(),
                chunks = mismatched,
                "Restored index disagrees with its predicate, recomputed"
            );
        }
    }
}
