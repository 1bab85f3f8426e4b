//! Interning dictionary for enum columns.
//!
//! Each distinct string gets a 0-based id on first intern; rows store the
//! id. Equality checks and predicate lookups then compare ids instead of
//! string bytes.
//!
//! Binary format:
//! ```text
//! [string_count: u32 LE]                                      // 4 bytes
//! [total_data_len: u32 LE]                                    // 4 bytes
//! [entries: (offset: u32 LE, length: u32 LE) x string_count]  // 8 bytes each
//! [data: u8 x total_data_len]                                 // concatenated UTF-8
//! ```

use std::collections::HashMap;
use std::io::Write;

use crate::error::{Error, Result};

/// String table with O(1) id -> string lookup and intern-time deduplication.
#[derive(Debug, Default)]
pub struct StringTable {
    /// Concatenated UTF-8 string bytes.
    data: Vec<u8>,
    /// (offset, length) pairs into `data`, one per interned string.
    entries: Vec<(u32, u32)>,
    /// Deduplication index, rebuilt on load.
    index: HashMap<String, u32>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its 0-based id.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.index.get(s) {
            return id;
        }

        debug_assert!(
            self.data.len() + s.len() < u32::MAX as usize,
            "String table data exceeds u32 range"
        );

        let offset = self.data.len() as u32;
        let length = s.len() as u32;
        let id = self.entries.len() as u32;

        self.data.extend_from_slice(s.as_bytes());
        self.entries.push((offset, length));
        self.index.insert(s.to_string(), id);

        id
    }

    /// Id of an already-interned string.
    pub fn lookup(&self, s: &str) -> Option<u32> {
        self.index.get(s).copied()
    }

    /// Get a string by its id. O(1).
    pub fn get(&self, id: u32) -> Option<&str> {
        let (offset, length) = *self.entries.get(id as usize)?;
        let start = offset as usize;
        let end = start + length as usize;
        std::str::from_utf8(self.data.get(start..end)?).ok()
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluate `f` once per interned string, indexed by id.
    pub fn evaluate<F: Fn(&str) -> bool>(&self, f: F) -> Vec<bool> {
        (0..self.entries.len() as u32)
            .map(|id| self.get(id).map_or(false, &f))
            .collect()
    }

    /// Write the string table in binary format.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&(self.entries.len() as u32).to_le_bytes())?;
        writer.write_all(&(self.data.len() as u32).to_le_bytes())?;
        for &(offset, length) in &self.entries {
            writer.write_all(&offset.to_le_bytes())?;
            writer.write_all(&length.to_le_bytes())?;
        }
        writer.write_all(&self.data)?;
        Ok(())
    }

    /// Parse a string table from the front of `bytes`, rebuilding the
    /// deduplication index so the loaded table keeps interning.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::CorruptSnapshot("String table too small".into()));
        }

        let string_count = read_u32(bytes, 0) as usize;
        let total_data_len = read_u32(bytes, 4) as usize;

        let entries_size = string_count * 8;
        if bytes.len() < 8 + entries_size {
            return Err(Error::CorruptSnapshot(
                "String table entries truncated".into(),
            ));
        }
        if bytes.len() < 8 + entries_size + total_data_len {
            return Err(Error::CorruptSnapshot("String table data truncated".into()));
        }

        let mut entries = Vec::with_capacity(string_count);
        let mut pos = 8;
        for _ in 0..string_count {
            entries.push((read_u32(bytes, pos), read_u32(bytes, pos + 4)));
            pos += 8;
        }

        let data = bytes[pos..pos + total_data_len].to_vec();

        let mut index = HashMap::with_capacity(string_count);
        for (id, &(offset, length)) in entries.iter().enumerate() {
            let start = offset as usize;
            let end = start + length as usize;
            if end > data.len() {
                return Err(Error::CorruptSnapshot(
                    "String table entry out of bounds".into(),
                ));
            }
            let s = std::str::from_utf8(&data[start..end]).map_err(|_| {
                Error::CorruptSnapshot("String table contains invalid UTF-8".into())
            })?;
            index.insert(s.to_string(), id as u32);
        }

        Ok(Self {
            data,
            entries,
            index,
        })
    }

    /// Total byte size when serialized.
    pub fn serialized_size(&self) -> usize {
        4 + 4 + self.entries.len() * 8 + self.data.len()
    }
}

fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
}
