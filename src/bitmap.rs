//! Word-packed bitmap used for row selection.
//!
//! Bit `i` lives in word `i / 64` at position `i % 64`. All composition
//! operations (`and`, `and_not`, `or`) work word-by-word and mutate the
//! receiver in place. A bitmap grows on `set`; bits past the end read as 0.
//!
//! Binary format:
//! ```text
//! [word_count: u32 LE]         // 4 bytes
//! [words: u64 LE x word_count]
//! ```

use std::io::Write;

use crate::error::{Error, Result};

/// Header size: word_count(4).
const BITMAP_HEADER_SIZE: usize = 4;

/// Growable bit vector backed by 64-bit words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
}

#[inline]
fn word_count(bits: usize) -> usize {
    (bits + 63) / 64
}

impl Bitmap {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Create an all-zero bitmap able to hold `bits` bits without growing.
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: vec![0u64; word_count(bits)],
        }
    }

    /// Create a bitmap with bits `[0, len)` set.
    pub fn filled(len: usize) -> Self {
        let mut bitmap = Self::with_capacity(len);
        let full = len / 64;
        for word in &mut bitmap.words[..full] {
            *word = u64::MAX;
        }
        let rem = len % 64;
        if rem != 0 {
            bitmap.words[full] = (1u64 << rem) - 1;
        }
        bitmap
    }

    /// Raw words, least significant bit first.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Number of addressable bits before the next grow.
    pub fn capacity(&self) -> usize {
        self.words.len() * 64
    }

    /// Ensure the bitmap can address at least `bits` bits.
    pub fn grow(&mut self, bits: usize) {
        let needed = word_count(bits);
        if needed > self.words.len() {
            self.words.resize(needed, 0);
        }
    }

    #[inline]
    pub fn set(&mut self, i: usize) {
        let w = i >> 6;
        if w >= self.words.len() {
            self.words.resize(w + 1, 0);
        }
        self.words[w] |= 1u64 << (i & 63);
    }

    #[inline]
    pub fn clear(&mut self, i: usize) {
        if let Some(word) = self.words.get_mut(i >> 6) {
            *word &= !(1u64 << (i & 63));
        }
    }

    /// Set or clear bit `i` depending on `value`.
    #[inline]
    pub fn assign(&mut self, i: usize, value: bool) {
        if value {
            self.set(i);
        } else {
            self.clear(i);
        }
    }

    #[inline]
    pub fn contains(&self, i: usize) -> bool {
        match self.words.get(i >> 6) {
            Some(word) => (word >> (i & 63)) & 1 == 1,
            None => false,
        }
    }

    /// Clear every bit, keeping the allocated words.
    pub fn reset(&mut self) {
        for word in &mut self.words {
            *word = 0;
        }
    }

    /// `self &= other`. Words past the end of `other` become zero.
    pub fn and(&mut self, other: &Bitmap) {
        let shared = self.words.len().min(other.words.len());
        for (a, b) in self.words[..shared].iter_mut().zip(&other.words[..shared]) {
            *a &= *b;
        }
        for a in &mut self.words[shared..] {
            *a = 0;
        }
    }

    /// `self &= !other`: removes every bit of `other` from `self`.
    pub fn and_not(&mut self, other: &Bitmap) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= !*b;
        }
    }

    /// `self |= other`, growing `self` to cover `other`.
    pub fn or(&mut self, other: &Bitmap) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= *b;
        }
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Call `f` with every set bit position in ascending order.
    pub fn range<F: FnMut(usize)>(&self, mut f: F) {
        for (w, &word) in self.words.iter().enumerate() {
            let mut bits = word;
            while bits != 0 {
                let tz = bits.trailing_zeros() as usize;
                f((w << 6) + tz);
                bits &= bits - 1;
            }
        }
    }

    /// Iterator over set bit positions in ascending order. Restartable:
    /// every call starts from bit 0.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            words: &self.words,
            index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    /// Serialize into the writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&(self.words.len() as u32).to_le_bytes())?;
        for &word in &self.words {
            writer.write_all(&word.to_le_bytes())?;
        }
        Ok(())
    }

    /// Deserialize a bitmap from the front of `bytes`. Trailing bytes are
    /// ignored; use [`serialized_size`](Self::serialized_size) to advance.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BITMAP_HEADER_SIZE {
            return Err(Error::CorruptSnapshot("Bitmap header truncated".into()));
        }
        let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let body = &bytes[BITMAP_HEADER_SIZE..];
        if body.len() < count * 8 {
            return Err(Error::CorruptSnapshot("Bitmap data truncated".into()));
        }
        let words = body[..count * 8]
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        Ok(Self { words })
    }

    /// Total serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        BITMAP_HEADER_SIZE + self.words.len() * 8
    }
}

/// Ascending iterator over the set bits of a [`Bitmap`].
pub struct Iter<'a> {
    words: &'a [u64],
    index: usize,
    current: u64,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let tz = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some((self.index << 6) + tz);
            }
            self.index += 1;
            self.current = *self.words.get(self.index)?;
        }
    }
}
