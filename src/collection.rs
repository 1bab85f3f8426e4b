//! Collection: the owner of columns, indexes and chunks.
//!
//! Locking order is always schema → chunk list → individual chunk.
//! - `schema` is copy-on-write behind an `Arc`. Schema changes (`create_*`,
//!   `load`) take the write guard; row writers hold the read guard for the
//!   whole write so that a concurrent `create_index` never misses a row.
//! - Each chunk sits behind its own `RwLock`; that lock is the unit of
//!   write exclusion between inserts, cursor passes and scans.
//! - `next_row` is the allocation watermark, `count` the number of live
//!   rows. Both are atomics bumped while the chunk write lock is held.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::bitmap::Bitmap;
use crate::chunk::Chunk;
use crate::column::ColumnKind;
use crate::config::CollectionConfig;
use crate::error::{Error, Result};
use crate::index::{Index, Predicate};
use crate::resource::ResourceManager;
use crate::schema::{Schema, Slot};
use crate::txn::Transaction;
use crate::value::{record_from_json, Record, Value};

pub(crate) type ChunkHandle = Arc<RwLock<Chunk>>;

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub struct Collection {
    config: CollectionConfig,
    pub(crate) schema: RwLock<Arc<Schema>>,
    pub(crate) chunks: RwLock<Vec<ChunkHandle>>,
    pub(crate) next_row: AtomicUsize,
    pub(crate) count: AtomicUsize,
    /// Bumped every time `load` replaces the collection's contents.
    pub(crate) generation: AtomicU64,
    pool: Option<ThreadPool>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("config", &self.config)
            .field("rows", &self.count())
            .field("chunks", &read_lock(&self.chunks).len())
            .finish()
    }
}

impl Collection {
    /// Empty collection pre-sized for `capacity` rows.
    pub fn new(capacity: usize) -> Self {
        Self::build(CollectionConfig::with_capacity(capacity))
    }

    pub fn with_config(config: CollectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: CollectionConfig) -> Self {
        let threads = config
            .scan_threads
            .unwrap_or_else(|| ResourceManager::auto_tune().scan_threads);

        let pool = if threads > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => Some(pool),
                Err(e) => {
                    tracing::warn!("scan pool unavailable, scanning sequentially: {}", e);
                    None
                }
            }
        } else {
            None
        };

        tracing::debug!(
            capacity = config.capacity,
            chunk_size = config.chunk_size,
            threads,
            "Created collection"
        );

        Self {
            config,
            schema: RwLock::new(Arc::new(Schema::new())),
            chunks: RwLock::new(Vec::new()),
            next_row: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            pool,
        }
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// Number of live rows.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Names of all columns, in creation order.
    pub fn columns(&self) -> Vec<String> {
        self.schema()
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Names of all indexes, in creation order.
    pub fn indexes(&self) -> Vec<String> {
        self.schema()
            .indexes()
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    // ── Schema ──────────────────────────────────────────────────────

    pub fn create_column(&self, name: &str, kind: ColumnKind) -> Result<()> {
        let mut schema = write_lock(&self.schema);
        let next = schema.with_column(name, kind)?;
        *schema = Arc::new(next);
        tracing::debug!(column = name, kind = kind.name(), "Created column");
        Ok(())
    }

    /// Register index `name` over `source`, populating it from existing
    /// rows. If `name` is a detached index restored from a snapshot with
    /// the same source, the predicate is attached to it instead.
    pub fn create_index<P>(&self, name: &str, source: &str, predicate: P) -> Result<()>
    where
        P: Predicate + 'static,
    {
        let predicate: Arc<dyn Predicate> = Arc::new(predicate);
        let mut schema = write_lock(&self.schema);

        let column = schema
            .column(source)
            .cloned()
            .ok_or_else(|| Error::UnknownColumn(source.to_string()))?;

        let next = match schema.lookup(name) {
            None => {
                let slot = schema.indexes().len();
                schema.with_index(Index::new(name, &column, slot, Some(predicate)))?
            }
            Some(Slot::Index(slot)) => {
                let existing = &schema.indexes()[slot];
                if existing.is_attached() || existing.source() != source {
                    return Err(Error::DuplicateName(name.to_string()));
                }
                tracing::debug!(index = name, "Attaching predicate to restored index");
                schema.replacing_index(existing.attach(predicate))
            }
            Some(Slot::Column(_)) => return Err(Error::DuplicateName(name.to_string())),
        };

        let index = next
            .index(name)
            .cloned()
            .ok_or_else(|| Error::UnknownSelector(name.to_string()))?;
        let lut = index.lookup_table(&column);
        let chunks = self.chunk_handles();
        self.for_each_chunk_mut(&chunks, |chunk| {
            chunk.sync(&next);
            chunk.rebuild_index(&index, &column, lut.as_deref());
        });

        *schema = Arc::new(next);
        tracing::debug!(
            index = name,
            source = source,
            chunks = chunks.len(),
            "Created index"
        );
        Ok(())
    }

    // ── Rows ────────────────────────────────────────────────────────

    /// Append one record. Keys with no matching column are ignored; `Null`
    /// values leave the column absent. Returns the new row index.
    pub fn insert(&self, record: &Record) -> Result<usize> {
        let schema = read_lock(&self.schema);

        for (name, value) in record {
            if let Some(column) = schema.column(name) {
                column.check(value)?;
            }
        }
        let mut cells = Vec::with_capacity(record.len());
        for (name, value) in record {
            if let Some(column) = schema.column(name) {
                if let Some(cell) = column.encode(value)? {
                    cells.push((column.slot(), cell));
                }
            }
        }

        let row = self.next_row.fetch_add(1, Ordering::SeqCst);
        let chunk_size = self.config.chunk_size;
        let handle = self.chunk_for(row / chunk_size, &schema);
        write_lock(&handle).insert(row % chunk_size, cells, &schema)?;
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(row)
    }

    /// Append a JSON object. Non-object JSON is a `TypeMismatch`.
    pub fn insert_object(&self, object: &serde_json::Value) -> Result<usize> {
        self.insert(&record_from_json(object)?)
    }

    /// Tombstone a row. Returns false if the row was not live.
    pub fn delete_at(&self, row: usize) -> Result<bool> {
        let _schema = read_lock(&self.schema);
        let handle = self.existing_chunk(row)?;
        let removed = write_lock(&handle).delete(row % self.config.chunk_size);
        if removed {
            self.count.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(removed)
    }

    /// Present values of a live row; `None` if the row is not live.
    pub fn fetch(&self, row: usize) -> Option<Record> {
        let schema = self.schema();
        let handle = self.existing_chunk(row).ok()?;
        let chunk = read_lock(&handle);
        let offset = row % self.config.chunk_size;
        if !chunk.fill().contains(offset) {
            return None;
        }
        let mut record = Record::with_capacity(schema.columns().len());
        for column in schema.columns() {
            if let Ok(Some(value)) = chunk.value(column, offset) {
                record.insert(column.name().to_string(), value);
            }
        }
        Some(record)
    }

    /// Value of `column` at `row`; `None` if absent or deleted.
    pub fn value_at(&self, column: &str, row: usize) -> Result<Option<Value>> {
        let schema = self.schema();
        let column = schema
            .column(column)
            .ok_or_else(|| Error::UnknownColumn(column.to_string()))?;
        let handle = self.existing_chunk(row)?;
        let chunk = read_lock(&handle);
        chunk.value(column, row % self.config.chunk_size)
    }

    /// Run `f` inside a fresh transaction. Writes made through the
    /// transaction apply as they happen; an error returned by `f` is passed
    /// through but does not roll anything back.
    pub fn query<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut txn = Transaction::new(self);
        f(&mut txn)
    }

    // ── Internals ───────────────────────────────────────────────────

    pub(crate) fn schema(&self) -> Arc<Schema> {
        Arc::clone(&read_lock(&self.schema))
    }

    pub(crate) fn chunk_handles(&self) -> Vec<ChunkHandle> {
        read_lock(&self.chunks).clone()
    }

    /// Chunk holding `row`, or `OutOfRange` if the row was never allocated.
    fn existing_chunk(&self, row: usize) -> Result<ChunkHandle> {
        let watermark = self.next_row.load(Ordering::SeqCst);
        let chunks = read_lock(&self.chunks);
        match chunks.get(row / self.config.chunk_size) {
            Some(handle) if row < watermark => Ok(Arc::clone(handle)),
            _ => Err(Error::OutOfRange {
                row,
                capacity: watermark,
            }),
        }
    }

    /// Chunk `id`, allocating it (and any gap before it) on first use.
    fn chunk_for(&self, id: usize, schema: &Schema) -> ChunkHandle {
        if let Some(handle) = read_lock(&self.chunks).get(id) {
            return Arc::clone(handle);
        }
        let mut chunks = write_lock(&self.chunks);
        while chunks.len() <= id {
            let next = chunks.len();
            let chunk = Chunk::new(next, self.config.chunk_size, self.presize(next), schema);
            tracing::debug!(chunk = next, capacity = chunk.capacity(), "Allocated chunk");
            chunks.push(Arc::new(RwLock::new(chunk)));
        }
        Arc::clone(&chunks[id])
    }

    /// Initial capacity for chunk `id` given the configured row capacity.
    fn presize(&self, id: usize) -> usize {
        let chunk_size = self.config.chunk_size;
        self.config
            .capacity
            .saturating_sub(id * chunk_size)
            .min(chunk_size)
    }

    /// Run `f` against each chunk under its read lock, fanning out on the
    /// scan pool when there is more than one chunk. `working[i]` belongs to
    /// `chunks[i]`.
    pub(crate) fn scan_chunks<F>(&self, chunks: &[ChunkHandle], working: &mut [Bitmap], f: F)
    where
        F: Fn(&Chunk, &mut Bitmap) + Send + Sync,
    {
        match &self.pool {
            Some(pool) if chunks.len() > 1 => pool.install(|| {
                chunks
                    .par_iter()
                    .zip(working.par_iter_mut())
                    .for_each(|(handle, bits)| f(&read_lock(handle), bits))
            }),
            _ => chunks
                .iter()
                .zip(working.iter_mut())
                .for_each(|(handle, bits)| f(&read_lock(handle), bits)),
        }
    }

    /// Run `f` against each chunk under its write lock, in parallel when
    /// possible.
    pub(crate) fn for_each_chunk_mut<F>(&self, chunks: &[ChunkHandle], f: F)
    where
        F: Fn(&mut Chunk) + Send + Sync,
    {
        match &self.pool {
            Some(pool) if chunks.len() > 1 => pool.install(|| {
                chunks
                    .par_iter()
                    .for_each(|handle| f(&mut write_lock(handle)))
            }),
            _ => chunks.iter().for_each(|handle| f(&mut write_lock(handle))),
        }
    }
}
