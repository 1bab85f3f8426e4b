//! Kolumn: an embeddable in-memory columnar store.
//!
//! Rows live in fixed-size chunks of typed column segments. Boolean
//! indexes are derived from a predicate over one source column and kept
//! up to date on every write, so queries reduce to ANDing bitmaps.
//!
//! ```no_run
//! use kolumn::{Collection, ColumnKind, Value};
//!
//! # fn main() -> kolumn::Result<()> {
//! let players = Collection::new(1_000);
//! players.create_column("class", ColumnKind::Enum)?;
//! players.create_column("age", ColumnKind::Float64)?;
//! players.create_index("mage", "class", |v: &Value| v == "mage")?;
//!
//! players.insert_object(&serde_json::json!({"class": "mage", "age": 25}))?;
//!
//! let old_mages = players.query(|txn| {
//!     Ok(txn.with(&["mage"])?.with_float("age", |age| age >= 30.0)?.count())
//! })?;
//! # let _ = old_mages;
//! # Ok(())
//! # }
//! ```

pub mod bitmap;
mod chunk;
pub mod collection;
pub mod column;
pub mod config;
pub mod error;
pub mod index;
pub mod resource;
mod schema;
mod snapshot;
pub mod txn;
pub mod value;

pub use bitmap::Bitmap;
pub use collection::Collection;
pub use column::ColumnKind;
pub use config::CollectionConfig;
pub use error::{Error, Result};
pub use index::Predicate;
pub use txn::{Cursor, Float64Reader, StringReader, Transaction};
pub use value::{record_from_json, records_from_json_str, Record, Value};
