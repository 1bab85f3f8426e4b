//! Typed columns.
//!
//! A [`Column`] is the collection-wide descriptor (name, kind, enum
//! dictionary). Row data lives in one [`ColumnSegment`] per chunk.

pub mod segment;
pub mod string_table;

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

pub use segment::ColumnSegment;
pub use string_table::StringTable;

/// Storage kind of a column (stored as u8 in snapshots).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColumnKind {
    Float64 = 0,
    Bool = 1,
    /// Interned strings.
    Enum = 2,
    /// Untyped fallback, holds any non-null [`Value`].
    Any = 3,
}

impl ColumnKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Float64),
            1 => Some(Self::Bool),
            2 => Some(Self::Enum),
            3 => Some(Self::Any),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::Enum => "string",
            Self::Any => "any",
        }
    }
}

/// Strictly typed value as stored in a segment.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Float64(f64),
    Bool(bool),
    /// Interned string id.
    Enum(u32),
    Any(Value),
}

impl Cell {
    pub fn kind(&self) -> ColumnKind {
        match self {
            Cell::Float64(_) => ColumnKind::Float64,
            Cell::Bool(_) => ColumnKind::Bool,
            Cell::Enum(_) => ColumnKind::Enum,
            Cell::Any(_) => ColumnKind::Any,
        }
    }
}

/// Collection-wide column descriptor.
#[derive(Debug)]
pub struct Column {
    name: String,
    kind: ColumnKind,
    /// Position of this column's segment inside every chunk.
    slot: usize,
    /// Present only for `Enum` columns.
    dictionary: Option<RwLock<StringTable>>,
}

impl Column {
    pub fn new(name: &str, kind: ColumnKind, slot: usize) -> Self {
        let dictionary = (kind == ColumnKind::Enum).then(|| RwLock::new(StringTable::new()));
        Self {
            name: name.to_string(),
            kind,
            slot,
            dictionary,
        }
    }

    pub(crate) fn with_dictionary(name: &str, slot: usize, dictionary: StringTable) -> Self {
        Self {
            name: name.to_string(),
            kind: ColumnKind::Enum,
            slot,
            dictionary: Some(RwLock::new(dictionary)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::TypeMismatch {
            column: self.name.clone(),
            expected: self.kind.name(),
            found: value.type_name(),
        }
    }

    /// Check that `value` can be stored without interning anything.
    pub fn check(&self, value: &Value) -> Result<()> {
        match (self.kind, value) {
            (_, Value::Null)
            | (ColumnKind::Float64, Value::Float64(_))
            | (ColumnKind::Bool, Value::Bool(_))
            | (ColumnKind::Enum, Value::String(_))
            | (ColumnKind::Any, _) => Ok(()),
            _ => Err(self.mismatch(value)),
        }
    }

    /// Convert `value` into a typed cell. `Null` maps to `None` (absent).
    pub fn encode(&self, value: &Value) -> Result<Option<Cell>> {
        let cell = match (self.kind, value) {
            (_, Value::Null) => return Ok(None),
            (ColumnKind::Float64, Value::Float64(v)) => Cell::Float64(*v),
            (ColumnKind::Bool, Value::Bool(b)) => Cell::Bool(*b),
            (ColumnKind::Enum, Value::String(s)) => Cell::Enum(self.intern(s)),
            (ColumnKind::Any, v) => Cell::Any(v.clone()),
            _ => return Err(self.mismatch(value)),
        };
        Ok(Some(cell))
    }

    /// Convert a stored cell back into a public value.
    pub fn decode(&self, cell: &Cell) -> Value {
        match cell {
            Cell::Float64(v) => Value::Float64(*v),
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Enum(id) => self.resolve(*id).map_or(Value::Null, Value::String),
            Cell::Any(v) => v.clone(),
        }
    }

    fn intern(&self, s: &str) -> u32 {
        match &self.dictionary {
            Some(dict) => dict.write().unwrap_or_else(PoisonError::into_inner).intern(s),
            None => 0,
        }
    }

    /// String for an interned id.
    pub fn resolve(&self, id: u32) -> Option<String> {
        let dict = self.dictionary.as_ref()?;
        let dict = dict.read().unwrap_or_else(PoisonError::into_inner);
        dict.get(id).map(str::to_string)
    }

    /// Evaluate `f` once per distinct interned string; the result is
    /// indexed by id. `None` for non-enum columns.
    pub fn evaluate_dictionary<F: Fn(&str) -> bool>(&self, f: F) -> Option<Vec<bool>> {
        let dict = self.dictionary.as_ref()?;
        let dict = dict.read().unwrap_or_else(PoisonError::into_inner);
        Some(dict.evaluate(f))
    }

    /// Run `f` against the dictionary. `None` for non-enum columns.
    pub(crate) fn with_dictionary_ref<T>(&self, f: impl FnOnce(&StringTable) -> T) -> Option<T> {
        let dict = self.dictionary.as_ref()?;
        let dict = dict.read().unwrap_or_else(PoisonError::into_inner);
        Some(f(&dict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            ColumnKind::Float64,
            ColumnKind::Bool,
            ColumnKind::Enum,
            ColumnKind::Any,
        ] {
            assert_eq!(ColumnKind::from_u8(kind as u8), Some(kind));
        }
        assert_eq!(ColumnKind::from_u8(9), None);
    }

    #[test]
    fn test_encode_float() {
        let col = Column::new("age", ColumnKind::Float64, 0);
        assert_eq!(col.encode(&Value::Float64(3.0)).unwrap(), Some(Cell::Float64(3.0)));
        assert_eq!(col.encode(&Value::Null).unwrap(), None);

        let err = col.encode(&Value::String("old".into())).unwrap_err();
        assert_eq!(err.code(), "TYPE_MISMATCH");
        assert!(col.check(&Value::Bool(true)).is_err());
    }

    #[test]
    fn test_encode_enum_interns() {
        let col = Column::new("race", ColumnKind::Enum, 0);
        let a = col.encode(&"human".into()).unwrap();
        let b = col.encode(&"elf".into()).unwrap();
        let c = col.encode(&"human".into()).unwrap();
        assert_eq!(a, Some(Cell::Enum(0)));
        assert_eq!(b, Some(Cell::Enum(1)));
        assert_eq!(a, c);
        assert_eq!(col.decode(&Cell::Enum(1)), Value::String("elf".into()));
        assert_eq!(col.decode(&Cell::Enum(42)), Value::Null);
    }

    #[test]
    fn test_check_does_not_intern() {
        let col = Column::new("race", ColumnKind::Enum, 0);
        col.check(&"orc".into()).unwrap();
        assert_eq!(col.with_dictionary_ref(|d| d.len()), Some(0));
    }

    #[test]
    fn test_any_accepts_everything() {
        let col = Column::new("location", ColumnKind::Any, 0);
        let list = Value::List(vec![Value::Float64(1.0)]);
        assert_eq!(col.encode(&list).unwrap(), Some(Cell::Any(list.clone())));
        assert_eq!(col.decode(&Cell::Any(list.clone())), list);
    }

    #[test]
    fn test_evaluate_dictionary() {
        let col = Column::new("class", ColumnKind::Enum, 0);
        col.encode(&"mage".into()).unwrap();
        col.encode(&"rogue".into()).unwrap();
        assert_eq!(col.evaluate_dictionary(|s| s == "mage"), Some(vec![true, false]));

        let float = Column::new("hp", ColumnKind::Float64, 1);
        assert_eq!(float.evaluate_dictionary(|_| true), None);
    }
}
