//! Data-only value snapshots
//!
//! Hosts can persist or ship guest data (nil, booleans, numbers, strings and
//! tables of those) as bincode bytes. Functions, threads, channels and
//! userdata carry code or live state and are rejected.
//!
//! Tables are copied by value: a table reachable twice through distinct
//! paths is written twice and restored as two tables. A table that contains
//! itself, directly or through other tables, is rejected. Metatables are not
//! part of a snapshot.

use lume_core::{Table, TypeTag, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error during snapshot or restore
#[derive(Debug)]
pub enum SnapshotError {
    /// The value kind carries code or runtime state
    Unsupported(TypeTag),
    /// A table (transitively) contains itself
    Cycle,
    /// Bytes decoded to something that cannot be rebuilt as a value
    InvalidData(String),
    /// Bincode encoding/decoding failed
    BincodeError(Box<bincode::Error>),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Unsupported(kind) => write!(f, "cannot snapshot a {} value", kind),
            SnapshotError::Cycle => write!(f, "cannot snapshot a table that contains itself"),
            SnapshotError::InvalidData(msg) => write!(f, "invalid snapshot data: {}", msg),
            SnapshotError::BincodeError(e) => write!(f, "snapshot encoding error: {}", e),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SnapshotError::BincodeError(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<bincode::Error> for SnapshotError {
    fn from(e: bincode::Error) -> Self {
        SnapshotError::BincodeError(Box::new(e))
    }
}

/// Owned, serializable mirror of the data-only value kinds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TypedValue {
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Table {
        /// Array part, keys `1..=array.len()`
        array: Vec<TypedValue>,
        /// Remaining entries in iteration order
        hash: Vec<(TypedValue, TypedValue)>,
    },
}

impl TypedValue {
    pub fn from_value(value: &Value) -> Result<Self, SnapshotError> {
        let mut path = Vec::new();
        Self::convert(value, &mut path)
    }

    fn convert(value: &Value, path: &mut Vec<*const ()>) -> Result<Self, SnapshotError> {
        match value {
            Value::Nil => Ok(TypedValue::Nil),
            Value::Bool(b) => Ok(TypedValue::Bool(*b)),
            Value::Number(n) => Ok(TypedValue::Number(n.value())),
            Value::String(s) => Ok(TypedValue::String(s.to_string())),
            Value::Table(t) => {
                let ptr = t.as_ptr();
                if path.contains(&ptr) {
                    return Err(SnapshotError::Cycle);
                }
                path.push(ptr);
                let result = Self::convert_table(t, path);
                path.pop();
                result
            }
            other => Err(SnapshotError::Unsupported(other.kind())),
        }
    }

    fn convert_table(table: &Table, path: &mut Vec<*const ()>) -> Result<Self, SnapshotError> {
        let len = table.len();
        let mut array = Vec::with_capacity(len);
        for i in 1..=len {
            array.push(Self::convert(&table.raw_get_int(i as i64), path)?);
        }

        let in_array = |key: &Value| match key {
            Value::Number(n) => n.to_integer().is_some_and(|i| i >= 1 && i as usize <= len),
            _ => false,
        };
        let mut hash = Vec::new();
        for (key, value) in table.iter().filter(|(k, _)| !in_array(k)) {
            hash.push((Self::convert(&key, path)?, Self::convert(&value, path)?));
        }
        Ok(TypedValue::Table { array, hash })
    }

    /// Rebuild a runtime value; tables come back without metatables
    pub fn to_value(&self) -> Result<Value, SnapshotError> {
        match self {
            TypedValue::Nil => Ok(Value::Nil),
            TypedValue::Bool(b) => Ok(Value::Bool(*b)),
            TypedValue::Number(n) => Ok(Value::from(*n)),
            TypedValue::String(s) => Ok(Value::from(s.as_str())),
            TypedValue::Table { array, hash } => {
                let table = Table::with_capacity(array.len(), hash.len());
                for (i, item) in array.iter().enumerate() {
                    table.raw_set_int(i as i64 + 1, item.to_value()?);
                }
                for (key, value) in hash {
                    table
                        .raw_set(key.to_value()?, value.to_value()?)
                        .map_err(|e| SnapshotError::InvalidData(e.to_string()))?;
                }
                Ok(Value::Table(table))
            }
        }
    }

    /// Serialize to binary format (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(SnapshotError::from)
    }

    /// Deserialize from binary format (bincode)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        bincode::deserialize(bytes).map_err(SnapshotError::from)
    }
}

/// Encode a data-only value as bytes
pub fn snapshot(value: &Value) -> Result<Vec<u8>, SnapshotError> {
    TypedValue::from_value(value)?.to_bytes()
}

/// Rebuild a value from `snapshot` output
pub fn restore(bytes: &[u8]) -> Result<Value, SnapshotError> {
    TypedValue::from_bytes(bytes)?.to_value()
}
