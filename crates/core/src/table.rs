//! Table: the hybrid array/hash aggregate
//!
//! A table keeps three stores:
//!
//! - `array`: dense 1-based integer keys. Holes read back as Nil; the vector
//!   never ends in Nil.
//! - `strdict`: string keys (the common case for field access).
//! - `dict`: every other key, hashed by value for scalars and by identity for
//!   reference kinds.
//!
//! Non-array keys are additionally recorded in `keys`, in first-insertion
//! order, with `k2i` mapping each key to its slot. Deleting a hash key leaves
//! a tombstone in `keys` (and keeps the `k2i` entry so `next` can continue
//! from a key removed mid-traversal). Tombstones are compacted when a new key
//! arrives and they outnumber live keys.
//!
//! A key lives in exactly one store. Appending at `len + 1` pulls the
//! following contiguous integer keys out of `dict` into `array`.
//!
//! ## Locking
//!
//! The handle is an `Arc<RwLock<..>>`. No lock is held while a metatable
//! handler runs, so handlers may freely read and write the same table.

use crate::error::ValueError;
use crate::number::MAX_EXACT_INTEGER;
use crate::thread::Thread;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Maximum number of `__index` / `__newindex` hops before giving up
pub const MAX_META_CHAIN: usize = 100;

/// Tombstones tolerated before compaction is considered
const COMPACT_MIN_DEAD: usize = 16;

/// Hash-map key wrapper
///
/// Equality is raw `Value` equality. Numbers hash their bits with -0
/// folded into 0; reference kinds hash their address.
#[derive(Debug, Clone)]
struct HashKey(Value);

impl PartialEq for HashKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

// NaN never becomes a key, so Value equality is reflexive here
impl Eq for HashKey {}

impl Hash for HashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Nil => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Number(n) => {
                2u8.hash(state);
                let v = n.value();
                let v = if v == 0.0 { 0.0 } else { v };
                v.to_bits().hash(state);
            }
            Value::String(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Value::Function(f) => {
                4u8.hash(state);
                (Arc::as_ptr(f) as *const () as usize).hash(state);
            }
            Value::Userdata(u) => {
                5u8.hash(state);
                (Arc::as_ptr(u) as *const () as usize).hash(state);
            }
            Value::Thread(t) => {
                6u8.hash(state);
                (t.as_ptr() as usize).hash(state);
            }
            Value::Table(t) => {
                7u8.hash(state);
                (t.as_ptr() as usize).hash(state);
            }
            Value::Channel(c) => {
                8u8.hash(state);
                (c.as_ptr() as usize).hash(state);
            }
        }
    }
}

/// Reject keys that can never be stored
fn check_key(key: &Value) -> Result<(), ValueError> {
    match key {
        Value::Nil => Err(ValueError::InvalidKey("key is nil")),
        Value::Number(n) if n.is_nan() => Err(ValueError::InvalidKey("key is NaN")),
        _ => Ok(()),
    }
}

/// 1-based array position for positive integral number keys
fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) => {
            let v = n.value();
            if v >= 1.0 && v.fract() == 0.0 && v <= MAX_EXACT_INTEGER {
                Some(v as usize)
            } else {
                None
            }
        }
        _ => None,
    }
}

#[derive(Debug, Default)]
struct TableData {
    array: Vec<Value>,
    strdict: HashMap<Arc<str>, Value>,
    dict: HashMap<HashKey, Value>,
    keys: Vec<Option<Value>>,
    k2i: HashMap<HashKey, usize>,
    dead: usize,
    metatable: Value,
}

impl TableData {
    fn get(&self, key: &Value) -> Value {
        if let Some(i) = array_index(key)
            && i <= self.array.len()
        {
            return self.array[i - 1].clone();
        }
        self.get_hash(key)
    }

    fn get_hash(&self, key: &Value) -> Value {
        match key {
            Value::Nil => Value::Nil,
            Value::Number(n) if n.is_nan() => Value::Nil,
            Value::String(s) => self.strdict.get(s).cloned().unwrap_or_default(),
            _ => self
                .dict
                .get(&HashKey(key.clone()))
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Store a value under an already-validated key
    fn set(&mut self, key: Value, value: Value) {
        if let Some(i) = array_index(&key) {
            let len = self.array.len();
            if i <= len {
                self.array[i - 1] = value;
                while matches!(self.array.last(), Some(Value::Nil)) {
                    self.array.pop();
                }
                return;
            }
            if i == len + 1 && !value.is_nil() {
                self.array.push(value);
                self.migrate();
                return;
            }
        }
        if value.is_nil() {
            self.remove_hash(key);
        } else {
            self.insert_hash(key, value);
        }
    }

    /// Move `len + 1, len + 2, ...` from the hash part into the array part
    fn migrate(&mut self) {
        loop {
            let next = HashKey(Value::from(self.array.len() + 1));
            let Some(value) = self.dict.remove(&next) else {
                break;
            };
            self.array.push(value);
            if let Some(pos) = self.k2i.remove(&next)
                && self.keys[pos].take().is_some()
            {
                self.dead += 1;
            }
        }
    }

    fn insert_hash(&mut self, key: Value, value: Value) {
        let existed = match &key {
            Value::String(s) => self.strdict.insert(s.clone(), value).is_some(),
            _ => self.dict.insert(HashKey(key.clone()), value).is_some(),
        };
        if existed {
            return;
        }
        if self.dead > COMPACT_MIN_DEAD && self.dead > self.keys.len() - self.dead {
            self.compact();
        }
        self.k2i.insert(HashKey(key.clone()), self.keys.len());
        self.keys.push(Some(key));
    }

    fn remove_hash(&mut self, key: Value) {
        let removed = match &key {
            Value::String(s) => self.strdict.remove(s).is_some(),
            _ => self.dict.remove(&HashKey(key.clone())).is_some(),
        };
        if !removed {
            return;
        }
        // The k2i entry stays behind so `next` still accepts this key
        if let Some(&pos) = self.k2i.get(&HashKey(key))
            && self.keys[pos].take().is_some()
        {
            self.dead += 1;
        }
    }

    fn compact(&mut self) {
        let live: Vec<Value> = self.keys.drain(..).flatten().collect();
        self.k2i.clear();
        for (pos, key) in live.iter().enumerate() {
            self.k2i.insert(HashKey(key.clone()), pos);
        }
        self.keys = live.into_iter().map(Some).collect();
        self.dead = 0;
    }

    fn next(&self, key: &Value) -> Result<Option<(Value, Value)>, ValueError> {
        let (mut array_pos, mut key_pos) = (0, 0);
        if !key.is_nil() {
            match array_index(key) {
                Some(i) if i <= self.array.len() => array_pos = i,
                index => match self.k2i.get(&HashKey(key.clone())) {
                    Some(&pos) => {
                        array_pos = self.array.len();
                        key_pos = pos + 1;
                    }
                    // an array key deleted mid-traversal may have trimmed the tail
                    None if index.is_some() => array_pos = self.array.len(),
                    None => return Err(ValueError::InvalidKey("invalid key to 'next'")),
                },
            }
        }

        for (i, value) in self.array.iter().enumerate().skip(array_pos) {
            if !value.is_nil() {
                return Ok(Some((Value::from(i + 1), value.clone())));
            }
        }
        for slot in self.keys.iter().skip(key_pos) {
            if let Some(k) = slot {
                return Ok(Some((k.clone(), self.get_hash(k))));
            }
        }
        Ok(None)
    }
}

/// Shared handle to a table; clones alias the same storage
#[derive(Clone, Default)]
pub struct Table(Arc<RwLock<TableData>>);

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the array and hash parts
    pub fn with_capacity(narray: usize, nhash: usize) -> Self {
        Table(Arc::new(RwLock::new(TableData {
            array: Vec::with_capacity(narray),
            strdict: HashMap::with_capacity(nhash),
            keys: Vec::with_capacity(nhash),
            k2i: HashMap::with_capacity(nhash),
            ..TableData::default()
        })))
    }

    /// Identity token used by `describe` and hashing
    pub fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }

    fn read(&self) -> RwLockReadGuard<'_, TableData> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableData> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lookup without metatable fallback; Nil and NaN keys read Nil
    pub fn raw_get(&self, key: &Value) -> Value {
        self.read().get(key)
    }

    /// Store without metatable fallback; a Nil value deletes the key
    pub fn raw_set(&self, key: Value, value: Value) -> Result<(), ValueError> {
        check_key(&key)?;
        self.write().set(key, value);
        Ok(())
    }

    pub fn raw_get_str(&self, key: &str) -> Value {
        self.read()
            .strdict
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn raw_set_str(&self, key: &str, value: Value) {
        self.write().set(Value::from(key), value);
    }

    pub fn raw_get_int(&self, key: i64) -> Value {
        self.read().get(&Value::from(key))
    }

    pub fn raw_set_int(&self, key: i64, value: Value) {
        self.write().set(Value::from(key), value);
    }

    /// Store at `len() + 1`; appending Nil is a no-op
    pub fn append(&self, value: Value) {
        if value.is_nil() {
            return;
        }
        let mut data = self.write();
        let key = Value::from(data.array.len() + 1);
        data.set(key, value);
    }

    /// Length of the array part
    pub fn len(&self) -> usize {
        self.read().array.len()
    }

    pub fn is_empty(&self) -> bool {
        let data = self.read();
        data.array.is_empty() && data.strdict.is_empty() && data.dict.is_empty()
    }

    /// Number of live keys in the hash parts
    pub fn hash_len(&self) -> usize {
        let data = self.read();
        data.strdict.len() + data.dict.len()
    }

    /// Successor of `key` in iteration order
    ///
    /// Pass Nil to start. The array part comes first in index order (holes
    /// skipped), then hash keys in first-insertion order. Keys deleted during
    /// the traversal are still accepted. A positive integer past the array
    /// part continues with the hash part; any other key that was never in
    /// the table fails with `InvalidKey`.
    pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>, ValueError> {
        self.read().next(key)
    }

    /// Iterate all live entries via repeated `next`
    pub fn iter(&self) -> Iter {
        Iter {
            table: self.clone(),
            key: Value::Nil,
            done: false,
        }
    }

    pub fn metatable(&self) -> Value {
        self.read().metatable.clone()
    }

    pub fn set_metatable(&self, metatable: Value) {
        self.write().metatable = metatable;
    }

    /// Metatable-aware lookup
    ///
    /// A present key is returned directly. Otherwise the metatable's
    /// `__index` decides: a function is called with `(table, key)` and its
    /// first result is used, a table repeats the lookup there, and anything
    /// else yields Nil.
    pub fn get(&self, thread: &Thread, key: &Value) -> Result<Value, ValueError> {
        let mut receiver = self.clone();
        for _ in 0..MAX_META_CHAIN {
            let (value, metatable) = {
                let data = receiver.read();
                (data.get(key), data.metatable.clone())
            };
            if !value.is_nil() {
                return Ok(value);
            }
            match metafield(&metatable, "__index") {
                Value::Function(f) => {
                    let results = f.call(thread, vec![Value::Table(receiver), key.clone()])?;
                    return Ok(first_result(results));
                }
                Value::Table(next) => receiver = next,
                _ => return Ok(Value::Nil),
            }
        }
        Err(ValueError::MetaChainTooDeep {
            limit: MAX_META_CHAIN,
        })
    }

    /// Metatable-aware store
    ///
    /// Existing keys are overwritten in place. For a missing key the
    /// metatable's `__newindex` decides: a function is called with
    /// `(table, key, value)`, a table repeats the store there, and anything
    /// else stores raw.
    pub fn set(&self, thread: &Thread, key: Value, value: Value) -> Result<(), ValueError> {
        check_key(&key)?;
        let mut receiver = self.clone();
        for _ in 0..MAX_META_CHAIN {
            let (present, metatable) = {
                let data = receiver.read();
                (!data.get(&key).is_nil(), data.metatable.clone())
            };
            let handler = if present {
                Value::Nil
            } else {
                metafield(&metatable, "__newindex")
            };
            match handler {
                Value::Function(f) => {
                    f.call(thread, vec![Value::Table(receiver), key, value])?;
                    return Ok(());
                }
                Value::Table(next) => receiver = next,
                _ => {
                    receiver.write().set(key, value);
                    return Ok(());
                }
            }
        }
        Err(ValueError::MetaChainTooDeep {
            limit: MAX_META_CHAIN,
        })
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table: {:p}", self.as_ptr())
    }
}

/// Iterator over a table's entries, following `next` order
pub struct Iter {
    table: Table,
    key: Value,
    done: bool,
}

impl Iterator for Iter {
    type Item = (Value, Value);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.table.next(&self.key) {
            Ok(Some((key, value))) => {
                self.key = key.clone();
                Some((key, value))
            }
            Ok(None) | Err(_) => {
                self.done = true;
                None
            }
        }
    }
}

fn metafield(metatable: &Value, name: &str) -> Value {
    match metatable {
        Value::Table(mt) => mt.raw_get_str(name),
        _ => Value::Nil,
    }
}

fn first_result(results: Vec<Value>) -> Value {
    results.into_iter().next().unwrap_or_default()
}

/// `__index` lookup for receivers that are not tables (userdata, threads)
pub(crate) fn index_via_metatable(
    thread: &Thread,
    receiver: &Value,
    metatable: &Value,
    key: &str,
) -> Result<Value, ValueError> {
    match metafield(metatable, "__index") {
        Value::Function(f) => {
            let results = f.call(thread, vec![receiver.clone(), Value::from(key)])?;
            Ok(first_result(results))
        }
        Value::Table(t) => t.get(thread, &Value::from(key)),
        _ => Ok(Value::Nil),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Function;
    use crate::global::Global;
    use crate::options::Options;

    fn main_thread() -> Thread {
        Global::new(Options::default())
    }

    fn keys_of(t: &Table) -> Vec<Value> {
        t.iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn test_array_hash_transition() {
        let t = Table::new();
        t.raw_set_int(1, Value::from("a"));
        t.raw_set_int(2, Value::from("b"));
        t.raw_set_int(3, Value::from("c"));
        assert_eq!(t.len(), 3);
        assert_eq!(t.hash_len(), 0);

        t.raw_set_int(5, Value::from("e"));
        assert_eq!(t.len(), 3);
        assert_eq!(t.hash_len(), 1);

        t.raw_set_int(4, Value::from("d"));
        assert_eq!(t.len(), 5);
        assert_eq!(t.hash_len(), 0);
        assert_eq!(t.raw_get_int(5), Value::from("e"));
    }

    #[test]
    fn test_integral_float_keys_normalise() {
        let t = Table::new();
        t.raw_set(Value::from(2.0), Value::from("two")).unwrap();
        assert_eq!(t.raw_get_int(2), Value::from("two"));

        t.raw_set(Value::from(-0.0), Value::from("zero")).unwrap();
        assert_eq!(t.raw_get(&Value::from(0)), Value::from("zero"));
        assert_eq!(t.hash_len(), 2);
    }

    #[test]
    fn test_string_and_number_keys_are_distinct() {
        let t = Table::new();
        t.raw_set_int(1, Value::from("int"));
        t.raw_set_str("1", Value::from("str"));
        assert_eq!(t.raw_get_int(1), Value::from("int"));
        assert_eq!(t.raw_get_str("1"), Value::from("str"));
    }

    #[test]
    fn test_nil_and_nan_keys() {
        let t = Table::new();
        assert!(matches!(
            t.raw_set(Value::Nil, Value::TRUE),
            Err(ValueError::InvalidKey(_))
        ));
        assert!(matches!(
            t.raw_set(Value::from(f64::NAN), Value::TRUE),
            Err(ValueError::InvalidKey(_))
        ));
        assert_eq!(t.raw_get(&Value::Nil), Value::Nil);
        assert_eq!(t.raw_get(&Value::from(f64::NAN)), Value::Nil);
    }

    #[test]
    fn test_delete_leaves_hole_and_trims_tail() {
        let t = Table::new();
        for i in 1..=4 {
            t.raw_set_int(i, Value::from(i * 10));
        }
        t.raw_set_int(2, Value::Nil);
        assert_eq!(t.len(), 4);
        assert_eq!(t.raw_get_int(2), Value::Nil);

        t.raw_set_int(4, Value::Nil);
        assert_eq!(t.len(), 3);
        t.raw_set_int(3, Value::Nil);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_append() {
        let t = Table::new();
        t.append(Value::from("x"));
        t.append(Value::Nil);
        t.append(Value::from("y"));
        assert_eq!(t.len(), 2);
        assert_eq!(t.raw_get_int(2), Value::from("y"));
    }

    #[test]
    fn test_iteration_order_with_delete_and_reinsert() {
        let t = Table::new();
        t.raw_set_int(1, Value::from("one"));
        t.raw_set_str("a", Value::from(1));
        t.raw_set_str("b", Value::from(2));
        t.raw_set_str("c", Value::from(3));
        t.raw_set(Value::TRUE, Value::from(4)).unwrap();

        t.raw_set_str("b", Value::Nil);
        assert_eq!(
            keys_of(&t),
            vec![
                Value::from(1),
                Value::from("a"),
                Value::from("c"),
                Value::TRUE
            ]
        );

        t.raw_set_str("b", Value::from(5));
        assert_eq!(
            keys_of(&t),
            vec![
                Value::from(1),
                Value::from("a"),
                Value::from("c"),
                Value::TRUE,
                Value::from("b")
            ]
        );
    }

    #[test]
    fn test_next_skips_holes_and_continues_after_delete() {
        let t = Table::new();
        t.raw_set_int(1, Value::from("x"));
        t.raw_set_int(2, Value::from("y"));
        t.raw_set_int(3, Value::from("z"));
        t.raw_set_str("k", Value::from(1));
        t.raw_set_str("m", Value::from(2));
        t.raw_set_int(2, Value::Nil);

        let first = t.next(&Value::Nil).unwrap();
        assert_eq!(first, Some((Value::from(1), Value::from("x"))));
        let second = t.next(&Value::from(1)).unwrap();
        assert_eq!(second, Some((Value::from(3), Value::from("z"))));

        let (k, _) = t.next(&Value::from(3)).unwrap().unwrap();
        assert_eq!(k, Value::from("k"));
        // deleting the current key mid-traversal keeps `next` working
        t.raw_set_str("k", Value::Nil);
        assert_eq!(
            t.next(&Value::from("k")).unwrap(),
            Some((Value::from("m"), Value::from(2)))
        );
        assert_eq!(t.next(&Value::from("m")).unwrap(), None);
    }

    #[test]
    fn test_clear_array_during_traversal() {
        let t = Table::new();
        for i in 1..=3 {
            t.raw_set_int(i, Value::from(i * 10));
        }
        t.raw_set_str("tail", Value::TRUE);

        let mut key = Value::Nil;
        let mut visited = Vec::new();
        while let Some((k, _)) = t.next(&key).unwrap() {
            t.raw_set(k.clone(), Value::Nil).unwrap();
            visited.push(k.clone());
            key = k;
        }
        assert_eq!(
            visited,
            vec![
                Value::from(1),
                Value::from(2),
                Value::from(3),
                Value::from("tail")
            ]
        );
        assert_eq!(t.len(), 0);
        assert_eq!(t.hash_len(), 0);
        assert_eq!(t.next(&Value::Nil).unwrap(), None);
    }

    #[test]
    fn test_delete_last_array_key_mid_traversal() {
        let t = Table::new();
        t.raw_set_int(1, Value::from("a"));
        t.raw_set_int(2, Value::from("b"));
        t.raw_set_str("k", Value::from(1));

        let (k, _) = t.next(&Value::from(1)).unwrap().unwrap();
        assert_eq!(k, Value::from(2));
        t.raw_set_int(2, Value::Nil);
        assert_eq!(t.len(), 1);
        assert_eq!(
            t.next(&Value::from(2)).unwrap(),
            Some((Value::from("k"), Value::from(1)))
        );
    }

    #[test]
    fn test_delete_earlier_array_keys_while_iterating() {
        let t = Table::new();
        for i in 1..=4 {
            t.raw_set_int(i, Value::from(i));
        }
        let mut key = Value::Nil;
        let mut seen = 0;
        while let Some((k, _)) = t.next(&key).unwrap() {
            seen += 1;
            if k == Value::from(3) {
                t.raw_set_int(1, Value::Nil);
                t.raw_set_int(2, Value::Nil);
            }
            key = k;
        }
        assert_eq!(seen, 4);
        assert_eq!(t.len(), 4);
        assert_eq!(t.raw_get_int(1), Value::Nil);
    }

    #[test]
    fn test_nil_at_len_plus_one_leaves_hash_keys() {
        let t = Table::new();
        t.raw_set_int(1, Value::from("a"));
        t.raw_set_int(3, Value::from("c"));
        t.raw_set_int(4, Value::from("d"));
        assert_eq!(t.len(), 1);
        assert_eq!(t.hash_len(), 2);

        t.raw_set_int(2, Value::Nil);
        assert_eq!(t.len(), 1);
        assert_eq!(t.hash_len(), 2);
        assert_eq!(t.raw_get_int(3), Value::from("c"));
        assert_eq!(t.raw_get_int(4), Value::from("d"));
        assert!(t.next(&Value::from(2)).is_ok());
    }

    #[test]
    fn test_next_unknown_key_fails() {
        let t = Table::new();
        t.raw_set_str("a", Value::TRUE);
        assert!(matches!(
            t.next(&Value::from("zzz")),
            Err(ValueError::InvalidKey(_))
        ));
        assert!(t.next(&Value::from(f64::NAN)).is_err());
    }

    #[test]
    fn test_compaction_preserves_order() {
        let t = Table::new();
        for i in 0..40 {
            t.raw_set_str(&format!("k{}", i), Value::from(i));
        }
        for i in 0..30 {
            t.raw_set_str(&format!("k{}", i), Value::Nil);
        }
        t.raw_set_str("late", Value::TRUE);

        let mut expected: Vec<Value> = (30..40).map(|i| Value::from(format!("k{}", i))).collect();
        expected.push(Value::from("late"));
        assert_eq!(keys_of(&t), expected);
        assert_eq!(t.hash_len(), 11);
    }

    #[test]
    fn test_reference_keys_by_identity() {
        let t = Table::new();
        let a = Table::new();
        let b = Table::new();
        t.raw_set(Value::from(a.clone()), Value::from("a")).unwrap();
        t.raw_set(Value::from(b.clone()), Value::from("b")).unwrap();
        assert_eq!(t.raw_get(&Value::from(a)), Value::from("a"));
        assert_eq!(t.raw_get(&Value::from(b)), Value::from("b"));
        assert_eq!(t.raw_get(&Value::from(Table::new())), Value::Nil);
    }

    #[test]
    fn test_index_table_chain() {
        let main = main_thread();
        let base = Table::new();
        base.raw_set_str("greeting", Value::from("hello"));
        let mt = Table::new();
        mt.raw_set_str("__index", Value::from(base));
        let t = Table::new();
        t.set_metatable(Value::from(mt));

        assert_eq!(
            t.get(&main, &Value::from("greeting")).unwrap(),
            Value::from("hello")
        );
        assert_eq!(t.get(&main, &Value::from("other")).unwrap(), Value::Nil);
    }

    #[test]
    fn test_index_function_handler() {
        let main = main_thread();
        let handler = Function::native(Table::new(), |_, args| {
            let key = args.get(1).cloned().unwrap_or_default();
            Ok(vec![Value::from(format!("default:{}", key))])
        });
        let mt = Table::new();
        mt.raw_set_str("__index", Value::from(handler));
        let t = Table::new();
        t.set_metatable(Value::from(mt));
        t.raw_set_str("real", Value::from(1));

        assert_eq!(t.get(&main, &Value::from("real")).unwrap(), Value::from(1));
        assert_eq!(
            t.get(&main, &Value::from("x")).unwrap(),
            Value::from("default:x")
        );
    }

    #[test]
    fn test_newindex_table_and_function() {
        let main = main_thread();
        let sink = Table::new();
        let mt = Table::new();
        mt.raw_set_str("__newindex", Value::from(sink.clone()));
        let t = Table::new();
        t.set_metatable(Value::from(mt.clone()));

        t.set(&main, Value::from("k"), Value::from(1)).unwrap();
        assert_eq!(t.raw_get_str("k"), Value::Nil);
        assert_eq!(sink.raw_get_str("k"), Value::from(1));

        // existing keys bypass __newindex
        t.raw_set_str("own", Value::from(1));
        t.set(&main, Value::from("own"), Value::from(2)).unwrap();
        assert_eq!(t.raw_get_str("own"), Value::from(2));

        let log = Table::new();
        let log_handle = log.clone();
        let handler = Function::native(Table::new(), move |_, args| {
            log_handle.append(args.get(1).cloned().unwrap_or_default());
            Ok(vec![])
        });
        mt.raw_set_str("__newindex", Value::from(handler));
        t.set(&main, Value::from("seen"), Value::TRUE).unwrap();
        assert_eq!(log.raw_get_int(1), Value::from("seen"));
        assert_eq!(t.raw_get_str("seen"), Value::Nil);
    }

    #[test]
    fn test_metatable_self_loop_terminates() {
        let main = main_thread();
        let t = Table::new();
        t.raw_set_str("__index", Value::from(t.clone()));
        t.raw_set_str("__newindex", Value::from(t.clone()));
        t.set_metatable(Value::from(t.clone()));

        assert_eq!(
            t.get(&main, &Value::from("missing")),
            Err(ValueError::MetaChainTooDeep {
                limit: MAX_META_CHAIN
            })
        );
        assert!(matches!(
            t.set(&main, Value::from("missing"), Value::TRUE),
            Err(ValueError::MetaChainTooDeep { .. })
        ));
        // present keys never consult the metatable
        assert_eq!(
            t.get(&main, &Value::from("__index")).unwrap(),
            Value::from(t.clone())
        );
    }

    #[test]
    fn test_set_nil_key_fails_before_metatable() {
        let main = main_thread();
        let t = Table::new();
        assert!(t.set(&main, Value::Nil, Value::TRUE).is_err());
        assert_eq!(t.get(&main, &Value::Nil).unwrap(), Value::Nil);
    }
}
