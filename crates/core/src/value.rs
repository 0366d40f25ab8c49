//! Value: what the guest language talks about
//!
//! A closed sum type with one case per kind. Scalars (Nil, Bool, Number,
//! String) are held by value; strings are shared immutable `Arc<str>` so
//! cloning a Value never copies text. Table, Function, Userdata, Thread and
//! Channel hold `Arc`-backed handles: every holder sees the same instance and
//! equality is identity.
//!
//! # Capability contract
//!
//! Every kind supports the same four operations, dispatched by `match`:
//!
//! | Operation | Result |
//! |-----------|--------|
//! | `describe` | text; reference kinds include an identity token |
//! | `kind` | the [`TypeTag`] |
//! | `as_function` | `Some` only for functions |
//! | `index` | attribute lookup, Nil unless a metatable routes it |
//!
//! # Send/Sync
//!
//! Coroutines run on `may` worker threads, so Values cross OS threads.
//! Every payload is `Send + Sync` on its own: tables sit behind `RwLock`,
//! native functions are `Fn + Send + Sync`, userdata payloads are
//! `Any + Send + Sync`, and channel handles are declared shareable in
//! `channel.rs`.

use crate::channel::Channel;
use crate::error::ValueError;
use crate::function::Function;
use crate::number::{Number, parse_number};
use crate::table::Table;
use crate::thread::Thread;
use crate::userdata::Userdata;
use std::fmt;
use std::sync::Arc;

/// Type tag of a value, as reported by the guest `type()` function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeTag {
    Nil,
    Boolean,
    Number,
    String,
    Function,
    Userdata,
    Thread,
    Table,
    Channel,
}

impl TypeTag {
    /// Guest-visible type name
    pub const fn name(self) -> &'static str {
        match self {
            TypeTag::Nil => "nil",
            TypeTag::Boolean => "boolean",
            TypeTag::Number => "number",
            TypeTag::String => "string",
            TypeTag::Function => "function",
            TypeTag::Userdata => "userdata",
            TypeTag::Thread => "thread",
            TypeTag::Table => "table",
            TypeTag::Channel => "channel",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A first-class guest value
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The single absent value
    #[default]
    Nil,

    Bool(bool),

    /// Double-precision number (integer-ness is derived)
    Number(Number),

    /// Immutable shared text
    String(Arc<str>),

    /// Native callable or compiled closure
    Function(Arc<Function>),

    /// Opaque host payload with environment and metatable
    Userdata(Arc<Userdata>),

    /// Coroutine handle
    Thread(Thread),

    /// Hybrid array/hash aggregate, the only mutable composite
    Table(Table),

    /// Blocking FIFO for inter-thread communication
    Channel(Channel),
}

impl Value {
    pub const TRUE: Value = Value::Bool(true);
    pub const FALSE: Value = Value::Bool(false);

    pub fn kind(&self) -> TypeTag {
        match self {
            Value::Nil => TypeTag::Nil,
            Value::Bool(_) => TypeTag::Boolean,
            Value::Number(_) => TypeTag::Number,
            Value::String(_) => TypeTag::String,
            Value::Function(_) => TypeTag::Function,
            Value::Userdata(_) => TypeTag::Userdata,
            Value::Thread(_) => TypeTag::Thread,
            Value::Table(_) => TypeTag::Table,
            Value::Channel(_) => TypeTag::Channel,
        }
    }

    /// Guest-visible type name (`type(v)`)
    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    /// Human-readable representation
    ///
    /// Reference kinds render as `"<kind>: 0x<address>"`, so two distinct
    /// instances never describe alike.
    pub fn describe(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(true) => "true".to_string(),
            Value::Bool(false) => "false".to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.to_string(),
            Value::Function(f) => format!("function: {:p}", Arc::as_ptr(f)),
            Value::Userdata(u) => format!("userdata: {:p}", Arc::as_ptr(u)),
            Value::Thread(t) => format!("thread: {:p}", t.as_ptr()),
            Value::Table(t) => format!("table: {:p}", t.as_ptr()),
            Value::Channel(c) => format!("channel: {:p}", c.as_ptr()),
        }
    }

    /// Narrow to a callable; succeeds only for the Function variant
    pub fn as_function(&self) -> Option<&Arc<Function>> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Attribute lookup by string key
    ///
    /// Scalars, functions and channels always yield Nil. Tables go through
    /// their metatable-aware `get`; userdata and threads consult their
    /// metatable's `__index`. Absent keys yield `Ok(Nil)`; errors come only
    /// from a failing fallback function or an over-deep fallback chain.
    pub fn index(&self, thread: &Thread, key: &str) -> Result<Value, ValueError> {
        match self {
            Value::Table(t) => t.get(thread, &Value::from(key)),
            Value::Userdata(u) => {
                crate::table::index_via_metatable(thread, self, &u.metatable(), key)
            }
            Value::Thread(_) => {
                let metatable = thread.global().builtin_metatable(TypeTag::Thread);
                crate::table::index_via_metatable(thread, self, &metatable, key)
            }
            Value::Nil
            | Value::Bool(_)
            | Value::Number(_)
            | Value::String(_)
            | Value::Function(_)
            | Value::Channel(_) => Ok(Value::Nil),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// True iff the value is Nil or `false`
    pub fn is_false_like(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Everything except Nil and `false` is truthy, including 0 and ""
    pub fn is_truthy(&self) -> bool {
        !self.is_false_like()
    }

    /// Weak numeric coercion: numbers pass through, numeric strings parse,
    /// everything else (including unparsable text) yields 0
    pub fn as_number(&self) -> Number {
        self.to_number().unwrap_or(Number::ZERO)
    }

    /// Strict numeric coercion
    pub fn to_number(&self) -> Result<Number, ValueError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::String(s) => parse_number(s),
            other => Err(ValueError::NumberFormat(other.describe())),
        }
    }

    /// Text of strings and numbers; None for every other kind
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn can_convert_to_string(&self) -> bool {
        matches!(self, Value::String(_) | Value::Number(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<&Thread> {
        match self {
            Value::Thread(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<&Channel> {
        match self {
            Value::Channel(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_userdata(&self) -> Option<&Arc<Userdata>> {
        match self {
            Value::Userdata(u) => Some(u),
            _ => None,
        }
    }
}

// Raw equality: scalars structurally, reference kinds by identity
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Userdata(a), Value::Userdata(b)) => Arc::ptr_eq(a, b),
            (Value::Thread(a), Value::Thread(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Channel(a), Value::Channel(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.describe())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Value::Number(n)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(Number::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(Number::from(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(Number::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Number(Number::from(v))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Value::String(s)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::Table(t)
    }
}

impl From<Arc<Function>> for Value {
    fn from(f: Arc<Function>) -> Self {
        Value::Function(f)
    }
}

impl From<Arc<Userdata>> for Value {
    fn from(u: Arc<Userdata>) -> Self {
        Value::Userdata(u)
    }
}

impl From<Thread> for Value {
    fn from(t: Thread) -> Self {
        Value::Thread(t)
    }
}

impl From<Channel> for Value {
    fn from(c: Channel) -> Self {
        Value::Channel(c)
    }
}
