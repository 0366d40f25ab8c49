//! Userdata: opaque host payloads exposed to guest code
//!
//! The payload is any `Send + Sync` Rust value. Guest-visible behaviour comes
//! from the metatable (`__index` drives `Value::index`); the optional
//! environment table is for host bookkeeping.

use crate::table::Table;
use crate::value::Value;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

pub struct Userdata {
    value: Box<dyn Any + Send + Sync>,
    env: RwLock<Option<Table>>,
    metatable: RwLock<Value>,
}

impl Userdata {
    pub fn new<T: Any + Send + Sync>(value: T) -> Arc<Self> {
        Arc::new(Userdata {
            value: Box::new(value),
            env: RwLock::new(None),
            metatable: RwLock::new(Value::Nil),
        })
    }

    /// Borrow the payload as `T`, if that is its type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn env(&self) -> Option<Table> {
        self.env
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_env(&self, env: Option<Table>) {
        *self.env.write().unwrap_or_else(PoisonError::into_inner) = env;
    }

    pub fn metatable(&self) -> Value {
        self.metatable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_metatable(&self, metatable: Value) {
        *self.metatable.write().unwrap_or_else(PoisonError::into_inner) = metatable;
    }
}

impl fmt::Debug for Userdata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "userdata: {:p}", self as *const Self)
    }
}
