//! Function values: native callables and compiled closures
//!
//! A function is either a host closure (`NativeFn`) or a compiled prototype
//! plus its captured upvalues. Both carry an environment table.
//!
//! Compiled prototypes are opaque here. Calling one delegates to the
//! [`Executor`] installed on the thread's `Global`; without one the call
//! fails with `NoExecutor`.

use crate::error::ValueError;
use crate::frame::{CallFrame, RegisterFile};
use crate::table::Table;
use crate::thread::Thread;
use crate::value::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Host callable: receives the calling thread and arguments
pub type NativeFn =
    Arc<dyn Fn(&Thread, Vec<Value>) -> Result<Vec<Value>, ValueError> + Send + Sync>;

/// Runs compiled prototypes (implemented by the interpreter loop)
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        thread: &Thread,
        function: &Arc<Function>,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, ValueError>;
}

/// Compiled function prototype
#[derive(Debug, Clone, Default)]
pub struct FunctionProto {
    pub source: String,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_params: u8,
    pub is_vararg: bool,
    pub num_upvalues: u8,
    pub max_stack_size: u8,
    pub code: Vec<u32>,
    pub constants: Vec<Value>,
    pub protos: Vec<Arc<FunctionProto>>,
}

#[derive(Debug)]
enum UpvalueSlot {
    /// Aliases a register of the owning thread
    Open(usize),
    Closed(Value),
}

/// Captured variable, shareable between closures
#[derive(Debug, Clone)]
pub struct Upvalue(Arc<Mutex<UpvalueSlot>>);

impl Upvalue {
    pub fn open(register: usize) -> Self {
        Upvalue(Arc::new(Mutex::new(UpvalueSlot::Open(register))))
    }

    pub fn closed(value: Value) -> Self {
        Upvalue(Arc::new(Mutex::new(UpvalueSlot::Closed(value))))
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, UpvalueSlot> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value; open upvalues read through the register file
    pub fn get(&self, registers: &RegisterFile) -> Value {
        match &*self.slot() {
            UpvalueSlot::Open(index) => registers.get(*index),
            UpvalueSlot::Closed(value) => value.clone(),
        }
    }

    pub fn set(&self, registers: &mut RegisterFile, value: Value) -> Result<(), ValueError> {
        match &mut *self.slot() {
            UpvalueSlot::Open(index) => registers.set(*index, value),
            UpvalueSlot::Closed(slot) => {
                *slot = value;
                Ok(())
            }
        }
    }

    /// Copy the aliased register into the upvalue; no-op once closed
    pub fn close(&self, registers: &RegisterFile) {
        let mut slot = self.slot();
        if let UpvalueSlot::Open(index) = *slot {
            *slot = UpvalueSlot::Closed(registers.get(index));
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.slot(), UpvalueSlot::Closed(_))
    }

    /// Register index while open
    pub fn register_index(&self) -> Option<usize> {
        match *self.slot() {
            UpvalueSlot::Open(index) => Some(index),
            UpvalueSlot::Closed(_) => None,
        }
    }

    pub fn ptr_eq(&self, other: &Upvalue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

enum FunctionBody {
    Native(NativeFn),
    Closure {
        proto: Arc<FunctionProto>,
        upvalues: Vec<Upvalue>,
    },
}

/// A callable value
pub struct Function {
    env: RwLock<Table>,
    body: FunctionBody,
}

impl Function {
    pub fn native<F>(env: Table, f: F) -> Arc<Self>
    where
        F: Fn(&Thread, Vec<Value>) -> Result<Vec<Value>, ValueError> + Send + Sync + 'static,
    {
        Arc::new(Function {
            env: RwLock::new(env),
            body: FunctionBody::Native(Arc::new(f)),
        })
    }

    pub fn closure(env: Table, proto: Arc<FunctionProto>, upvalues: Vec<Upvalue>) -> Arc<Self> {
        Arc::new(Function {
            env: RwLock::new(env),
            body: FunctionBody::Closure { proto, upvalues },
        })
    }

    pub fn is_native(&self) -> bool {
        matches!(self.body, FunctionBody::Native(_))
    }

    pub fn proto(&self) -> Option<&Arc<FunctionProto>> {
        match &self.body {
            FunctionBody::Closure { proto, .. } => Some(proto),
            FunctionBody::Native(_) => None,
        }
    }

    pub fn upvalues(&self) -> &[Upvalue] {
        match &self.body {
            FunctionBody::Closure { upvalues, .. } => upvalues,
            FunctionBody::Native(_) => &[],
        }
    }

    pub fn env(&self) -> Table {
        self.env
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_env(&self, env: Table) {
        *self.env.write().unwrap_or_else(PoisonError::into_inner) = env;
    }

    /// Call on `thread`, pushing a call frame for the duration
    pub fn call(self: &Arc<Self>, thread: &Thread, args: Vec<Value>) -> Result<Vec<Value>, ValueError> {
        thread.push_frame(CallFrame::new(Arc::clone(self), args.len()))?;
        let result = match &self.body {
            FunctionBody::Native(f) => f(thread, args),
            FunctionBody::Closure { .. } => match thread.global().executor() {
                Some(executor) => executor.execute(thread, self, args),
                None => Err(ValueError::NoExecutor),
            },
        };
        thread.pop_frame();
        result
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            FunctionBody::Native(_) => write!(f, "Function(native)"),
            FunctionBody::Closure { proto, upvalues } => write!(
                f,
                "Function({}:{}, {} upvalues)",
                proto.source,
                proto.line_defined,
                upvalues.len()
            ),
        }
    }
}

/// Call any value; non-functions fail with `NotCallable`
pub fn call_value(thread: &Thread, callee: &Value, args: Vec<Value>) -> Result<Vec<Value>, ValueError> {
    match callee.as_function() {
        Some(f) => f.call(thread, args),
        None => Err(ValueError::NotCallable(callee.kind())),
    }
}
