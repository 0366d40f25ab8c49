//! Call frames and the register file of a thread
//!
//! Both are bounded by `Options`: the frame stack by `call_stack_size`, the
//! register file by `registry_size` (initial) and `registry_max_size`
//! (growth limit, 0 meaning fixed at the initial size).

use crate::error::ValueError;
use crate::function::Function;
use crate::value::Value;
use std::sync::Arc;

/// One active call
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub function: Arc<Function>,
    /// First register of this frame
    pub base: usize,
    pub arg_count: usize,
    /// Next instruction (meaningful for compiled functions only)
    pub pc: usize,
}

impl CallFrame {
    pub fn new(function: Arc<Function>, arg_count: usize) -> Self {
        CallFrame {
            function,
            base: 0,
            arg_count,
            pc: 0,
        }
    }
}

#[derive(Debug)]
pub struct CallFrameStack {
    frames: Vec<CallFrame>,
    limit: usize,
}

impl CallFrameStack {
    pub fn new(limit: usize) -> Self {
        CallFrameStack {
            frames: Vec::with_capacity(limit.min(64)),
            limit,
        }
    }

    pub fn push(&mut self, frame: CallFrame) -> Result<(), ValueError> {
        if self.frames.len() >= self.limit {
            return Err(ValueError::CallStackOverflow { limit: self.limit });
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    pub fn current(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut CallFrame> {
        self.frames.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Discard frames above `depth` (after an unwind)
    pub fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Value registers addressed by absolute index
#[derive(Debug)]
pub struct RegisterFile {
    values: Vec<Value>,
    limit: usize,
    minimize: bool,
}

impl RegisterFile {
    /// Registers are allocated on first write, up to the limit
    pub fn new(size: usize, max_size: usize, minimize: bool) -> Self {
        let limit = if max_size == 0 { size } else { max_size.max(size) };
        RegisterFile {
            values: Vec::new(),
            limit,
            minimize,
        }
    }

    /// Register contents; unset registers read Nil
    pub fn get(&self, index: usize) -> Value {
        self.values.get(index).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, index: usize, value: Value) -> Result<(), ValueError> {
        if index >= self.limit {
            return Err(ValueError::RegistryOverflow { limit: self.limit });
        }
        if index >= self.values.len() {
            self.values.resize(index + 1, Value::Nil);
        }
        self.values[index] = value;
        Ok(())
    }

    pub fn push(&mut self, value: Value) -> Result<(), ValueError> {
        self.set(self.values.len(), value)
    }

    pub fn pop(&mut self) -> Value {
        self.values.pop().unwrap_or_default()
    }

    /// Index one past the highest written register
    pub fn top(&self) -> usize {
        self.values.len()
    }

    /// Drop registers at and above `top`
    pub fn truncate(&mut self, top: usize) {
        self.values.truncate(top);
        if self.minimize {
            self.values.shrink_to(top);
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }
}
