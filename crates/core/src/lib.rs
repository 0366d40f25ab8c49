//! Lume Core: the value model of an embeddable Lua-style runtime
//!
//! This crate defines every first-class value a guest program manipulates
//! and the hybrid table that stores them. The compiler and interpreter loop
//! live elsewhere; they talk to this crate through `Value`, `Table`,
//! `Thread` and the [`Executor`] hook.
//!
//! Key design principles:
//! - Value: a closed enum, one case per kind, dispatched by `match`
//! - Aggregates are `Arc`-backed handles; equality is identity
//! - Coroutines are `may` coroutines handing off over MPMC channels
//! - Everything is `Send + Sync`, so coroutines may run on any worker
//!
//! # Modules
//!
//! - `value`: the `Value` enum and its capability contract
//! - `number`: the numeric kind, canonical text and literal parsing
//! - `format`: printf-style verb formatting
//! - `table`: hybrid array/hash storage with metatable fallback
//! - `function`: native functions, compiled closures and upvalues
//! - `frame`: call frames and register files
//! - `userdata`: opaque host payloads
//! - `thread`: coroutines, cancellation and the call context
//! - `channel`: blocking FIFOs between threads
//! - `global`: state shared by all threads of a runtime
//! - `options`: per-runtime limits, readable from the environment
//! - `scheduler`: `may` configuration
//! - `error`: the shared error type

pub mod channel;
pub mod error;
pub mod format;
pub mod frame;
pub mod function;
pub mod global;
pub mod number;
pub mod options;
pub mod scheduler;
pub mod table;
pub mod thread;
pub mod userdata;
pub mod value;

pub use channel::Channel;
pub use error::{ValueError, format_panic_payload};
pub use format::{FormatSpec, format_value, sprintf};
pub use frame::{CallFrame, CallFrameStack, RegisterFile};
pub use function::{Executor, Function, FunctionProto, NativeFn, Upvalue, call_value};
pub use global::{Global, ThreadStats};
pub use number::{MAX_EXACT_INTEGER, Number, parse_number};
pub use options::Options;
pub use table::{MAX_META_CHAIN, Table};
pub use thread::{CancelToken, PanicHandler, Thread, ThreadStatus, WeakThread};
pub use userdata::Userdata;
pub use value::{TypeTag, Value};
