//! Lume Runtime: the embedding surface over `lume-core`
//!
//! Hosts create a [`Runtime`], which reads its limits from the environment,
//! configures the coroutine scheduler and owns the main thread. Everything
//! guest-visible (values, tables, coroutines, channels) comes from
//! `lume-core` and is re-exported here.
//!
//! # Modules
//!
//! - `runtime`: the `Runtime` facade and its lifecycle
//! - `diagnostics`: statistics report, SIGQUIT dump
//! - `snapshot`: data-only value snapshots (serde + bincode)
//! - `logging`: `tracing` subscriber setup for hosts

pub mod diagnostics;
pub mod logging;
pub mod runtime;
pub mod snapshot;

pub use diagnostics::{dump_diagnostics, install_signal_handler, report};
pub use logging::init_tracing;
pub use runtime::Runtime;
pub use snapshot::{SnapshotError, TypedValue};

pub use lume_core::{
    CancelToken, Channel, Executor, Function, FunctionProto, Global, NativeFn, Number, Options,
    Table, Thread, ThreadStats, ThreadStatus, TypeTag, Userdata, Value, ValueError, call_value,
    sprintf,
};
