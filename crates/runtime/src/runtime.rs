//! The `Runtime` facade
//!
//! A `Runtime` owns the main thread of one `Global`. Creating it configures
//! the `may` scheduler (once per process) and, with the `diagnostics`
//! feature, registers the runtime with the SIGQUIT dump. Dropping it closes
//! the global state: every coroutine still parked is cancelled and temp files
//! are released.

use crate::diagnostics;
use lume_core::{Function, Global, Options, Table, Thread, ThreadStats, Value, ValueError, scheduler};
use std::sync::Arc;

pub struct Runtime {
    main: Thread,
}

impl Runtime {
    /// Runtime configured from `LUME_*` environment variables
    pub fn new() -> Self {
        Self::with_options(Options::from_env())
    }

    pub fn with_options(options: Options) -> Self {
        scheduler::init();
        let main = Global::new(options);
        diagnostics::install_signal_handler(main.global());
        tracing::debug!(options = ?main.options(), "runtime started");
        Runtime { main }
    }

    pub fn main_thread(&self) -> &Thread {
        &self.main
    }

    pub fn global(&self) -> &Arc<Global> {
        self.main.global()
    }

    pub fn options(&self) -> &Options {
        self.main.options()
    }

    /// The table backing guest global variables
    pub fn globals(&self) -> Table {
        self.global().globals()
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.globals().raw_get_str(name)
    }

    pub fn set_global(&self, name: &str, value: impl Into<Value>) {
        self.globals().raw_set_str(name, value.into());
    }

    /// Expose a host function to guests under `name`
    pub fn register<F>(&self, name: &str, f: F) -> Arc<Function>
    where
        F: Fn(&Thread, Vec<Value>) -> Result<Vec<Value>, ValueError> + Send + Sync + 'static,
    {
        let function = Function::native(self.globals(), f);
        self.set_global(name, Arc::clone(&function));
        function
    }

    /// New suspended coroutine running `function`
    pub fn spawn(&self, function: Arc<Function>) -> Thread {
        self.main.spawn(function)
    }

    /// Resume `co` from the main thread
    pub fn resume(&self, co: &Thread, args: Vec<Value>) -> Result<Vec<Value>, ValueError> {
        self.main.resume(co, args)
    }

    /// Call `function` on the main thread, catching panics
    pub fn call(&self, function: &Arc<Function>, args: Vec<Value>) -> Result<Vec<Value>, ValueError> {
        self.main.protected_call(function, args)
    }

    pub fn stats(&self) -> ThreadStats {
        self.global().stats()
    }

    /// Cancel every thread and release runtime resources; idempotent
    pub fn close(&self) {
        if !self.global().is_closed() {
            let stats = self.stats();
            tracing::debug!(
                spawned = stats.spawned,
                active = stats.active,
                "runtime closing"
            );
        }
        self.global().close();
    }

    pub fn is_closed(&self) -> bool {
        self.global().is_closed()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.close();
    }
}
