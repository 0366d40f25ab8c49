//! Global state shared by every thread of one runtime
//!
//! `Global::new` builds the state and returns the main thread; every other
//! thread is spawned from it (directly or transitively) and holds an `Arc`
//! back to the same `Global`. `Global` only keeps weak references to
//! threads, so dropping the last handle of a thread frees it.
//!
//! ## Thread statistics
//!
//! Lifecycle counters are lock-free atomics:
//!
//! - `spawned`: coroutines ever created
//! - `completed` / `failed` / `cancelled`: how finished coroutines ended
//! - `peak`: high-water mark of unfinished coroutines

use crate::error::ValueError;
use crate::function::Executor;
use crate::options::Options;
use crate::table::Table;
use crate::thread::{CancelToken, Thread, WeakThread};
use crate::value::{TypeTag, Value};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

/// Point-in-time copy of the thread counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadStats {
    pub spawned: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Spawned but not yet finished
    pub active: usize,
    pub peak: usize,
}

#[derive(Default)]
struct Counters {
    spawned: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    active: AtomicUsize,
    peak: AtomicUsize,
}

pub struct Global {
    options: Options,
    main: OnceLock<WeakThread>,
    current: Mutex<WeakThread>,
    registry: Table,
    globals: Table,
    builtin_metatables: RwLock<HashMap<TypeTag, Value>>,
    temp_files: Mutex<Vec<File>>,
    allocations: AtomicU64,
    next_thread_id: AtomicU64,
    counters: Counters,
    executor: RwLock<Option<Arc<dyn Executor>>>,
    root_cancel: CancelToken,
    closed: AtomicBool,
}

impl Global {
    /// Create the shared state and its main thread
    pub fn new(options: Options) -> Thread {
        let global = Arc::new(Global {
            options,
            main: OnceLock::new(),
            current: Mutex::new(WeakThread::default()),
            registry: Table::new(),
            globals: Table::new(),
            builtin_metatables: RwLock::new(HashMap::new()),
            temp_files: Mutex::new(Vec::new()),
            allocations: AtomicU64::new(0),
            next_thread_id: AtomicU64::new(0),
            counters: Counters::default(),
            executor: RwLock::new(None),
            root_cancel: CancelToken::new(),
            closed: AtomicBool::new(false),
        });

        let main = Thread::new_main(Arc::clone(&global), global.root_cancel.child());
        let _ = global.main.set(main.downgrade());
        *global.current.lock().unwrap_or_else(PoisonError::into_inner) = main.downgrade();
        tracing::debug!("global state created");
        main
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The main thread, while any handle to it is alive
    pub fn main_thread(&self) -> Option<Thread> {
        self.main.get().and_then(WeakThread::upgrade)
    }

    /// The thread currently running guest code
    pub fn current_thread(&self) -> Option<Thread> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
            .or_else(|| self.main_thread())
    }

    pub(crate) fn swap_current(&self, thread: &Thread) -> WeakThread {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, thread.downgrade())
    }

    pub(crate) fn restore_current(&self, previous: WeakThread) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = previous;
    }

    /// Host-side registry table
    pub fn registry(&self) -> Table {
        self.registry.clone()
    }

    /// Table of global variables
    pub fn globals(&self) -> Table {
        self.globals.clone()
    }

    /// Metatable shared by every value of a non-table kind
    pub fn builtin_metatable(&self, kind: TypeTag) -> Value {
        self.builtin_metatables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Setting Nil removes the metatable for `kind`
    pub fn set_builtin_metatable(&self, kind: TypeTag, metatable: Value) {
        let mut map = self
            .builtin_metatables
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if metatable.is_nil() {
            map.remove(&kind);
        } else {
            map.insert(kind, metatable);
        }
    }

    /// Effective metatable: per-instance for tables and userdata, per-kind otherwise
    pub fn metatable_of(&self, value: &Value) -> Value {
        match value {
            Value::Table(t) => t.metatable(),
            Value::Userdata(u) => u.metatable(),
            other => self.builtin_metatable(other.kind()),
        }
    }

    /// New anonymous temp file; the runtime keeps a handle until `close`
    pub fn open_temp_file(&self) -> std::io::Result<File> {
        let file = tempfile::tempfile()?;
        let kept = file.try_clone()?;
        self.temp_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(kept);
        Ok(file)
    }

    pub fn temp_file_count(&self) -> usize {
        self.temp_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop the runtime's temp-file handles; returns how many were held
    pub fn close_temp_files(&self) -> usize {
        let files: Vec<File> = std::mem::take(
            &mut *self.temp_files.lock().unwrap_or_else(PoisonError::into_inner),
        );
        files.len()
    }

    pub fn note_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// New table, counted as an allocation
    pub fn new_table(&self) -> Table {
        self.note_allocation();
        Table::new()
    }

    pub(crate) fn next_thread_id(&self) -> u64 {
        self.next_thread_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn note_spawned(&self) {
        self.counters.spawned.fetch_add(1, Ordering::Relaxed);
        let active = self.counters.active.fetch_add(1, Ordering::AcqRel) + 1;

        let mut peak = self.counters.peak.load(Ordering::Relaxed);
        while active > peak {
            match self.counters.peak.compare_exchange_weak(
                peak,
                active,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => peak = current,
            }
        }
    }

    pub(crate) fn note_finished(&self, error: Option<&ValueError>) {
        self.counters.active.fetch_sub(1, Ordering::AcqRel);
        let counter = match error {
            None => &self.counters.completed,
            Some(ValueError::Cancelled) => &self.counters.cancelled,
            Some(_) => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ThreadStats {
        ThreadStats {
            spawned: self.counters.spawned.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::Relaxed),
            peak: self.counters.peak.load(Ordering::Relaxed),
        }
    }

    /// Install the interpreter that runs compiled prototypes
    pub fn set_executor(&self, executor: Arc<dyn Executor>) {
        *self.executor.write().unwrap_or_else(PoisonError::into_inner) = Some(executor);
    }

    pub fn executor(&self) -> Option<Arc<dyn Executor>> {
        self.executor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancel every thread and release temp files; idempotent
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.root_cancel.cancel();
        let released = self.close_temp_files();
        tracing::debug!(temp_files = released, "global state closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Global {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Global")
            .field("options", &self.options)
            .field("stats", &self.stats())
            .field("allocations", &self.allocation_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Function;
    use crate::userdata::Userdata;
    use std::io::{Read, Seek, SeekFrom, Write};

    #[test]
    fn test_main_thread_and_globals() {
        let main = Global::new(Options::default());
        let global = main.global();
        assert_eq!(global.main_thread(), Some(main.clone()));
        assert_eq!(global.current_thread(), Some(main.clone()));
        assert_eq!(main.env(), global.globals());
        assert_ne!(global.registry(), global.globals());
    }

    #[test]
    fn test_builtin_metatables() {
        let main = Global::new(Options::default());
        let global = main.global();
        let mt = Value::from(Table::new());
        global.set_builtin_metatable(TypeTag::String, mt.clone());
        assert_eq!(global.builtin_metatable(TypeTag::String), mt);
        assert_eq!(global.metatable_of(&Value::from("s")), mt);
        assert_eq!(global.metatable_of(&Value::from(1)), Value::Nil);

        global.set_builtin_metatable(TypeTag::String, Value::Nil);
        assert_eq!(global.builtin_metatable(TypeTag::String), Value::Nil);
    }

    #[test]
    fn test_metatable_of_instances() {
        let main = Global::new(Options::default());
        let global = main.global();
        let t = Table::new();
        let mt = Value::from(Table::new());
        t.set_metatable(mt.clone());
        assert_eq!(global.metatable_of(&Value::from(t)), mt);

        let ud = Userdata::new(1u32);
        ud.set_metatable(mt.clone());
        assert_eq!(global.metatable_of(&Value::from(ud)), mt);
    }

    #[test]
    fn test_temp_files() {
        let main = Global::new(Options::default());
        let global = main.global();
        let mut file = global.open_temp_file().unwrap();
        file.write_all(b"scratch").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        assert_eq!(text, "scratch");

        global.open_temp_file().unwrap();
        assert_eq!(global.temp_file_count(), 2);
        assert_eq!(global.close_temp_files(), 2);
        assert_eq!(global.temp_file_count(), 0);
    }

    #[test]
    fn test_allocation_counter() {
        let main = Global::new(Options::default());
        let global = main.global();
        let before = global.allocation_count();
        global.new_table();
        main.spawn(Function::native(Table::new(), |_, _| Ok(vec![])));
        assert_eq!(global.allocation_count(), before + 2);
    }

    #[test]
    fn test_stats_track_lifecycle() {
        let main = Global::new(Options::default());
        let a = main.spawn(Function::native(Table::new(), |_, _| Ok(vec![])));
        let b = main.spawn(Function::native(Table::new(), |_, _| Ok(vec![])));
        let stats = main.global().stats();
        assert_eq!(stats.spawned, 2);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.peak, 2);

        main.resume(&a, vec![]).unwrap();
        b.cancel();
        let stats = main.global().stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.peak, 2);
    }

    #[test]
    fn test_close_cancels_threads() {
        let main = Global::new(Options::default());
        let co = main.spawn(Function::native(Table::new(), |_, _| Ok(vec![])));
        main.global().open_temp_file().unwrap();
        main.global().close();
        main.global().close();
        assert!(main.global().is_closed());
        assert!(main.is_cancelled());
        assert!(co.is_cancelled());
        assert_eq!(main.global().temp_file_count(), 0);
        assert_eq!(main.resume(&co, vec![]), Err(ValueError::Cancelled));
    }

    #[test]
    fn test_main_thread_weakly_held() {
        let main = Global::new(Options::default());
        let global = Arc::clone(main.global());
        drop(main);
        assert!(global.main_thread().is_none());
    }
}
