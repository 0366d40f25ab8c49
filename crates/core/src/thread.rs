//! Threads: the main thread and guest coroutines
//!
//! Every coroutine body runs on its own `may` coroutine. Resumer and
//! coroutine never run at the same time: they hand control back and forth
//! over two MPMC channels carrying a typed [`Handoff`] message.
//!
//! ## Flow
//!
//! 1. `spawn` creates the thread (Suspended) and both channels. Nothing runs.
//! 2. The first `resume` starts the `may` coroutine with the resume
//!    arguments, then waits on the yield channel.
//! 3. `yield_values` marks the thread Suspended, sends `Yield`, and waits on
//!    the resume channel for the next `Resume`.
//! 4. When the body returns, the thread becomes Dead and `Return` (or `Fail`)
//!    is sent to whoever is waiting in `resume`.
//!
//! ## Cancellation
//!
//! Each thread has a [`CancelToken`] derived from its spawner's, so
//! cancelling a thread also cancels its descendants. Cancellation is
//! cooperative: it is observed at yields, blocking channel operations,
//! `check_cancelled`, and on resume. A parked yield polls its token every
//! `Options::poll_interval` so a cancelled coroutine unwinds even if nobody
//! resumes it again.
//!
//! ## Abandoned coroutines
//!
//! The `may` coroutine owns one strong handle to its thread. When a parked
//! yield finds that handle is the only one left, no resume can ever arrive:
//! the thread cancels itself and unwinds to Dead, which frees its stack and
//! state. A coroutine dropped before its first resume never started a `may`
//! coroutine and is counted as cancelled when its state is dropped. Parent
//! links are weak so a suspended child does not keep its parent alive.

use crate::error::{ValueError, format_panic_payload};
use crate::frame::{CallFrame, CallFrameStack, RegisterFile};
use crate::function::{Function, Upvalue};
use crate::global::Global;
use crate::options::Options;
use crate::scheduler;
use crate::table::Table;
use crate::value::Value;
use may::sync::mpmc;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

/// Called with the thread and panic message when a function body panics
pub type PanicHandler = Arc<dyn Fn(&Thread, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadStatus {
    Suspended,
    Running,
    Dead,
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ThreadStatus::Suspended => "suspended",
            ThreadStatus::Running => "running",
            ThreadStatus::Dead => "dead",
        })
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    deadline: Mutex<Option<Instant>>,
    parent: Option<CancelToken>,
}

/// Hierarchical cancellation flag with optional deadline
///
/// A token reports cancelled when it, or any ancestor, was cancelled or has
/// passed its deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<CancelState>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// New token cancelled whenever `self` is
    pub fn child(&self) -> Self {
        CancelToken(Arc::new(CancelState {
            parent: Some(self.clone()),
            ..CancelState::default()
        }))
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        let now = Instant::now();
        let mut token = Some(self);
        while let Some(t) = token {
            if t.0.cancelled.load(Ordering::Acquire) {
                return true;
            }
            if t.deadline().is_some_and(|d| now >= d) {
                return true;
            }
            token = t.0.parent.as_ref();
        }
        false
    }

    pub fn set_deadline(&self, deadline: Instant) {
        *self.0.deadline.lock().unwrap_or_else(PoisonError::into_inner) = Some(deadline);
    }

    pub fn deadline(&self) -> Option<Instant> {
        *self.0.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Message passed between resumer and coroutine
#[derive(Debug)]
enum Handoff {
    /// Resumer -> coroutine: continue with these values
    Resume(Vec<Value>),
    /// Resumer -> coroutine: unwind with `Cancelled`
    Cancel,
    /// Coroutine -> resumer: suspended with these values
    Yield(Vec<Value>),
    /// Coroutine -> resumer: body returned
    Return(Vec<Value>),
    /// Coroutine -> resumer: body failed
    Fail(ValueError),
}

struct Coroutine {
    entry: Arc<Function>,
    resume_tx: mpmc::Sender<Handoff>,
    resume_rx: mpmc::Receiver<Handoff>,
    yield_tx: mpmc::Sender<Handoff>,
    yield_rx: mpmc::Receiver<Handoff>,
}

// Safety: May's channel endpoints may be used from any coroutine or OS
// thread; `entry` is an immutable shared function.
unsafe impl Send for Coroutine {}
unsafe impl Sync for Coroutine {}

#[derive(Debug)]
struct ThreadState {
    status: ThreadStatus,
    started: bool,
    error: Option<ValueError>,
}

struct ThreadInner {
    id: u64,
    global: Arc<Global>,
    parent: Option<WeakThread>,
    env: RwLock<Table>,
    options: Options,
    state: Mutex<ThreadState>,
    cancel: CancelToken,
    frames: Mutex<CallFrameStack>,
    registers: Mutex<RegisterFile>,
    open_upvalues: Mutex<Vec<Upvalue>>,
    panic_handler: RwLock<Option<PanicHandler>>,
    coroutine: Option<Coroutine>,
}

/// Shared handle to a thread
#[derive(Clone)]
pub struct Thread(Arc<ThreadInner>);

/// Non-owning thread reference (held by `Global`)
#[derive(Clone, Default)]
pub struct WeakThread(Weak<ThreadInner>);

impl WeakThread {
    pub fn upgrade(&self) -> Option<Thread> {
        self.0.upgrade().map(Thread)
    }

    /// Whether any strong handle to the thread remains
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Thread {
    /// The main thread of a fresh `Global`; always Running
    pub(crate) fn new_main(global: Arc<Global>, cancel: CancelToken) -> Thread {
        let options = global.options().clone();
        let env = global.globals();
        Thread::build(global, None, env, options, cancel, None, ThreadStatus::Running)
    }

    fn build(
        global: Arc<Global>,
        parent: Option<Thread>,
        env: Table,
        options: Options,
        cancel: CancelToken,
        coroutine: Option<Coroutine>,
        status: ThreadStatus,
    ) -> Thread {
        let id = global.next_thread_id();
        let panic_handler = parent.as_ref().and_then(|p| p.panic_handler());
        let parent = parent.as_ref().map(Thread::downgrade);
        Thread(Arc::new(ThreadInner {
            id,
            frames: Mutex::new(CallFrameStack::new(options.call_stack_size)),
            registers: Mutex::new(RegisterFile::new(
                options.registry_size,
                options.registry_max_size,
                options.minimize_stack_memory,
            )),
            global,
            parent,
            env: RwLock::new(env),
            options,
            state: Mutex::new(ThreadState {
                status,
                started: status == ThreadStatus::Running,
                error: None,
            }),
            cancel,
            open_upvalues: Mutex::new(Vec::new()),
            panic_handler: RwLock::new(panic_handler),
            coroutine,
        }))
    }

    /// Create a coroutine running `function`, parented to this thread
    ///
    /// The new thread is Suspended; its body starts on the first `resume`.
    pub fn spawn(&self, function: Arc<Function>) -> Thread {
        let (resume_tx, resume_rx) = mpmc::channel();
        let (yield_tx, yield_rx) = mpmc::channel();
        let coroutine = Coroutine {
            entry: function,
            resume_tx,
            resume_rx,
            yield_tx,
            yield_rx,
        };

        let global = Arc::clone(&self.0.global);
        global.note_allocation();
        global.note_spawned();
        let thread = Thread::build(
            global,
            Some(self.clone()),
            self.env(),
            self.0.options.clone(),
            self.0.cancel.child(),
            Some(coroutine),
            ThreadStatus::Suspended,
        );
        tracing::debug!(id = thread.id(), parent = self.id(), "coroutine spawned");
        thread
    }

    /// Run `co` until it yields, returns or fails
    ///
    /// Yielded and returned values are both `Ok`; a failing body yields its
    /// error and leaves `co` Dead. Only a Suspended coroutine may be resumed.
    pub fn resume(&self, co: &Thread, args: Vec<Value>) -> Result<Vec<Value>, ValueError> {
        let Some(coroutine) = &co.0.coroutine else {
            return Err(ValueError::CoroutineState {
                operation: "resume",
                status: co.status(),
            });
        };

        let first = {
            let mut state = co.state();
            if state.status != ThreadStatus::Suspended {
                return Err(ValueError::CoroutineState {
                    operation: "resume",
                    status: state.status,
                });
            }
            if !state.started && co.0.cancel.is_cancelled() {
                state.status = ThreadStatus::Dead;
                state.error = Some(ValueError::Cancelled);
                drop(state);
                co.0.global.note_finished(Some(&ValueError::Cancelled));
                tracing::debug!(id = co.id(), "coroutine cancelled before start");
                return Err(ValueError::Cancelled);
            }
            state.status = ThreadStatus::Running;
            let first = !state.started;
            state.started = true;
            first
        };

        tracing::trace!(id = co.id(), first, "resume");
        let previous = self.0.global.swap_current(co);

        if first {
            scheduler::init();
            let body = co.clone();
            unsafe {
                may::coroutine::spawn(move || run_coroutine(body, args));
            }
        } else {
            let message = if co.0.cancel.is_cancelled() {
                Handoff::Cancel
            } else {
                Handoff::Resume(args)
            };
            let _ = coroutine.resume_tx.send(message);
        }

        let outcome = coroutine.yield_rx.recv();
        self.0.global.restore_current(previous);

        match outcome {
            Ok(Handoff::Yield(values)) | Ok(Handoff::Return(values)) => Ok(values),
            Ok(Handoff::Fail(err)) => Err(err),
            Ok(Handoff::Resume(_)) | Ok(Handoff::Cancel) | Err(_) => {
                let err = ValueError::raise("coroutine handoff failed");
                let mut state = co.state();
                state.status = ThreadStatus::Dead;
                state.error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Suspend the running coroutine, handing `values` to its resumer
    ///
    /// Returns the arguments of the next `resume`. Fails with
    /// `CoroutineState` outside a coroutine and with `Cancelled` when the
    /// thread is cancelled before or while suspended.
    pub fn yield_values(&self, values: Vec<Value>) -> Result<Vec<Value>, ValueError> {
        let Some(coroutine) = &self.0.coroutine else {
            return Err(ValueError::CoroutineState {
                operation: "yield",
                status: self.status(),
            });
        };
        self.check_cancelled()?;
        {
            let mut state = self.state();
            if state.status != ThreadStatus::Running {
                return Err(ValueError::CoroutineState {
                    operation: "yield",
                    status: state.status,
                });
            }
            state.status = ThreadStatus::Suspended;
        }

        tracing::trace!(id = self.id(), "yield");
        coroutine
            .yield_tx
            .send(Handoff::Yield(values))
            .map_err(|_| ValueError::raise("coroutine handoff failed"))?;

        let poll = self.0.options.poll_interval;
        loop {
            match coroutine.resume_rx.recv_timeout(poll) {
                Ok(Handoff::Resume(args)) => {
                    self.check_cancelled()?;
                    return Ok(args);
                }
                Ok(Handoff::Cancel) => return Err(ValueError::Cancelled),
                Ok(_) => return Err(ValueError::raise("coroutine handoff failed")),
                Err(_) => {
                    if self.0.cancel.is_cancelled() {
                        return Err(ValueError::Cancelled);
                    }
                    if self.claim_abandoned() {
                        tracing::debug!(id = self.id(), "suspended coroutine abandoned");
                        self.0.cancel.cancel();
                        return Err(ValueError::Cancelled);
                    }
                }
            }
        }
    }

    /// Request cancellation of this thread and its descendants
    ///
    /// An unstarted coroutine becomes Dead immediately. A suspended one is
    /// woken and unwound before this returns. A running one observes the
    /// request at its next suspension point.
    pub fn cancel(&self) {
        self.0.cancel.cancel();
        tracing::debug!(id = self.id(), "cancel requested");
        let Some(coroutine) = &self.0.coroutine else {
            return;
        };
        {
            let mut state = self.state();
            if state.status != ThreadStatus::Suspended {
                return;
            }
            if !state.started {
                state.status = ThreadStatus::Dead;
                state.error = Some(ValueError::Cancelled);
                drop(state);
                self.0.global.note_finished(Some(&ValueError::Cancelled));
                return;
            }
            // claim the coroutine so no resume races the unwind
            state.status = ThreadStatus::Running;
        }
        let _ = coroutine.resume_tx.send(Handoff::Cancel);
        let _ = coroutine.yield_rx.recv();
    }

    /// `Err(Cancelled)` if this thread has been cancelled
    pub fn check_cancelled(&self) -> Result<(), ValueError> {
        if self.0.cancel.is_cancelled() {
            Err(ValueError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.0.cancel
    }

    pub fn set_deadline(&self, deadline: Instant) {
        self.0.cancel.set_deadline(deadline);
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.set_deadline(Instant::now() + timeout);
    }

    /// Call `function` on this thread, converting panics to `Panicked`
    ///
    /// The panic handler, if any, sees the message first. Call frames pushed
    /// by the panicking call are discarded.
    pub fn protected_call(
        &self,
        function: &Arc<Function>,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, ValueError> {
        let depth = self.frame_depth();
        match catch_unwind(AssertUnwindSafe(|| function.call(self, args))) {
            Ok(result) => result,
            Err(payload) => {
                let message = format_panic_payload(&payload);
                lock(&self.0.frames).truncate(depth);
                if let Some(handler) = self.panic_handler() {
                    handler(self, &message);
                }
                tracing::warn!(id = self.id(), "function panicked: {}", message);
                Err(ValueError::Panicked(message))
            }
        }
    }

    /// Take a parked coroutine that only its own `may` coroutine still holds
    ///
    /// Marks it Running so a handle revived from a `WeakThread` cannot
    /// resume it while it unwinds.
    fn claim_abandoned(&self) -> bool {
        let mut state = self.state();
        if state.status == ThreadStatus::Suspended && Arc::strong_count(&self.0) == 1 {
            state.status = ThreadStatus::Running;
            true
        } else {
            false
        }
    }

    fn finish(&self, result: Result<Vec<Value>, ValueError>) {
        self.with_registers(|registers| self.close_upvalues(registers, 0));
        // a body that swallowed its cancellation still ends cancelled
        let result = match result {
            Ok(_) if self.0.cancel.is_cancelled() => Err(ValueError::Cancelled),
            other => other,
        };
        let message = {
            let mut state = self.state();
            state.status = ThreadStatus::Dead;
            match result {
                Ok(values) => Handoff::Return(values),
                Err(err) => {
                    state.error = Some(err.clone());
                    Handoff::Fail(err)
                }
            }
        };
        let error = match &message {
            Handoff::Fail(err) => Some(err),
            _ => None,
        };
        self.0.global.note_finished(error);
        tracing::debug!(id = self.id(), failed = error.is_some(), "coroutine finished");

        if let Some(coroutine) = &self.0.coroutine {
            let _ = coroutine.yield_tx.send(message);
        }
    }

    fn state(&self) -> MutexGuard<'_, ThreadState> {
        lock(&self.0.state)
    }

    pub fn status(&self) -> ThreadStatus {
        self.state().status
    }

    /// Error that killed this coroutine, if any
    pub fn error(&self) -> Option<ValueError> {
        self.state().error.clone()
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Spawning thread, while it is still alive
    pub fn parent(&self) -> Option<Thread> {
        self.0.parent.as_ref().and_then(WeakThread::upgrade)
    }

    pub fn global(&self) -> &Arc<Global> {
        &self.0.global
    }

    pub fn options(&self) -> &Options {
        &self.0.options
    }

    pub fn is_main(&self) -> bool {
        self.0.coroutine.is_none()
    }

    pub fn env(&self) -> Table {
        self.0
            .env
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_env(&self, env: Table) {
        *self.0.env.write().unwrap_or_else(PoisonError::into_inner) = env;
    }

    pub fn panic_handler(&self) -> Option<PanicHandler> {
        self.0
            .panic_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a panic handler; coroutines spawned afterwards inherit it
    pub fn set_panic_handler<F>(&self, handler: F)
    where
        F: Fn(&Thread, &str) + Send + Sync + 'static,
    {
        *self
            .0
            .panic_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    pub fn push_frame(&self, frame: CallFrame) -> Result<(), ValueError> {
        lock(&self.0.frames).push(frame)
    }

    pub fn pop_frame(&self) -> Option<CallFrame> {
        lock(&self.0.frames).pop()
    }

    pub fn frame_depth(&self) -> usize {
        lock(&self.0.frames).depth()
    }

    pub fn current_frame(&self) -> Option<CallFrame> {
        lock(&self.0.frames).current().cloned()
    }

    /// Run `f` with this thread's register file locked
    ///
    /// The lock is not reentrant: inside `f`, use the `RegisterFile` handed
    /// in rather than calling `with_registers` again.
    pub fn with_registers<R>(&self, f: impl FnOnce(&mut RegisterFile) -> R) -> R {
        f(&mut lock(&self.0.registers))
    }

    /// Open upvalue for `register`, shared with earlier captures of it
    pub fn find_upvalue(&self, register: usize) -> Upvalue {
        let mut open = lock(&self.0.open_upvalues);
        if let Some(up) = open.iter().find(|up| up.register_index() == Some(register)) {
            return up.clone();
        }
        let up = Upvalue::open(register);
        open.push(up.clone());
        up
    }

    /// Close every open upvalue at or above `from`
    ///
    /// Takes the register file explicitly so it can be called from inside
    /// `with_registers`.
    pub fn close_upvalues(&self, registers: &RegisterFile, from: usize) {
        let mut open = lock(&self.0.open_upvalues);
        open.retain(|up| match up.register_index() {
            Some(index) if index >= from => {
                up.close(registers);
                false
            }
            Some(_) => true,
            None => false,
        });
    }

    pub fn open_upvalue_count(&self) -> usize {
        lock(&self.0.open_upvalues).len()
    }

    pub fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }

    pub fn downgrade(&self) -> WeakThread {
        WeakThread(Arc::downgrade(&self.0))
    }
}

impl Drop for ThreadInner {
    fn drop(&mut self) {
        if self.coroutine.is_none() {
            return;
        }
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.started && state.status != ThreadStatus::Dead {
            self.global.note_finished(Some(&ValueError::Cancelled));
            tracing::debug!(id = self.id, "unstarted coroutine dropped");
        }
    }
}

/// Body of the `may` coroutine backing `thread`
fn run_coroutine(thread: Thread, args: Vec<Value>) {
    let Some(coroutine) = &thread.0.coroutine else {
        return;
    };
    let entry = Arc::clone(&coroutine.entry);
    let result = match thread.check_cancelled() {
        Ok(()) => thread.protected_call(&entry, args),
        Err(err) => Err(err),
    };
    thread.finish(result);
}

impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread: {:p}", self.as_ptr())
    }
}
