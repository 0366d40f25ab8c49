//! Error type shared by every value operation
//!
//! The core favours flag and `Option` returns at the variant-contract
//! boundary (`as_function`, absent table keys read as Nil). `ValueError` is
//! reserved for conditions the caller must handle: malformed numbers,
//! reserved table keys, coroutine state violations, cancellation, and errors
//! raised by guest or host functions.
//!
//! `ValueError` is `Clone` because a coroutine's terminal error is both kept
//! on the dead thread and handed to whoever resumed it.

use crate::thread::ThreadStatus;
use crate::value::{TypeTag, Value};

/// Errors produced by the value model
#[derive(Debug, Clone, PartialEq)]
pub enum ValueError {
    /// Text is not a numeric literal
    NumberFormat(String),
    /// Nil or NaN used as a table key, or an unknown key passed to `next`
    InvalidKey(&'static str),
    /// `__index` / `__newindex` chain exceeded the hop limit
    MetaChainTooDeep { limit: usize },
    /// Attempt to call a value that is not a function
    NotCallable(TypeTag),
    /// Coroutine operation not permitted in the thread's current status
    CoroutineState {
        operation: &'static str,
        status: ThreadStatus,
    },
    /// Cancellation observed at a suspension point
    Cancelled,
    /// Send on a closed channel
    ChannelClosed,
    /// Call depth exceeded `Options::call_stack_size`
    CallStackOverflow { limit: usize },
    /// Register file exceeded its configured maximum
    RegistryOverflow { limit: usize },
    /// A compiled prototype was called but no executor is installed
    NoExecutor,
    /// Unsupported formatting verb
    UnknownVerb(char),
    /// Error value raised by a guest or native function
    Raised(Value),
    /// A native function panicked (payload rendered to text)
    Panicked(String),
}

impl ValueError {
    /// Convenience for native functions raising a textual error
    pub fn raise(message: impl Into<String>) -> Self {
        ValueError::Raised(Value::from(message.into()))
    }

    /// True for the distinguished cancellation error
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ValueError::Cancelled)
    }
}

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueError::NumberFormat(text) => {
                write!(f, "malformed number: '{}'", text)
            }
            ValueError::InvalidKey(reason) => write!(f, "invalid table key: {}", reason),
            ValueError::MetaChainTooDeep { limit } => {
                write!(f, "metatable chain too deep (more than {} hops)", limit)
            }
            ValueError::NotCallable(tag) => write!(f, "attempt to call a {} value", tag),
            ValueError::CoroutineState { operation, status } => match (*operation, status) {
                ("resume", ThreadStatus::Dead) => write!(f, "cannot resume dead coroutine"),
                ("resume", _) => write!(f, "cannot resume non-suspended coroutine"),
                ("yield", _) => write!(f, "attempt to yield from outside a coroutine"),
                (op, status) => write!(f, "cannot {} {} coroutine", op, status),
            },
            ValueError::Cancelled => write!(f, "coroutine cancelled"),
            ValueError::ChannelClosed => write!(f, "send on closed channel"),
            ValueError::CallStackOverflow { limit } => {
                write!(f, "stack overflow (call depth exceeds {})", limit)
            }
            ValueError::RegistryOverflow { limit } => {
                write!(f, "registry overflow (more than {} registers)", limit)
            }
            ValueError::NoExecutor => {
                write!(f, "no executor installed for compiled functions")
            }
            ValueError::UnknownVerb(verb) => write!(f, "unknown format verb '%{}'", verb),
            ValueError::Raised(value) => write!(f, "{}", value),
            ValueError::Panicked(msg) => write!(f, "native function panicked: {}", msg),
        }
    }
}

impl std::error::Error for ValueError {}

/// Format a panic payload into an error message
pub fn format_panic_payload(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
