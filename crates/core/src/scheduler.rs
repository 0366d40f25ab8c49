//! Coroutine scheduler configuration
//!
//! Guest coroutines run as `may` coroutines. `may` must be configured before
//! the first spawn, so every spawn path calls [`init`] first; only the first
//! call has any effect.
//!
//! - `LUME_STACK_SIZE`: coroutine stack size in bytes (default 128KB)
//! - `LUME_POOL_CAPACITY`: coroutine stack pool size (default 10000)

use crate::options::parse_positive;
use std::sync::Once;

static SCHEDULER_INIT: Once = Once::new();

/// Default coroutine stack size: 128KB (0x20000 bytes)
pub const DEFAULT_STACK_SIZE: usize = 0x20000;

/// Default coroutine pool capacity (10x May's default of 1000)
pub const DEFAULT_POOL_CAPACITY: usize = 10000;

/// Configure `may` for guest coroutines
///
/// Safe to call multiple times (idempotent via Once).
pub fn init() {
    SCHEDULER_INIT.call_once(|| {
        let stack_size = parse_positive(
            "LUME_STACK_SIZE",
            std::env::var("LUME_STACK_SIZE").ok(),
            DEFAULT_STACK_SIZE,
        );
        let pool_capacity = parse_positive(
            "LUME_POOL_CAPACITY",
            std::env::var("LUME_POOL_CAPACITY").ok(),
            DEFAULT_POOL_CAPACITY,
        );

        may::config()
            .set_stack_size(stack_size)
            .set_pool_capacity(pool_capacity);

        tracing::debug!(stack_size, pool_capacity, "coroutine scheduler configured");
    });
}

/// True once `init` has run
pub fn is_initialized() -> bool {
    SCHEDULER_INIT.is_completed()
}
