//! Logging setup for hosts
//!
//! Both crates log through `tracing`. Nothing is printed until the host
//! installs a subscriber; `init_tracing` installs the usual one, filtered by
//! `RUST_LOG` and writing to stderr so guest output on stdout stays clean.

use tracing_subscriber::EnvFilter;

/// Install a stderr `fmt` subscriber filtered by `RUST_LOG`
///
/// Returns `false` if a global subscriber was already set, in which case the
/// existing one is left alone.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
