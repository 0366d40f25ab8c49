//! Runtime diagnostics for production debugging
//!
//! `report` renders the state of one runtime: coroutine counters, the
//! current thread, allocation and temp-file counts, and the configured
//! limits. `dump_diagnostics` writes that report to stderr.
//!
//! ## SIGQUIT
//!
//! With the `diagnostics` feature (on by default) on Unix, every runtime
//! registers itself with a SIGQUIT (`kill -3 <pid>`) handler that dumps the
//! report of each live runtime and lets the process continue.
//!
//! Signal handlers may only call async-signal-safe functions, and the dump
//! takes locks and does I/O. A dedicated OS thread waits on signal-hook's
//! iterator API and does the dumping outside signal context.

use lume_core::{Global, Value};
use std::fmt::Write as _;
use std::sync::Arc;

/// Format bytes as human-readable string
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Render the diagnostics report for one runtime
pub fn report(global: &Global) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_report(&mut out, global);
    out
}

fn write_report(out: &mut String, global: &Global) -> std::fmt::Result {
    writeln!(out, "=== Lume Runtime Diagnostics ===")?;
    writeln!(out, "Timestamp: {:?}", std::time::SystemTime::now())?;
    writeln!(out, "State:     {}", if global.is_closed() { "closed" } else { "open" })?;

    let stats = global.stats();
    writeln!(out, "\n[Coroutines]")?;
    // Spawned and not yet finished
    writeln!(out, "  Active:    {}", stats.active)?;
    writeln!(out, "  Spawned:   {} (total)", stats.spawned)?;
    writeln!(out, "  Completed: {}", stats.completed)?;
    writeln!(out, "  Failed:    {}", stats.failed)?;
    writeln!(out, "  Cancelled: {}", stats.cancelled)?;
    writeln!(out, "  Peak:      {} (high-water mark)", stats.peak)?;

    writeln!(out, "\n[Threads]")?;
    match global.main_thread() {
        Some(main) => writeln!(out, "  Main:      #{} ({})", main.id(), main.status())?,
        None => writeln!(out, "  Main:      (dropped)")?,
    }
    match global.current_thread() {
        Some(current) => writeln!(
            out,
            "  Current:   #{} ({}, {} frame(s))",
            current.id(),
            current.status(),
            current.frame_depth()
        )?,
        None => writeln!(out, "  Current:   (none)")?,
    }

    writeln!(out, "\n[Resources]")?;
    writeln!(out, "  Allocations: {}", global.allocation_count())?;
    writeln!(out, "  Temp files:  {}", global.temp_file_count())?;
    writeln!(
        out,
        "  Registry:    {} entries",
        global.registry().len() + global.registry().hash_len()
    )?;

    let options = global.options();
    let register_bytes = (options.registry_size * std::mem::size_of::<Value>()) as u64;
    writeln!(out, "\n[Limits]")?;
    writeln!(out, "  Call stack:  {} frames", options.call_stack_size)?;
    writeln!(
        out,
        "  Registers:   {} ({} per thread)",
        options.registry_size,
        format_bytes(register_bytes)
    )?;
    if options.registry_max_size > 0 {
        writeln!(out, "  Max regs:    {}", options.registry_max_size)?;
    }
    writeln!(out, "  Poll:        {:?}", options.poll_interval)?;

    writeln!(out, "\n=== End Diagnostics ===")
}

/// Dump the diagnostics report to stderr
///
/// Output goes to stderr to avoid mixing with guest output.
pub fn dump_diagnostics(global: &Global) {
    use std::io::Write;

    let mut out = std::io::stderr().lock();
    let _ = writeln!(out, "\n{}", report(global));
}

#[cfg(all(unix, feature = "diagnostics"))]
mod signal {
    use super::dump_diagnostics;
    use lume_core::Global;
    use std::sync::{Mutex, Once, PoisonError, Weak};

    static SIGNAL_HANDLER_INIT: Once = Once::new();
    static WATCHED: Mutex<Vec<Weak<Global>>> = Mutex::new(Vec::new());

    pub(super) fn watch(global: Weak<Global>) {
        let mut watched = WATCHED.lock().unwrap_or_else(PoisonError::into_inner);
        watched.retain(|g| g.strong_count() > 0);
        watched.push(global);
    }

    fn dump_all() {
        let live: Vec<_> = WATCHED
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for global in live {
            dump_diagnostics(&global);
        }
    }

    pub(super) fn install() {
        SIGNAL_HANDLER_INIT.call_once(|| {
            use signal_hook::consts::SIGQUIT;
            use signal_hook::iterator::Signals;

            let mut signals = match Signals::new([SIGQUIT]) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "could not register SIGQUIT handler");
                    return;
                }
            };

            let spawned = std::thread::Builder::new()
                .name("lume-diagnostics".to_string())
                .spawn(move || {
                    for sig in signals.forever() {
                        if sig == SIGQUIT {
                            dump_all();
                        }
                    }
                });
            if let Err(e) = spawned {
                tracing::warn!(error = %e, "could not start diagnostics thread");
            }
        });
    }
}

/// Include `global` in the SIGQUIT dump
///
/// The handler thread is installed on first call; later calls only add the
/// runtime. Only a weak reference is kept, so a dropped runtime disappears
/// from the dump. Without the `diagnostics` feature, or off Unix, this does
/// nothing and `dump_diagnostics` must be called directly.
pub fn install_signal_handler(global: &Arc<Global>) {
    #[cfg(all(unix, feature = "diagnostics"))]
    {
        signal::watch(Arc::downgrade(global));
        signal::install();
    }

    #[cfg(not(all(unix, feature = "diagnostics")))]
    {
        let _ = global;
    }
}
