//! Per-runtime options
//!
//! Every thread created from a `Global` carries a copy of these. Hosts either
//! build them directly or read them from the environment:
//!
//! - `LUME_CALL_STACK_SIZE`: max call frames per thread (default 200)
//! - `LUME_REGISTRY_SIZE`: initial register-file size (default 5120)
//! - `LUME_REGISTRY_MAX_SIZE`: register-file growth limit, 0 = fixed (default 0)
//! - `LUME_MINIMIZE_STACK_MEMORY`: release register memory on truncate (default false)
//! - `LUME_POLL_INTERVAL_MS`: cancellation poll interval for blocking waits (default 10)
//!
//! Invalid values are warned about and replaced by the default.

use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CALL_STACK_SIZE: usize = 200;
pub const DEFAULT_REGISTRY_SIZE: usize = 256 * 20;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub call_stack_size: usize,
    pub registry_size: usize,
    /// 0 keeps the register file at `registry_size`
    pub registry_max_size: usize,
    pub minimize_stack_memory: bool,
    /// How often a blocked thread re-checks its cancellation token
    pub poll_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            call_stack_size: DEFAULT_CALL_STACK_SIZE,
            registry_size: DEFAULT_REGISTRY_SIZE,
            registry_max_size: 0,
            minimize_stack_memory: false,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl Options {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();

        let call_stack_size = parse_positive(
            "LUME_CALL_STACK_SIZE",
            var("LUME_CALL_STACK_SIZE"),
            DEFAULT_CALL_STACK_SIZE,
        );
        let registry_size = parse_positive(
            "LUME_REGISTRY_SIZE",
            var("LUME_REGISTRY_SIZE"),
            DEFAULT_REGISTRY_SIZE,
        );
        let registry_max_size =
            parse_setting("LUME_REGISTRY_MAX_SIZE", var("LUME_REGISTRY_MAX_SIZE"), 0);
        let minimize_stack_memory = parse_flag(
            "LUME_MINIMIZE_STACK_MEMORY",
            var("LUME_MINIMIZE_STACK_MEMORY"),
        );
        let poll_ms = parse_positive(
            "LUME_POLL_INTERVAL_MS",
            var("LUME_POLL_INTERVAL_MS"),
            DEFAULT_POLL_INTERVAL_MS,
        );

        Options {
            call_stack_size,
            registry_size,
            registry_max_size,
            minimize_stack_memory,
            poll_interval: Duration::from_millis(poll_ms),
        }
    }
}

/// Parse a numeric setting, warning and falling back on malformed input
pub(crate) fn parse_setting<T>(name: &str, value: Option<String>, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match value {
        Some(text) => match text.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    "{}='{}' is not a valid number, using default {}",
                    name,
                    text,
                    default
                );
                default
            }
        },
        None => default,
    }
}

/// Like `parse_setting` but zero is also rejected
pub(crate) fn parse_positive<T>(name: &str, value: Option<String>, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display + PartialEq + Default,
{
    let parsed = parse_setting(name, value, default);
    if parsed == T::default() {
        tracing::warn!("{}=0 is invalid, using default {}", name, default);
        default
    } else {
        parsed
    }
}

fn parse_flag(name: &str, value: Option<String>) -> bool {
    match value.as_deref().map(str::trim) {
        None => false,
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" || v.is_empty() => false,
        Some(v) => {
            tracing::warn!("{}='{}' is not a boolean, using default false", name, v);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let opts = Options::default();
        assert_eq!(opts.call_stack_size, 200);
        assert_eq!(opts.registry_size, 5120);
        assert_eq!(opts.registry_max_size, 0);
        assert!(!opts.minimize_stack_memory);
        assert_eq!(opts.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_parse_setting_valid() {
        assert_eq!(parse_setting("X", Some("42".to_string()), 7usize), 42);
        assert_eq!(parse_setting("X", Some(" 0 ".to_string()), 7usize), 0);
        assert_eq!(parse_setting("X", None, 7usize), 7);
    }

    #[test]
    fn test_parse_setting_invalid_falls_back() {
        assert_eq!(parse_setting("X", Some("abc".to_string()), 7usize), 7);
        assert_eq!(parse_setting("X", Some("-1".to_string()), 7usize), 7);
        assert_eq!(parse_setting("X", Some("".to_string()), 7usize), 7);
    }

    #[test]
    fn test_parse_positive_rejects_zero() {
        assert_eq!(parse_positive("X", Some("0".to_string()), 200usize), 200);
        assert_eq!(parse_positive("X", Some("50".to_string()), 200usize), 50);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("X", Some("true".to_string())));
        assert!(parse_flag("X", Some("1".to_string())));
        assert!(parse_flag("X", Some("TRUE".to_string())));
        assert!(!parse_flag("X", Some("false".to_string())));
        assert!(!parse_flag("X", Some("yes please".to_string())));
        assert!(!parse_flag("X", None));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        // SAFETY: serialised with the other environment tests
        unsafe {
            std::env::set_var("LUME_CALL_STACK_SIZE", "64");
            std::env::set_var("LUME_REGISTRY_MAX_SIZE", "10240");
            std::env::set_var("LUME_MINIMIZE_STACK_MEMORY", "true");
            std::env::set_var("LUME_POLL_INTERVAL_MS", "bogus");
        }
        let opts = Options::from_env();
        unsafe {
            std::env::remove_var("LUME_CALL_STACK_SIZE");
            std::env::remove_var("LUME_REGISTRY_MAX_SIZE");
            std::env::remove_var("LUME_MINIMIZE_STACK_MEMORY");
            std::env::remove_var("LUME_POLL_INTERVAL_MS");
        }

        assert_eq!(opts.call_stack_size, 64);
        assert_eq!(opts.registry_size, DEFAULT_REGISTRY_SIZE);
        assert_eq!(opts.registry_max_size, 10240);
        assert!(opts.minimize_stack_memory);
        assert_eq!(opts.poll_interval, Duration::from_millis(10));
    }
}
