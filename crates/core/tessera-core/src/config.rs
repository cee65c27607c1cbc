//! Build-time configuration bridge.
//!
//! Resolves the tunables below from environment variables at compile time,
//! giving one source of truth for the values every crate in the workspace
//! reads. Unset variables fall back to the documented defaults; malformed
//! values fail the build.
//!
//! | variable                 | constant                  | default |
//! |--------------------------|---------------------------|---------|
//! | `TESSERA_LOG_LEVEL`      | [`MAX_LOG_LEVEL`]         | `debug` |
//! | `TESSERA_CAP_WALK_LIMIT` | [`CAPABILITY_WALK_LIMIT`] | `64`    |

use crate::log::LogLevel;
use crate::static_assert;

/// Maximum log level (compile-time). Messages more verbose than this are
/// dropped before reaching the registered log function.
pub const MAX_LOG_LEVEL: LogLevel = match option_env!("TESSERA_LOG_LEVEL") {
    Some(level) => parse_log_level(level),
    None => LogLevel::Debug,
};

/// Maximum number of entries visited when walking a PCI capability list.
///
/// The bound exists only to terminate walks over corrupted or cyclic
/// chains. A device with a legitimately longer chain has its tail
/// truncated: a capability past the bound is reported as not found.
pub const CAPABILITY_WALK_LIMIT: u32 = match option_env!("TESSERA_CAP_WALK_LIMIT") {
    Some(limit) => parse_u32(limit),
    None => 64,
};

static_assert!(CAPABILITY_WALK_LIMIT > 0, "TESSERA_CAP_WALK_LIMIT must be non-zero");

/// Default page granularity used when a kernel does not report its own.
pub const PAGE_SIZE: u64 = 4096;

static_assert!(PAGE_SIZE.is_power_of_two());

const fn parse_log_level(s: &str) -> LogLevel {
    match s.as_bytes() {
        b"error" => LogLevel::Error,
        b"warn" => LogLevel::Warn,
        b"info" => LogLevel::Info,
        b"debug" => LogLevel::Debug,
        b"trace" => LogLevel::Trace,
        _ => panic!("TESSERA_LOG_LEVEL must be one of error/warn/info/debug/trace"),
    }
}

const fn parse_u32(s: &str) -> u32 {
    let bytes = s.as_bytes();
    assert!(!bytes.is_empty(), "empty numeric configuration value");
    let mut value: u32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        assert!(b.is_ascii_digit(), "numeric configuration value must be decimal");
        value = match value.checked_mul(10) {
            Some(v) => match v.checked_add((b - b'0') as u32) {
                Some(v) => v,
                None => panic!("numeric configuration value overflows u32"),
            },
            None => panic!("numeric configuration value overflows u32"),
        };
        i += 1;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_decimal() {
        assert_eq!(parse_u32("0"), 0);
        assert_eq!(parse_u32("64"), 64);
        assert_eq!(parse_u32("4294967295"), u32::MAX);
    }

    #[test]
    #[should_panic(expected = "decimal")]
    fn parse_rejects_hex() {
        let _ = parse_u32("0x40");
    }

    #[test]
    fn parse_levels() {
        assert_eq!(parse_log_level("warn"), LogLevel::Warn);
        assert_eq!(parse_log_level("trace"), LogLevel::Trace);
    }

    #[test]
    fn walk_limit_is_usable() {
        assert!(CAPABILITY_WALK_LIMIT > 0);
    }
}
