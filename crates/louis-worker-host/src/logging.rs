//! Engine log messages.
//!
//! liblouis reports problems (missing tables, syntax errors in rules)
//! through a registered log callback. Messages are both:
//! 1. Stored in the [`WorkerContext`] for later retrieval
//! 2. Emitted via the `tracing` crate with `guest_log = true`

use louis_worker_core::store::{LogLevel, WorkerContext};
use tracing::{debug, error, info, warn};

/// liblouis `LOU_LOG_INFO`.
pub const LOU_LOG_INFO: i32 = 20_000;
/// liblouis `LOU_LOG_WARN`.
pub const LOU_LOG_WARN: i32 = 30_000;
/// liblouis `LOU_LOG_ERROR`.
pub const LOU_LOG_ERROR: i32 = 40_000;

/// Host side of the engine's log callback.
pub struct LoggingHost;

impl LoggingHost {
    /// Record a message at the specified level.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The worker context to store logs in
    /// * `level` - The log level
    /// * `message` - The log message
    pub fn log(ctx: &mut WorkerContext, level: LogLevel, message: &str) {
        let context_id = ctx.context_id.clone();
        ctx.log(level, message.to_string());

        match level {
            LogLevel::Debug => debug!(context_id, guest_log = true, "{}", message),
            LogLevel::Info => info!(context_id, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(context_id, guest_log = true, "{}", message),
            LogLevel::Error => error!(context_id, guest_log = true, "{}", message),
        }
    }
}

/// Convert a liblouis log level to [`LogLevel`].
///
/// liblouis levels are `ALL = 0`, `DEBUG = 10000`, `INFO = 20000`,
/// `WARN = 30000`, `ERROR = 40000`, `FATAL = 50000`. Values between two
/// levels round down.
pub fn level_from_louis(level: i32) -> LogLevel {
    match level {
        i32::MIN..LOU_LOG_INFO => LogLevel::Debug,
        LOU_LOG_INFO..LOU_LOG_WARN => LogLevel::Info,
        LOU_LOG_WARN..LOU_LOG_ERROR => LogLevel::Warn,
        _ => LogLevel::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> WorkerContext {
        WorkerContext::new("test-123".into(), None, 16 * 1024 * 1024).unwrap()
    }

    #[test]
    fn test_logging_stores_in_context() {
        let mut ctx = context();

        LoggingHost::log(&mut ctx, LogLevel::Info, "Hello");
        LoggingHost::log(&mut ctx, LogLevel::Error, "World");

        assert_eq!(ctx.logs.len(), 2);
        assert_eq!(ctx.logs[0].message, "Hello");
        assert_eq!(ctx.logs[0].level, LogLevel::Info);
        assert_eq!(ctx.logs[1].message, "World");
        assert_eq!(ctx.logs[1].level, LogLevel::Error);
    }

    #[test]
    fn test_level_from_louis() {
        assert_eq!(level_from_louis(0), LogLevel::Debug);
        assert_eq!(level_from_louis(10_000), LogLevel::Debug);
        assert_eq!(level_from_louis(20_000), LogLevel::Info);
        assert_eq!(level_from_louis(30_000), LogLevel::Warn);
        assert_eq!(level_from_louis(35_000), LogLevel::Warn);
        assert_eq!(level_from_louis(40_000), LogLevel::Error);
        assert_eq!(level_from_louis(50_000), LogLevel::Error);
        assert_eq!(level_from_louis(-1), LogLevel::Debug);
    }
}
