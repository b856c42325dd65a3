// SPDX-License-Identifier: Apache-2.0 OR MIT
// Statement macros: the one place a static call-site descriptor can be
// materialized per logging statement

/// Log through `$logger` at `$level`.
///
/// Expands to a per-statement static [`MacroMetadata`](crate::MacroMetadata)
/// plus a descriptor cell, validates the format string against the argument
/// count at compile time, and gates on the logger threshold before touching
/// any argument.
///
/// The level must be a constant expression; the format string supports `{}`
/// placeholders and `{{`/`}}` escapes.
///
/// # Examples
/// ```ignore
/// flog!(logger, Level::Info, "rule {} installed on {}", rule_id, "eth0");
/// ```
#[macro_export]
macro_rules! flog {
    ($logger:expr, $level:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        const _: () = assert!(
            $crate::codec::format_matches($fmt, <[&str]>::len(&[$(stringify!($arg)),*])),
            "format string does not match the argument count"
        );
        static META: $crate::MacroMetadata = $crate::MacroMetadata::new(
            file!(),
            module_path!(),
            line!(),
            $fmt,
            $level,
            $crate::EventKind::Log,
            false,
        );
        static DESCRIPTOR: ::std::sync::OnceLock<$crate::CallsiteDescriptor> =
            ::std::sync::OnceLock::new();
        let logger: &$crate::Logger = &$logger;
        if logger.should_log($level) {
            logger.log_with(&DESCRIPTOR, &META, ($($arg,)*));
        }
    }};
}

/// Log through the backtrace path: below the logger threshold the record is
/// held in the logger's backtrace ring (once [`Logger::init_backtrace`]
/// configured one) instead of being dispatched, and replayed on flush.
///
/// [`Logger::init_backtrace`]: crate::Logger::init_backtrace
#[macro_export]
macro_rules! flog_backtrace {
    ($logger:expr, $level:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        const _: () = assert!(
            $crate::codec::format_matches($fmt, <[&str]>::len(&[$(stringify!($arg)),*])),
            "format string does not match the argument count"
        );
        static META: $crate::MacroMetadata = $crate::MacroMetadata::new(
            file!(),
            module_path!(),
            line!(),
            $fmt,
            $level,
            $crate::EventKind::Log,
            true,
        );
        static DESCRIPTOR: ::std::sync::OnceLock<$crate::CallsiteDescriptor> =
            ::std::sync::OnceLock::new();
        let logger: &$crate::Logger = &$logger;
        if logger.backtrace_should_log($level) {
            logger.log_with(&DESCRIPTOR, &META, ($($arg,)*));
        }
    }};
}

/// Log a message at trace level 1
///
/// # Examples
/// ```ignore
/// flog_trace_l1!(logger, "packet seq={}", seq);
/// ```
#[macro_export]
macro_rules! flog_trace_l1 {
    ($logger:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::flog!($logger, $crate::Level::TraceL1, $fmt $(, $arg)*)
    };
}

/// Log a message at trace level 2
#[macro_export]
macro_rules! flog_trace_l2 {
    ($logger:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::flog!($logger, $crate::Level::TraceL2, $fmt $(, $arg)*)
    };
}

/// Log a message at trace level 3
#[macro_export]
macro_rules! flog_trace_l3 {
    ($logger:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::flog!($logger, $crate::Level::TraceL3, $fmt $(, $arg)*)
    };
}

/// Log a message with debug severity
#[macro_export]
macro_rules! flog_debug {
    ($logger:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::flog!($logger, $crate::Level::Debug, $fmt $(, $arg)*)
    };
}

/// Log a message with info severity
///
/// # Examples
/// ```ignore
/// flog_info!(logger, "worker {} started", worker_id);
/// ```
#[macro_export]
macro_rules! flog_info {
    ($logger:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::flog!($logger, $crate::Level::Info, $fmt $(, $arg)*)
    };
}

/// Log a message with warning severity
#[macro_export]
macro_rules! flog_warning {
    ($logger:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::flog!($logger, $crate::Level::Warning, $fmt $(, $arg)*)
    };
}

/// Log a message with error severity
#[macro_export]
macro_rules! flog_error {
    ($logger:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::flog!($logger, $crate::Level::Error, $fmt $(, $arg)*)
    };
}

/// Log a message with critical severity
#[macro_export]
macro_rules! flog_critical {
    ($logger:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::flog!($logger, $crate::Level::Critical, $fmt $(, $arg)*)
    };
}

#[cfg(test)]
mod tests {
    use crate::config::QueueKind;
    use crate::logger::LoggerDetails;
    use crate::registry::ThreadContextRegistry;
    use crate::{Level, Logger, TimestampMode};
    use std::sync::Arc;

    fn quiet_logger() -> Logger {
        let registry = ThreadContextRegistry::new(QueueKind::Bounded { capacity: 4096 });
        Logger::new(
            Arc::new(LoggerDetails::new("macros", Vec::new())),
            registry,
            TimestampMode::Wall,
        )
    }

    #[test]
    fn test_macros_expand_for_all_levels() {
        let logger = quiet_logger();
        flog_trace_l3!(logger, "t3");
        flog_trace_l2!(logger, "t2");
        flog_trace_l1!(logger, "t1");
        flog_debug!(logger, "d");
        flog_info!(logger, "i={}", 1);
        flog_warning!(logger, "w={} {}", 1, "two");
        flog_error!(logger, "e");
        flog_critical!(logger, "c");
        flog!(logger, Level::Info, "explicit {} and trailing comma {}", 1, 2,);
        flog_backtrace!(logger, Level::TraceL1, "bt {}", 3);
    }

    #[test]
    fn test_gate_skips_serialization_below_threshold() {
        let logger = quiet_logger();
        logger.set_level(Level::None).unwrap();
        // A panicking Display argument proves the argument is never
        // touched when the gate rejects the statement.
        struct Bomb;
        impl std::fmt::Display for Bomb {
            fn fmt(&self, _: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                panic!("argument evaluated despite closed gate");
            }
        }
        flog_critical!(logger, "ignored {}", crate::Deferred(Bomb));
    }
}
