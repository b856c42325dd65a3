// Level gating and codec behavior observed end to end

mod common;

use common::{capture, engine, texts};
use fastlog::{flog, flog_info, ConfigError, Deferred, Level};
use std::ffi::CStr;

#[test]
fn test_threshold_gates_exactly() {
    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("gate", vec![handler]);

    logger.set_level(Level::Warning).unwrap();
    flog!(logger, Level::TraceL1, "below");
    flog!(logger, Level::Debug, "below");
    flog!(logger, Level::Info, "below");
    flog!(logger, Level::Warning, "at");
    flog!(logger, Level::Error, "above");
    flog!(logger, Level::Critical, "above");
    engine.flush();

    assert_eq!(texts(&lines), vec!["at", "above", "above"]);
    engine.stop();
}

#[test]
fn test_threshold_none_blocks_everything() {
    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("none", vec![handler]);

    logger.set_level(Level::None).unwrap();
    flog!(logger, Level::Critical, "never");
    engine.flush();

    assert!(texts(&lines).is_empty());
    engine.stop();
}

#[test]
fn test_set_level_backtrace_is_rejected() {
    let engine = engine();
    let logger = engine.logger("reject", Vec::new());
    assert_eq!(
        logger.set_level(Level::Backtrace),
        Err(ConfigError::ReservedLevel)
    );
    assert_eq!(logger.level(), Level::Info);
    engine.stop();
}

#[test]
fn test_cstring_int_owned_string_record() {
    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("s5", vec![handler]);

    let c_hello = CStr::from_bytes_with_nul(b"hello\0").unwrap();
    let owned = String::from("world");
    flog_info!(logger, "{}:{}:{}", c_hello, 42i32, owned);
    engine.flush();

    assert_eq!(texts(&lines), vec!["hello:42:world"]);
    engine.stop();
}

#[test]
fn test_mixed_scalar_arguments_match_reference_formatting() {
    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("scalars", vec![handler]);

    flog_info!(
        logger,
        "{} {} {} {} {} {}",
        -3i64,
        u64::MAX,
        0.25f32,
        0.1f64,
        true,
        'z'
    );
    engine.flush();

    assert_eq!(
        texts(&lines),
        vec![format!(
            "{} {} {} {} {} {}",
            -3i64,
            u64::MAX,
            0.25f32,
            0.1f64,
            true,
            'z'
        )]
    );
    engine.stop();
}

#[test]
fn test_deferred_argument_renders_on_backend() {
    struct Point {
        x: i32,
        y: i32,
    }
    impl std::fmt::Display for Point {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "({}, {})", self.x, self.y)
        }
    }

    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("deferred", vec![handler]);

    flog_info!(logger, "at {}", Deferred(Point { x: 3, y: -4 }));
    engine.flush();

    assert_eq!(texts(&lines), vec!["at (3, -4)"]);
    engine.stop();
}

#[test]
fn test_every_handler_of_a_logger_receives_the_record() {
    let engine = engine();
    let (first, first_lines) = capture();
    let (second, second_lines) = capture();
    let logger = engine.logger("fanout", vec![first, second]);

    flog_info!(logger, "copied");
    engine.flush();

    assert_eq!(texts(&first_lines), vec!["copied"]);
    assert_eq!(texts(&second_lines), vec!["copied"]);
    engine.stop();
}

#[test]
fn test_loggers_do_not_share_thresholds() {
    let engine = engine();
    let (handler_a, lines_a) = capture();
    let (handler_b, lines_b) = capture();
    let quiet = engine.logger("quiet", vec![handler_a]);
    let loud = engine.logger("loud", vec![handler_b]);

    quiet.set_level(Level::Error).unwrap();
    flog_info!(quiet, "suppressed");
    flog_info!(loud, "delivered");
    engine.flush();

    assert!(texts(&lines_a).is_empty());
    assert_eq!(texts(&lines_b), vec!["delivered"]);
    engine.stop();
}
