// Flush semantics and bounded-queue drop accounting

mod common;

use common::{bounded_engine, capture, diagnostics_capture, engine, texts};
use fastlog::{flog_info, Config, Engine, QueueKind};

#[test]
fn test_flush_waits_for_prior_records() {
    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("s6", vec![handler]);

    for i in 0..500u32 {
        flog_info!(logger, "n={}", i);
    }
    engine.flush();

    // Everything enqueued before the flush marker is already dispatched by
    // the time flush returns.
    assert_eq!(lines.lock().unwrap().len(), 500);
    engine.stop();
}

#[test]
fn test_flush_is_idempotent() {
    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("idempotent", vec![handler]);

    flog_info!(logger, "once");
    engine.flush();
    let after_first = lines.lock().unwrap().len();
    engine.flush();
    let after_second = lines.lock().unwrap().len();

    assert_eq!(after_first, 1);
    assert_eq!(after_second, after_first, "second flush must observe nothing new");
    engine.stop();
}

#[test]
fn test_bounded_queue_drops_are_counted_not_lost_silently() {
    const TOTAL: u32 = 2_000;

    let (sink, diagnostics) = diagnostics_capture();
    let engine = Engine::start_with_diagnostics(
        Config {
            queue: QueueKind::Bounded { capacity: 512 },
            ..Config::default()
        },
        sink,
    )
    .unwrap();
    let (handler, lines) = capture();
    let logger = engine.logger("drops", vec![handler]);

    for i in 0..TOTAL {
        flog_info!(logger, "{}", i);
    }
    engine.stop();

    // Shutdown drains the queues and reports the final drop counts, so
    // delivered + reported-dropped must account for every statement.
    let delivered: Vec<u32> = texts(&lines).iter().map(|t| t.parse().unwrap()).collect();
    let dropped: u32 = diagnostics
        .lock()
        .unwrap()
        .iter()
        .filter_map(|m| {
            m.strip_prefix("fastlog: dropped ")
                .and_then(|rest| rest.split(' ').next())
                .and_then(|n| n.parse::<u32>().ok())
        })
        .sum();

    assert_eq!(delivered.len() as u32 + dropped, TOTAL);
    // No partial writes: what survived is whole records in program order.
    assert!(delivered.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_bounded_queue_keeps_all_records_when_backend_keeps_up() {
    let engine = bounded_engine(64 * 1024);
    let (handler, lines) = capture();
    let logger = engine.logger("roomy", vec![handler]);

    for i in 0..1_000u32 {
        flog_info!(logger, "i={}", i);
    }
    engine.flush();

    assert_eq!(lines.lock().unwrap().len(), 1_000);
    engine.stop();
}

#[test]
fn test_stop_drains_pending_records() {
    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("drain", vec![handler]);

    for i in 0..100u32 {
        flog_info!(logger, "pending {}", i);
    }
    // No flush: stop itself must drain every queue before exiting.
    engine.stop();

    assert_eq!(lines.lock().unwrap().len(), 100);
}

#[test]
fn test_flush_from_worker_thread() {
    let engine = std::sync::Arc::new(engine());
    let (handler, lines) = capture();
    let logger = engine.logger("worker-flush", vec![handler]);

    {
        let engine = std::sync::Arc::clone(&engine);
        std::thread::spawn(move || {
            flog_info!(logger, "from worker");
            engine.flush();
            assert_eq!(lines.lock().unwrap().len(), 1);
        })
        .join()
        .unwrap();
    }
}
