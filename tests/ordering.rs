// Per-thread and cross-thread ordering of dispatched records

mod common;

use common::{capture, engine, texts};
use fastlog::{flog_info, Level};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_single_thread_program_order() {
    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("s1", vec![handler]);

    flog_info!(logger, "a={}", 1);
    flog_info!(logger, "b={}", 2);
    flog_info!(logger, "c={}", 3);
    engine.flush();

    assert_eq!(texts(&lines), vec!["a=1", "b=2", "c=3"]);
    engine.stop();
}

#[test]
fn test_single_thread_order_holds_under_volume() {
    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("volume", vec![handler]);

    for i in 0..5_000u32 {
        flog_info!(logger, "seq={}", i);
    }
    engine.flush();

    let texts = texts(&lines);
    assert_eq!(texts.len(), 5_000);
    for (i, line) in texts.iter().enumerate() {
        assert_eq!(line, &format!("seq={i}"), "record {i} out of order");
    }
    engine.stop();
}

#[test]
fn test_two_thread_merge_follows_timestamps() {
    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("merge", vec![handler]);

    // T1 logs at ~0ms and ~100ms, T2 at ~50ms and ~150ms. The gaps are far
    // wider than scheduling jitter, so the expected interleave is stable.
    let barrier = Arc::new(Barrier::new(2));
    let t1 = {
        let logger = logger.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            flog_info!(logger, "t1-first");
            thread::sleep(Duration::from_millis(100));
            flog_info!(logger, "t1-second");
        })
    };
    let t2 = {
        let logger = logger.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            thread::sleep(Duration::from_millis(50));
            flog_info!(logger, "t2-first");
            thread::sleep(Duration::from_millis(100));
            flog_info!(logger, "t2-second");
        })
    };
    t1.join().unwrap();
    t2.join().unwrap();
    engine.flush();

    assert_eq!(
        texts(&lines),
        vec!["t1-first", "t2-first", "t1-second", "t2-second"]
    );
    engine.stop();
}

#[test]
fn test_global_dispatch_is_nondecreasing_in_timestamp() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 2_000;

    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("global", vec![handler]);

    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let logger = logger.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_THREAD {
                    flog_info!(logger, "{}:{}", t, i);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    engine.flush();

    let captured = lines.lock().unwrap();
    assert_eq!(captured.len(), THREADS * PER_THREAD);

    // Dispatch order is non-decreasing in converted timestamp.
    for pair in captured.windows(2) {
        assert!(
            pair[0].timestamp_ns <= pair[1].timestamp_ns,
            "timestamps regressed: {} then {}",
            pair[0].timestamp_ns,
            pair[1].timestamp_ns
        );
    }

    // And each thread's records appear in its own program order.
    for t in 0..THREADS {
        let prefix = format!("{t}:");
        let mine: Vec<usize> = captured
            .iter()
            .filter_map(|c| c.text.strip_prefix(&prefix).map(|i| i.parse().unwrap()))
            .collect();
        assert_eq!(mine.len(), PER_THREAD);
        assert!(
            mine.windows(2).all(|w| w[0] + 1 == w[1]),
            "thread {t} records reordered"
        );
    }
    drop(captured);
    engine.stop();
}

#[test]
fn test_records_from_exited_threads_still_dispatch() {
    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("exits", vec![handler]);

    for round in 0..8u32 {
        let logger = logger.clone();
        thread::spawn(move || {
            flog_info!(logger, "round {}", round);
        })
        .join()
        .unwrap();
    }
    engine.flush();
    assert_eq!(lines.lock().unwrap().len(), 8);
    engine.stop();
}

#[test]
fn test_level_recorded_on_dispatch() {
    let engine = engine();
    let (handler, lines) = capture();
    let logger = engine.logger("levels", vec![handler]);

    flog_info!(logger, "one");
    fastlog::flog_error!(logger, "two");
    engine.flush();

    let captured = lines.lock().unwrap();
    assert_eq!(captured[0].level, Level::Info);
    assert_eq!(captured[1].level, Level::Error);
    drop(captured);
    engine.stop();
}
