// Shared fixtures for the integration suite
#![allow(dead_code)] // each test binary uses a different subset

use fastlog::{handler_ref, Config, Engine, Handler, HandlerRef, Level, QueueKind, RecordMeta};
use std::sync::{Arc, Mutex};

/// One dispatched record as a handler saw it.
#[derive(Debug, Clone)]
pub struct Captured {
    pub level: Level,
    pub text: String,
    pub thread_id: u32,
    pub timestamp_ns: u64,
}

pub type CapturedLines = Arc<Mutex<Vec<Captured>>>;

struct CaptureHandler {
    lines: CapturedLines,
}

impl Handler for CaptureHandler {
    fn write(&mut self, text: &str, meta: &RecordMeta<'_>) {
        self.lines.lock().unwrap().push(Captured {
            level: meta.level(),
            text: text.to_string(),
            thread_id: meta.thread_id,
            timestamp_ns: meta.timestamp_ns,
        });
    }

    fn flush(&mut self) {}
}

/// Handler that records every dispatched line, plus the shared view of it.
pub fn capture() -> (HandlerRef, CapturedLines) {
    let lines: CapturedLines = Arc::new(Mutex::new(Vec::new()));
    (
        handler_ref(CaptureHandler {
            lines: Arc::clone(&lines),
        }),
        lines,
    )
}

pub fn texts(lines: &CapturedLines) -> Vec<String> {
    lines.lock().unwrap().iter().map(|c| c.text.clone()).collect()
}

/// Engine with a defaulted unbounded configuration.
pub fn engine() -> Engine {
    Engine::start(Config::default()).expect("engine start")
}

/// Engine with small bounded per-thread queues.
pub fn bounded_engine(capacity: usize) -> Engine {
    Engine::start(Config {
        queue: QueueKind::Bounded { capacity },
        ..Config::default()
    })
    .expect("engine start")
}

/// Diagnostic sink capturing backend side-channel messages.
pub fn diagnostics_capture() -> (fastlog::DiagnosticSink, Arc<Mutex<Vec<String>>>) {
    let messages: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let messages = Arc::clone(&messages);
        Box::new(move |message: &str| {
            messages.lock().unwrap().push(message.to_string());
        })
    };
    (sink, messages)
}
