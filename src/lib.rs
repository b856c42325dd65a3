// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Asynchronous low-latency structured logging engine.
//!
//! A logging statement on a hot thread costs a level check, a bounded
//! binary serialization of its arguments into a single-producer queue, and
//! one release store. Formatting, timestamp conversion, and handler I/O all
//! happen on one dedicated backend thread, which merges every producer's
//! stream back into global timestamp order before dispatching.
//!
//! ```ignore
//! use fastlog::{flog_info, Config, Engine, StdoutHandler};
//!
//! let engine = Engine::start(Config::default())?;
//! let logger = engine.logger("app", vec![fastlog::handler_ref(StdoutHandler::new())]);
//!
//! flog_info!(logger, "listening on {}:{}", "0.0.0.0", 9000);
//!
//! engine.flush();
//! engine.stop();
//! ```
//!
//! Producer threads never block and never take a lock: each gets its own
//! byte queue on first use, discovered by the backend through the thread
//! context registry. Bounded queues drop (and count) records when full
//! rather than stalling the producer.

mod backend;
mod backtrace;
pub mod clock;
pub mod codec;
pub mod config;
mod context;
mod error;
pub mod handler;
mod level;
mod logger;
#[macro_use]
mod macros;
mod metadata;
mod queue;
mod registry;

pub use backend::DiagnosticSink;
pub use codec::Deferred;
pub use config::{Config, QueueKind, TimestampMode};
pub use error::ConfigError;
pub use handler::{handler_ref, Handler, HandlerRef, RecordMeta, StderrHandler, StdoutHandler};
pub use level::Level;
pub use logger::{Logger, MAX_RECORD_SIZE};
pub use metadata::{CallsiteDescriptor, EventKind, MacroMetadata};

use backend::{spawn_backend, EngineShared};
use logger::LoggerDetails;
use registry::ThreadContextRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// The engine: owns the backend thread, the thread context registry, and
/// every logger created through it.
///
/// Start one per process (or per test); loggers stay usable for as long as
/// the engine lives. [`stop`](Engine::stop) — or dropping the engine —
/// drains every producer queue before the backend exits, so nothing logged
/// before shutdown is lost.
pub struct Engine {
    shared: Arc<EngineShared>,
    /// Handler-less logger the engine enqueues flush markers through
    control: Logger,
    backend: Option<JoinHandle<()>>,
}

impl Engine {
    /// Start the backend with diagnostics going to stderr.
    pub fn start(config: Config) -> Result<Self, ConfigError> {
        Self::start_with_diagnostics(config, Box::new(|message| eprintln!("{message}")))
    }

    /// Start the backend with a custom diagnostic side-channel (dropped
    /// record reports, handler failures, fatal decode diagnostics).
    pub fn start_with_diagnostics(
        config: Config,
        diagnostics: DiagnosticSink,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mode = config.timestamp_mode.resolve();
        let registry = ThreadContextRegistry::new(config.queue);

        let shared = Arc::new(EngineShared {
            registry,
            config,
            mode,
            loggers: Mutex::new(Vec::new()),
            run: AtomicBool::new(true),
            started: AtomicBool::new(false),
            diagnostics,
        });

        let backend = spawn_backend(Arc::clone(&shared))
            .map_err(|err| ConfigError::BackendSpawn(err.to_string()))?;

        // The backend calibrates its clock before it starts draining; wait
        // so the first statements are not sitting in queues unconverted
        // while calibration spins.
        while !shared.started.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_micros(100));
        }

        let control = Self::new_logger(&shared, "fastlog.control", Vec::new());
        Ok(Self {
            shared,
            control,
            backend: Some(backend),
        })
    }

    fn new_logger(shared: &Arc<EngineShared>, name: &str, handlers: Vec<HandlerRef>) -> Logger {
        let details = Arc::new(LoggerDetails::new(name, handlers));
        shared
            .loggers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::clone(&details));
        Logger::new(details, Arc::clone(&shared.registry), shared.mode)
    }

    /// Create a named logger dispatching to `handlers`. The handler list is
    /// fixed at creation (the backend iterates it without synchronization).
    pub fn logger(&self, name: &str, handlers: Vec<HandlerRef>) -> Logger {
        Self::new_logger(&self.shared, name, handlers)
    }

    /// The resolved timestamp mode (may be [`TimestampMode::Wall`] even if
    /// [`TimestampMode::Tsc`] was configured, on targets without a cycle
    /// counter).
    pub fn timestamp_mode(&self) -> TimestampMode {
        self.shared.mode
    }

    /// Block until the backend has dispatched everything enqueued before
    /// this call. Calling it again with no intervening statements returns
    /// after one queue round-trip with nothing to do.
    pub fn flush(&self) {
        if self.backend.is_none() {
            return;
        }
        self.control.flush_blocking();
    }

    /// Stop the backend: it drains every queue to empty, emits final
    /// dropped-record diagnostics, reaps dead contexts, and exits.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };
        self.shared.run.store(false, Ordering::SeqCst);
        let _ = backend.join();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
