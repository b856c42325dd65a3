// SPDX-License-Identifier: Apache-2.0 OR MIT
// Backend worker: drains every producer queue, reconstructs the global
// timestamp order, formats records, and dispatches them to handlers

use crate::backtrace::BacktraceStorage;
use crate::clock::CycleClock;
use crate::codec::align_up;
use crate::config::{Config, TimestampMode};
use crate::context::ThreadContext;
use crate::handler::RecordMeta;
use crate::logger::{LoggerDetails, RecordHeader, HEADER_SIZE};
use crate::metadata::{CallsiteDescriptor, EventKind};
use crate::queue::RESERVATION_ALIGN;
use crate::registry::ThreadContextRegistry;
use std::collections::{BinaryHeap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Side-channel for faults the engine recovers from (dropped records,
/// panicking handlers) and for the diagnostic printed before a fatal abort.
pub type DiagnosticSink = Box<dyn Fn(&str) + Send + Sync>;

/// State shared between the engine handle and the backend thread.
pub(crate) struct EngineShared {
    pub registry: Arc<ThreadContextRegistry>,
    pub config: Config,
    /// Resolved at startup; may differ from `config.timestamp_mode` when
    /// the target has no cycle counter.
    pub mode: TimestampMode,
    /// Keeps every logger's details alive at least as long as the backend,
    /// so the raw pointer in record headers stays valid through dispatch.
    pub loggers: Mutex<Vec<Arc<LoggerDetails>>>,
    pub run: AtomicBool,
    pub started: AtomicBool,
    pub diagnostics: DiagnosticSink,
}

/// One decoded record waiting in the backend's ordering heap.
pub(crate) struct TransitEvent {
    ctx: Arc<ThreadContext>,
    header: RecordHeader,
    text: String,
    flush_signal: Option<Arc<AtomicBool>>,
    /// Global decode sequence; preserves intra-queue arrival order in ties
    arrival: u64,
}

impl TransitEvent {
    #[inline]
    fn descriptor(&self) -> &'static CallsiteDescriptor {
        // SAFETY: headers only ever carry addresses of descriptors with
        // static lifetime (per-call-site statics or OnceLock cells).
        unsafe { &*(self.header.descriptor as *const CallsiteDescriptor) }
    }

    #[inline]
    fn logger_details(&self) -> &LoggerDetails {
        // SAFETY: `EngineShared::loggers` keeps every LoggerDetails alive
        // until after the backend thread exits.
        unsafe { &*(self.header.logger as *const LoggerDetails) }
    }

    #[cfg(test)]
    pub(crate) fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Dispatch order: timestamp, then context identity, then intra-queue
    /// arrival. The deterministic tie-break the engine documents.
    #[inline]
    fn key(&self) -> (u64, u64, u64) {
        (self.header.timestamp, self.ctx.seq(), self.arrival)
    }
}

impl PartialEq for TransitEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TransitEvent {}

impl PartialOrd for TransitEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransitEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

pub(crate) fn spawn_backend(
    shared: Arc<EngineShared>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name(shared.config.backend_thread_name.clone())
        .spawn(move || BackendWorker::new(shared).run())
}

/// The dedicated formatting-and-dispatch thread.
pub(crate) struct BackendWorker {
    shared: Arc<EngineShared>,
    heap: BinaryHeap<std::cmp::Reverse<TransitEvent>>,
    /// Backtrace rings keyed by logger identity (details address)
    backtraces: HashMap<usize, BacktraceStorage>,
    /// Present in cycle-counter mode only
    clock: Option<CycleClock>,
    snapshot: Vec<Arc<ThreadContext>>,
    snapshot_generation: u64,
    arrival_counter: u64,
    unflushed: bool,
}

impl BackendWorker {
    fn new(shared: Arc<EngineShared>) -> Self {
        let clock = match shared.mode {
            TimestampMode::Tsc => Some(CycleClock::new(shared.config.tsc_resync_interval)),
            TimestampMode::Wall => None,
        };
        Self {
            shared,
            heap: BinaryHeap::new(),
            backtraces: HashMap::new(),
            clock,
            snapshot: Vec::new(),
            snapshot_generation: u64::MAX,
            arrival_counter: 0,
            unflushed: false,
        }
    }

    fn run(mut self) {
        self.shared.started.store(true, Ordering::SeqCst);
        while self.shared.run.load(Ordering::Relaxed) {
            self.main_loop();
        }
        self.exit();
    }

    fn main_loop(&mut self) {
        self.refresh_snapshot();
        self.populate(false);

        if !self.heap.is_empty() {
            self.commit();
        } else {
            // Every queue is drained: flush what the OS buffered, surface
            // drop counts, reclaim dead contexts, then sleep.
            self.force_flush_handlers();
            self.report_dropped();
            self.reap();
            std::thread::sleep(self.shared.config.backend_sleep);
        }
    }

    /// Drain everything and leave. Producers that keep logging during
    /// shutdown are drained too, until a full pass finds nothing.
    fn exit(&mut self) {
        loop {
            self.refresh_snapshot();
            self.populate(true);
            if self.heap.is_empty() {
                self.report_dropped();
                self.force_flush_handlers();
                self.reap();
                return;
            }
            while let Some(std::cmp::Reverse(event)) = self.heap.pop() {
                self.dispatch(event);
            }
        }
    }

    fn refresh_snapshot(&mut self) {
        let generation = self.shared.registry.generation();
        if generation != self.snapshot_generation {
            self.snapshot = self.shared.registry.snapshot();
            self.snapshot_generation = generation;
        }
    }

    /// Poll every context, decoding at most `poll_batch` records per
    /// context per call so one hot thread cannot starve the others, and
    /// stopping at `max_transit_events` pending (except while terminating,
    /// when queues are drained whole for a complete final ordering pass).
    fn populate(&mut self, terminating: bool) {
        let max_transit = self.shared.config.max_transit_events.max(1);
        let batch = if terminating {
            usize::MAX
        } else {
            self.shared.config.poll_batch.max(1)
        };

        for i in 0..self.snapshot.len() {
            let ctx = Arc::clone(&self.snapshot[i]);
            let mut polled = 0usize;
            while (terminating || self.heap.len() < max_transit) && polled < batch {
                match self.read_one(&ctx) {
                    Some(event) => {
                        self.heap.push(std::cmp::Reverse(event));
                        polled += 1;
                    }
                    None => break,
                }
            }
        }
    }

    /// Decode one record from `ctx`, or `None` when its queue is empty.
    fn read_one(&mut self, ctx: &Arc<ThreadContext>) -> Option<TransitEvent> {
        let bytes = ctx.queue().prepare_read()?;
        if bytes.len() < HEADER_SIZE {
            self.fatal("record shorter than its header");
        }

        // SAFETY: every committed run starts with a whole record; the
        // header sits at the 8-aligned region start.
        let header = unsafe { std::ptr::read(bytes.as_ptr().cast::<RecordHeader>()) };
        // SAFETY: descriptor addresses are process-lifetime statics.
        let descriptor = unsafe { &*(header.descriptor as *const CallsiteDescriptor) };

        let (text, consumed, flush_signal) = match descriptor.metadata().kind() {
            EventKind::Flush => {
                // Flush records carry one raw pointer instead of formatted
                // arguments; reconstruct the signal the producer leaked.
                if bytes.len() < HEADER_SIZE + 8 {
                    self.fatal("flush record shorter than its signal");
                }
                // SAFETY: offset HEADER_SIZE is 8-aligned within the record.
                let raw =
                    unsafe { std::ptr::read(bytes.as_ptr().add(HEADER_SIZE).cast::<u64>()) };
                // SAFETY: the producer wrote Arc::into_raw of a clone it
                // holds; exactly one flush record reads it back.
                let signal = unsafe { Arc::from_raw(raw as usize as *const AtomicBool) };
                (String::new(), 8, Some(signal))
            }
            _ => match descriptor.decode(&bytes[HEADER_SIZE..]) {
                Ok(decoded) => (decoded.text, decoded.consumed, None),
                Err(err) => {
                    // A decode fault would misalign every following record
                    // in this queue; continuing is worse than dying.
                    self.fatal(&format!(
                        "decoder invariant violation at {}:{}: {err}",
                        descriptor.metadata().file_name(),
                        descriptor.metadata().line()
                    ));
                }
            },
        };

        let total = align_up(HEADER_SIZE + consumed, RESERVATION_ALIGN);
        if total > bytes.len() {
            self.fatal("decoder consumed past the committed record");
        }
        ctx.queue().finish_read(total);

        self.arrival_counter += 1;
        Some(TransitEvent {
            ctx: Arc::clone(ctx),
            header,
            text,
            flush_signal,
            arrival: self.arrival_counter,
        })
    }

    /// Pop and dispatch every pending event that is provably not going to
    /// be preceded by anything still in a producer queue: its timestamp is
    /// at or before the earliest possible timestamp of any undrained
    /// record (the oldest still-queued header per context, or a fresh
    /// "now" for contexts that are currently empty).
    fn commit(&mut self) {
        // Catch producers that registered since the poll above, so the
        // bound accounts for their queued records too.
        self.refresh_snapshot();
        let bound = self.commit_bound();
        while let Some(std::cmp::Reverse(top)) = self.heap.peek() {
            if top.header.timestamp > bound {
                break;
            }
            let std::cmp::Reverse(event) = self.heap.pop().expect("peeked");
            self.dispatch(event);
        }
    }

    fn commit_bound(&mut self) -> u64 {
        let mut bound = u64::MAX;
        for ctx in &self.snapshot {
            let next = match Self::peek_timestamp(ctx) {
                Some(ts) => ts,
                None => self.shared.mode.now(),
            };
            bound = bound.min(next);
        }
        bound
    }

    fn peek_timestamp(ctx: &ThreadContext) -> Option<u64> {
        let bytes = ctx.queue().prepare_read()?;
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        // SAFETY: as in read_one; the header is read without consuming.
        let header = unsafe { std::ptr::read(bytes.as_ptr().cast::<RecordHeader>()) };
        Some(header.timestamp)
    }

    fn dispatch(&mut self, event: TransitEvent) {
        match event.descriptor().metadata().kind() {
            EventKind::Log => self.dispatch_log(event),
            EventKind::InitBacktrace => {
                let capacity = event.text.parse::<usize>().unwrap_or(1);
                self.backtraces
                    .entry(event.header.logger)
                    .and_modify(|ring| ring.set_capacity(capacity))
                    .or_insert_with(|| BacktraceStorage::new(capacity));
            }
            EventKind::FlushBacktrace => self.replay_backtrace(event.header.logger),
            EventKind::Flush => {
                if let Some(signal) = event.flush_signal {
                    signal.store(true, Ordering::Release);
                }
                self.force_flush_handlers();
            }
        }
    }

    fn dispatch_log(&mut self, event: TransitEvent) {
        let metadata = event.descriptor().metadata();
        let details = event.logger_details();

        // Backtrace routing: a backtrace-path record below the logger's
        // current threshold is held in the ring instead of dispatched.
        if metadata.backtrace_path() && metadata.level() < details.level() {
            if let Some(ring) = self.backtraces.get_mut(&event.header.logger) {
                ring.store(event);
            }
            return;
        }

        let flush_level = details.backtrace_flush_level();
        let triggers_replay = metadata.level() >= flush_level;
        let logger_key = event.header.logger;

        self.write_event(&event);
        self.unflushed = true;

        if triggers_replay {
            self.replay_backtrace(logger_key);
        }
    }

    /// Oldest-first replay of one logger's ring; the ring is empty after.
    fn replay_backtrace(&mut self, logger_key: usize) {
        let Some(mut ring) = self.backtraces.remove(&logger_key) else {
            return;
        };
        for event in ring.drain() {
            self.write_event(&event);
            self.unflushed = true;
        }
        self.backtraces.insert(logger_key, ring);
    }

    fn write_event(&mut self, event: &TransitEvent) {
        let details = event.logger_details();
        let timestamp_ns = self.to_epoch_nanos(event.header.timestamp);
        let record_meta = RecordMeta {
            timestamp_ns,
            thread_id: event.ctx.thread_id(),
            logger_name: details.name(),
            metadata: event.descriptor().metadata(),
        };

        for handler in details.handlers() {
            // A panicking handler is isolated; the remaining handlers for
            // this record still run.
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                let mut handler = handler.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                handler.write(&event.text, &record_meta);
            }));
            if result.is_err() {
                (self.shared.diagnostics)(&format!(
                    "fastlog: handler panicked writing a record for logger `{}`",
                    details.name()
                ));
            }
        }
    }

    fn to_epoch_nanos(&mut self, timestamp: u64) -> u64 {
        match &mut self.clock {
            Some(clock) => clock.to_epoch_nanos(timestamp),
            None => timestamp,
        }
    }

    fn force_flush_handlers(&mut self) {
        if !self.unflushed {
            return;
        }
        let loggers = self
            .shared
            .loggers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for details in loggers {
            for handler in details.handlers() {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    handler
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .flush();
                }));
                if result.is_err() {
                    (self.shared.diagnostics)("fastlog: handler panicked during flush");
                }
            }
        }
        self.unflushed = false;
    }

    fn report_dropped(&mut self) {
        for ctx in &self.snapshot {
            let dropped = ctx.take_dropped();
            if dropped > 0 {
                (self.shared.diagnostics)(&format!(
                    "fastlog: dropped {dropped} records from thread {}",
                    ctx.thread_id()
                ));
            }
        }
    }

    /// Reclaim contexts of exited threads. Runs only while the heap is
    /// empty, so no pending transit event can reference a reaped context.
    fn reap(&mut self) {
        debug_assert!(self.heap.is_empty());
        let removed = self.shared.registry.reap();
        if removed.is_empty() {
            return;
        }
        for ctx in removed {
            let dropped = ctx.take_dropped();
            if dropped > 0 {
                (self.shared.diagnostics)(&format!(
                    "fastlog: dropped {dropped} records from exited thread {}",
                    ctx.thread_id()
                ));
            }
        }
        // Let go of the reaped contexts' Arcs right away.
        self.refresh_snapshot();
    }

    fn fatal(&self, message: &str) -> ! {
        (self.shared.diagnostics)(&format!("fastlog backend fatal: {message}"));
        // A corrupt stream cannot be skipped: every later record in the
        // queue would be misread. Dying loudly beats logging garbage.
        std::process::abort();
    }
}
