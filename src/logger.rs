// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger handle: level gate, hot-path serialization, backtrace control

use crate::codec::{align_up, ArgTuple, CStrScratch};
use crate::config::TimestampMode;
use crate::error::ConfigError;
use crate::handler::HandlerRef;
use crate::level::Level;
use crate::metadata::{CallsiteDescriptor, EventKind, MacroMetadata};
use crate::queue::RESERVATION_ALIGN;
use crate::registry::ThreadContextRegistry;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Upper bound on a single encoded record. Exceeding it is a programmer
/// error: debug builds assert, release builds drop the record (bounded
/// queues also count it as dropped).
pub const MAX_RECORD_SIZE: usize = 1 << 20;

/// Fixed-layout prefix of every queued record. Both pointer fields address
/// process-lifetime data: descriptors are statics and logger details are
/// kept alive by the engine's logger collection until the backend has
/// drained every queue.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct RecordHeader {
    pub descriptor: usize,
    pub logger: usize,
    pub timestamp: u64,
}

pub(crate) const HEADER_SIZE: usize = std::mem::size_of::<RecordHeader>();

const _: () = assert!(HEADER_SIZE % RESERVATION_ALIGN == 0);
const _: () = assert!(std::mem::align_of::<RecordHeader>() <= RESERVATION_ALIGN);

/// Shared, process-lifetime state of one logger: what the backend reads
/// through the header's logger pointer.
pub struct LoggerDetails {
    name: String,
    handlers: Vec<HandlerRef>,
    level: AtomicU8,
    backtrace_flush_level: AtomicU8,
    backtrace_enabled: AtomicBool,
}

impl LoggerDetails {
    pub(crate) fn new(name: impl Into<String>, handlers: Vec<HandlerRef>) -> Self {
        Self {
            name: name.into(),
            handlers,
            level: AtomicU8::new(Level::Info.as_u8()),
            backtrace_flush_level: AtomicU8::new(Level::None.as_u8()),
            backtrace_enabled: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handler list snapshot taken at logger creation; the backend iterates
    /// it without further synchronization.
    #[inline]
    pub(crate) fn handlers(&self) -> &[HandlerRef] {
        &self.handlers
    }

    #[inline]
    pub(crate) fn level(&self) -> Level {
        // The stored value only ever comes from a Level.
        Level::from_u8(self.level.load(Ordering::Relaxed)).unwrap_or(Level::None)
    }

    #[inline]
    pub(crate) fn backtrace_flush_level(&self) -> Level {
        Level::from_u8(self.backtrace_flush_level.load(Ordering::Relaxed)).unwrap_or(Level::None)
    }

    #[inline]
    pub(crate) fn backtrace_enabled(&self) -> bool {
        self.backtrace_enabled.load(Ordering::Relaxed)
    }
}

// Control-message descriptors. These are ordinary statically-allocated
// call sites; their addresses identify the event kind to the backend the
// same way user statements do.

static INIT_BACKTRACE_DESCRIPTOR: CallsiteDescriptor = CallsiteDescriptor::new(
    MacroMetadata::new(
        file!(),
        "fastlog::logger",
        line!(),
        "{}",
        Level::Critical,
        EventKind::InitBacktrace,
        false,
    ),
    <(u64,) as ArgTuple>::decode,
);

static FLUSH_BACKTRACE_DESCRIPTOR: CallsiteDescriptor = CallsiteDescriptor::new(
    MacroMetadata::new(
        file!(),
        "fastlog::logger",
        line!(),
        "",
        Level::Critical,
        EventKind::FlushBacktrace,
        false,
    ),
    <() as ArgTuple>::decode,
);

static FLUSH_DESCRIPTOR: CallsiteDescriptor = CallsiteDescriptor::new(
    MacroMetadata::new(
        file!(),
        "fastlog::logger",
        line!(),
        "",
        Level::Critical,
        EventKind::Flush,
        false,
    ),
    <(u64,) as ArgTuple>::decode,
);

const FLUSH_POLL: Duration = Duration::from_micros(100);

/// Cheap, cloneable handle producers log through.
///
/// The hot path performs a relaxed level load, a size precomputation, one
/// reservation in this thread's SPSC queue, the argument encode, and a
/// release publish. It never takes a lock and never blocks.
#[derive(Clone)]
pub struct Logger {
    details: Arc<LoggerDetails>,
    registry: Arc<ThreadContextRegistry>,
    mode: TimestampMode,
}

impl Logger {
    pub(crate) fn new(
        details: Arc<LoggerDetails>,
        registry: Arc<ThreadContextRegistry>,
        mode: TimestampMode,
    ) -> Self {
        Self {
            details,
            registry,
            mode,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.details.name()
    }

    /// Current threshold. Relaxed load: a racing `set_level` may expose
    /// either value to in-flight statements, never a torn one.
    #[inline]
    pub fn level(&self) -> Level {
        self.details.level()
    }

    /// Set the threshold. `Level::Backtrace` is reserved and rejected
    /// without mutating anything.
    pub fn set_level(&self, level: Level) -> Result<(), ConfigError> {
        if level == Level::Backtrace {
            return Err(ConfigError::ReservedLevel);
        }
        self.details.level.store(level.as_u8(), Ordering::Relaxed);
        Ok(())
    }

    #[inline]
    pub fn should_log(&self, level: Level) -> bool {
        level >= self.level()
    }

    /// Gate for backtrace-path statements: they must reach the backend
    /// whenever a backtrace ring exists, even below the threshold.
    #[doc(hidden)]
    #[inline]
    pub fn backtrace_should_log(&self, level: Level) -> bool {
        self.details.backtrace_enabled() || self.should_log(level)
    }

    /// The hot path: serialize one statement into this thread's queue.
    ///
    /// The level gate is the caller's job (the statement macros inline it
    /// before touching the arguments).
    #[inline]
    pub fn log<A: ArgTuple>(&self, descriptor: &'static CallsiteDescriptor, args: A) {
        if !self.log_record(descriptor, args) {
            self.registry.local_context().note_dropped();
        }
    }

    /// Serialize without drop accounting; returns false when a bounded
    /// queue was full.
    fn log_record<A: ArgTuple>(&self, descriptor: &'static CallsiteDescriptor, args: A) -> bool {
        let ctx = self.registry.local_context();

        let mut scratch = CStrScratch::new();
        let args_size = args.encoded_size(&mut scratch);
        scratch.rewind();

        let total = align_up(HEADER_SIZE + args_size, RESERVATION_ALIGN);
        debug_assert!(total <= MAX_RECORD_SIZE, "record of {total} bytes");

        let Some(buf) = ctx.queue().prepare_write(total) else {
            return false;
        };

        let header = RecordHeader {
            descriptor: descriptor as *const CallsiteDescriptor as usize,
            logger: Arc::as_ptr(&self.details) as usize,
            timestamp: self.mode.now(),
        };

        // SAFETY: `buf` is `total` bytes at RESERVATION_ALIGN; the header
        // fits by construction and the encode pass writes exactly the bytes
        // the size pass measured, inside the reservation.
        unsafe {
            let out = buf.as_mut_ptr();
            std::ptr::write(out.cast::<RecordHeader>(), header);
            let written = args.encode(out.add(HEADER_SIZE), &mut scratch);
            debug_assert_eq!(written, args_size, "size pass and encode pass disagree");
        }

        ctx.queue().commit_write(total);
        true
    }

    /// Per-call-site descriptor materialization used by the statement
    /// macros: first execution creates the descriptor (metadata plus this
    /// argument tuple's decoder), later executions are one atomic load.
    #[doc(hidden)]
    #[inline]
    pub fn log_with<A: ArgTuple>(
        &self,
        slot: &'static OnceLock<CallsiteDescriptor>,
        metadata: &'static MacroMetadata,
        args: A,
    ) {
        let descriptor = slot.get_or_init(|| CallsiteDescriptor::new(*metadata, A::decode));
        self.log(descriptor, args);
    }

    /// Configure this logger's backtrace ring: keep up to `capacity`
    /// backtrace-path records below the threshold, and replay them
    /// automatically whenever a record at `flush_level` or above is
    /// dispatched (`Level::None` means replay only on demand).
    ///
    /// The capacity travels to the backend as an ordinary encoded argument
    /// so it takes effect in stream order.
    pub fn init_backtrace(&self, capacity: usize, flush_level: Level) -> Result<(), ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::EmptyBacktrace);
        }
        self.details
            .backtrace_flush_level
            .store(flush_level.as_u8(), Ordering::Relaxed);
        self.details.backtrace_enabled.store(true, Ordering::Relaxed);
        self.log(&INIT_BACKTRACE_DESCRIPTOR, (capacity as u64,));
        Ok(())
    }

    /// Replay and empty this logger's backtrace ring on demand.
    pub fn flush_backtrace(&self) {
        self.log(&FLUSH_BACKTRACE_DESCRIPTOR, ());
    }

    /// Enqueue a flush marker carrying `signal` and return once it is in
    /// the queue. The backend sets the signal after dispatching everything
    /// that preceded the marker.
    pub(crate) fn enqueue_flush(&self, signal: &Arc<AtomicBool>) {
        loop {
            let raw = Arc::into_raw(Arc::clone(signal)) as usize;
            if self.log_record(&FLUSH_DESCRIPTOR, (raw as u64,)) {
                return;
            }
            // Bounded queue full: reclaim the clone and retry once the
            // backend has drained some room.
            // SAFETY: this is the pointer produced by Arc::into_raw above;
            // the backend never saw it because the record was not enqueued.
            unsafe { drop(Arc::from_raw(raw as *const AtomicBool)) };
            std::thread::sleep(FLUSH_POLL);
        }
    }

    /// Block until the backend has dispatched every record enqueued before
    /// this call (from this thread; other threads' records are drained up
    /// to the marker's timestamp). No-op cheap when already drained.
    pub(crate) fn flush_blocking(&self) {
        let signal = Arc::new(AtomicBool::new(false));
        self.enqueue_flush(&signal);
        while !signal.load(Ordering::Acquire) {
            std::thread::sleep(FLUSH_POLL);
        }
    }

    pub(crate) fn details(&self) -> &Arc<LoggerDetails> {
        &self.details
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueKind;

    fn test_logger(kind: QueueKind) -> (Logger, Arc<ThreadContextRegistry>) {
        let registry = ThreadContextRegistry::new(kind);
        let details = Arc::new(LoggerDetails::new("test", Vec::new()));
        (
            Logger::new(details, Arc::clone(&registry), TimestampMode::Wall),
            registry,
        )
    }

    #[test]
    fn test_level_gate() {
        let (logger, _registry) = test_logger(QueueKind::Bounded { capacity: 1024 });
        assert_eq!(logger.level(), Level::Info);
        assert!(logger.should_log(Level::Info));
        assert!(logger.should_log(Level::Critical));
        assert!(!logger.should_log(Level::Debug));

        logger.set_level(Level::Warning).unwrap();
        assert!(!logger.should_log(Level::Info));
        assert!(logger.should_log(Level::Warning));
    }

    #[test]
    fn test_set_level_rejects_backtrace() {
        let (logger, _registry) = test_logger(QueueKind::Bounded { capacity: 1024 });
        let before = logger.level();
        assert_eq!(
            logger.set_level(Level::Backtrace),
            Err(ConfigError::ReservedLevel)
        );
        assert_eq!(logger.level(), before, "failed set_level must not mutate");
    }

    #[test]
    fn test_init_backtrace_rejects_zero_capacity() {
        let (logger, _registry) = test_logger(QueueKind::Bounded { capacity: 1024 });
        assert_eq!(
            logger.init_backtrace(0, Level::Error),
            Err(ConfigError::EmptyBacktrace)
        );
        assert!(!logger.details.backtrace_enabled());
    }

    static WIRE_DESCRIPTOR: CallsiteDescriptor = CallsiteDescriptor::new(
        MacroMetadata::new(
            file!(),
            "fastlog::logger::tests",
            line!(),
            "a={} b={}",
            Level::Info,
            EventKind::Log,
            false,
        ),
        <(i32, &'static str) as ArgTuple>::decode,
    );

    #[test]
    fn test_record_wire_format_round_trip() {
        let (logger, registry) = test_logger(QueueKind::Bounded { capacity: 4096 });
        logger.log(&WIRE_DESCRIPTOR, (41i32, "answer"));

        let ctx = registry.local_context();
        let bytes = ctx.queue().prepare_read().expect("record committed");

        // SAFETY: records start with a RecordHeader at an aligned offset.
        let header = unsafe { std::ptr::read(bytes.as_ptr().cast::<RecordHeader>()) };
        assert_eq!(
            header.descriptor,
            &WIRE_DESCRIPTOR as *const CallsiteDescriptor as usize
        );
        assert_eq!(
            header.logger,
            Arc::as_ptr(logger.details()) as usize
        );
        assert!(header.timestamp > 0);

        // SAFETY: header.descriptor was written from a &'static just above.
        let descriptor = unsafe { &*(header.descriptor as *const CallsiteDescriptor) };
        let decoded = descriptor.decode(&bytes[HEADER_SIZE..]).unwrap();
        assert_eq!(decoded.text, "a=41 b=answer");

        let total = align_up(HEADER_SIZE + decoded.consumed, RESERVATION_ALIGN);
        assert_eq!(total, bytes.len(), "committed and consumed lengths differ");
        ctx.queue().finish_read(total);
        assert!(ctx.queue().is_empty());
    }

    #[test]
    fn test_bounded_overflow_counts_drops() {
        let (logger, registry) = test_logger(QueueKind::Bounded { capacity: 64 });
        // 64-byte queue: a header-only record is 24 bytes, so two fit
        // (24 + 24, then 16 free < 24).
        for _ in 0..5 {
            logger.log(&WIRE_DESCRIPTOR, (1i32, "x"));
        }
        let ctx = registry.local_context();
        assert!(ctx.dropped() > 0);
        let stored = {
            let mut count = 0;
            while let Some(bytes) = ctx.queue().prepare_read() {
                let descriptor = unsafe {
                    let header = std::ptr::read(bytes.as_ptr().cast::<RecordHeader>());
                    &*(header.descriptor as *const CallsiteDescriptor)
                };
                let decoded = descriptor.decode(&bytes[HEADER_SIZE..]).unwrap();
                ctx.queue()
                    .finish_read(align_up(HEADER_SIZE + decoded.consumed, RESERVATION_ALIGN));
                count += 1;
            }
            count
        };
        assert_eq!(stored + ctx.dropped(), 5, "no record may vanish unaccounted");
    }
}
