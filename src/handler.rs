// Output handlers: where the backend sends formatted records

use crate::level::Level;
use crate::metadata::MacroMetadata;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Metadata delivered alongside each formatted message.
pub struct RecordMeta<'a> {
    /// Wall-clock nanoseconds since the Unix epoch (cycle counts are
    /// already converted by the backend)
    pub timestamp_ns: u64,
    /// OS thread id of the producing thread
    pub thread_id: u32,
    pub logger_name: &'a str,
    pub metadata: &'static MacroMetadata,
}

impl RecordMeta<'_> {
    #[inline]
    pub fn level(&self) -> Level {
        self.metadata.level()
    }
}

/// Output sink for formatted records.
///
/// Handlers are invoked only by the backend thread, so implementations need
/// no synchronization of their own. The engine assumes handlers do not
/// fail; a panicking handler is isolated (other handlers still run) and
/// reported to the diagnostic side-channel.
pub trait Handler: Send {
    /// Write one formatted record to the sink
    fn write(&mut self, text: &str, meta: &RecordMeta<'_>);

    /// Flush any buffered output
    fn flush(&mut self);
}

/// Shared handle to a handler; loggers keep a list of these and the backend
/// locks them (uncontended) at dispatch.
pub type HandlerRef = Arc<Mutex<dyn Handler>>;

/// Wrap a handler for attachment to loggers.
pub fn handler_ref(handler: impl Handler + 'static) -> HandlerRef {
    Arc::new(Mutex::new(handler))
}

fn render_line(
    out: &mut impl Write,
    text: &str,
    meta: &RecordMeta<'_>,
) -> std::io::Result<()> {
    let timestamp = chrono::DateTime::from_timestamp_nanos(meta.timestamp_ns as i64)
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S%.6f");
    writeln!(
        out,
        "[{}] [{}] [{}] [{}:{}] {}",
        timestamp,
        meta.level(),
        meta.logger_name,
        meta.metadata.file_name(),
        meta.metadata.line(),
        text
    )
}

/// Standard output handler
pub struct StdoutHandler {
    stdout: std::io::Stdout,
}

impl StdoutHandler {
    pub fn new() -> Self {
        Self {
            stdout: std::io::stdout(),
        }
    }
}

impl Default for StdoutHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for StdoutHandler {
    fn write(&mut self, text: &str, meta: &RecordMeta<'_>) {
        let _ = render_line(&mut self.stdout, text, meta);
    }

    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }
}

/// Standard error handler
pub struct StderrHandler {
    stderr: std::io::Stderr,
}

impl StderrHandler {
    pub fn new() -> Self {
        Self {
            stderr: std::io::stderr(),
        }
    }
}

impl Default for StderrHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for StderrHandler {
    fn write(&mut self, text: &str, meta: &RecordMeta<'_>) {
        let _ = render_line(&mut self.stderr, text, meta);
    }

    fn flush(&mut self) {
        let _ = self.stderr.flush();
    }
}
