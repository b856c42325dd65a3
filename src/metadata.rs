// SPDX-License-Identifier: Apache-2.0 OR MIT
// Compile-time call-site metadata and the per-call-site descriptor

use crate::codec::DecodeFn;
use crate::level::Level;
use serde::{Deserialize, Serialize};

/// What a queued record means to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// An ordinary log statement
    Log,
    /// Control: configure the owning logger's backtrace ring
    InitBacktrace,
    /// Control: replay and empty the owning logger's backtrace ring
    FlushBacktrace,
    /// Control: wake the producer blocked on [`Engine::flush`](crate::Engine::flush)
    Flush,
}

/// Immutable description of one logging statement, constructed in const
/// context by the statement macros and alive for the whole process.
#[derive(Debug, Clone, Copy)]
pub struct MacroMetadata {
    file: &'static str,
    file_name: &'static str,
    target: &'static str,
    line: u32,
    format: &'static str,
    level: Level,
    kind: EventKind,
    backtrace_path: bool,
}

impl MacroMetadata {
    pub const fn new(
        file: &'static str,
        target: &'static str,
        line: u32,
        format: &'static str,
        level: Level,
        kind: EventKind,
        backtrace_path: bool,
    ) -> Self {
        Self {
            file,
            file_name: file_name_of(file),
            target,
            line,
            format,
            level,
            kind,
            backtrace_path,
        }
    }

    /// Full source path as given by `file!()`.
    #[inline]
    pub const fn file(&self) -> &'static str {
        self.file
    }

    /// Path suffix after the last separator.
    #[inline]
    pub const fn file_name(&self) -> &'static str {
        self.file_name
    }

    /// Enclosing module path (Rust has no function-name macro; the module
    /// path plays the role the function name plays in rendered output).
    #[inline]
    pub const fn target(&self) -> &'static str {
        self.target
    }

    #[inline]
    pub const fn line(&self) -> u32 {
        self.line
    }

    /// The user-provided message format string.
    #[inline]
    pub const fn format(&self) -> &'static str {
        self.format
    }

    #[inline]
    pub const fn level(&self) -> Level {
        self.level
    }

    #[inline]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// True when the statement was emitted through the backtrace path and
    /// may be buffered instead of dispatched (see backend routing).
    #[inline]
    pub const fn backtrace_path(&self) -> bool {
        self.backtrace_path
    }
}

/// Extract everything after the last path separator.
const fn file_name_of(path: &'static str) -> &'static str {
    let bytes = path.as_bytes();
    let mut i = bytes.len();
    while i > 0 {
        if bytes[i - 1] == b'/' || bytes[i - 1] == b'\\' {
            break;
        }
        i -= 1;
    }
    let (_, tail) = bytes.split_at(i);
    // SAFETY: `i` is 0 or just past an ASCII separator, so `tail` starts on
    // a character boundary of a valid UTF-8 string.
    unsafe { core::str::from_utf8_unchecked(tail) }
}

/// One statically-allocated descriptor per distinct logging statement.
///
/// The descriptor pairs the statement metadata with the monomorphized
/// decoder for the statement's argument tuple. Its address is stable for
/// the life of the process and is the identity the backend reads out of
/// every record header; no schema ever travels through the queues.
pub struct CallsiteDescriptor {
    metadata: MacroMetadata,
    decode: DecodeFn,
}

impl CallsiteDescriptor {
    pub const fn new(metadata: MacroMetadata, decode: DecodeFn) -> Self {
        Self { metadata, decode }
    }

    #[inline]
    pub fn metadata(&self) -> &MacroMetadata {
        &self.metadata
    }

    /// Walk the encoded argument bytes and produce the formatted message.
    /// Returns the rendered text and the exact number of argument bytes
    /// consumed, which the backend checks against the committed length.
    #[inline]
    pub fn decode(&self, bytes: &[u8]) -> Result<crate::codec::Decoded, crate::codec::DecodeError> {
        (self.decode)(self.metadata.format, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_extraction() {
        assert_eq!(file_name_of("src/backend.rs"), "backend.rs");
        assert_eq!(file_name_of("/a/b/c/lib.rs"), "lib.rs");
        assert_eq!(file_name_of("plain.rs"), "plain.rs");
        assert_eq!(file_name_of(r"win\path\mod.rs"), "mod.rs");
    }

    #[test]
    fn test_metadata_is_const_constructible() {
        static META: MacroMetadata = MacroMetadata::new(
            "src/some/module.rs",
            "crate::some::module",
            42,
            "x={}",
            Level::Info,
            EventKind::Log,
            false,
        );
        assert_eq!(META.file_name(), "module.rs");
        assert_eq!(META.line(), 42);
        assert_eq!(META.level(), Level::Info);
        assert_eq!(META.kind(), EventKind::Log);
        assert!(!META.backtrace_path());
    }
}
