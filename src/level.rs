// Log severity levels, ordered least to most severe

use serde::{Deserialize, Serialize};

/// Log statement severity. Higher values are more severe; a statement is
/// emitted when its level is greater than or equal to the logger threshold.
///
/// `Backtrace` is internal: it sits above `Critical` so backtrace statements
/// always pass the gate of any logger with backtrace recording enabled, and
/// it is rejected as a logger threshold (see [`Logger::set_level`]).
///
/// [`Logger::set_level`]: crate::Logger::set_level
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    /// Most verbose trace level
    TraceL3 = 0,
    TraceL2 = 1,
    TraceL1 = 2,
    Debug = 3,
    Info = 4,
    Warning = 5,
    Error = 6,
    Critical = 7,
    /// Internal marker for backtrace statements; not a valid threshold
    Backtrace = 8,
    /// Threshold that disables all logging
    None = 9,
}

impl Level {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Level name as a static string, suitable for rendered output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::TraceL3 => "TRACE_L3",
            Level::TraceL2 => "TRACE_L2",
            Level::TraceL1 => "TRACE_L1",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
            Level::Backtrace => "BACKTRACE",
            Level::None => "NONE",
        }
    }

    /// Compact single- or two-letter form.
    pub const fn short_str(self) -> &'static str {
        match self {
            Level::TraceL3 => "T3",
            Level::TraceL2 => "T2",
            Level::TraceL1 => "T1",
            Level::Debug => "D",
            Level::Info => "I",
            Level::Warning => "W",
            Level::Error => "E",
            Level::Critical => "C",
            Level::Backtrace => "BT",
            Level::None => "N",
        }
    }

    /// Create from a u8 value (returns None if out of range)
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Level::TraceL3),
            1 => Some(Level::TraceL2),
            2 => Some(Level::TraceL1),
            3 => Some(Level::Debug),
            4 => Some(Level::Info),
            5 => Some(Level::Warning),
            6 => Some(Level::Error),
            7 => Some(Level::Critical),
            8 => Some(Level::Backtrace),
            9 => Some(Level::None),
            _ => None,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::TraceL3 < Level::TraceL2);
        assert!(Level::TraceL2 < Level::TraceL1);
        assert!(Level::TraceL1 < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Critical);
        assert!(Level::Critical < Level::Backtrace);
        assert!(Level::Backtrace < Level::None);
    }

    #[test]
    fn test_level_values() {
        assert_eq!(Level::TraceL3.as_u8(), 0);
        assert_eq!(Level::None.as_u8(), 9);
    }

    #[test]
    fn test_level_from_u8() {
        assert_eq!(Level::from_u8(0), Some(Level::TraceL3));
        assert_eq!(Level::from_u8(8), Some(Level::Backtrace));
        assert_eq!(Level::from_u8(10), None);
    }

    #[test]
    fn test_level_display() {
        assert_eq!(format!("{}", Level::Warning), "WARNING");
        assert_eq!(Level::TraceL1.short_str(), "T1");
    }

    #[test]
    fn test_level_serde_round_trip() {
        let json = serde_json::to_string(&Level::Info).unwrap();
        let back: Level = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Level::Info);
    }
}
