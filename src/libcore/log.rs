// Ring-buffered kernel log, separate from the character-trace diagnostics
// the dispatcher and supervisor-call handlers write straight to the
// platform's console. This is for internal conditions that aren't part of
// the syscall ABI's own trace (process table exhaustion, pipe allocation
// failure, and the like).

use core::sync::atomic::{AtomicUsize, Ordering};

const LOG_CAPACITY: usize = 32;
const MESSAGE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

#[derive(Clone, Copy)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: [u8; MESSAGE_CAPACITY],
    pub len: usize,
}

/// Fixed-capacity circular log, overwriting the oldest entry when full.
pub struct LogRing {
    entries: [Option<LogEntry>; LOG_CAPACITY],
    head: AtomicUsize,
}

impl LogRing {
    pub const fn new() -> Self {
        Self {
            entries: [None; LOG_CAPACITY],
            head: AtomicUsize::new(0),
        }
    }

    pub fn push(&mut self, level: LogLevel, text: &str) {
        let mut message = [0u8; MESSAGE_CAPACITY];
        let len = core::cmp::min(text.len(), MESSAGE_CAPACITY);
        message[..len].copy_from_slice(&text.as_bytes()[..len]);

        let head = self.head.load(Ordering::Relaxed);
        self.entries[head] = Some(LogEntry { level, message, len });
        self.head.store((head + 1) % LOG_CAPACITY, Ordering::Relaxed);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = LogEntry> + '_ {
        self.entries.iter_mut().filter_map(|slot| slot.take())
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_drain_preserves_message() {
        let mut ring = LogRing::new();
        ring.push(LogLevel::Warn, "descriptor table full");
        let entries: heapless::Vec<LogEntry, 4> = ring.drain().collect();
        assert_eq!(entries.len(), 1);
        let msg = &entries[0].message[..entries[0].len];
        assert_eq!(msg, b"descriptor table full");
        assert_eq!(entries[0].level, LogLevel::Warn);
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let mut ring = LogRing::new();
        for i in 0..(LOG_CAPACITY + 1) {
            let _ = i;
            ring.push(LogLevel::Info, "x");
        }
        let entries: heapless::Vec<LogEntry, 64> = ring.drain().collect();
        assert_eq!(entries.len(), LOG_CAPACITY);
    }
}
