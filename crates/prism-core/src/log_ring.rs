// SPDX-License-Identifier: CEPL-1.0
use std::collections::VecDeque;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    /// Monotonic sequence number, never reused even after eviction.
    pub seq: u64,
    pub level: LogLevel,
    pub text: String,
}

/// Bounded console buffer. Oldest lines are evicted once `capacity` is reached.
///
/// Owned by the application and handed out by `&mut` to whatever needs to
/// append; every appended line is mirrored to `tracing` as well.
#[derive(Debug)]
pub struct LogRing {
    lines: VecDeque<LogLine>,
    capacity: usize,
    next_seq: u64,
}

impl LogRing {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            next_seq: 0,
        }
    }

    pub fn push(&mut self, level: LogLevel, text: impl Into<String>) {
        let text = text.into();
        match level {
            LogLevel::Info => tracing::info!("{text}"),
            LogLevel::Warn => tracing::warn!("{text}"),
            LogLevel::Error => tracing::error!("{text}"),
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(LogLine {
            seq: self.next_seq,
            level,
            text,
        });
        self.next_seq += 1;
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Info, text);
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Warn, text);
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Error, text);
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sequence number the next pushed line will get. Lets a view detect new output.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_lines_in_order_below_capacity() {
        let mut ring = LogRing::with_capacity(4);
        ring.info("a");
        ring.warn("b");
        let texts: Vec<_> = ring.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["a", "b"]);
        assert_eq!(ring.iter().nth(1).map(|l| l.level), Some(LogLevel::Warn));
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut ring = LogRing::with_capacity(3);
        for i in 0..10 {
            ring.info(format!("line {i}"));
        }
        assert_eq!(ring.len(), 3);
        let texts: Vec<_> = ring.iter().map(|l| l.text.clone()).collect();
        assert_eq!(texts, ["line 7", "line 8", "line 9"]);
    }

    #[test]
    fn sequence_survives_eviction_and_clear() {
        let mut ring = LogRing::with_capacity(2);
        ring.info("x");
        ring.info("y");
        ring.info("z");
        assert_eq!(ring.iter().next().map(|l| l.seq), Some(1));
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.next_seq(), 3);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut ring = LogRing::with_capacity(0);
        ring.error("only");
        ring.error("latest");
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.iter().map(|l| l.text.as_str()).collect::<Vec<_>>(), ["latest"]);
    }
}
