use crate::sync::{Severity, StatusSink};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub level: Severity,
    pub message: String,
}

/// Bounded buffer of the most recent status messages.
#[derive(Clone)]
pub struct LogBuffer {
    buffer: Arc<Mutex<VecDeque<LogEntry>>>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(max_entries))),
            max_entries,
        }
    }

    pub fn add_log(&self, level: Severity, message: String) {
        let entry = LogEntry {
            timestamp: Utc::now().timestamp(),
            level,
            message,
        };

        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.max_entries {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }

    /// Oldest first; `limit` keeps only the newest `n`.
    pub fn get_logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        let buffer = self.buffer.lock();
        let skip = match limit {
            Some(n) => buffer.len().saturating_sub(n),
            None => 0,
        };
        buffer.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl StatusSink for LogBuffer {
    fn emit(&self, severity: Severity, message: String) {
        self.add_log(severity, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_newest_entries() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.info(format!("message {}", i));
        }

        let logs = buffer.get_logs(None);
        let messages: Vec<_> = logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["message 2", "message 3", "message 4"]);
    }

    #[test]
    fn limit_returns_tail() {
        let buffer = LogBuffer::new(10);
        buffer.success("a".into());
        buffer.error("b".into());
        buffer.warning("c".into());

        let logs = buffer.get_logs(Some(2));
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "b");
        assert_eq!(logs[0].level, Severity::Error);
        assert_eq!(logs[1].level, Severity::Warning);

        buffer.clear();
        assert!(buffer.get_logs(None).is_empty());
    }
}
