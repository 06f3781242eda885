use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

/// Receives human-readable progress. Implementations must not block.
pub trait StatusSink: Send + Sync {
    fn emit(&self, severity: Severity, message: String);

    fn info(&self, message: String) {
        self.emit(Severity::Info, message);
    }

    fn success(&self, message: String) {
        self.emit(Severity::Success, message);
    }

    fn warning(&self, message: String) {
        self.emit(Severity::Warning, message);
    }

    fn error(&self, message: String) {
        self.emit(Severity::Error, message);
    }
}
