//! Side channel for bridge scheduling failures.
//!
//! Writes here must never go through `tracing`: a log layer that forwards
//! records to clients would submit them back through the bridge, and a bridge
//! that is down would log again, without end.

use std::io::Write;

use parking_lot::Mutex;

pub trait DiagnosticSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Writes straight to the process stderr handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrDiagnostics;

impl DiagnosticSink for StderrDiagnostics {
    fn write_line(&self, line: &str) {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = writeln!(handle, "{}", line);
    }
}

/// Keeps lines in memory; used by tests and embedders that surface them elsewhere.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    lines: Mutex<Vec<String>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl DiagnosticSink for MemoryDiagnostics {
    fn write_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}
