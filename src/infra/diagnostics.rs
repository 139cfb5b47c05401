//! Explicit diagnostics handle.
//!
//! Components that surface advisory warnings take a `DiagnosticSink` instead
//! of writing to a global logger directly, so callers decide where warnings go.

use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub severity: Severity,
    pub component: &'static str,
    pub message: String,
}

pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, entry: DiagnosticEntry);

    fn warn(&self, component: &'static str, message: String) {
        self.emit(DiagnosticEntry {
            severity: Severity::Warning,
            component,
            message,
        });
    }

    fn info(&self, component: &'static str, message: String) {
        self.emit(DiagnosticEntry {
            severity: Severity::Info,
            component,
            message,
        });
    }
}

/// Forwards to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&self, entry: DiagnosticEntry) {
        match entry.severity {
            Severity::Info => log::info!(target: entry.component, "{}", entry.message),
            Severity::Warning => log::warn!(target: entry.component, "{}", entry.message),
        }
    }
}

/// Keeps every entry in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<DiagnosticEntry>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<DiagnosticEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.severity == Severity::Warning)
            .map(|e| e.message)
            .collect()
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, entry: DiagnosticEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}
