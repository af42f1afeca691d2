//! Non-fatal ingestion events.
//!
//! Function conflicts and skipped symbols are expected in real images and
//! are not errors. They are reported through an injectable sink so callers
//! can log them, show them, or assert on them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// A function symbol overlapped functions inserted before it and was
    /// kept in `symbols` only.
    FunctionConflict {
        rejected: String,
        start: u64,
        end: u64,
        incumbents: Vec<String>,
    },
    /// A symbol could not be stored at all.
    SymbolSkipped {
        name: String,
        addr: u64,
        reason: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::FunctionConflict {
                rejected,
                start,
                end,
                incumbents,
            } => write!(
                f,
                "function {}@[{:#x}, {:#x}) overlaps {}",
                rejected,
                start,
                end,
                incumbents.join(", ")
            ),
            Diagnostic::SymbolSkipped { name, addr, reason } => {
                write!(f, "symbol {}@{:#x} skipped: {}", name, addr, reason)
            }
        }
    }
}

/// Receives diagnostics as ingestion publishes them.
pub trait DiagnosticSink {
    fn report(&self, diagnostic: Diagnostic);
}

/// Logs every diagnostic at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::FunctionConflict {
                rejected,
                start,
                incumbents,
                ..
            } => warn!(
                rejected = %rejected,
                addr = format_args!("{:#x}", start),
                incumbents = ?incumbents,
                "Function conflict, keeping first-inserted"
            ),
            Diagnostic::SymbolSkipped { name, addr, reason } => warn!(
                symbol = %name,
                addr = format_args!("{:#x}", addr),
                reason = %reason,
                "Symbol skipped"
            ),
        }
    }
}

/// Keeps diagnostics in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything reported so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Drain everything reported so far.
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(
            &mut *self
                .events
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, diagnostic: Diagnostic) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        sink.report(Diagnostic::SymbolSkipped {
            name: "bad".to_string(),
            addr: 0x10,
            reason: "overflow".to_string(),
        });
        assert_eq!(sink.diagnostics().len(), 1);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.diagnostics().is_empty());
    }

    #[test]
    fn test_display() {
        let d = Diagnostic::FunctionConflict {
            rejected: "f2".to_string(),
            start: 15,
            end: 25,
            incumbents: vec!["f1".to_string()],
        };
        assert_eq!(d.to_string(), "function f2@[0xf, 0x19) overlaps f1");
        TracingSink.report(d);
    }
}
