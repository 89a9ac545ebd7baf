//! Diagnostic and report output sinks.
//!
//! This module provides the [`ReportSink`] trait for customizing where
//! progress and diagnostic lines go. The sink is shared by the control
//! thread and all pool workers, so implementations must serialize writes.

use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;

/// Severity of a diagnostic line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Progress and informational outcomes
    Info,
    /// Recoverable problems (rejections, per-entry errors)
    Warn,
    /// Failures worth operator attention (task panics, fatal errors)
    Error,
}

/// Trait for consuming diagnostic and report lines.
///
/// Implementations must be safe to call concurrently from multiple worker
/// threads; ordering is only guaranteed per writer.
///
/// # Example
///
/// ```ignore
/// use pesift_core::report::{ReportSink, Severity};
///
/// struct PrefixSink;
///
/// impl ReportSink for PrefixSink {
///     fn line(&self, severity: Severity, message: &str) {
///         eprintln!("[{severity:?}] {message}");
///     }
/// }
/// ```
pub trait ReportSink: Send + Sync {
    /// Consume a single diagnostic line
    fn line(&self, severity: Severity, message: &str);

    /// Separate channel for files rejected because their buffer could not
    /// be allocated; these are flagged as unsupported rather than invalid
    fn unsupported(&self, path: &Path) {
        self.line(
            Severity::Warn,
            &format!("unsupported file: {}", path.display()),
        );
    }
}

/// A no-op sink that discards all output
pub struct NullSink;

impl ReportSink for NullSink {
    fn line(&self, _severity: Severity, _message: &str) {}
}

/// Sink that writes info lines to stdout and warn/error lines to stderr.
///
/// A single mutex serializes all writes so lines from concurrent workers
/// never interleave.
pub struct ConsoleSink {
    lock: Mutex<()>,
}

impl ConsoleSink {
    /// Creates a new console sink
    pub fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportSink for ConsoleSink {
    fn line(&self, severity: Severity, message: &str) {
        let _guard = self.lock.lock();
        match severity {
            Severity::Info => {
                let _ = writeln!(std::io::stdout(), "{message}");
            }
            Severity::Warn | Severity::Error => {
                let _ = writeln!(std::io::stderr(), "{message}");
            }
        }
    }
}

/// Sink that records every line in memory; used by tests
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(Severity, String)>>,
    unsupported: Mutex<Vec<std::path::PathBuf>>,
}

impl MemorySink {
    /// Creates a new empty memory sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded lines
    pub fn lines(&self) -> Vec<(Severity, String)> {
        self.lines.lock().clone()
    }

    /// Returns true if any recorded line contains the given fragment
    pub fn contains(&self, fragment: &str) -> bool {
        self.lines.lock().iter().any(|(_, m)| m.contains(fragment))
    }

    /// Returns a copy of all paths reported as unsupported
    pub fn unsupported_paths(&self) -> Vec<std::path::PathBuf> {
        self.unsupported.lock().clone()
    }
}

impl ReportSink for MemorySink {
    fn line(&self, severity: Severity, message: &str) {
        self.lines.lock().push((severity, message.to_string()));
    }

    fn unsupported(&self, path: &Path) {
        self.unsupported.lock().push(path.to_path_buf());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink() {
        let sink = NullSink;
        sink.line(Severity::Info, "ignored");
        sink.unsupported(Path::new("/tmp/x"));
    }

    #[test]
    fn test_memory_sink_records_lines() {
        let sink = MemorySink::new();
        sink.line(Severity::Info, "hello");
        sink.line(Severity::Warn, "world");

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], (Severity::Info, "hello".to_string()));
        assert!(sink.contains("world"));
    }

    #[test]
    fn test_memory_sink_unsupported_channel() {
        let sink = MemorySink::new();
        sink.unsupported(Path::new("/tmp/huge.bin"));

        assert!(sink.lines().is_empty());
        assert_eq!(sink.unsupported_paths().len(), 1);
    }

    #[test]
    fn test_memory_sink_concurrent_writers() {
        use std::sync::Arc;

        let sink = Arc::new(MemorySink::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        sink.line(Severity::Info, &format!("w{i} l{j}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(sink.lines().len(), 200);
    }
}
