//! # pesift-core
//!
//! A library for concurrently sweeping directory trees for PE candidate files.
//!
//! This crate provides the core functionality for:
//! - Walking a directory tree depth-first while skipping symlinks and
//!   surviving per-entry filesystem races
//! - Cheap multi-stage pre-validation of candidate files (size bounds,
//!   `MZ` signature sniff, structural header probe)
//! - Fanning file-level work out to a fixed-capacity worker pool with
//!   backpressure on the walking thread
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`walker`]: Depth-first directory traversal and task submission
//! - [`sniff`]: The candidate validation pipeline and PE header probe
//! - [`pool`]: The fixed-capacity worker pool
//! - [`report`]: Thread-safe diagnostic/report sinks
//! - [`error`]: Error types and the enumeration-error classifier
//!
//! ## Example
//!
//! ```no_run
//! use pesift_core::{ConsoleSink, PeProbe, ScanContext, Walker, WorkerPool};
//! use std::sync::Arc;
//!
//! let sink = Arc::new(ConsoleSink::new());
//! let pool = WorkerPool::new(4, sink.clone())?;
//!
//! let walker = Walker::new(&pool, Arc::new(PeProbe::new()), sink, ScanContext::current());
//! let stats = walker.walk("/opt/binaries".as_ref())?;
//!
//! drop(walker);
//! pool.join();
//! println!("submitted {} files", stats.files_submitted);
//! # Ok::<(), pesift_core::Error>(())
//! ```
//!
//! ## Extensibility
//!
//! The library provides traits for customization:
//!
//! - [`HeaderProbe`]: Plug in a different structural parser behind the
//!   validation pipeline
//! - [`ReportSink`]: Customize where diagnostic and report lines go

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod error;
pub mod pool;
pub mod report;
pub mod sniff;
pub mod walker;

// Re-export primary types for convenience
pub use error::{classify_entry_error, classify_open_error, EnumerationClass, Error, IoStage, Result, SizeReason};
pub use pool::{Task, WorkerPool};
pub use report::{ConsoleSink, MemorySink, NullSink, ReportSink, Severity};
pub use sniff::{
    sniff_file, Candidate, HeaderProbe, ImageClass, Outcome, ParsedHeader, PeProbe, RejectReason,
    Report, ScanContext, MAGIC, MAX_CANDIDATE_SIZE,
};
pub use walker::{WalkStats, Walker, DEFAULT_MAX_DEPTH};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
